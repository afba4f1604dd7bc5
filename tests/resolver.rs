use grpc_core::{
    parse_retry_pushback, parse_target, Address, ConstantResolver, DnsTarget, Ipv4Target,
    Ipv6Target, Resolution, ResolutionStream, Resolver, ResolverRegistry, RetryPushback,
    UnixTarget, VsockTarget,
};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn parse_ipv4_list() {
    let target = parse_target("ipv4:10.0.0.1:443,10.0.0.2:443").unwrap();
    let target = target.downcast_ref::<Ipv4Target>().unwrap();
    assert_eq!(target.0.len(), 2);
    assert_eq!(target.0[0].port(), 443);
}

#[test]
fn parse_ipv6_list() {
    let target = parse_target("ipv6:[::1]:50051").unwrap();
    let target = target.downcast_ref::<Ipv6Target>().unwrap();
    assert_eq!(target.0[0].port(), 50051);
}

#[test]
fn parse_unix_path() {
    let target = parse_target("unix:///var/run/app.sock").unwrap();
    let target = target.downcast_ref::<UnixTarget>().unwrap();
    assert_eq!(target.0, PathBuf::from("/var/run/app.sock"));
}

#[test]
fn parse_vsock() {
    let target = parse_target("vsock:2:50051").unwrap();
    let target = target.downcast_ref::<VsockTarget>().unwrap();
    assert_eq!((target.cid, target.port), (2, 50051));
}

#[test]
fn parse_dns_url_and_default() {
    let target = parse_target("dns://example.com:50051").unwrap();
    let target = target.downcast_ref::<DnsTarget>().unwrap();
    assert_eq!(target.host, "example.com");
    assert_eq!(target.port, 50051);

    let target = parse_target("example.com").unwrap();
    let target = target.downcast_ref::<DnsTarget>().unwrap();
    assert_eq!(target.port, DnsTarget::DEFAULT_PORT);
}

#[test]
fn parse_rejects_garbage() {
    assert!(parse_target("ipv4:not-an-address").is_err());
    assert!(parse_target("vsock:2").is_err());
    assert!(parse_target("unix:").is_err());
}

#[tokio::test]
async fn registry_matches_literal_targets() {
    let registry = ResolverRegistry::new();
    let target = parse_target("ipv4:127.0.0.1:443").unwrap();
    let mut resolver = registry.resolver_for(target.as_ref()).unwrap();
    let resolution = resolver.resolve().await.unwrap();
    assert_eq!(resolution.endpoints.len(), 1);
    assert!(matches!(
        resolution.endpoints[0].preferred(),
        Address::V4(addr) if addr.port() == 443
    ));
    assert!(resolution.service_config.is_none());
}

#[tokio::test]
async fn registry_order_is_first_match_wins() {
    let registry = ResolverRegistry::new();
    // A unix target must never fall through to the DNS catch-all.
    let target = parse_target("unix:/tmp/x.sock").unwrap();
    let mut resolver = registry.resolver_for(target.as_ref()).unwrap();
    let resolution = resolver.resolve().await.unwrap();
    assert_eq!(
        resolution.endpoints[0].preferred(),
        &Address::Unix(PathBuf::from("/tmp/x.sock"))
    );
}

#[tokio::test]
async fn constant_resolver_repeats() {
    let resolution = Resolution {
        endpoints: vec![grpc_core::Endpoint::single(Address::Vsock {
            cid: 3,
            port: 1,
        })],
        service_config: None,
    };
    let mut resolver = ConstantResolver::new(resolution);
    for _ in 0..3 {
        let result = resolver.resolve().await.unwrap();
        assert_eq!(result.endpoints.len(), 1);
    }
}

#[tokio::test]
async fn push_mode_yields_a_sequence() {
    let resolution = Resolution {
        endpoints: vec![grpc_core::Endpoint::single(Address::Vsock {
            cid: 3,
            port: 1,
        })],
        service_config: None,
    };
    let resolver = Box::new(ConstantResolver::new(resolution));
    let mut stream = ResolutionStream::spawn(resolver, Duration::from_millis(1));
    for _ in 0..3 {
        let result = stream.next().await.unwrap().unwrap();
        assert_eq!(result.endpoints.len(), 1);
    }
}

#[test]
fn method_config_lookup_order() {
    use grpc_core::{MethodConfig, ServiceConfig};
    use maplit::hashmap;

    let config = ServiceConfig::new(hashmap! {
        "svc/m".to_owned() => MethodConfig {
            timeout: Some(Duration::from_secs(1)),
            ..MethodConfig::default()
        },
        String::new() => MethodConfig::default(),
    });
    assert_eq!(
        config.method_config("svc", "m").unwrap().timeout,
        Some(Duration::from_secs(1))
    );
    assert!(config.method_config("other", "x").unwrap().timeout.is_none());
    assert!(!config.is_empty());
}

#[test]
fn retry_pushback() {
    assert_eq!(
        parse_retry_pushback("250"),
        RetryPushback::RetryAfter(Duration::from_millis(250))
    );
    assert_eq!(parse_retry_pushback("-1"), RetryPushback::StopRetrying);
    assert_eq!(parse_retry_pushback("junk"), RetryPushback::StopRetrying);
}

#[cfg(feature = "json")]
mod service_config {
    use grpc_core::{parse_service_config, select_choice, Code, ServiceConfigChoice};
    use std::time::Duration;

    fn choices(json: &str) -> Vec<ServiceConfigChoice> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn hostname_mismatch_falls_through() {
        // First choice is pinned to another host; the unconstrained second
        // choice wins.
        let choices = choices(
            r#"[
                {"clientHostname": ["other"], "serviceConfig": {"methodConfig": [
                    {"name": [{"service": "a"}], "timeout": "1s"}
                ]}},
                {"serviceConfig": {"methodConfig": [
                    {"name": [{"service": "b"}], "timeout": "2s"}
                ]}}
            ]"#,
        );
        let selected = select_choice(&choices, "myhost", 50).unwrap();
        let config = parse_service_config(selected);
        assert!(config.method_config("b", "m").is_some());
        assert!(config.method_config("a", "m").is_none());
    }

    #[test]
    fn language_tag_filters() {
        let choices = choices(
            r#"[
                {"clientLanguage": ["go", "java"], "serviceConfig": {"methodConfig": []}},
                {"clientLanguage": ["rust"], "serviceConfig": {"methodConfig": [
                    {"name": [{"service": "svc"}], "timeout": "1s"}
                ]}}
            ]"#,
        );
        let selected = select_choice(&choices, "", 100).unwrap();
        let config = parse_service_config(selected);
        assert!(config.method_config("svc", "m").is_some());
    }

    #[test]
    fn percentage_gates_selection() {
        let choices = choices(
            r#"[
                {"percentage": 30, "serviceConfig": {"methodConfig": [
                    {"name": [{"service": "gated"}], "timeout": "1s"}
                ]}}
            ]"#,
        );
        assert!(select_choice(&choices, "", 30).is_some());
        assert!(select_choice(&choices, "", 31).is_none());
    }

    #[test]
    fn method_config_resolution_order() {
        let choices = choices(
            r#"[{"serviceConfig": {"methodConfig": [
                {"name": [{"service": "svc", "method": "m"}], "timeout": "1s"},
                {"name": [{"service": "svc"}], "timeout": "2s"},
                {"name": [{}], "timeout": "3s"}
            ]}}]"#,
        );
        let config = parse_service_config(select_choice(&choices, "", 1).unwrap());
        assert_eq!(
            config.method_config("svc", "m").unwrap().timeout,
            Some(Duration::from_secs(1))
        );
        assert_eq!(
            config.method_config("svc", "other").unwrap().timeout,
            Some(Duration::from_secs(2))
        );
        assert_eq!(
            config.method_config("else", "x").unwrap().timeout,
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn retry_policy_parses() {
        let choices = choices(
            r#"[{"serviceConfig": {"methodConfig": [{
                "name": [{"service": "svc"}],
                "retryPolicy": {
                    "maxAttempts": 4,
                    "initialBackoff": "0.1s",
                    "maxBackoff": "1s",
                    "backoffMultiplier": 2.0,
                    "retryableStatusCodes": ["UNAVAILABLE", "ABORTED"]
                }
            }]}}]"#,
        );
        let config = parse_service_config(select_choice(&choices, "", 1).unwrap());
        let policy = config
            .method_config("svc", "m")
            .unwrap()
            .retry_policy
            .clone()
            .unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(
            policy.retryable_status_codes,
            vec![Code::Unavailable, Code::Aborted]
        );
    }
}
