use super::{Resolution, ResolveError, Resolver, ResolverFactory};
use crate::endpoint::{Address, Endpoint};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use log::warn;
use std::any::Any;
use std::net::{SocketAddrV4, SocketAddrV6};

/// A hostname to resolve over DNS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsTarget {
    pub host: String,
    pub port: u16,
}

impl DnsTarget {
    pub const DEFAULT_PORT: u16 = 443;
}

/// DNS resolver: A and AAAA queried in parallel, plus an optional
/// service-config lookup over TXT records at `_grpc_config.<host>`.
pub struct DnsResolver {
    host: String,
    port: u16,
    resolver: TokioAsyncResolver,
    lookup_service_config: bool,
    local_hostname: String,
}

impl DnsResolver {
    /// Resolver backed by the system configuration (`/etc/resolv.conf`).
    pub fn system(host: impl Into<String>, port: u16) -> Result<Self, ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|source| ResolveError::Configuration { source })?;
        Ok(Self::new(host, port, resolver))
    }

    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, resolver: TokioAsyncResolver) -> Self {
        Self {
            host: host.into(),
            port,
            resolver,
            lookup_service_config: false,
            local_hostname: std::env::var("HOSTNAME").unwrap_or_default(),
        }
    }

    /// Also fetch and select a service configuration on each resolution.
    #[must_use]
    pub fn with_service_config_lookup(mut self) -> Self {
        self.lookup_service_config = true;
        self
    }

    /// Hostname used for service-config choice matching; defaults to the
    /// `HOSTNAME` environment variable.
    #[must_use]
    pub fn with_local_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.local_hostname = hostname.into();
        self
    }

    #[cfg(feature = "json")]
    async fn fetch_service_config(&self) -> Option<crate::service_config::ServiceConfig> {
        use crate::service_config::{parse_service_config, select_choice, ServiceConfigChoice};
        use rand::Rng;

        let name = format!("_grpc_config.{}", self.host);
        let lookup = match self.resolver.txt_lookup(name).await {
            Ok(lookup) => lookup,
            // Missing TXT records just mean no pushed configuration.
            Err(err) => {
                warn!("service-config TXT lookup failed: {err}");
                return None;
            }
        };

        let mut choices: Vec<ServiceConfigChoice> = Vec::new();
        for record in lookup.iter() {
            let joined: Vec<u8> = record
                .txt_data()
                .iter()
                .flat_map(|segment| segment.iter().copied())
                .collect();
            let text = String::from_utf8_lossy(&joined);
            let Some(json) = text.strip_prefix("grpc_config=") else {
                continue;
            };
            match serde_json::from_str::<Vec<ServiceConfigChoice>>(json) {
                Ok(parsed) => choices.extend(parsed),
                Err(err) => warn!("ignoring malformed grpc_config record: {err}"),
            }
        }

        let draw = rand::thread_rng().gen_range(1..=100);
        select_choice(&choices, &self.local_hostname, draw).map(parse_service_config)
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&mut self) -> Result<Resolution, ResolveError> {
        let (a, aaaa) = tokio::join!(
            self.resolver.ipv4_lookup(self.host.clone()),
            self.resolver.ipv6_lookup(self.host.clone()),
        );
        // Either family failing fails the whole result; a half-resolved
        // host would silently hide connectivity problems.
        let a = a.map_err(|source| ResolveError::Ipv4Query { source })?;
        let aaaa = aaaa.map_err(|source| ResolveError::Ipv6Query { source })?;

        let mut endpoints = Vec::new();
        for record in a.iter() {
            endpoints.push(Endpoint::single(Address::V4(SocketAddrV4::new(
                record.0, self.port,
            ))));
        }
        for record in aaaa.iter() {
            endpoints.push(Endpoint::single(Address::V6(SocketAddrV6::new(
                record.0, self.port, 0, 0,
            ))));
        }
        if endpoints.is_empty() {
            return Err(ResolveError::NoRecords(self.host.clone()));
        }

        #[cfg(feature = "json")]
        let service_config = if self.lookup_service_config {
            self.fetch_service_config().await
        } else {
            None
        };
        #[cfg(not(feature = "json"))]
        let service_config = None;

        Ok(Resolution {
            endpoints,
            service_config,
        })
    }
}

pub struct DnsResolverFactory;

impl ResolverFactory for DnsResolverFactory {
    fn make(&self, target: &(dyn Any + Send)) -> Option<Box<dyn Resolver>> {
        let target = target.downcast_ref::<DnsTarget>()?;
        match DnsResolver::system(target.host.clone(), target.port) {
            Ok(resolver) => Some(Box::new(resolver.with_service_config_lookup())),
            Err(err) => {
                warn!("DNS resolver unavailable: {err}");
                None
            }
        }
    }
}
