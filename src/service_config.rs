use crate::status::Code;
use std::collections::HashMap;
use std::time::Duration;

/// Per-method settings a resolver may attach to its results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodConfig {
    pub timeout: Option<Duration>,
    pub max_request_message_bytes: Option<usize>,
    pub max_response_message_bytes: Option<usize>,
    pub retry_policy: Option<RetryPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<Code>,
}

/// Mapping from method, service, or the empty default key to a
/// `MethodConfig`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceConfig {
    entries: HashMap<String, MethodConfig>,
}

impl ServiceConfig {
    #[must_use]
    pub fn new(entries: HashMap<String, MethodConfig>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most specific configuration for a call: `Service/Method`, then
    /// `Service`, then the default entry.
    #[must_use]
    pub fn method_config(&self, service: &str, method: &str) -> Option<&MethodConfig> {
        self.entries
            .get(&format!("{service}/{method}"))
            .or_else(|| self.entries.get(service))
            .or_else(|| self.entries.get(""))
    }
}

/// Server-pushed retry pushback, from `grpc-retry-pushback-ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPushback {
    RetryAfter(Duration),
    StopRetrying,
}

/// A negative or malformed value means "stop retrying".
#[must_use]
pub fn parse_retry_pushback(value: &str) -> RetryPushback {
    match value.trim().parse::<i64>() {
        Ok(ms) if ms >= 0 => RetryPushback::RetryAfter(Duration::from_millis(ms as u64)),
        _ => RetryPushback::StopRetrying,
    }
}

#[cfg(feature = "json")]
pub use self::json::{parse_service_config, select_choice, ServiceConfigChoice, ServiceConfigJson};

#[cfg(feature = "json")]
mod json {
    use super::{MethodConfig, RetryPolicy, ServiceConfig};
    use crate::status::Code;
    use log::warn;
    use serde::Deserialize;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Language tag this runtime answers to in service-config choices.
    const CLIENT_LANGUAGE: &str = "rust";

    /// One entry of the `grpc_config=` JSON array published over DNS TXT.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ServiceConfigChoice {
        #[serde(default)]
        pub client_language: Vec<String>,
        #[serde(default)]
        pub client_hostname: Vec<String>,
        #[serde(default)]
        pub percentage: Option<u32>,
        pub service_config: ServiceConfigJson,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ServiceConfigJson {
        #[serde(default)]
        method_config: Vec<MethodConfigJson>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MethodConfigJson {
        #[serde(default)]
        name: Vec<MethodNameJson>,
        #[serde(default)]
        timeout: Option<String>,
        #[serde(default)]
        max_request_message_bytes: Option<usize>,
        #[serde(default)]
        max_response_message_bytes: Option<usize>,
        #[serde(default)]
        retry_policy: Option<RetryPolicyJson>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct MethodNameJson {
        #[serde(default)]
        service: String,
        #[serde(default)]
        method: String,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RetryPolicyJson {
        max_attempts: u32,
        initial_backoff: String,
        max_backoff: String,
        backoff_multiplier: f64,
        #[serde(default)]
        retryable_status_codes: Vec<String>,
    }

    /// Parses one `serviceConfig` JSON object into the runtime form.
    pub fn parse_service_config(json: &ServiceConfigJson) -> ServiceConfig {
        let mut entries = HashMap::new();
        for method_config in &json.method_config {
            let converted = convert_method_config(method_config);
            if method_config.name.is_empty() {
                entries.insert(String::new(), converted.clone());
            }
            for name in &method_config.name {
                let key = if name.service.is_empty() {
                    String::new()
                } else if name.method.is_empty() {
                    name.service.clone()
                } else {
                    format!("{}/{}", name.service, name.method)
                };
                entries.insert(key, converted.clone());
            }
        }
        ServiceConfig::new(entries)
    }

    /// First choice whose language, hostname, and percentage constraints
    /// all pass. `draw` is a uniform sample from 1..=100.
    pub fn select_choice<'a>(
        choices: &'a [ServiceConfigChoice],
        hostname: &str,
        draw: u32,
    ) -> Option<&'a ServiceConfigJson> {
        choices
            .iter()
            .find(|choice| {
                let language_ok = choice.client_language.is_empty()
                    || choice
                        .client_language
                        .iter()
                        .any(|l| l.eq_ignore_ascii_case(CLIENT_LANGUAGE));
                let hostname_ok = choice.client_hostname.is_empty()
                    || choice.client_hostname.iter().any(|h| h == hostname);
                let percentage_ok = draw <= choice.percentage.unwrap_or(100);
                language_ok && hostname_ok && percentage_ok
            })
            .map(|choice| &choice.service_config)
    }

    fn convert_method_config(json: &MethodConfigJson) -> MethodConfig {
        MethodConfig {
            timeout: json.timeout.as_deref().and_then(parse_json_duration),
            max_request_message_bytes: json.max_request_message_bytes,
            max_response_message_bytes: json.max_response_message_bytes,
            retry_policy: json.retry_policy.as_ref().and_then(convert_retry_policy),
        }
    }

    fn convert_retry_policy(json: &RetryPolicyJson) -> Option<RetryPolicy> {
        Some(RetryPolicy {
            max_attempts: json.max_attempts,
            initial_backoff: parse_json_duration(&json.initial_backoff)?,
            max_backoff: parse_json_duration(&json.max_backoff)?,
            backoff_multiplier: json.backoff_multiplier,
            retryable_status_codes: json
                .retryable_status_codes
                .iter()
                .filter_map(|name| parse_code_name(name))
                .collect(),
        })
    }

    /// Durations in service-config JSON use the proto3 form: decimal
    /// seconds with an `s` suffix, e.g. `"1.5s"`.
    fn parse_json_duration(value: &str) -> Option<Duration> {
        let seconds = value.strip_suffix('s')?;
        let seconds: f64 = seconds.parse().ok()?;
        if !seconds.is_finite() || seconds < 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(seconds))
    }

    fn parse_code_name(name: &str) -> Option<Code> {
        let code = match name.to_ascii_uppercase().as_str() {
            "CANCELLED" => Code::Cancelled,
            "UNKNOWN" => Code::Unknown,
            "INVALID_ARGUMENT" => Code::InvalidArgument,
            "DEADLINE_EXCEEDED" => Code::DeadlineExceeded,
            "NOT_FOUND" => Code::NotFound,
            "ALREADY_EXISTS" => Code::AlreadyExists,
            "PERMISSION_DENIED" => Code::PermissionDenied,
            "RESOURCE_EXHAUSTED" => Code::ResourceExhausted,
            "FAILED_PRECONDITION" => Code::FailedPrecondition,
            "ABORTED" => Code::Aborted,
            "OUT_OF_RANGE" => Code::OutOfRange,
            "UNIMPLEMENTED" => Code::Unimplemented,
            "INTERNAL" => Code::Internal,
            "UNAVAILABLE" => Code::Unavailable,
            "DATA_LOSS" => Code::DataLoss,
            "UNAUTHENTICATED" => Code::Unauthenticated,
            other => {
                warn!("ignoring unknown status code name {other:?}");
                return None;
            }
        };
        Some(code)
    }
}
