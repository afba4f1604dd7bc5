use crate::compression::Encoding;
use crate::metadata::{is_reserved_key, Metadata, MetadataValue};
use crate::status::{Code, Status};
use log::warn;
use num_traits::ToPrimitive;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::time::Duration;

/// Bytes escaped in `grpc-message`: controls and the escape character;
/// non-ASCII is always percent-encoded.
const GRPC_MESSAGE_ESCAPES: &AsciiSet = &CONTROLS.add(b'%');

pub const CONTENT_TYPE: &str = "application/grpc";

/// Shape of an RPC, dispatched on instead of one type per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl CallKind {
    #[must_use]
    pub fn client_streaming(self) -> bool {
        matches!(self, Self::ClientStream | Self::BidiStream)
    }

    #[must_use]
    pub fn server_streaming(self) -> bool {
        matches!(self, Self::ServerStream | Self::BidiStream)
    }
}

/// A `/<Service>/<Method>` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
#[display(fmt = "/{}/{}", service, method)]
pub struct MethodPath {
    pub service: String,
    pub method: String,
}

impl MethodPath {
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    pub fn parse(path: &str) -> Result<Self, Status> {
        let mut parts = path.strip_prefix('/').unwrap_or(path).splitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(service), Some(method)) if !service.is_empty() && !method.is_empty() => {
                Ok(Self::new(service, method))
            }
            _ => Err(Status::unimplemented(format!("malformed path {path:?}"))),
        }
    }
}

/// Everything that goes into (or came out of) the request HEADERS block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub path: MethodPath,
    pub authority: Option<String>,
    pub timeout: Option<Duration>,
    pub encoding: Encoding,
    pub user_agent: Option<String>,
    pub metadata: Metadata,
}

impl RequestHead {
    #[must_use]
    pub fn new(path: MethodPath) -> Self {
        Self {
            path,
            authority: None,
            timeout: None,
            encoding: Encoding::Identity,
            user_agent: None,
            metadata: Metadata::new(),
        }
    }

    /// The HEADERS block for this call: pseudo-headers first, then the
    /// protocol headers, then user metadata (reserved keys dropped).
    #[must_use]
    pub fn to_metadata(&self) -> Metadata {
        let mut headers = Metadata::new();
        push(&mut headers, ":method", "POST");
        push(&mut headers, ":scheme", "http");
        push(&mut headers, ":path", &self.path.to_string());
        if let Some(authority) = &self.authority {
            push(&mut headers, ":authority", authority);
        }
        push(&mut headers, "content-type", CONTENT_TYPE);
        push(&mut headers, "te", "trailers");
        if let Some(timeout) = self.timeout {
            push(&mut headers, "grpc-timeout", &encode_timeout(timeout));
        }
        if self.encoding != Encoding::Identity {
            push(&mut headers, "grpc-encoding", &self.encoding.to_string());
        }
        push(
            &mut headers,
            "grpc-accept-encoding",
            Encoding::accept_encoding_header(),
        );
        if let Some(user_agent) = &self.user_agent {
            push(&mut headers, "user-agent", user_agent);
        }
        merge_user_metadata(&mut headers, &self.metadata);
        headers
    }

    /// Parses an inbound request HEADERS block, server side.
    pub fn from_metadata(headers: &Metadata) -> Result<Self, Status> {
        match headers.get_str(":method") {
            Some("POST") => {}
            other => {
                return Err(Status::internal(format!(
                    "unsupported method {other:?}"
                )))
            }
        }
        match headers.get_str("content-type") {
            Some(value) if value.starts_with(CONTENT_TYPE) => {}
            other => {
                return Err(Status::internal(format!(
                    "unsupported content-type {other:?}"
                )))
            }
        }
        let path = headers
            .get_str(":path")
            .ok_or_else(|| Status::unimplemented("missing :path"))?;
        let path = MethodPath::parse(path)?;

        let timeout = match headers.get_str("grpc-timeout") {
            Some(value) => Some(parse_timeout(value)?),
            None => None,
        };
        let encoding = match headers.get_str("grpc-encoding") {
            Some(name) => Encoding::from_name(name).ok_or_else(|| {
                Status::unimplemented(format!("unsupported grpc-encoding {name:?}"))
            })?,
            None => Encoding::Identity,
        };

        let mut metadata = Metadata::new();
        for (key, value) in headers.iter() {
            if is_reserved_key(key) || key == "te" || key == "user-agent" {
                continue;
            }
            metadata_push(&mut metadata, key, value);
        }

        Ok(Self {
            path,
            authority: headers.get_str(":authority").map(str::to_owned),
            timeout,
            encoding,
            user_agent: headers.get_str("user-agent").map(str::to_owned),
            metadata,
        })
    }
}

/// Initial response HEADERS for a call that will carry a body.
#[must_use]
pub fn response_head(metadata: &Metadata) -> Metadata {
    let mut headers = Metadata::new();
    push(&mut headers, ":status", "200");
    push(&mut headers, "content-type", CONTENT_TYPE);
    merge_user_metadata(&mut headers, metadata);
    headers
}

/// Trailing HEADERS carrying the final status. User metadata attached to
/// the status merges in after the protocol trailers.
#[must_use]
pub fn trailers(status: &Status) -> Metadata {
    let mut headers = Metadata::new();
    // unwrap: every Code fits in a u8
    let code = status.code().to_u8().unwrap();
    push(&mut headers, "grpc-status", &code.to_string());
    if !status.message().is_empty() {
        push(
            &mut headers,
            "grpc-message",
            &utf8_percent_encode(status.message(), GRPC_MESSAGE_ESCAPES).to_string(),
        );
    }
    merge_user_metadata(&mut headers, status.metadata());
    headers
}

/// Single merged HEADERS block for a response with no body.
#[must_use]
pub fn trailers_only(status: &Status) -> Metadata {
    let mut headers = Metadata::new();
    push(&mut headers, ":status", "200");
    push(&mut headers, "content-type", CONTENT_TYPE);
    headers.merge(trailers(status));
    headers
}

/// Reads the final status out of a trailers block; absence of
/// `grpc-status` is itself a protocol violation.
pub fn status_from_trailers(trailers: &Metadata) -> Result<Status, Status> {
    let code = trailers
        .get_str("grpc-status")
        .ok_or_else(|| Status::internal("missing grpc-status in trailers"))?;
    let code = code
        .parse::<u8>()
        .map(Code::from_wire)
        .map_err(|_| Status::internal(format!("malformed grpc-status {code:?}")))?;
    let message = trailers
        .get_str("grpc-message")
        .map(|m| percent_decode_str(m).decode_utf8_lossy().into_owned())
        .unwrap_or_default();

    let mut metadata = Metadata::new();
    for (key, value) in trailers.iter() {
        if is_reserved_key(key) {
            continue;
        }
        metadata_push(&mut metadata, key, value);
    }
    Ok(Status::new(code, message).with_metadata(metadata))
}

const TIMEOUT_UNITS: [(&str, u128); 6] = [
    ("H", 3_600 * 1_000_000_000),
    ("M", 60 * 1_000_000_000),
    ("S", 1_000_000_000),
    ("m", 1_000_000),
    ("u", 1_000),
    ("n", 1),
];

/// Encodes a deadline as `grpc-timeout`: at most eight ASCII digits and a
/// unit suffix. Prefers the coarsest unit that represents the value
/// exactly; when none fits, rounds up so the deadline never shortens.
#[must_use]
pub fn encode_timeout(timeout: Duration) -> String {
    const MAX_DIGITS: u128 = 99_999_999;
    let nanos = timeout.as_nanos();
    for (suffix, scale) in TIMEOUT_UNITS {
        if nanos % scale == 0 && nanos / scale <= MAX_DIGITS {
            return format!("{}{suffix}", nanos / scale);
        }
    }
    for (suffix, scale) in TIMEOUT_UNITS.into_iter().rev() {
        let units = (nanos + scale - 1) / scale;
        if units <= MAX_DIGITS {
            return format!("{units}{suffix}");
        }
    }
    // Beyond ~11k years; clamp rather than overflow the field.
    format!("{MAX_DIGITS}H")
}

/// Parses a `grpc-timeout` value: ASCII integer plus `n/u/m/S/M/H`.
pub fn parse_timeout(value: &str) -> Result<Duration, Status> {
    let malformed = || Status::internal(format!("malformed grpc-timeout {value:?}"));
    if !value.is_ascii() || value.len() < 2 || value.len() > 9 {
        return Err(malformed());
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().map_err(|_| malformed())?;
    let duration = match unit {
        "n" => Duration::from_nanos(amount),
        "u" => Duration::from_micros(amount),
        "m" => Duration::from_millis(amount),
        "S" => Duration::from_secs(amount),
        "M" => Duration::from_secs(amount * 60),
        "H" => Duration::from_secs(amount * 3600),
        _ => return Err(malformed()),
    };
    Ok(duration)
}

fn merge_user_metadata(headers: &mut Metadata, metadata: &Metadata) {
    for (key, value) in metadata.iter() {
        if is_reserved_key(key) {
            warn!("dropping reserved metadata key {key:?}");
            continue;
        }
        metadata_push(headers, key, value);
    }
}

fn push(headers: &mut Metadata, key: &str, value: &str) {
    // unwrap: protocol-generated keys and values are statically well-formed
    headers.insert(key, value).expect("protocol header");
}

fn metadata_push(headers: &mut Metadata, key: &str, value: &MetadataValue) {
    let result = match value {
        MetadataValue::Ascii(text) => headers.insert(key, text.as_str()),
        MetadataValue::Binary(bytes) => headers.insert(key, bytes.clone()),
    };
    if let Err(err) = result {
        warn!("dropping invalid metadata entry: {err}");
    }
}
