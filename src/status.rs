use crate::metadata::Metadata;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Canonical gRPC status codes.
///
/// https://github.com/grpc/grpc/blob/master/doc/statuscodes.md
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromPrimitive,
    ToPrimitive,
    derive_more::Display,
)]
#[repr(u8)]
pub enum Code {
    #[display(fmt = "ok")]
    Ok = 0,
    #[display(fmt = "cancelled")]
    Cancelled = 1,
    #[display(fmt = "unknown")]
    Unknown = 2,
    #[display(fmt = "invalid-argument")]
    InvalidArgument = 3,
    #[display(fmt = "deadline-exceeded")]
    DeadlineExceeded = 4,
    #[display(fmt = "not-found")]
    NotFound = 5,
    #[display(fmt = "already-exists")]
    AlreadyExists = 6,
    #[display(fmt = "permission-denied")]
    PermissionDenied = 7,
    #[display(fmt = "resource-exhausted")]
    ResourceExhausted = 8,
    #[display(fmt = "failed-precondition")]
    FailedPrecondition = 9,
    #[display(fmt = "aborted")]
    Aborted = 10,
    #[display(fmt = "out-of-range")]
    OutOfRange = 11,
    #[display(fmt = "unimplemented")]
    Unimplemented = 12,
    #[display(fmt = "internal")]
    Internal = 13,
    #[display(fmt = "unavailable")]
    Unavailable = 14,
    #[display(fmt = "data-loss")]
    DataLoss = 15,
    #[display(fmt = "unauthenticated")]
    Unauthenticated = 16,
}

impl Code {
    /// Maps a `grpc-status` wire value; out-of-range values read as
    /// `Unknown` per the protocol.
    #[must_use]
    pub fn from_wire(value: u8) -> Self {
        Self::from_u8(value).unwrap_or(Self::Unknown)
    }
}

/// Final disposition of an RPC: a code, a human-readable message, and
/// metadata merged into the trailers.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Status {
    code: Code,
    message: String,
    metadata: Metadata,
}

impl Status {
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn ok() -> Self {
        Self::new(Code::Ok, "")
    }

    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(Code::Cancelled, message)
    }

    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Code::Unknown, message)
    }

    #[must_use]
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    #[must_use]
    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    #[must_use]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Status for an error raised by a user handler: a `Status` propagates
    /// verbatim, anything else becomes `unknown`.
    #[must_use]
    pub fn from_handler_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
        while let Some(inner) = source {
            if let Some(status) = inner.downcast_ref::<Status>() {
                return status.clone();
            }
            source = inner.source();
        }
        Self::unknown(err.to_string())
    }

    /// Same taxonomy for handlers plumbed through `anyhow`.
    #[must_use]
    pub fn from_handler_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<Status>() {
            Some(status) => status.clone(),
            None => Self::unknown(err.to_string()),
        }
    }
}
