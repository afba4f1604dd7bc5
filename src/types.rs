use num_derive::{FromPrimitive, ToPrimitive};
use std::num::NonZeroU32;

// Safety: value is a const, that can't be zero
pub const U31_MAX: NonZeroU32 = unsafe { NonZeroU32::new_unchecked(u32::MAX >> 1) };

/// HTTP/2 stream identifier. Id 0 addresses the connection itself.
pub type StreamId = u32;
pub type NonZeroStreamId = std::num::NonZeroU32;

/// https://httpwg.org/specs/rfc7540.html#ErrorCodes
///
/// Carried on GOAWAY and RST_STREAM frames surfaced by the HTTP/2 engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum ErrorType {
    /// Graceful shutdown; not an error condition.
    NoError = 0x0,
    /// The peer violated the protocol in a way without a more specific code.
    ProtocolError = 0x1,
    /// The endpoint encountered an unexpected internal error.
    InternalError = 0x2,
    /// The peer violated the flow-control protocol.
    FlowControlError = 0x3,
    /// SETTINGS was not acknowledged in a timely manner.
    SettingsTimeout = 0x4,
    /// A frame arrived after the stream was half-closed.
    StreamClosed = 0x5,
    /// A frame had an invalid size.
    FrameSizeError = 0x6,
    /// The stream was refused prior to any application processing.
    RefusedStream = 0x7,
    /// The stream is no longer needed.
    Cancel = 0x8,
    /// The header compression context can no longer be maintained.
    CompressionError = 0x9,
    /// A CONNECT tunnel was reset or abnormally closed.
    ConnectError = 0xa,
    /// The peer is generating excessive load. gRPC keep-alive policing
    /// terminates ping-flooding connections with this code.
    EnhanceYourCalm = 0xb,
    /// Transport properties do not meet minimum security requirements.
    InadequateSecurity = 0xc,
    /// The endpoint requires HTTP/1.1 instead of HTTP/2.
    Http11Required = 0xd,
}
