use crate::{flags::*, metadata::Metadata, types::*};
use bytes::Bytes;

/// A typed HTTP/2 frame as exchanged with the external engine.
///
/// The engine owns the byte-level codec (and HPACK); this crate only ever
/// sees decoded header lists and raw payloads. Frame kinds that never reach
/// the gRPC layer (SETTINGS, PRIORITY, WINDOW_UPDATE, ...) are handled
/// inside the engine and have no variant here.
#[derive(Debug, Clone)]
pub enum Frame {
    Headers {
        stream: NonZeroStreamId,
        flags: HeadersFlags,
        headers: Metadata,
    },
    Data {
        stream: NonZeroStreamId,
        flags: DataFlags,
        data: Bytes,
    },
    Ping {
        flags: PingFlags,
        data: [u8; 8],
    },
    GoAway {
        last_stream: StreamId,
        error: ErrorType,
        debug: Vec<u8>,
    },
    ResetStream {
        stream: NonZeroStreamId,
        error: ErrorType,
    },
}

impl Frame {
    /// Stream the frame belongs to; 0 for connection-level frames.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        match self {
            Self::Headers { stream, .. }
            | Self::Data { stream, .. }
            | Self::ResetStream { stream, .. } => stream.get(),
            Self::Ping { .. } | Self::GoAway { .. } => 0,
        }
    }

    #[must_use]
    pub fn end_stream(&self) -> bool {
        match self {
            Self::Headers { flags, .. } => flags.contains(HeadersFlags::END_STREAM),
            Self::Data { flags, .. } => flags.contains(DataFlags::END_STREAM),
            _ => false,
        }
    }
}
