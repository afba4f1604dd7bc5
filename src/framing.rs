use crate::compression::{DecompressError, MessageCodec, MessageDecoder};
use crate::status::Status;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derivative::Derivative;
use log::trace;
use std::collections::VecDeque;

/// Compression flag byte plus big-endian length.
pub const FRAME_PREFIX_LEN: usize = 5;

/// Default cap on a single decoded message.
pub const DEFAULT_MAX_PAYLOAD: usize = 4 * 1024 * 1024;

/// Soft cap on how many framed messages one outgoing chunk coalesces. A
/// single larger message still goes out whole.
const CHUNK_SOFT_CAP: usize = 64 * 1024;

/// Converts queued messages into length-prefixed wire chunks.
///
/// Messages are framed in FIFO order. `next_chunk` packs as many whole
/// frames as fit under the soft cap into one contiguous buffer; an
/// oversized message is never split across chunks and never rejected.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Framer {
    pending: VecDeque<(Bytes, bool)>,
    out: BytesMut,
    #[derivative(Debug = "ignore")]
    codec: Option<Box<dyn MessageCodec>>,
}

impl Framer {
    #[must_use]
    pub fn new(codec: Option<Box<dyn MessageCodec>>) -> Self {
        Self {
            pending: VecDeque::new(),
            out: BytesMut::with_capacity(CHUNK_SOFT_CAP),
            codec,
        }
    }

    /// Queues one serialized message. `compress` is honored only when a
    /// codec was negotiated for the stream.
    pub fn push(&mut self, message: Bytes, compress: bool) {
        self.pending.push_back((message, compress));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Next contiguous chunk of framed messages, or `None` when nothing is
    /// queued.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        while let Some((message, _)) = self.pending.front() {
            if !self.out.is_empty()
                && self.out.len() + FRAME_PREFIX_LEN + message.len() > CHUNK_SOFT_CAP
            {
                break;
            }
            // unwrap: front() just succeeded
            let (message, compress) = self.pending.pop_front().unwrap();
            self.frame_one(&message, compress);
        }

        if self.out.is_empty() {
            return None;
        }
        let chunk = self.out.split().freeze();
        if chunk.len() > CHUNK_SOFT_CAP {
            // An oversized frame inflated the reusable buffer; start over to
            // return the capacity.
            self.out = BytesMut::with_capacity(CHUNK_SOFT_CAP);
        }
        trace!("framed chunk of {} bytes", chunk.len());
        Some(chunk)
    }

    fn frame_one(&mut self, message: &[u8], compress: bool) {
        match self.codec.as_mut() {
            Some(codec) if compress => {
                self.out.put_u8(1);
                let length_at = self.out.len();
                self.out.put_u32(0);
                let body_at = self.out.len();
                if let Err(err) = codec.compress(message, &mut self.out) {
                    // Compressors over in-memory buffers only fail on
                    // corrupt state; fall back to the raw bytes.
                    trace!("compression failed, sending uncompressed: {err}");
                    self.out.truncate(length_at - 1);
                    self.frame_raw(message);
                    return;
                }
                let written = self.out.len() - body_at;
                self.out[length_at..length_at + 4]
                    .copy_from_slice(&(written as u32).to_be_bytes());
            }
            _ => self.frame_raw(message),
        }
    }

    fn frame_raw(&mut self, message: &[u8]) {
        self.out.put_u8(0);
        self.out.put_u32(message.len() as u32);
        self.out.extend_from_slice(message);
    }
}

/// Incremental decoder for length-prefixed messages.
///
/// Fed arbitrary buffer fragments; yields whole decoded payloads and never
/// reads past a frame boundary. Errors are surfaced as `Status` per the
/// protocol's taxonomy and latch the deframer closed.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Deframer {
    buf: BytesMut,
    max_payload: usize,
    #[derivative(Debug = "ignore")]
    decoder: Option<Box<dyn MessageDecoder>>,
    failed: bool,
}

impl Deframer {
    #[must_use]
    pub fn new(max_payload: usize, decoder: Option<Box<dyn MessageDecoder>>) -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload,
            decoder,
            failed: false,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decodes the next complete message, or `Ok(None)` when more input is
    /// needed. Callers drive this in a loop per inbound buffer.
    pub fn next_message(&mut self) -> Result<Option<Bytes>, Status> {
        if self.failed {
            return Err(Status::internal("deframer previously failed"));
        }
        if self.buf.len() < FRAME_PREFIX_LEN {
            return Ok(None);
        }

        // Peek the prefix without consuming; the cursor only advances once
        // the whole frame is readable.
        let flag = self.buf[0];
        let declared = u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        let declared = declared as usize;

        if declared > self.max_payload {
            self.failed = true;
            return Err(Status::resource_exhausted(format!(
                "message of {declared} bytes exceeds maximum payload size {}",
                self.max_payload
            )));
        }
        if flag > 1 {
            self.failed = true;
            return Err(Status::internal(format!(
                "invalid compression flag {flag}"
            )));
        }
        if self.buf.len() - FRAME_PREFIX_LEN < declared {
            return Ok(None);
        }
        if flag == 1 && self.decoder.is_none() {
            self.failed = true;
            return Err(Status::internal(
                "compressed frame received without a negotiated decompressor",
            ));
        }

        self.buf.advance(FRAME_PREFIX_LEN);
        let payload = self.buf.split_to(declared).freeze();
        if flag == 0 {
            return Ok(Some(payload));
        }

        // unwrap: checked above
        let decoder = self.decoder.as_mut().unwrap();
        let mut decoded = Vec::with_capacity(declared.saturating_mul(2));
        match decoder.decompress(&payload, &mut decoded, self.max_payload) {
            Ok(()) => Ok(Some(Bytes::from(decoded))),
            Err(DecompressError::TooLarge { limit }) => {
                self.failed = true;
                Err(Status::resource_exhausted(format!(
                    "decompressed message exceeds maximum payload size {limit}"
                )))
            }
            Err(err) => {
                self.failed = true;
                Err(Status::internal(err.to_string()))
            }
        }
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// End-of-stream check: a trailing partial frame means the peer closed
    /// mid-message.
    pub fn finish(&self) -> Result<(), Status> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(Status::internal(format!(
                "stream ended with {} bytes of a partial frame",
                self.buf.len()
            )))
        }
    }
}
