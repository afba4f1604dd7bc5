use bytes::{BufMut, BytesMut};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{self, Read, Write};

/// Message encodings this runtime can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Encoding {
    #[display(fmt = "identity")]
    Identity,
    #[display(fmt = "gzip")]
    Gzip,
}

impl Encoding {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            "identity" => Some(Self::Identity),
            "gzip" => Some(Self::Gzip),
            _ => None,
        }
    }

    /// Value advertised in `grpc-accept-encoding`.
    #[must_use]
    pub fn accept_encoding_header() -> &'static str {
        "identity,gzip"
    }

    /// First mutually supported encoding out of a `grpc-accept-encoding`
    /// value, falling back to identity.
    #[must_use]
    pub fn negotiate(accept: &str) -> Self {
        accept
            .split(',')
            .find_map(Self::from_name)
            .unwrap_or(Self::Identity)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecompressError {
    #[error("decompressed message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("corrupt compressed message: {0}")]
    Corrupt(#[from] io::Error),
}

/// Streaming compressor applied per message by the framer.
pub trait MessageCodec: Send {
    fn name(&self) -> &'static str;

    /// Compresses `src` onto the end of `dst`.
    fn compress(&mut self, src: &[u8], dst: &mut BytesMut) -> io::Result<()>;
}

/// Streaming decompressor applied per message by the deframer.
pub trait MessageDecoder: Send {
    fn name(&self) -> &'static str;

    /// Decompresses `src` onto the end of `dst`, refusing output beyond
    /// `limit` bytes.
    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Gzip;

impl MessageCodec for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&mut self, src: &[u8], dst: &mut BytesMut) -> io::Result<()> {
        let mut encoder = GzEncoder::new(dst.writer(), Compression::default());
        encoder.write_all(src)?;
        encoder.finish()?;
        Ok(())
    }
}

impl MessageDecoder for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn decompress(
        &mut self,
        src: &[u8],
        dst: &mut Vec<u8>,
        limit: usize,
    ) -> Result<(), DecompressError> {
        // Read one byte past the cap so overflow is detectable without
        // inflating the whole message.
        let mut decoder = GzDecoder::new(src).take(limit as u64 + 1);
        let before = dst.len();
        decoder.read_to_end(dst)?;
        if dst.len() - before > limit {
            return Err(DecompressError::TooLarge { limit });
        }
        Ok(())
    }
}

#[must_use]
pub fn codec_for(encoding: Encoding) -> Option<Box<dyn MessageCodec>> {
    match encoding {
        Encoding::Identity => None,
        Encoding::Gzip => Some(Box::new(Gzip)),
    }
}

#[must_use]
pub fn decoder_for(encoding: Encoding) -> Option<Box<dyn MessageDecoder>> {
    match encoding {
        Encoding::Identity => None,
        Encoding::Gzip => Some(Box::new(Gzip)),
    }
}
