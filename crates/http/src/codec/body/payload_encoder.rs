use std::io::Write;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::codec::FastWrite;
use crate::protocol::{PayloadItem, PayloadSize, SendError};

/// Frames response payload items as announced by the response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEncoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length { remaining: u64 },
    Chunked { eof: bool },
    NoBody,
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked { eof: false } }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length { remaining: size } }
    }

    /// Whether everything announced has been written.
    pub fn is_finish(&self) -> bool {
        match &self.kind {
            Kind::Length { remaining } => *remaining == 0,
            Kind::Chunked { eof } => *eof,
            Kind::NoBody => true,
        }
    }
}

impl From<PayloadSize> for PayloadEncoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(size) => Self::fix_length(size),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::Empty => Self::empty(),
        }
    }
}

impl<D: Buf> Encoder<PayloadItem<D>> for PayloadEncoder {
    type Error = SendError;

    fn encode(&mut self, item: PayloadItem<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match (&mut self.kind, item) {
            (Kind::NoBody, _) | (Kind::Chunked { eof: true }, _) | (Kind::Length { .. }, PayloadItem::Eof) => Ok(()),

            (Kind::Length { remaining }, PayloadItem::Chunk(bytes)) => {
                let len = bytes.remaining() as u64;
                if len > *remaining {
                    warn!(remaining = *remaining, len, "body is longer than its content-length");
                    return Err(SendError::invalid_payload("body is longer than its content-length"));
                }
                *remaining -= len;
                dst.put(bytes);
                Ok(())
            }

            (Kind::Chunked { .. }, PayloadItem::Chunk(bytes)) => {
                if !bytes.has_remaining() {
                    // a zero sized chunk would end the body early
                    return Ok(());
                }
                dst.reserve(bytes.remaining() + 12);
                write!(FastWrite(dst), "{:X}\r\n", bytes.remaining())?;
                dst.put(bytes);
                dst.put_slice(b"\r\n");
                Ok(())
            }

            (Kind::Chunked { eof }, PayloadItem::Eof) => {
                *eof = true;
                dst.put_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}
