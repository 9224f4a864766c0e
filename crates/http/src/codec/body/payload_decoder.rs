use std::cmp;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem, PayloadSize};

/// Longest chunk-size or trailer line accepted.
const MAX_LINE_BYTES: usize = 4 * 1024;

/// Decodes a request payload into [`PayloadItem`]s according to its framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDecoder {
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Length(u64),
    Chunked(Chunked),
    NoBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunked {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
    Done,
}

impl PayloadDecoder {
    pub fn empty() -> Self {
        Self { kind: Kind::NoBody }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(Chunked::Size) }
    }

    pub fn fix_length(size: u64) -> Self {
        Self { kind: Kind::Length(size) }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self.kind, Kind::Chunked(_))
    }
}

impl From<PayloadSize> for PayloadDecoder {
    fn from(payload_size: PayloadSize) -> Self {
        match payload_size {
            PayloadSize::Length(length) => Self::fix_length(length),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::Empty => Self::empty(),
        }
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(0) | Kind::NoBody => Ok(Some(PayloadItem::Eof)),
            Kind::Length(_) if src.is_empty() => Ok(None),
            Kind::Length(remaining) => {
                let len = cmp::min(*remaining, src.len() as u64);
                *remaining -= len;
                // len fits in usize, it is bounded by src.len()
                Ok(Some(PayloadItem::Chunk(src.split_to(len as usize).freeze())))
            }
            Kind::Chunked(state) => decode_chunked(state, src),
        }
    }
}

fn decode_chunked(state: &mut Chunked, src: &mut BytesMut) -> Result<Option<PayloadItem>, ParseError> {
    loop {
        match *state {
            Chunked::Size => {
                let Some(line) = take_line(src)? else { return Ok(None) };
                let size = parse_chunk_size(&line)?;
                trace!(size, "read chunk size");
                *state = if size == 0 { Chunked::Trailer } else { Chunked::Data(size) };
            }
            Chunked::Data(remaining) => {
                if src.is_empty() {
                    return Ok(None);
                }
                let len = cmp::min(remaining, src.len() as u64);
                *state = if len == remaining { Chunked::DataEnd } else { Chunked::Data(remaining - len) };
                return Ok(Some(PayloadItem::Chunk(src.split_to(len as usize).freeze())));
            }
            Chunked::DataEnd => {
                if src.starts_with(b"\r\n") {
                    src.advance(2);
                } else if src.starts_with(b"\n") {
                    src.advance(1);
                } else if src.is_empty() || src[..] == b"\r"[..] {
                    return Ok(None);
                } else {
                    return Err(ParseError::invalid_body("chunk data is not followed by CRLF"));
                }
                *state = Chunked::Size;
            }
            Chunked::Trailer => {
                let Some(line) = take_line(src)? else { return Ok(None) };
                // trailer fields are read and dropped, an empty line ends the body
                if line.is_empty() {
                    *state = Chunked::Done;
                }
            }
            Chunked::Done => return Ok(Some(PayloadItem::Eof)),
        }
    }
}

/// Splits off one line without its line ending, or `None` when it is not complete yet.
fn take_line(src: &mut BytesMut) -> Result<Option<BytesMut>, ParseError> {
    match src.iter().position(|b| *b == b'\n') {
        Some(pos) => {
            let mut line = src.split_to(pos + 1);
            line.truncate(pos);
            if line.ends_with(b"\r") {
                line.truncate(pos - 1);
            }
            Ok(Some(line))
        }
        None if src.len() > MAX_LINE_BYTES => Err(ParseError::invalid_body("chunk line too long")),
        None => Ok(None),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let size = line.split(|b| *b == b';').next().unwrap_or_default().trim_ascii();
    if size.is_empty() || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(ParseError::invalid_body("invalid chunk size"));
    }

    size.iter().try_fold(0_u64, |acc, digit| {
        let value = u64::from((*digit as char).to_digit(16).unwrap_or_default());
        acc.checked_mul(16)
            .and_then(|acc| acc.checked_add(value))
            .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))
    })
}
