//! Request head decoding on top of `httparse`.
//!
//! Limits: at most 64 headers and 8KB for the whole head. The framing of the
//! payload that follows is derived from `Content-Length` / `Transfer-Encoding`.

use bytes::{Buf, BytesMut};
use http::{HeaderName, HeaderValue, Request, Version};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

const MAX_HEADER_NUM: usize = 64;

const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Decodes one request head and reports how its payload is framed.
#[derive(Debug, Default)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Skip empty lines left between pipelined requests.
        while src.starts_with(b"\r\n") {
            src.advance(2);
        }
        while src.starts_with(b"\n") {
            src.advance(1);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut parsed = httparse::Request::new(&mut headers);

        let body_offset = match parsed.parse(src) {
            Ok(Status::Complete(offset)) => offset,
            Ok(Status::Partial) => {
                ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::head_too_large(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) => return Err(ParseError::too_many_headers(MAX_HEADER_NUM)),
            Err(e) => return Err(ParseError::malformed_head(e)),
        };
        trace!(header_size = body_offset, "parsed request head");
        ensure!(body_offset <= MAX_HEADER_BYTES, ParseError::head_too_large(body_offset, MAX_HEADER_BYTES));

        let version = match parsed.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            other => return Err(ParseError::malformed_head(format!("unsupported version {other:?}"))),
        };

        let mut request = Request::new(());
        let method = parsed.method.ok_or_else(|| ParseError::malformed_head("missing method"))?;
        *request.method_mut() = method.parse().map_err(ParseError::malformed_head)?;
        let path = parsed.path.ok_or_else(|| ParseError::malformed_head("missing request target"))?;
        *request.uri_mut() = path.parse().map_err(ParseError::malformed_head)?;
        *request.version_mut() = version;

        let header_map = request.headers_mut();
        header_map.reserve(parsed.headers.len());
        for header in parsed.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(ParseError::malformed_head)?;
            let value = HeaderValue::from_bytes(header.value).map_err(ParseError::malformed_head)?;
            header_map.append(name, value);
        }

        src.advance(body_offset);

        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;
        Ok(Some((header, payload_size)))
    }
}

/// Payload framing per RFC 9112 section 6.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(http::header::TRANSFER_ENCODING);
    let cl_header = header.headers().get(http::header::CONTENT_LENGTH);

    match (te_header, cl_header) {
        (Some(_), Some(_)) => Err(ParseError::invalid_framing("transfer-encoding and content-length both present")),
        (Some(te_value), None) if is_chunked(te_value) => Ok(PayloadSize::Chunked),
        (Some(_), None) => Err(ParseError::invalid_framing("transfer-encoding without a final chunked coding")),
        (None, Some(cl_value)) => {
            let cl_str = cl_value.to_str().map_err(|_e| ParseError::invalid_framing("value is not visible ascii"))?;
            let length = cl_str
                .trim()
                .parse::<u64>()
                .map_err(|_e| ParseError::invalid_framing(format!("value {cl_str} is not u64")))?;

            if length == 0 { Ok(PayloadSize::Empty) } else { Ok(PayloadSize::Length(length)) }
        }
        (None, None) => Ok(PayloadSize::Empty),
    }
}

/// `chunked` must be the last coding when present.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
