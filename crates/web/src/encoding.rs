//! Gzip in both directions: negotiating and compressing responses, inflating request bodies.

use std::fmt;
use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use http::HeaderMap;
use http::header::ACCEPT_ENCODING;
use http_body::{Body, Frame, SizeHint};
use lightweight_http::protocol::{HttpError, SendError};
use pin_project_lite::pin_project;
use thiserror::Error;
use tracing::trace;

pub const GZIP: &str = "gzip";

/// Whether `Accept-Encoding` lists `gzip` (or `x-gzip`) with a non-zero q-value.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|coding| {
            let mut parts = coding.split(';');
            let name = parts.next().unwrap_or_default().trim();
            if !name.eq_ignore_ascii_case(GZIP) && !name.eq_ignore_ascii_case("x-gzip") {
                return false;
            }
            quality(parts) > 0.0
        })
}

fn quality<'a>(params: impl Iterator<Item = &'a str>) -> f32 {
    for param in params {
        if let Some((key, value)) = param.split_once('=')
            && key.trim().eq_ignore_ascii_case("q")
        {
            return value.trim().parse().unwrap_or(0.0);
        }
    }
    1.0
}

/// Compresses a whole body at once.
pub fn gzip_bytes(bytes: &[u8]) -> io::Result<Bytes> {
    let mut encoder = GzEncoder::new(Writer::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?.take())
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("request body is not valid gzip: {0}")]
    Invalid(#[source] io::Error),

    #[error("inflated request body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Inflates a gzip request body, refusing to produce more than `limit` bytes.
pub fn gunzip(bytes: &[u8], limit: usize) -> Result<Bytes, DecodeError> {
    let mut decoded = Vec::with_capacity(bytes.len().saturating_mul(2).min(limit));
    let read = GzDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut decoded)
        .map_err(DecodeError::Invalid)?;
    if read > limit {
        return Err(DecodeError::TooLarge { limit });
    }
    Ok(Bytes::from(decoded))
}

/// Collects what the encoder writes until the next [`Writer::take`].
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pin_project! {
    /// Gzip-compresses another body frame by frame.
    pub struct GzipBody<B> {
        #[pin]
        inner: B,
        encoder: Option<GzEncoder<Writer>>,
    }
}

impl<B> GzipBody<B> {
    pub fn new(inner: B) -> Self {
        Self { inner, encoder: Some(GzEncoder::new(Writer::new(), Compression::default())) }
    }
}

impl<B> fmt::Debug for GzipBody<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipBody").field("finished", &self.encoder.is_none()).finish_non_exhaustive()
    }
}

impl<B> Body for GzipBody<B>
where
    B: Body<Data = Bytes, Error = HttpError>,
{
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            let Some(encoder) = this.encoder.as_mut() else {
                return Poll::Ready(None);
            };

            match ready!(this.inner.as_mut().poll_frame(cx)) {
                Some(Ok(frame)) => {
                    let Ok(data) = frame.into_data() else {
                        trace!("dropping trailers of a compressed body");
                        continue;
                    };
                    if let Err(e) = encoder.write_all(&data) {
                        this.encoder.take();
                        return Poll::Ready(Some(Err(SendError::io(e).into())));
                    }
                    let bytes = encoder.get_mut().take();
                    if !bytes.is_empty() {
                        return Poll::Ready(Some(Ok(Frame::data(bytes))));
                    }
                }
                Some(Err(e)) => {
                    this.encoder.take();
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    let Some(encoder) = this.encoder.take() else {
                        return Poll::Ready(None);
                    };
                    return match encoder.finish() {
                        Ok(mut writer) => {
                            let bytes = writer.take();
                            Poll::Ready((!bytes.is_empty()).then(|| Ok(Frame::data(bytes))))
                        }
                        Err(e) => Poll::Ready(Some(Err(SendError::io(e).into()))),
                    };
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.encoder.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ResponseBody;
    use http::HeaderValue;
    use http_body_util::BodyExt;

    const LOREM: &[u8] = include_bytes!("../tests/fixtures/loremIpsum.txt");

    fn headers(accept_encoding: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(accept_encoding));
        headers
    }

    fn inflate(bytes: &[u8]) -> Vec<u8> {
        let mut decoded = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut decoded).unwrap();
        decoded
    }

    #[test]
    fn gzip_negotiation() {
        assert!(accepts_gzip(&headers("gzip")));
        assert!(accepts_gzip(&headers("deflate, GZIP;q=0.5")));
        assert!(accepts_gzip(&headers("br, x-gzip")));
        assert!(!accepts_gzip(&headers("gzip;q=0")));
        assert!(!accepts_gzip(&headers("gzip; q=0.0, deflate")));
        assert!(!accepts_gzip(&headers("deflate, br")));
        assert!(!accepts_gzip(&headers("gzipped")));
        assert!(!accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn gzip_round_trip() {
        let compressed = gzip_bytes(LOREM).unwrap();
        assert_ne!(compressed.as_ref(), LOREM);
        assert_eq!(inflate(&compressed), LOREM);
        assert_eq!(gunzip(&compressed, LOREM.len()).unwrap().as_ref(), LOREM);
    }

    #[test]
    fn gunzip_limits() {
        let compressed = gzip_bytes(LOREM).unwrap();
        assert!(matches!(gunzip(&compressed, LOREM.len() - 1), Err(DecodeError::TooLarge { .. })));
        assert!(matches!(gunzip(b"not gzip at all", 1024), Err(DecodeError::Invalid(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn streaming_compression() {
        let body = GzipBody::new(ResponseBody::from(Bytes::from_static(LOREM)));
        assert!(body.size_hint().exact().is_none());

        let compressed = body.collect().await.unwrap().to_bytes();
        assert_eq!(inflate(&compressed), LOREM);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn streaming_empty_body() {
        let compressed = GzipBody::new(ResponseBody::empty()).collect().await.unwrap().to_bytes();
        assert!(inflate(&compressed).is_empty());
    }
}
