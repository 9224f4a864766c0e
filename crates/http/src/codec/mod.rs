//! Streaming HTTP/1.1 message codecs.
//!
//! [`RequestDecoder`] turns the inbound byte stream into a request head followed by
//! payload items, [`ResponseEncoder`] does the reverse for responses. Both keep the
//! payload state of the current message, so one instance serves a whole keep-alive
//! connection.
//!
//! ```no_run
//! use bytes::BytesMut;
//! use lightweight_http::codec::RequestDecoder;
//! use tokio_util::codec::Decoder;
//!
//! let mut decoder = RequestDecoder::new();
//! let mut buffer = BytesMut::from("GET /files/ HTTP/1.1\r\nHost: localhost\r\n\r\n");
//! let head = decoder.decode(&mut buffer);
//! ```

use std::io;

use bytes::{BufMut, BytesMut};

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::RequestDecoder;
pub use response_encoder::ResponseEncoder;

/// `io::Write` over a `BytesMut` that never fails.
pub(crate) struct FastWrite<'a>(pub(crate) &'a mut BytesMut);

impl io::Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
