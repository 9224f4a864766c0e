use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes a request head, then its payload items up to and including [`PayloadItem::Eof`].
///
/// A request without a body yields only the head; the next decode starts on the
/// following request.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the decoder is in the middle of a request payload.
    pub fn in_payload(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            return match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Ok(Some(Message::Payload(item))),
                Some(PayloadItem::Eof) => {
                    self.payload_decoder = None;
                    Ok(Some(Message::Payload(PayloadItem::Eof)))
                }
                None => Ok(None),
            };
        }

        match self.header_decoder.decode(src)? {
            Some((header, payload_size)) => {
                if !payload_size.is_empty() {
                    self.payload_decoder = Some(PayloadDecoder::from(payload_size));
                }
                Ok(Some(Message::Header((header, payload_size))))
            }
            None => Ok(None),
        }
    }
}
