use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, SinkExt, Stream, StreamExt};
use http_body::{Body, Frame, SizeHint};
use tracing::{debug, error};

use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// The request payload as seen by a handler.
///
/// Every `poll_frame` that needs data sends a oneshot slot to the connection's
/// [`ReqBodySender`], which fills it with the next decoded payload item.
#[derive(Debug)]
pub struct ReqBody {
    signal: mpsc::Sender<oneshot::Sender<PayloadItem>>,
    receiving: Option<oneshot::Receiver<PayloadItem>>,
    size_hint: SizeHint,
    finished: bool,
}

impl ReqBody {
    /// Pairs a body for the handler with a sender that reads `payload_stream`.
    pub fn body_channel<S>(payload_stream: &mut S, payload_size: PayloadSize) -> (ReqBody, ReqBodySender<'_, S>)
    where
        S: Stream + Unpin,
    {
        let (signal, receiver) = mpsc::channel(16);
        let empty = payload_size.is_empty();

        let req_body = ReqBody { signal, receiving: None, size_hint: payload_size.size_hint(), finished: empty };
        let body_sender = ReqBodySender { payload_stream, receiver, eof: empty };

        (req_body, body_sender)
    }
}

/// Feeds a [`ReqBody`] from the connection's decoded payload stream.
pub struct ReqBodySender<'conn, S>
where
    S: Stream + Unpin,
{
    payload_stream: &'conn mut S,
    receiver: mpsc::Receiver<oneshot::Sender<PayloadItem>>,
    eof: bool,
}

impl<S> ReqBodySender<'_, S>
where
    S: Stream<Item = Result<Message<(RequestHeader, PayloadSize)>, ParseError>> + Unpin,
{
    /// Answers chunk requests from the body until the payload ends or the body is dropped.
    pub async fn send_body(&mut self) -> Result<(), ParseError> {
        while !self.eof {
            let Some(slot) = self.receiver.next().await else {
                return Ok(());
            };

            let item = self.next_payload().await?;
            if item.is_eof() {
                self.eof = true;
            }
            // the handler may have dropped its body in the meantime
            let _ = slot.send(item);
        }
        Ok(())
    }

    /// Drains whatever the handler left unread so the next request starts on a clean buffer.
    pub async fn skip_body(&mut self) -> Result<(), ParseError> {
        let mut skipped = 0_usize;
        while !self.eof {
            match self.next_payload().await? {
                PayloadItem::Chunk(bytes) => skipped += bytes.len(),
                PayloadItem::Eof => self.eof = true,
            }
        }

        if skipped > 0 {
            debug!(size = skipped, "skipped unread request body");
        }
        Ok(())
    }

    async fn next_payload(&mut self) -> Result<PayloadItem, ParseError> {
        match self.payload_stream.next().await {
            Some(Ok(Message::Payload(item))) => Ok(item),
            Some(Ok(Message::Header(_))) => {
                error!("received request header while reading body");
                Err(ParseError::invalid_body("received request header while reading body"))
            }
            Some(Err(e)) => Err(e),
            None => Err(ParseError::invalid_body("connection closed before the body was complete")),
        }
    }
}

impl Body for ReqBody {
    type Data = Bytes;
    type Error = ParseError;

    fn poll_frame(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            if let Some(receiver) = &mut self.receiving {
                let received = ready!(receiver.poll_unpin(cx));
                self.receiving = None;
                return match received {
                    Ok(PayloadItem::Chunk(bytes)) => Poll::Ready(Some(Ok(Frame::data(bytes)))),
                    Ok(PayloadItem::Eof) => {
                        self.finished = true;
                        Poll::Ready(None)
                    }
                    Err(_) => {
                        self.finished = true;
                        Poll::Ready(Some(Err(ParseError::invalid_body("request body reading was canceled"))))
                    }
                };
            }

            if let Err(e) = ready!(self.signal.poll_ready_unpin(cx)) {
                self.finished = true;
                return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
            }

            let (tx, rx) = oneshot::channel();
            if let Err(e) = self.signal.start_send(tx) {
                self.finished = true;
                return Poll::Ready(Some(Err(ParseError::invalid_body(e))));
            }
            self.receiving = Some(rx);
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn size_hint(&self) -> SizeHint {
        self.size_hint.clone()
    }
}
