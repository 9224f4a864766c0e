use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::header::{CONNECTION, HeaderValue};
use http::{Response, StatusCode, Version};
use http_body::Body;
use http_body_util::{BodyExt, Empty};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{RequestDecoder, ResponseEncoder};
use crate::handler::Handler;
use crate::protocol::body::ReqBody;
use crate::protocol::{HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestHeader, ResponseHead, SendError};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Time budgets of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// How long receiving a request head, and draining an unread body, may take.
    pub request_timeout: Duration,
    /// How long the handler plus writing its response may take.
    pub response_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self { request_timeout: Duration::from_secs(10), response_timeout: Duration::from_secs(60) }
    }
}

/// One HTTP/1.1 connection over a split stream.
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    framed_write: FramedWrite<W, ResponseEncoder>,
    options: ConnectionOptions,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_options(reader, writer, ConnectionOptions::default())
    }

    pub fn with_options(reader: R, writer: W, options: ConnectionOptions) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUFFER_SIZE),
            framed_write: FramedWrite::new(writer, ResponseEncoder::new()),
            options,
        }
    }

    /// Serves requests until the peer closes, a request asks to close, or `shutdown` is cancelled.
    ///
    /// Cancellation is observed between requests only, so an exchange in flight
    /// always completes.
    pub async fn process<H>(mut self, handler: Arc<H>, shutdown: CancellationToken) -> Result<(), HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        loop {
            let idle = self.framed_read.read_buffer().is_empty();
            let request_timeout = self.options.request_timeout;

            let next = select! {
                biased;
                _ = shutdown.cancelled(), if idle => {
                    debug!("server is shutting down, closing idle connection");
                    return self.close().await;
                }
                next = timeout(request_timeout, self.framed_read.next()) => next,
            };

            match next {
                Ok(Some(Ok(Message::Header((header, payload_size))))) => {
                    let response_timeout = self.options.response_timeout;
                    let outcome = timeout(response_timeout, self.do_process(header, payload_size, &handler, &shutdown)).await;
                    let keep_alive = match outcome {
                        Ok(keep_alive) => keep_alive?,
                        Err(_elapsed) => {
                            let _ = self.close().await;
                            return Err(HttpError::ResponseTimeout(response_timeout));
                        }
                    };

                    if !keep_alive {
                        return self.close().await;
                    }
                }

                Ok(Some(Ok(Message::Payload(_)))) => {
                    error!("received payload while expecting a request head");
                    self.do_send_response(error_response(&*handler, StatusCode::BAD_REQUEST), false).await?;
                    let _ = self.close().await;
                    return Err(ParseError::invalid_body("payload without a request head").into());
                }

                Ok(Some(Err(e))) => {
                    warn!(cause = %e, "can't decode request");
                    let Some(status) = e.status() else {
                        return Err(e.into());
                    };
                    self.do_send_response(error_response(&*handler, status), false).await?;
                    let _ = self.close().await;
                    return Err(e.into());
                }

                Ok(None) => {
                    debug!("peer closed the connection");
                    return Ok(());
                }

                Err(_elapsed) if idle && self.framed_read.read_buffer().is_empty() => {
                    debug!(timeout = ?request_timeout, "closing idle connection");
                    return self.close().await;
                }

                Err(_elapsed) => {
                    self.do_send_response(error_response(&*handler, StatusCode::REQUEST_TIMEOUT), false).await?;
                    let _ = self.close().await;
                    return Err(HttpError::RequestTimeout(request_timeout));
                }
            }
        }
    }

    /// Runs one exchange and reports whether the connection may serve another request.
    async fn do_process<H>(
        &mut self,
        header: RequestHeader,
        payload_size: PayloadSize,
        handler: &Arc<H>,
        shutdown: &CancellationToken,
    ) -> Result<bool, HttpError>
    where
        H: Handler,
        H::RespBody: Body<Data = Bytes> + Unpin,
        <H::RespBody as Body>::Error: Display,
    {
        let version = header.version();
        let mut keep_alive = header.is_keep_alive();

        if header.expects_continue() && !payload_size.is_empty() {
            if let Some(mut response) = handler.precheck(&header) {
                debug!(status = %response.status(), "refused request before its body");
                set_connection_header(&mut response, version, false);
                self.do_send_response(response, false).await?;
                return Ok(false);
            }

            let writer = self.framed_write.get_mut();
            writer.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
            writer.flush().await.map_err(SendError::io)?;
            debug!("sent 100 continue");
        }

        let (req_body, mut body_sender) = ReqBody::body_channel(&mut self.framed_read, payload_size);
        let request = header.body(req_body);

        // The handler and the body sender run together: the handler may wait on
        // body data that only the sender can read off the connection.
        let mut body_error = None;
        let response_result = {
            let handler_future = handler.call(request);
            let body_future = body_sender.send_body();
            tokio::pin!(handler_future, body_future);

            let mut body_done = false;
            loop {
                select! {
                    biased;
                    response = &mut handler_future => break response,
                    sent = &mut body_future, if !body_done => {
                        body_done = true;
                        if let Err(e) = sent {
                            body_error = Some(e);
                        }
                    }
                }
            }
        };

        if body_error.is_none() {
            // whatever the handler left unread must go before the next request head
            match timeout(self.options.request_timeout, body_sender.skip_body()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => body_error = Some(e),
                Err(_elapsed) => body_error = Some(ParseError::invalid_body("timed out skipping the request body")),
            }
        }
        drop(body_sender);

        if body_error.is_some() || shutdown.is_cancelled() {
            keep_alive = false;
        }

        match response_result {
            Ok(mut response) => {
                set_connection_header(&mut response, version, keep_alive);
                self.do_send_response(response, keep_alive).await?;
            }
            Err(e) => {
                let cause: Box<dyn Error + Send + Sync> = e.into();
                error!(%cause, "handler failed");
                let mut response = error_response(&**handler, StatusCode::INTERNAL_SERVER_ERROR);
                set_connection_header(&mut response, version, keep_alive);
                self.do_send_response(response, keep_alive).await?;
            }
        }

        match body_error {
            Some(e) => Err(e.into()),
            None => Ok(keep_alive),
        }
    }

    async fn do_send_response<T>(&mut self, response: Response<T>, keep_alive: bool) -> Result<(), HttpError>
    where
        T: Body + Unpin,
        T::Error: Display,
    {
        let (parts, mut body) = response.into_parts();
        let mut head = ResponseHead::from_parts(parts, ());
        if !keep_alive && !head.headers().contains_key(CONNECTION) {
            head.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let payload_size = PayloadSize::from_size_hint(&body.size_hint());
        let header = Message::<_, T::Data>::Header((head, payload_size));

        if payload_size.is_empty() {
            self.framed_write.send(header).await?;
            return Ok(());
        }
        self.framed_write.feed(header).await?;

        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    // trailers are not sent
                    if let Ok(data) = frame.into_data() {
                        self.framed_write.send(Message::Payload(PayloadItem::Chunk(data))).await?;
                    }
                }
                Some(Err(e)) => return Err(SendError::invalid_payload(format!("response body failed: {e}")).into()),
                None => {
                    self.framed_write.send(Message::Payload(PayloadItem::<T::Data>::Eof)).await?;
                    return Ok(());
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), HttpError> {
        SinkExt::<Message<(ResponseHead, PayloadSize), Bytes>>::flush(&mut self.framed_write).await?;
        if let Err(e) = self.framed_write.get_mut().shutdown().await {
            info!(cause = %e, "connection shutdown failed");
        }
        Ok(())
    }
}

fn set_connection_header<T>(response: &mut Response<T>, version: Version, keep_alive: bool) {
    if !keep_alive {
        response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    } else if version == Version::HTTP_10 {
        response.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }
}

fn error_response<H: Handler + ?Sized>(handler: &H, status: StatusCode) -> Response<Empty<Bytes>> {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    handler.decorate_error(status, response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::make_handler;
    use http::Request;
    use http_body_util::Full;
    use std::convert::Infallible;
    use tokio::io::{AsyncReadExt, duplex};

    async fn echo(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
        let (parts, body) = request.into_parts();
        let body = body.collect().await?.to_bytes();
        let text = format!("{} {} {}", parts.method, parts.uri.path(), String::from_utf8_lossy(&body));
        Ok(Response::new(Full::new(Bytes::from(text))))
    }

    async fn exchange(input: &'static [u8], handler_body: bool) -> String {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(async move {
            let connection = HttpConnection::new(reader, writer);
            if handler_body {
                connection.process(Arc::new(make_handler(echo)), shutdown).await
            } else {
                let failing = make_handler(|_request: Request<ReqBody>| async {
                    Err::<Response<Empty<Bytes>>, _>(std::io::Error::other("boom"))
                });
                connection.process(Arc::new(failing), shutdown).await
            }
        });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(input).await.unwrap();

        let mut output = Vec::new();
        client_read.read_to_end(&mut output).await.unwrap();
        let _ = task.await;
        String::from_utf8(output).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn keep_alive_then_close() {
        let output = exchange(
            b"POST /a HTTP/1.1\r\nContent-Length: 3\r\n\r\nabcGET /b HTTP/1.1\r\nConnection: close\r\n\r\n",
            true,
        )
        .await;

        assert_eq!(output.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(output.contains("POST /a abc"));
        assert!(output.contains("connection: close\r\n"));
        assert!(output.ends_with("GET /b "));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn http_10_closes_by_default() {
        let output = exchange(b"GET /old HTTP/1.0\r\n\r\nGET /never HTTP/1.0\r\n\r\n", true).await;

        assert_eq!(output.matches("HTTP/1.1 200 OK").count(), 1);
        assert!(!output.contains("/never"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn expect_continue_gets_interim_response() {
        let output = exchange(
            b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
            true,
        )
        .await;

        assert!(output.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"));
        assert!(output.ends_with("POST /upload ok"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn malformed_request_gets_400() {
        let output = exchange(b"NOT A REQUEST\r\n\r\n", true).await;
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn handler_error_gets_500_and_unread_body_is_skipped() {
        let output = exchange(
            b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /b HTTP/1.1\r\nConnection: close\r\n\r\n",
            false,
        )
        .await;

        assert_eq!(output.matches("HTTP/1.1 500 Internal Server Error\r\n").count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn shutdown_closes_idle_connection() {
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let shutdown = CancellationToken::new();
        let handler = Arc::new(make_handler(|_request: Request<ReqBody>| async {
            Ok::<_, Infallible>(Response::new(Empty::<Bytes>::new()))
        }));

        let task = tokio::spawn(HttpConnection::new(reader, writer).process(handler, shutdown.clone()));
        shutdown.cancel();

        assert!(task.await.unwrap().is_ok());
        drop(client);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn partial_request_times_out() {
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let options = ConnectionOptions { request_timeout: Duration::from_millis(50), ..ConnectionOptions::default() };
        let handler = Arc::new(make_handler(echo));

        let task =
            tokio::spawn(HttpConnection::with_options(reader, writer, options).process(handler, CancellationToken::new()));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"GET /slow HTTP/1.1\r\nHost: ").await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(HttpError::RequestTimeout(_))));

        let mut output = Vec::new();
        client_read.read_to_end(&mut output).await.unwrap();
        assert!(output.starts_with(b"HTTP/1.1 408 Request Timeout\r\n"));
    }

    /// Refuses every upload before its body and tags the responses it did not produce.
    struct Guarded;

    #[async_trait::async_trait]
    impl Handler for Guarded {
        type RespBody = Full<Bytes>;
        type Error = Box<dyn Error + Send + Sync>;

        async fn call(&self, request: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
            echo(request).await
        }

        fn precheck(&self, header: &RequestHeader) -> Option<Response<Self::RespBody>> {
            (header.uri().path() == "/upload").then(|| {
                let mut response = Response::new(Full::new(Bytes::from_static(b"no")));
                *response.status_mut() = StatusCode::FORBIDDEN;
                response
            })
        }

        fn decorate_error(&self, status: StatusCode, headers: &mut http::HeaderMap) {
            headers.insert("x-error", HeaderValue::from_str(status.as_str()).unwrap());
        }
    }

    async fn guarded_exchange(input: &[u8]) -> String {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let task =
            tokio::spawn(HttpConnection::new(reader, writer).process(Arc::new(Guarded), CancellationToken::new()));

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(input).await.unwrap();

        let mut output = Vec::new();
        client_read.read_to_end(&mut output).await.unwrap();
        let _ = task.await;
        String::from_utf8(output).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn precheck_replaces_continue() {
        let output =
            guarded_exchange(b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\nok").await;

        assert!(output.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{output}");
        assert!(output.contains("connection: close\r\n"));
        assert!(!output.contains("100 Continue"));
        assert!(output.ends_with("no"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn precheck_passes_other_requests() {
        let output = guarded_exchange(
            b"POST /other HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        )
        .await;

        assert!(output.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "{output}");
        assert!(output.ends_with("POST /other ok"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn connection_errors_are_decorated() {
        let output = guarded_exchange(b"NOT A REQUEST\r\n\r\n").await;
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(output.contains("x-error: 400\r\n"));

        let mut head = String::from("GET / HTTP/1.1\r\n");
        for i in 0..65 {
            head.push_str(&format!("x-{i}: v\r\n"));
        }
        head.push_str("\r\n");
        let output = guarded_exchange(head.as_bytes()).await;
        assert!(output.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"), "{output}");
        assert!(output.contains("x-error: 431\r\n"));
    }
}
