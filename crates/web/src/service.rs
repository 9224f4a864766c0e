//! The transport-facing side of the engine: reads the request body, dispatches, and
//! stamps the headers every response carries.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH, DATE, HeaderName};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use lightweight_http::handler::Handler;
use lightweight_http::protocol::RequestHeader;
use lightweight_http::protocol::body::ReqBody;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::body::ResponseBody;
use crate::config::{LogLevel, ServerConfig};
use crate::date::DateService;
use crate::dispatcher::{Dispatcher, status_response};
use crate::encoding::{self, DecodeError};
use crate::logging::{self, log_at};
use crate::request::RequestContext;

const STATUS: HeaderName = HeaderName::from_static("status");

/// Adapts a [`Dispatcher`] to the connection loop.
#[derive(Debug)]
pub struct HttpService {
    dispatcher: Dispatcher,
    date_service: DateService,
    request_body_limit: usize,
    max_request_time: Duration,
    request_logging_level: LogLevel,
    response_logging_level: LogLevel,
}

impl HttpService {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &ServerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            date_service: DateService::new(),
            request_body_limit: config.request_body_limit,
            max_request_time: config.max_request_time,
            request_logging_level: config.request_logging_level,
            response_logging_level: config.response_logging_level,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The decoded request body, or the status to answer with instead.
    async fn read_body(&self, header: &RequestHeader, body: ReqBody) -> Result<Bytes, StatusCode> {
        if self.body_too_large(header) {
            debug!(limit = self.request_body_limit, "request body too large");
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }

        let collected = match timeout(self.max_request_time, Limited::new(body, self.request_body_limit).collect()).await
        {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) if e.is::<LengthLimitError>() => return Err(StatusCode::PAYLOAD_TOO_LARGE),
            Ok(Err(e)) => {
                debug!(cause = %e, "can't read request body");
                return Err(StatusCode::BAD_REQUEST);
            }
            Err(_) => {
                warn!(budget = ?self.max_request_time, uri = %header.uri(), "request body was not received in time");
                return Err(StatusCode::REQUEST_TIMEOUT);
            }
        };

        match header.headers().get(CONTENT_ENCODING).map(HeaderValue::as_bytes) {
            None => Ok(collected),
            Some(coding) if coding.eq_ignore_ascii_case(b"identity") => Ok(collected),
            Some(coding) if coding.eq_ignore_ascii_case(b"gzip") || coding.eq_ignore_ascii_case(b"x-gzip") => {
                if collected.is_empty() {
                    return Ok(collected);
                }
                encoding::gunzip(&collected, self.request_body_limit).map_err(|e| {
                    debug!(cause = %e, "can't inflate request body");
                    match e {
                        DecodeError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                        DecodeError::Invalid(_) => StatusCode::BAD_REQUEST,
                    }
                })
            }
            Some(coding) => {
                debug!(coding = %String::from_utf8_lossy(coding), "unsupported request content encoding");
                Err(StatusCode::UNSUPPORTED_MEDIA_TYPE)
            }
        }
    }

    /// `Status` and `Date` go on every response, errors included.
    fn stamp(&self, status: StatusCode, headers: &mut HeaderMap) {
        let line = format!("{} {}", status.as_str(), status.canonical_reason().unwrap_or_default());
        if let Ok(value) = HeaderValue::try_from(line) {
            headers.insert(STATUS, value);
        }
        headers.insert(DATE, self.date_service.http_date());
    }

    fn body_too_large(&self, header: &RequestHeader) -> bool {
        content_length(header.headers()).is_some_and(|length| length > self.request_body_limit as u64)
    }
}

#[async_trait]
impl Handler for HttpService {
    type RespBody = ResponseBody;
    type Error = Infallible;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        let started = Instant::now();
        let (parts, body) = req.into_parts();
        let header = RequestHeader::from(parts);
        let method = header.method().clone();
        let uri = header.uri().clone();

        log_at!(self.request_logging_level, %method, %uri, version = ?header.version(), "request");
        if logging::enabled(LogLevel::Trace) {
            tracing::trace!(headers = ?header.headers(), "request headers");
        }

        let mut resp = match self.read_body(&header, body).await {
            Ok(body) => {
                let ctx = RequestContext::new(header, body);
                self.dispatcher.dispatch(&ctx).await
            }
            Err(status) => status_response(status),
        };
        self.stamp(resp.status(), resp.headers_mut());

        log_at!(
            self.response_logging_level,
            %method,
            %uri,
            status = resp.status().as_u16(),
            length = ?resp.body().size_hint().exact(),
            elapsed = ?started.elapsed(),
            "response"
        );
        Ok(resp)
    }

    fn precheck(&self, header: &RequestHeader) -> Option<Response<Self::RespBody>> {
        let mut resp = if self.body_too_large(header) {
            debug!(limit = self.request_body_limit, "request body too large");
            status_response(StatusCode::PAYLOAD_TOO_LARGE)
        } else {
            self.dispatcher.precheck(header.uri().path(), header.headers())?
        };
        self.stamp(resp.status(), resp.headers_mut());
        log_at!(
            self.response_logging_level,
            method = %header.method(),
            uri = %header.uri(),
            status = resp.status().as_u16(),
            "response before 100 continue"
        );
        Some(resp)
    }

    fn decorate_error(&self, status: StatusCode, headers: &mut HeaderMap) {
        self.stamp(status, headers);
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Content, StaticContent, handler_fn};
    use crate::interceptor::Interceptors;
    use crate::router::{Route, Router};
    use http::Method;
    use lightweight_http::connection::HttpConnection;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
    use tokio_util::sync::CancellationToken;

    fn service(config: &ServerConfig) -> HttpService {
        let router = Router::builder()
            .route(
                Route::builder(
                    "/body",
                    handler_fn(|req| Ok(Content::bytes(req.body().clone()).with_content_type("text/plain")))
                        .with_methods([Method::POST]),
                )
                .build()
                .unwrap(),
            )
            .route(Route::builder("/loremIpsum.txt", StaticContent::new("lorem ipsum", "text/plain")).build().unwrap())
            .build()
            .unwrap();
        HttpService::new(config, Dispatcher::new(config, router, Interceptors::default(), None))
    }

    async fn exchange(config: &ServerConfig, input: Vec<u8>) -> String {
        let (client, server) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(server);
        let handler = Arc::new(service(config));

        let task = tokio::spawn(async move { HttpConnection::new(reader, writer).process(handler, CancellationToken::new()).await });

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(&input).await.unwrap();

        let mut output = Vec::new();
        client_read.read_to_end(&mut output).await.unwrap();
        let _ = task.await;
        String::from_utf8_lossy(&output).into_owned()
    }

    fn post(body: &[u8], extra_headers: &str) -> Vec<u8> {
        let mut request = format!(
            "POST /body HTTP/1.1\r\nContent-Length: {}\r\nConnection: close\r\n{extra_headers}\r\n",
            body.len()
        )
        .into_bytes();
        request.extend_from_slice(body);
        request
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn stamps_status_and_date() {
        let output =
            exchange(&ServerConfig::default(), b"GET /loremIpsum.txt HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec()).await;

        assert!(output.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(output.contains("status: 200 OK\r\n"));
        assert!(output.contains("date: "));
        assert!(output.ends_with("lorem ipsum"));

        let output = exchange(&ServerConfig::default(), b"GET /missing HTTP/1.1\r\nConnection: close\r\n\r\n".to_vec()).await;
        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(output.contains("status: 404 Not Found\r\n"));
        assert!(output.contains("date: "));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn reads_plain_and_gzip_bodies() {
        let output = exchange(&ServerConfig::default(), post(b"plain body", "")).await;
        assert!(output.ends_with("plain body"), "{output}");

        let compressed = encoding::gzip_bytes(b"inflated body").unwrap();
        let output = exchange(&ServerConfig::default(), post(&compressed, "Content-Encoding: gzip\r\n")).await;
        assert!(output.ends_with("inflated body"), "{output}");

        let output = exchange(&ServerConfig::default(), post(b"not gzip", "Content-Encoding: gzip\r\n")).await;
        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{output}");

        let output = exchange(&ServerConfig::default(), post(b"brotli?", "Content-Encoding: br\r\n")).await;
        assert!(output.starts_with("HTTP/1.1 415 Unsupported Media Type\r\n"), "{output}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn enforces_body_limit() {
        let config = ServerConfig { request_body_limit: 8, ..ServerConfig::default() };

        let output = exchange(&config, post(b"way more than eight bytes", "")).await;
        assert!(output.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{output}");

        let chunked = b"POST /body HTTP/1.1\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n\
            6\r\nabcdef\r\n6\r\nghijkl\r\n0\r\n\r\n"
            .to_vec();
        let output = exchange(&config, chunked).await;
        assert!(output.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{output}");

        let compressed = encoding::gzip_bytes(&[b'z'; 64]).unwrap();
        let config = ServerConfig { request_body_limit: compressed.len() + 1, ..ServerConfig::default() };
        let output = exchange(&config, post(&compressed, "Content-Encoding: gzip\r\n")).await;
        assert!(output.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{output}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn refuses_oversized_body_before_continue() {
        let config = ServerConfig { request_body_limit: 8, ..ServerConfig::default() };

        let output = exchange(&config, post(b"way more than eight bytes", "Expect: 100-continue\r\n")).await;
        assert!(output.starts_with("HTTP/1.1 413 Payload Too Large\r\n"), "{output}");
        assert!(!output.contains("100 Continue"), "{output}");
        assert!(output.contains("status: 413 Payload Too Large\r\n"));

        let output = exchange(&config, post(b"small", "Expect: 100-continue\r\n")).await;
        assert!(output.starts_with("HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\n"), "{output}");
        assert!(output.ends_with("small"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unknown_route_refused_before_continue() {
        let request = b"PUT /missing HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\ndata".to_vec();
        let output = exchange(&ServerConfig::default(), request).await;

        assert!(output.starts_with("HTTP/1.1 404 Not Found\r\n"), "{output}");
        assert!(output.contains("connection: close\r\n"));
        assert!(!output.contains("100 Continue"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn stamps_transport_errors() {
        let output = exchange(&ServerConfig::default(), b"NOT A REQUEST\r\n\r\n".to_vec()).await;

        assert!(output.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{output}");
        assert!(output.contains("status: 400 Bad Request\r\n"));
        assert!(output.contains("date: "));
    }
}
