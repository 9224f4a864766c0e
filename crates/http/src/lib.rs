//! The HTTP/1.1 transport of the lightweight embedded server.
//!
//! It parses requests off any `AsyncRead`/`AsyncWrite` pair, streams request bodies to a
//! [`handler::Handler`] and writes responses back, with keep-alive, chunked transfer
//! coding and `Expect: 100-continue`. Routing, content negotiation and everything else
//! about *what* is served lives in `lightweight-web`.
//!
//! # Example
//!
//! ```no_run
//! use std::error::Error;
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::{BodyExt, Full};
//! use lightweight_http::connection::HttpConnection;
//! use lightweight_http::handler::make_handler;
//! use lightweight_http::protocol::body::ReqBody;
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use tracing::{error, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     let handler = Arc::new(make_handler(hello_world));
//!     let shutdown = CancellationToken::new();
//!
//!     loop {
//!         let (tcp_stream, _remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let handler = Arc::clone(&handler);
//!         let shutdown = shutdown.clone();
//!         tokio::spawn(async move {
//!             let (reader, writer) = tcp_stream.into_split();
//!             if let Err(e) = HttpConnection::new(reader, writer).process(handler, shutdown).await {
//!                 warn!(cause = %e, "connection closed with error");
//!             }
//!         });
//!     }
//! }
//!
//! async fn hello_world(request: Request<ReqBody>) -> Result<Response<Full<Bytes>>, Box<dyn Error + Send + Sync>> {
//!     let body = request.into_body().collect().await?.to_bytes();
//!     Ok(Response::new(Full::new(Bytes::from(format!("received {} bytes\r\n", body.len())))))
//! }
//! ```
//!
//! # Limits
//!
//! - HTTP/1.0 and HTTP/1.1 only.
//! - A request head may hold at most 64 headers and 8KB.
//! - Request trailers are read and dropped, response trailers are never sent.

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
