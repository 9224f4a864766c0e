//! The seam between the connection loop and whatever produces responses.

use std::error::Error;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body::Body;

use crate::protocol::RequestHeader;
use crate::protocol::body::ReqBody;

/// Turns one request into one response.
///
/// An `Err` becomes an empty 500 response; the connection stays usable.
#[async_trait]
pub trait Handler: Send + Sync {
    type RespBody: Body;
    type Error: Into<Box<dyn Error + Send + Sync>>;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error>;

    /// Runs before `100 Continue` is sent. A response returned here is sent instead
    /// of the interim one, the body is never read and the connection is closed.
    fn precheck(&self, _header: &RequestHeader) -> Option<Response<Self::RespBody>> {
        None
    }

    /// Adds headers to the responses the connection writes on its own: 400, 408 and 431
    /// for unreadable requests, 500 for a failed handler.
    fn decorate_error(&self, _status: StatusCode, _headers: &mut HeaderMap) {}
}

/// A [`Handler`] backed by an async function, see [`make_handler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

#[async_trait]
impl<RespBody, Err, F, Fut> Handler for HandlerFn<F>
where
    RespBody: Body,
    F: Fn(Request<ReqBody>) -> Fut + Send + Sync,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<RespBody>, Err>> + Send,
{
    type RespBody = RespBody;
    type Error = Err;

    async fn call(&self, req: Request<ReqBody>) -> Result<Response<Self::RespBody>, Self::Error> {
        (self.f)(req).await
    }
}

pub fn make_handler<F, RespBody, Err, Fut>(f: F) -> HandlerFn<F>
where
    RespBody: Body,
    Err: Into<Box<dyn Error + Send + Sync>>,
    Fut: Future<Output = Result<Response<RespBody>, Err>>,
    F: Fn(Request<ReqBody>) -> Fut,
{
    HandlerFn { f }
}
