//! Hooks run around a route's handler.
//!
//! Global interceptors run before route interceptors on the way in and after them
//! on the way out.

use std::fmt;

use async_trait::async_trait;
use http::Response;

use crate::body::ResponseBody;
use crate::request::RequestContext;

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Returning a response short-circuits the exchange; the handler never runs.
    async fn on_request(&self, _req: &RequestContext) -> Option<Response<ResponseBody>> {
        None
    }

    /// May amend the response before it is written.
    async fn on_response(&self, _req: &RequestContext, _resp: &mut Response<ResponseBody>) {}
}

#[derive(Default)]
pub struct Interceptors {
    inner: Vec<Box<dyn Interceptor>>,
}

#[async_trait]
impl Interceptor for Interceptors {
    async fn on_request(&self, req: &RequestContext) -> Option<Response<ResponseBody>> {
        for interceptor in &self.inner {
            if let Some(resp) = interceptor.on_request(req).await {
                return Some(resp);
            }
        }
        None
    }

    async fn on_response(&self, req: &RequestContext, resp: &mut Response<ResponseBody>) {
        for interceptor in self.inner.iter().rev() {
            interceptor.on_response(req, resp).await;
        }
    }
}

impl Interceptors {
    pub fn builder() -> InterceptorsBuilder {
        InterceptorsBuilder::new()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors").field("len", &self.inner.len()).finish()
    }
}

#[derive(Default)]
pub struct InterceptorsBuilder {
    inner: Vec<Box<dyn Interceptor>>,
}

impl InterceptorsBuilder {
    fn new() -> Self {
        Self { inner: vec![] }
    }

    pub fn add_last<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.inner.push(Box::new(interceptor));
        self
    }

    pub fn add_first<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.inner.insert(0, Box::new(interceptor));
        self
    }

    pub fn build(self) -> Interceptors {
        Interceptors { inner: self.inner }
    }
}

impl fmt::Debug for InterceptorsBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorsBuilder").field("len", &self.inner.len()).finish()
    }
}
