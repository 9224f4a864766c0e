//! Content producers mounted on routes.
//!
//! A [`RequestHandler`] only produces [`Content`]. Status codes, validators, compression,
//! attachment and caching headers are added around it by the dispatcher, so every handler
//! gets conditional requests, gzip and HEAD for free.

use std::error::Error;
use std::fmt;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use thiserror::Error;

use crate::path::{PathError, ResolvedPath};
use crate::request::RequestContext;

mod files;
mod resources;

pub use files::FilesHandler;
pub use resources::{ResourceBundle, ResourcesHandler};

/// Methods a handler serves when it doesn't say otherwise.
pub const READ_METHODS: &[Method] = &[Method::GET, Method::HEAD];

#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// `prefix` is the path prefix of the route the request matched.
    async fn handle(&self, req: &RequestContext, prefix: &str) -> Result<Content, HandlerError>;

    /// Methods answered by [`RequestHandler::handle`]; OPTIONS and TRACE are handled around it.
    fn methods(&self) -> &[Method] {
        READ_METHODS
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("not found: {reason}")]
    NotFound { reason: String },

    #[error("bad request: {reason}")]
    BadRequest { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("handler failed: {source}")]
    Internal {
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl HandlerError {
    pub fn not_found<S: ToString>(reason: S) -> Self {
        Self::NotFound { reason: reason.to_string() }
    }

    pub fn bad_request<S: ToString>(reason: S) -> Self {
        Self::BadRequest { reason: reason.to_string() }
    }

    pub fn internal<E: Into<Box<dyn Error + Send + Sync>>>(e: E) -> Self {
        Self::Internal { source: e.into() }
    }
}

impl From<PathError> for HandlerError {
    fn from(e: PathError) -> Self {
        Self::not_found(e)
    }
}

/// What a handler produced, before any HTTP framing.
#[derive(Debug, Clone)]
pub struct Content {
    body: ContentBody,
    content_type: Option<String>,
    content_language: Option<String>,
    filename: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ContentBody {
    Bytes(Bytes),
    File(ResolvedPath),
}

impl Content {
    pub fn bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(ContentBody::Bytes(bytes.into()))
    }

    /// A verified file; its name becomes the attachment filename.
    pub fn file(path: ResolvedPath) -> Self {
        let filename = path.file_name().map(str::to_string);
        Self { filename, ..Self::new(ContentBody::File(path)) }
    }

    fn new(body: ContentBody) -> Self {
        Self { body, content_type: None, content_language: None, filename: None }
    }

    /// Without one, the type is resolved from the request path.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_content_language(mut self, language: impl Into<String>) -> Self {
        self.content_language = Some(language.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn body(&self) -> &ContentBody {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn content_language(&self) -> Option<&str> {
        self.content_language.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn len(&self) -> u64 {
        match &self.body {
            ContentBody::Bytes(bytes) => bytes.len() as u64,
            ContentBody::File(path) => path.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn into_body(self) -> ContentBody {
        self.body
    }

    /// Reads a file body into memory so it can be digested and compressed from one buffer.
    pub(crate) async fn buffered(mut self) -> io::Result<Self> {
        if let ContentBody::File(path) = &self.body {
            let bytes = tokio::fs::read(path.as_path()).await?;
            self.body = ContentBody::Bytes(Bytes::from(bytes));
        }
        Ok(self)
    }
}

/// Fixed bytes, served as they are.
#[derive(Debug, Clone)]
pub struct StaticContent {
    content: Content,
}

impl StaticContent {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self { content: Content::bytes(bytes).with_content_type(content_type) }
    }

    pub fn with_content_language(self, language: impl Into<String>) -> Self {
        Self { content: self.content.with_content_language(language) }
    }
}

#[async_trait]
impl RequestHandler for StaticContent {
    async fn handle(&self, _req: &RequestContext, _prefix: &str) -> Result<Content, HandlerError> {
        Ok(self.content.clone())
    }
}

/// A handler backed by a closure, see [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
    methods: Vec<Method>,
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&RequestContext) -> Result<Content, HandlerError> + Send + Sync,
{
    FnHandler { f, methods: READ_METHODS.to_vec() }
}

impl<F> FnHandler<F> {
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("methods", &self.methods).finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(&RequestContext) -> Result<Content, HandlerError> + Send + Sync,
{
    async fn handle(&self, req: &RequestContext, _prefix: &str) -> Result<Content, HandlerError> {
        (self.f)(req)
    }

    fn methods(&self) -> &[Method] {
        &self.methods
    }
}
