use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::handler::{Content, HandlerError, RequestHandler};
use crate::path;
use crate::request::RequestContext;

/// Serves the files below a directory.
///
/// Every request path goes through [`path::resolve`], so nothing outside the
/// directory is ever opened.
#[derive(Debug, Clone)]
pub struct FilesHandler {
    root: PathBuf,
}

impl FilesHandler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl RequestHandler for FilesHandler {
    async fn handle(&self, req: &RequestContext, prefix: &str) -> Result<Content, HandlerError> {
        let resolved = path::resolve(&self.root, prefix, req.path()).await?;
        Ok(Content::file(resolved))
    }
}
