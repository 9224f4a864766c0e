use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::handler::{Content, HandlerError, RequestHandler};
use crate::path::strip_route_prefix;
use crate::request::RequestContext;

/// A closed set of named resources compiled into the binary.
///
/// ```
/// use lightweight_web::handler::ResourceBundle;
///
/// let bundle = ResourceBundle::new().with("robots.txt", b"User-agent: *\n");
/// assert!(bundle.get("robots.txt").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ResourceBundle {
    resources: HashMap<String, Bytes>,
}

impl ResourceBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource, usually from `include_bytes!`.
    pub fn with(mut self, name: &str, bytes: &'static [u8]) -> Self {
        self.resources.insert(name.trim_start_matches('/').to_string(), Bytes::from_static(bytes));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.resources.get(name)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Serves a [`ResourceBundle`]; names are the request path below the route prefix.
#[derive(Debug, Clone)]
pub struct ResourcesHandler {
    bundle: ResourceBundle,
}

impl ResourcesHandler {
    pub fn new(bundle: ResourceBundle) -> Self {
        Self { bundle }
    }
}

#[async_trait]
impl RequestHandler for ResourcesHandler {
    async fn handle(&self, req: &RequestContext, prefix: &str) -> Result<Content, HandlerError> {
        let decoded = percent_decode_str(req.path()).decode_utf8().map_err(HandlerError::not_found)?;
        let name = strip_route_prefix(&decoded, prefix)
            .ok_or_else(|| HandlerError::not_found(format!("{} is outside {prefix}", req.path())))?;

        let bytes = self.bundle.get(name).ok_or_else(|| HandlerError::not_found(format!("no resource named {name}")))?;
        let filename = name.rsplit('/').next().unwrap_or(name);
        Ok(Content::bytes(bytes.clone()).with_filename(filename))
    }
}
