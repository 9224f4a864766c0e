//! Path-prefix routing.
//!
//! A route mounted at `/files/` answers `/files/` and everything below it; one mounted
//! at `/disabled.txt` answers that path and anything below `/disabled.txt/`. The most
//! specific prefix wins.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::HeaderValue;
use thiserror::Error;
use tracing::trace;

use crate::auth::Authenticator;
use crate::handler::RequestHandler;
use crate::interceptor::{Interceptor, Interceptors, InterceptorsBuilder};

type InnerRouter<T> = matchit::Router<T>;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("route prefix {prefix:?} must start with '/' and can't contain braces")]
    InvalidPrefix { prefix: String },

    #[error("route prefix {prefix:?} is registered twice")]
    Duplicate { prefix: String },

    #[error("can't register route {prefix:?}: {source}")]
    Insert {
        prefix: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("invalid cache-control value for route {prefix:?}")]
    InvalidCacheControl { prefix: String },
}

/// A handler mounted at a path prefix, with the settings that apply to it.
///
/// Only the enabled flag changes after startup.
pub struct Route {
    prefix: String,
    handler: Box<dyn RequestHandler>,
    enabled: AtomicBool,
    attachment: bool,
    cache_control: Option<HeaderValue>,
    compression: bool,
    content_md5: bool,
    interceptors: Interceptors,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Route {
    pub fn builder<H: RequestHandler + 'static>(prefix: impl Into<String>, handler: H) -> RouteBuilder {
        RouteBuilder {
            prefix: prefix.into(),
            handler: Box::new(handler),
            enabled: true,
            attachment: false,
            cache_control: None,
            compression: true,
            content_md5: false,
            interceptors: Interceptors::builder(),
            authenticator: None,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn handler(&self) -> &dyn RequestHandler {
        self.handler.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// A disabled route answers 403 until it is enabled again.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn attachment(&self) -> bool {
        self.attachment
    }

    pub fn cache_control(&self) -> Option<&HeaderValue> {
        self.cache_control.as_ref()
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn content_md5(&self) -> bool {
        self.content_md5
    }

    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    pub fn authenticator(&self) -> Option<&dyn Authenticator> {
        self.authenticator.as_deref()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("prefix", &self.prefix)
            .field("enabled", &self.is_enabled())
            .field("methods", &self.handler.methods())
            .field("attachment", &self.attachment)
            .field("cache_control", &self.cache_control)
            .field("compression", &self.compression)
            .field("content_md5", &self.content_md5)
            .field("authenticator", &self.authenticator)
            .finish_non_exhaustive()
    }
}

pub struct RouteBuilder {
    prefix: String,
    handler: Box<dyn RequestHandler>,
    enabled: bool,
    attachment: bool,
    cache_control: Option<String>,
    compression: bool,
    content_md5: bool,
    interceptors: InterceptorsBuilder,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl fmt::Debug for RouteBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBuilder").field("prefix", &self.prefix).finish_non_exhaustive()
    }
}

impl RouteBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds `Content-Disposition: attachment` to successful responses.
    pub fn attachment(mut self, attachment: bool) -> Self {
        self.attachment = attachment;
        self
    }

    /// A fixed `Cache-Control` for successful and not-modified responses.
    pub fn cache_control(mut self, cache_control: impl Into<String>) -> Self {
        self.cache_control = Some(cache_control.into());
        self
    }

    /// Gzip is still subject to the global switch and to the client's `Accept-Encoding`.
    pub fn compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    pub fn content_md5(mut self, content_md5: bool) -> Self {
        self.content_md5 = content_md5;
        self
    }

    pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
        self.interceptors = self.interceptors.add_last(interceptor);
        self
    }

    /// Replaces the server-wide authenticator for this route.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn build(self) -> Result<Route, RouterError> {
        if !self.prefix.starts_with('/') || self.prefix.contains(['{', '}']) {
            return Err(RouterError::InvalidPrefix { prefix: self.prefix });
        }
        let cache_control = match self.cache_control {
            Some(value) => Some(
                HeaderValue::try_from(value)
                    .map_err(|_e| RouterError::InvalidCacheControl { prefix: self.prefix.clone() })?,
            ),
            None => None,
        };

        Ok(Route {
            prefix: self.prefix,
            handler: self.handler,
            enabled: AtomicBool::new(self.enabled),
            attachment: self.attachment,
            cache_control,
            compression: self.compression,
            content_md5: self.content_md5,
            interceptors: self.interceptors.build(),
            authenticator: self.authenticator,
        })
    }
}

/// The immutable route table.
pub struct Router {
    inner_router: InnerRouter<usize>,
    routes: Vec<Arc<Route>>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder { routes: vec![] }
    }

    /// The route whose prefix covers `path`.
    pub fn at(&self, path: &str) -> Option<&Arc<Route>> {
        match self.inner_router.at(path) {
            Ok(matched) => self.routes.get(*matched.value),
            Err(e) => {
                trace!(path, cause = %e, "no route matched");
                None
            }
        }
    }

    /// The route registered with exactly `prefix`.
    pub fn route(&self, prefix: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.prefix == prefix)
    }

    pub fn routes(&self) -> impl Iterator<Item = &Arc<Route>> {
        self.routes.iter()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router").field("routes", &self.routes).finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct RouterBuilder {
    routes: Vec<Route>,
}

impl RouterBuilder {
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn build(self) -> Result<Router, RouterError> {
        let mut inner_router = InnerRouter::new();
        let mut routes = Vec::with_capacity(self.routes.len());

        for route in self.routes {
            if routes.iter().any(|existing: &Arc<Route>| existing.prefix == route.prefix) {
                return Err(RouterError::Duplicate { prefix: route.prefix });
            }
            let index = routes.len();
            for pattern in patterns(&route.prefix) {
                inner_router
                    .insert(pattern, index)
                    .map_err(|e| RouterError::Insert { prefix: route.prefix.clone(), source: e })?;
            }
            routes.push(Arc::new(route));
        }

        Ok(Router { inner_router, routes })
    }
}

/// The exact prefix plus a catch-all below it.
fn patterns(prefix: &str) -> [String; 2] {
    if prefix.ends_with('/') {
        [prefix.to_string(), format!("{prefix}{{*rest}}")]
    } else {
        [prefix.to_string(), format!("{prefix}/{{*rest}}")]
    }
}
