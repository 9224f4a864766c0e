//! The per-request state machine between a decoded request and its response.
//!
//! `Received → Authenticated → Routed → ConditionalChecked → BodyBuilt → HeadersSent → BodySent`
//!
//! Each step may leave early with an error response. Error responses carry no body and
//! none of the route's caching or attachment headers. HEAD runs every step a GET runs,
//! so both produce the same status and headers; only the body is dropped.

use std::fmt::Write as _;
use std::sync::Arc;

use http::header::{
    ALLOW, AUTHORIZATION, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_ENCODING, CONTENT_LANGUAGE, CONTENT_LENGTH,
    CONTENT_TYPE, ETAG, HeaderName, IF_NONE_MATCH, TRANSFER_ENCODING, WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderValue, Method, Response, StatusCode};
use http_body::Body;
use tracing::{debug, error};

use crate::auth::{Authenticator, Challenge};
use crate::body::{FileBody, ResponseBody};
use crate::config::ServerConfig;
use crate::digest::CacheValidator;
use crate::encoding::{self, GzipBody};
use crate::handler::{Content, ContentBody, HandlerError};
use crate::interceptor::{Interceptor, Interceptors};
use crate::mime;
use crate::request::RequestContext;
use crate::router::{Route, Router};

const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");
const CHUNKED: HeaderValue = HeaderValue::from_static("chunked");
const GZIP: HeaderValue = HeaderValue::from_static(encoding::GZIP);
const MESSAGE_HTTP: HeaderValue = HeaderValue::from_static("message/http");

/// Methods the engine knows; anything else is answered with 405.
const SUPPORTED_METHODS: [Method; 5] = [Method::GET, Method::HEAD, Method::POST, Method::OPTIONS, Method::TRACE];

/// Routes requests and turns handler [`Content`] into responses.
#[derive(Debug)]
pub struct Dispatcher {
    router: Router,
    interceptors: Interceptors,
    authenticator: Option<Arc<dyn Authenticator>>,
    compression_enabled: bool,
    response_buffer_limit: usize,
    trace_enabled: bool,
}

/// The mutable state of one request while it moves through the dispatcher.
struct Exchange<'a> {
    req: &'a RequestContext,
    route: &'a Route,
    validator: Option<CacheValidator>,
    gzip: bool,
}

impl Dispatcher {
    pub fn new(
        config: &ServerConfig,
        router: Router,
        interceptors: Interceptors,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        Self {
            router,
            interceptors,
            authenticator,
            compression_enabled: config.compression_enabled,
            response_buffer_limit: config.response_buffer_limit,
            trace_enabled: config.trace_method_enabled,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub async fn dispatch(&self, req: &RequestContext) -> Response<ResponseBody> {
        let route = match self.admit(req.path(), req.headers()) {
            Ok(route) => route,
            Err(resp) => return resp,
        };

        let mut resp = match self.intercept_request(req, route).await {
            Some(resp) => resp,
            None => self.serve(req, route).await,
        };

        route.interceptors().on_response(req, &mut resp).await;
        self.interceptors.on_response(req, &mut resp).await;
        resp
    }

    /// Answers from the request head alone when authentication, routing or the
    /// route's state already decide the outcome.
    pub fn precheck(&self, path: &str, headers: &HeaderMap) -> Option<Response<ResponseBody>> {
        self.admit(path, headers).err()
    }

    /// `Received → Authenticated → Routed`.
    fn admit(&self, path: &str, headers: &HeaderMap) -> Result<&Route, Response<ResponseBody>> {
        let route = self.router.at(path).map(|route| &**route);

        let authenticator = route.and_then(Route::authenticator).or(self.authenticator.as_deref());
        if let Some(authenticator) = authenticator
            && authenticator.challenge(headers.get(AUTHORIZATION)) == Challenge::Deny
        {
            debug!(path, realm = authenticator.realm(), "authentication required");
            let mut resp = status_response(StatusCode::UNAUTHORIZED);
            resp.headers_mut().insert(WWW_AUTHENTICATE, authenticator.www_authenticate());
            return Err(resp);
        }

        let Some(route) = route else {
            debug!(path, "no route");
            return Err(status_response(StatusCode::NOT_FOUND));
        };

        if !route.is_enabled() {
            debug!(path, prefix = route.prefix(), "route is disabled");
            return Err(status_response(StatusCode::FORBIDDEN));
        }
        Ok(route)
    }

    async fn intercept_request(&self, req: &RequestContext, route: &Route) -> Option<Response<ResponseBody>> {
        if let Some(resp) = self.interceptors.on_request(req).await {
            return Some(resp);
        }
        route.interceptors().on_request(req).await
    }

    async fn serve(&self, req: &RequestContext, route: &Route) -> Response<ResponseBody> {
        let method = req.method();
        if *method == Method::OPTIONS {
            let mut resp = status_response(StatusCode::OK);
            resp.headers_mut().insert(ALLOW, self.allow(route));
            return resp;
        }
        if *method == Method::TRACE {
            return if self.trace_enabled { trace_echo(req) } else { self.method_not_allowed(route) };
        }
        if !self.handles(route, method) {
            return self.method_not_allowed(route);
        }

        let content = match route.handler().handle(req, route.prefix()).await {
            Ok(content) => content,
            Err(e) => return handler_error_response(req, &e),
        };

        let exchange = Exchange { req, route, validator: None, gzip: self.negotiate_gzip(req, route) };
        match self.respond(exchange, content).await {
            Ok(resp) => resp,
            Err(e) => handler_error_response(req, &e),
        }
    }

    fn negotiate_gzip(&self, req: &RequestContext, route: &Route) -> bool {
        self.compression_enabled && route.compression() && req.accepts_gzip()
    }

    /// Methods the route answers through its handler, HEAD implied by GET.
    fn handled_methods(route: &Route) -> Vec<Method> {
        let mut methods: Vec<Method> = route
            .handler()
            .methods()
            .iter()
            .filter(|method| SUPPORTED_METHODS.contains(*method) && **method != Method::OPTIONS && **method != Method::TRACE)
            .cloned()
            .collect();
        if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
            methods.push(Method::HEAD);
        }
        methods
    }

    fn handles(&self, route: &Route, method: &Method) -> bool {
        Self::handled_methods(route).contains(method)
    }

    fn allow(&self, route: &Route) -> HeaderValue {
        let mut methods = Self::handled_methods(route);
        methods.push(Method::OPTIONS);
        if self.trace_enabled {
            methods.push(Method::TRACE);
        }
        let allow = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        HeaderValue::try_from(allow).unwrap_or_else(|_e| HeaderValue::from_static("OPTIONS"))
    }

    fn method_not_allowed(&self, route: &Route) -> Response<ResponseBody> {
        let mut resp = status_response(StatusCode::METHOD_NOT_ALLOWED);
        resp.headers_mut().insert(ALLOW, self.allow(route));
        resp
    }

    async fn respond(&self, mut exchange: Exchange<'_>, mut content: Content) -> Result<Response<ResponseBody>, HandlerError> {
        let method = exchange.req.method();
        let is_head = *method == Method::HEAD;

        // one read serves both the digest and the gzip'd body
        if exchange.gzip && content.len() <= self.response_buffer_limit as u64 {
            content = content.buffered().await?;
        }

        if is_head || *method == Method::GET {
            exchange.validator = Some(validator_of(&content).await?);
        }

        if let Some(validator) = &exchange.validator
            && let Some(if_none_match) = exchange.req.headers().get(IF_NONE_MATCH)
            && validator.matches(if_none_match.as_bytes())
        {
            return not_modified(&exchange, validator);
        }

        let mut resp = Response::new(ResponseBody::empty());
        self.content_headers(&exchange, &content, resp.headers_mut())?;
        *resp.body_mut() = self.body(&exchange, content).await?;

        if is_head {
            let framing = match resp.body().size_hint().exact() {
                Some(len) => (CONTENT_LENGTH, HeaderValue::from(len)),
                None => (TRANSFER_ENCODING, CHUNKED),
            };
            resp.headers_mut().insert(framing.0, framing.1);
            *resp.body_mut() = ResponseBody::empty();
        }
        Ok(resp)
    }

    fn content_headers(
        &self,
        exchange: &Exchange<'_>,
        content: &Content,
        headers: &mut HeaderMap,
    ) -> Result<(), HandlerError> {
        let content_type = content
            .content_type()
            .unwrap_or_else(|| mime::resolve(content.filename().unwrap_or(exchange.req.path())));
        headers.insert(CONTENT_TYPE, header_value(content_type)?);

        if let Some(validator) = &exchange.validator {
            headers.insert(ETAG, header_value(validator.etag())?);
            if exchange.route.content_md5() && !exchange.gzip {
                headers.insert(CONTENT_MD5, header_value(validator.content_md5())?);
            }
        }
        if let Some(cache_control) = exchange.route.cache_control() {
            headers.insert(CACHE_CONTROL, cache_control.clone());
        }
        if exchange.route.attachment() {
            let filename = content
                .filename()
                .or_else(|| exchange.req.path().rsplit('/').next())
                .filter(|name| !name.is_empty());
            let disposition = match filename {
                Some(name) => format!("attachment; filename=\"{}\"", name.replace(['"', '\\'], "_")),
                None => "attachment".to_string(),
            };
            headers.insert(CONTENT_DISPOSITION, header_value(&disposition)?);
        }
        if let Some(language) = content.content_language() {
            headers.insert(CONTENT_LANGUAGE, header_value(language)?);
        }
        if exchange.gzip {
            headers.insert(CONTENT_ENCODING, GZIP);
        }
        Ok(())
    }

    /// Small bodies are compressed in memory and keep an exact length; larger ones stream chunked.
    async fn body(&self, exchange: &Exchange<'_>, content: Content) -> Result<ResponseBody, HandlerError> {
        let fits_buffer = content.len() <= self.response_buffer_limit as u64;
        let body = match (content.into_body(), exchange.gzip) {
            (ContentBody::Bytes(bytes), false) => ResponseBody::once(bytes),
            (ContentBody::File(path), false) => ResponseBody::file(path.as_path(), path.len()).await?,
            (ContentBody::Bytes(bytes), true) if fits_buffer => ResponseBody::once(encoding::gzip_bytes(&bytes)?),
            (ContentBody::Bytes(bytes), true) => ResponseBody::stream(GzipBody::new(ResponseBody::once(bytes))),
            (ContentBody::File(path), true) => {
                ResponseBody::stream(GzipBody::new(FileBody::open(path.as_path(), path.len()).await?))
            }
        };
        Ok(body)
    }
}

async fn validator_of(content: &Content) -> Result<CacheValidator, HandlerError> {
    match content.body() {
        ContentBody::Bytes(bytes) => Ok(CacheValidator::of_bytes(bytes)),
        ContentBody::File(path) => Ok(CacheValidator::of_file(path).await?),
    }
}

fn not_modified(exchange: &Exchange<'_>, validator: &CacheValidator) -> Result<Response<ResponseBody>, HandlerError> {
    let mut resp = status_response(StatusCode::NOT_MODIFIED);
    resp.headers_mut().insert(ETAG, header_value(validator.etag())?);
    if let Some(cache_control) = exchange.route.cache_control() {
        resp.headers_mut().insert(CACHE_CONTROL, cache_control.clone());
    }
    Ok(resp)
}

fn trace_echo(req: &RequestContext) -> Response<ResponseBody> {
    let mut echo = String::new();
    let _ = write!(echo, "{} {} {:?}\r\n", req.method(), req.uri(), req.version());
    for (name, value) in req.headers() {
        let _ = write!(echo, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }

    let mut resp = Response::new(ResponseBody::from(echo));
    resp.headers_mut().insert(CONTENT_TYPE, MESSAGE_HTTP);
    resp
}

fn handler_error_response(req: &RequestContext, e: &HandlerError) -> Response<ResponseBody> {
    match e {
        HandlerError::NotFound { reason } => {
            debug!(path = req.path(), %reason, "not found");
            status_response(StatusCode::NOT_FOUND)
        }
        HandlerError::BadRequest { reason } => {
            debug!(path = req.path(), %reason, "bad request");
            status_response(StatusCode::BAD_REQUEST)
        }
        HandlerError::Io { .. } | HandlerError::Internal { .. } => {
            error!(method = %req.method(), path = req.path(), cause = %e, "handler failed");
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub(crate) fn status_response(status: StatusCode) -> Response<ResponseBody> {
    let mut resp = Response::new(ResponseBody::empty());
    *resp.status_mut() = status;
    resp
}

fn header_value(value: &str) -> Result<HeaderValue, HandlerError> {
    HeaderValue::try_from(value).map_err(|e| HandlerError::internal(format!("invalid header value {value:?}: {e}")))
}
