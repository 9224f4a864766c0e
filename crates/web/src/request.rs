use bytes::Bytes;
use http::{HeaderMap, Method, Uri, Version};
use lightweight_http::protocol::RequestHeader;
use once_cell::sync::OnceCell;

use crate::encoding;
use crate::params::Parameters;

/// Everything known about one request once its body has been read.
///
/// Built per request by the service and dropped when the response is complete.
#[derive(Debug)]
pub struct RequestContext {
    header: RequestHeader,
    parameters: OnceCell<Parameters>,
    body: Bytes,
    accepts_gzip: bool,
}

impl RequestContext {
    /// `body` is the decoded body.
    pub fn new(header: RequestHeader, body: Bytes) -> Self {
        let accepts_gzip = encoding::accepts_gzip(header.headers());
        Self { header, parameters: OnceCell::new(), body, accepts_gzip }
    }

    pub fn method(&self) -> &Method {
        self.header.method()
    }

    pub fn uri(&self) -> &Uri {
        self.header.uri()
    }

    pub fn path(&self) -> &str {
        self.header.uri().path()
    }

    pub fn version(&self) -> Version {
        self.header.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.header.headers()
    }

    /// Parameters from the query and, for forms, the body. Parsed on first call.
    pub fn parameters(&self) -> &Parameters {
        self.parameters.get_or_init(|| Parameters::from_request(self.header.uri().query(), self.header.headers(), &self.body))
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether `Accept-Encoding` allows gzip.
    pub fn accepts_gzip(&self) -> bool {
        self.accepts_gzip
    }

    pub fn request_header(&self) -> &RequestHeader {
        &self.header
    }
}
