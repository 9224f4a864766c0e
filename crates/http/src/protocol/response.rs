use http::Response;

/// Status line and headers of an outgoing response, before the body is attached.
pub type ResponseHead = Response<()>;
