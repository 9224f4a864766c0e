//! Failures of one connection, split by the side of the exchange they come from.

use std::io;
use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

/// Why a connection stopped serving requests.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("bad request: {0}")]
    Request(#[from] ParseError),

    #[error("failed to write response: {0}")]
    Response(#[from] SendError),

    /// A request head or body did not arrive in time.
    #[error("request not received within {0:?}")]
    RequestTimeout(Duration),

    /// The handler and the response write together took too long.
    #[error("response not completed within {0:?}")]
    ResponseTimeout(Duration),
}

impl HttpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpError::RequestTimeout(_) | HttpError::ResponseTimeout(_))
    }
}

/// Reading a request off the wire went wrong.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("request head of {size} bytes is over the {limit} byte limit")]
    HeadTooLarge { size: usize, limit: usize },

    #[error("more than {limit} request headers")]
    TooManyHeaders { limit: usize },

    /// Request line or header fields that do not parse.
    #[error("malformed request head: {reason}")]
    MalformedHead { reason: String },

    /// `Content-Length` and `Transfer-Encoding` that do not frame a body.
    #[error("invalid body framing: {reason}")]
    InvalidFraming { reason: String },

    #[error("invalid request body: {reason}")]
    InvalidBody { reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ParseError {
    pub fn head_too_large(size: usize, limit: usize) -> Self {
        Self::HeadTooLarge { size, limit }
    }

    pub fn too_many_headers(limit: usize) -> Self {
        Self::TooManyHeaders { limit }
    }

    pub fn malformed_head<S: ToString>(reason: S) -> Self {
        Self::MalformedHead { reason: reason.to_string() }
    }

    pub fn invalid_framing<S: ToString>(reason: S) -> Self {
        Self::InvalidFraming { reason: reason.to_string() }
    }

    pub fn invalid_body<S: ToString>(reason: S) -> Self {
        Self::InvalidBody { reason: reason.to_string() }
    }

    /// The status answered before the connection is closed; `None` when the peer is gone.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ParseError::HeadTooLarge { .. } | ParseError::TooManyHeaders { .. } => {
                Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
            }
            ParseError::Io(_) => None,
            _ => Some(StatusCode::BAD_REQUEST),
        }
    }
}

/// Writing a response went wrong.
#[derive(Debug, Error)]
pub enum SendError {
    /// The response body broke off or disagreed with its declared length.
    #[error("invalid response payload: {reason}")]
    InvalidPayload { reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl SendError {
    pub fn invalid_payload<S: ToString>(reason: S) -> Self {
        Self::InvalidPayload { reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io(e.into())
    }
}
