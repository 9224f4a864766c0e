//! Protocol types shared by the codec, the connection loop and handlers.
//!
//! - [`Message`], [`PayloadItem`] and [`PayloadSize`] describe what flows through the codec.
//! - [`RequestHeader`] and [`ResponseHead`] are the heads of a request and a response.
//! - [`body::ReqBody`] streams the request payload to a handler.
//! - [`HttpError`], [`ParseError`] and [`SendError`] are the transport's error types.

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::RequestHeader;

mod response;
pub use response::ResponseHead;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
