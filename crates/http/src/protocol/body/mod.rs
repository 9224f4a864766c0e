//! Request body streaming.
//!
//! [`ReqBody`] is handed to the handler and implements `http_body::Body`. Its
//! counterpart [`ReqBodySender`] lives in the connection loop and pulls payload
//! items from the decoder only when the handler asks for them, so a handler
//! that never reads its body costs nothing until the connection drains it.

mod req_body;

pub use req_body::ReqBody;
pub use req_body::ReqBodySender;
