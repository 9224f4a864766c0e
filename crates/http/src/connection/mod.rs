//! The per-connection request loop.
//!
//! [`HttpConnection`] reads requests off one stream, hands them to a
//! [`Handler`](crate::handler::Handler) and writes the responses back in order.
//! It honours keep-alive, `Connection: close` and `Expect: 100-continue`, bounds
//! each exchange by the budgets in [`ConnectionOptions`], and stops at the next
//! request boundary once its shutdown token is cancelled.

mod http_connection;

pub use http_connection::ConnectionOptions;
pub use http_connection::HttpConnection;
