//! An embedded HTTP serving engine built on [`lightweight_http`].
//!
//! Routes map path prefixes to handlers that produce [`Content`]: files below a root
//! directory, resources compiled into the binary, or anything a [`RequestHandler`]
//! returns. Around every handler the [`Dispatcher`] applies authentication, method
//! checks, `ETag`/`If-None-Match` validation, gzip, `HEAD` and the caching and
//! attachment headers configured on the route.
//!
//! ```no_run
//! use lightweight_web::{FilesHandler, Route, Router, Server, ServerConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let router = Router::builder()
//!     .route(Route::builder("/files/", FilesHandler::new("/srv/www")).cache_control("max-age=3600").build()?)
//!     .build()?;
//!
//! let server = Server::builder(ServerConfig::default()).router(router).build()?;
//! server.start().await?;
//! // ...
//! server.stop(None).await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod body;
pub mod config;
pub mod date;
pub mod digest;
pub mod dispatcher;
pub mod encoding;
pub mod handler;
pub mod interceptor;
pub mod logging;
pub mod mime;
pub mod params;
pub mod path;
pub mod request;
pub mod router;
pub mod server;
pub mod service;
pub mod tls;

pub use auth::{Authenticator, Challenge, HashAlgorithm, SingleUserAuthenticator};
pub use body::ResponseBody;
pub use config::{AuthConfig, LogLevel, PoolConfig, ServerConfig, TlsConfig, TlsProtocol};
pub use digest::CacheValidator;
pub use dispatcher::Dispatcher;
pub use handler::{
    Content, FilesHandler, HandlerError, RequestHandler, ResourceBundle, ResourcesHandler, StaticContent, handler_fn,
};
pub use interceptor::{Interceptor, Interceptors};
pub use params::Parameters;
pub use request::RequestContext;
pub use router::{Route, Router};
pub use server::{Server, ServerError, build_runtime};
