//! Server lifecycle: binding, the accept loop and graceful shutdown.

use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use lightweight_http::connection::{ConnectionOptions, HttpConnection};
use lightweight_http::protocol::HttpError;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{self, Runtime};
use tokio::select;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthError, Authenticator, SingleUserAuthenticator};
use crate::config::{ConfigError, PoolConfig, ServerConfig};
use crate::dispatcher::Dispatcher;
use crate::interceptor::Interceptors;
use crate::logging;
use crate::router::{Route, Router, RouterError};
use crate::service::HttpService;
use crate::tls::{self, TlsError};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("invalid authenticator: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("can't bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub struct ServerBuilder {
    config: ServerConfig,
    router: Option<Router>,
    interceptors: Interceptors,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl ServerBuilder {
    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn interceptors(mut self, interceptors: Interceptors) -> Self {
        self.interceptors = interceptors;
        self
    }

    /// Used instead of the one described by `config.auth`.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn build(self) -> Result<Server, ServerError> {
        self.config.validate()?;

        let authenticator = match (self.authenticator, &self.config.auth) {
            (Some(authenticator), _) => Some(authenticator),
            (None, Some(auth)) => Some(Arc::new(SingleUserAuthenticator::from_config(auth)?) as Arc<dyn Authenticator>),
            (None, None) => None,
        };
        let router = match self.router {
            Some(router) => router,
            None => Router::builder().build()?,
        };
        let routes = router.routes().map(Arc::clone).collect();
        let dispatcher = Dispatcher::new(&self.config, router, self.interceptors, authenticator);

        Ok(Server {
            config: self.config,
            routes,
            state: Mutex::new(State::Ready(dispatcher)),
            running: AtomicBool::new(false),
            local_addr: OnceCell::new(),
        })
    }
}

/// An embedded HTTP server.
///
/// `start` binds and returns once the accept loop runs; `stop` drains in-flight exchanges.
/// A stopped server can't be started again.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    routes: Vec<Arc<Route>>,
    state: Mutex<State>,
    running: AtomicBool,
    local_addr: OnceCell<SocketAddr>,
}

#[derive(Debug)]
enum State {
    Ready(Dispatcher),
    Running(Running),
    Stopped,
}

#[derive(Debug)]
struct Running {
    /// Stops accepting and closes connections at their next request boundary.
    shutdown: CancellationToken,
    /// Drops whatever is still open once the drain time is over.
    force: CancellationToken,
    tracker: TaskTracker,
    accept_loop: JoinHandle<()>,
}

/// What every connection task shares.
#[derive(Clone)]
struct Acceptor {
    service: Arc<HttpService>,
    tls: Option<TlsAcceptor>,
    options: ConnectionOptions,
    shutdown: CancellationToken,
    force: CancellationToken,
}

impl Server {
    pub fn builder(config: ServerConfig) -> ServerBuilder {
        ServerBuilder { config, router: None, interceptors: Interceptors::default(), authenticator: None }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The registered route with exactly `prefix`, e.g. to enable or disable it at runtime.
    pub fn route(&self, prefix: &str) -> Option<&Arc<Route>> {
        self.routes.iter().find(|route| route.prefix() == prefix)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// The bound address, known once the server has started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        if !self.config.enabled {
            info!("server is disabled, not starting");
            return Ok(());
        }
        logging::init(&self.config);

        let mut state = self.state.lock().await;
        if !matches!(*state, State::Ready(_)) {
            warn!("server was already started");
            return Ok(());
        }

        let tls = tls::acceptor(&self.config.tls)?;
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            error!(cause = %e, %addr, "bind server error");
            ServerError::Bind { addr, source: e }
        })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind { addr, source: e })?;

        let State::Ready(dispatcher) = mem::replace(&mut *state, State::Stopped) else {
            return Ok(());
        };
        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let tracker = TaskTracker::new();
        let acceptor = Acceptor {
            service: Arc::new(HttpService::new(&self.config, dispatcher)),
            tls,
            options: ConnectionOptions {
                request_timeout: self.config.max_request_time,
                response_timeout: self.config.max_response_time,
            },
            shutdown: shutdown.clone(),
            force: force.clone(),
        };
        let permits = Arc::new(Semaphore::new(self.config.pool.max_threads));
        let accept_loop = tokio::spawn(accept_loop(listener, acceptor, permits, tracker.clone()));

        info!(%local_addr, tls = self.config.tls.enabled, "start listening");
        let _ = self.local_addr.set(local_addr);
        self.running.store(true, Ordering::Release);
        *state = State::Running(Running { shutdown, force, tracker, accept_loop });
        Ok(())
    }

    /// Stops accepting, lets in-flight exchanges finish for up to `drain`
    /// (the configured stop delay when `None`), then closes what is left.
    ///
    /// Does nothing unless the server is running.
    pub async fn stop(&self, drain: Option<Duration>) {
        let mut state = self.state.lock().await;
        let running = match mem::replace(&mut *state, State::Stopped) {
            State::Running(running) => running,
            other => {
                *state = other;
                return;
            }
        };
        self.running.store(false, Ordering::Release);

        let drain = drain.unwrap_or(self.config.stop_delay);
        info!(?drain, "stopping server");
        running.shutdown.cancel();
        if let Err(e) = running.accept_loop.await {
            error!(cause = %e, "accept loop failed");
        }

        running.tracker.close();
        if timeout(drain, running.tracker.wait()).await.is_err() {
            warn!(remaining = running.tracker.len(), "connections still open after drain, closing them");
            running.force.cancel();
            running.tracker.wait().await;
        }
        info!("server stopped");
    }
}

/// Builds the runtime described by the pool settings, for callers that don't bring one.
pub fn build_runtime(pool: &PoolConfig) -> io::Result<Runtime> {
    runtime::Builder::new_multi_thread()
        .worker_threads(pool.min_threads.max(1))
        .max_blocking_threads(pool.max_threads.max(1))
        .thread_keep_alive(pool.keep_alive)
        .thread_name("lightweight-web")
        .enable_all()
        .build()
}

async fn accept_loop(listener: TcpListener, acceptor: Acceptor, permits: Arc<Semaphore>, tracker: TaskTracker) {
    loop {
        let permit = select! {
            biased;
            _ = acceptor.shutdown.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_closed) => break,
            },
        };

        let (tcp_stream, remote_addr) = select! {
            biased;
            _ = acceptor.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    // fd exhaustion does not clear at once
                    warn!(cause = %e, "failed to accept");
                    if backed_off(&acceptor.shutdown).await {
                        continue;
                    }
                    break;
                }
            },
        };

        tracker.spawn(acceptor.clone().serve(tcp_stream, remote_addr, permit));
    }
    debug!("accept loop stopped");
}

/// Waits [`ACCEPT_BACKOFF`] after a failed accept; `false` when shutdown came first.
async fn backed_off(shutdown: &CancellationToken) -> bool {
    select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

impl Acceptor {
    async fn serve(self, tcp_stream: TcpStream, remote_addr: SocketAddr, _permit: OwnedSemaphorePermit) {
        let _ = tcp_stream.set_nodelay(true);
        let force = self.force.clone();

        select! {
            _ = force.cancelled() => {
                debug!(%remote_addr, "connection force closed");
            }
            result = self.process(tcp_stream, remote_addr) => match result {
                Ok(()) => debug!(%remote_addr, "finished process, connection shutdown"),
                Err(e) if e.is_timeout() => warn!(%remote_addr, cause = %e, "connection timed out"),
                Err(e) => info!(%remote_addr, cause = %e, "connection shutdown with error"),
            },
        }
    }

    async fn process(&self, tcp_stream: TcpStream, remote_addr: SocketAddr) -> Result<(), HttpError> {
        match &self.tls {
            None => {
                let (reader, writer) = tcp_stream.into_split();
                self.run(reader, writer).await
            }
            Some(tls) => {
                let tls_stream = match timeout(self.options.request_timeout, tls.accept(tcp_stream)).await {
                    Ok(Ok(tls_stream)) => tls_stream,
                    Ok(Err(e)) => {
                        debug!(%remote_addr, cause = %e, "tls handshake failed");
                        return Ok(());
                    }
                    Err(_elapsed) => {
                        warn!(%remote_addr, "tls handshake timed out");
                        return Ok(());
                    }
                };
                let (reader, writer) = tokio::io::split(tls_stream);
                self.run(reader, writer).await
            }
        }
    }

    async fn run<R, W>(&self, reader: R, writer: W) -> Result<(), HttpError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        HttpConnection::with_options(reader, writer, self.options)
            .process(Arc::clone(&self.service), self.shutdown.clone())
            .await
    }
}
