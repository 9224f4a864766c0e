//! Server settings.
//!
//! [`ServerConfig`] is read-only once the server is built. It can be assembled in code
//! (every field has a default) or loaded from TOML:
//!
//! ```toml
//! port = 8080
//! compression_enabled = true
//! max_request_time = 10
//!
//! [pool]
//! max_threads = 12
//!
//! [tls]
//! enabled = true
//! cert_path = "cert.pem"
//! key_path = "key.pem"
//! protocol = "TLSv1.3"
//!
//! [auth]
//! realm = "Test Realm"
//! username = "test"
//! password_hash = "92f1a57051141e9d24396bc42ae43b6500d13f8b"
//! algorithm = "SHA-1"
//! ```

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("invalid config value: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn invalid<S: ToString>(reason: S) -> Self {
        Self::Invalid { reason: reason.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// `start()` does nothing when false.
    pub enabled: bool,
    pub address: IpAddr,
    /// 0 binds an ephemeral port.
    pub port: u16,
    pub compression_enabled: bool,
    /// Largest body compressed in memory; larger ones are streamed chunked.
    pub response_buffer_limit: usize,
    /// Largest decoded request body accepted; beyond it the answer is 413.
    pub request_body_limit: usize,
    #[serde(deserialize_with = "seconds")]
    pub max_request_time: Duration,
    #[serde(deserialize_with = "seconds")]
    pub max_response_time: Duration,
    /// Default drain time of `stop()`.
    #[serde(deserialize_with = "seconds")]
    pub stop_delay: Duration,
    pub trace_method_enabled: bool,
    pub request_logging_level: LogLevel,
    pub response_logging_level: LogLevel,
    pub log_level: LogLevel,
    pub pool: PoolConfig,
    pub tls: TlsConfig,
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            compression_enabled: true,
            response_buffer_limit: 64 * 1024,
            request_body_limit: 1024 * 1024,
            max_request_time: Duration::from_secs(10),
            max_response_time: Duration::from_secs(60),
            stop_delay: Duration::from_secs(5),
            trace_method_enabled: false,
            request_logging_level: LogLevel::Debug,
            response_logging_level: LogLevel::Debug,
            log_level: LogLevel::Info,
            pool: PoolConfig::default(),
            tls: TlsConfig::default(),
            auth: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read { path: path.to_path_buf(), source: e })?;
        Self::from_toml_str(&content)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_threads == 0 {
            return Err(ConfigError::invalid("pool.max_threads must be at least 1"));
        }
        if self.pool.min_threads > self.pool.max_threads {
            return Err(ConfigError::invalid(format!(
                "pool.min_threads ({}) exceeds pool.max_threads ({})",
                self.pool.min_threads, self.pool.max_threads
            )));
        }
        if self.max_request_time.is_zero() || self.max_response_time.is_zero() {
            return Err(ConfigError::invalid("time budgets must be at least one second"));
        }
        if self.tls.enabled && (self.tls.cert_path.is_none() || self.tls.key_path.is_none()) {
            return Err(ConfigError::invalid("tls is enabled but cert_path or key_path is missing"));
        }
        Ok(())
    }
}

/// Sizing of the runtime and of the connection bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub min_threads: usize,
    /// Also the number of connections served at once.
    pub max_threads: usize,
    #[serde(deserialize_with = "seconds")]
    pub keep_alive: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { min_threads: 2, max_threads: 12, keep_alive: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    pub enabled: bool,
    /// PEM certificate chain.
    pub cert_path: Option<PathBuf>,
    /// PEM private key (PKCS#1, PKCS#8 or SEC1).
    pub key_path: Option<PathBuf>,
    pub protocol: TlsProtocol,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum TlsProtocol {
    /// Any version the provider supports.
    #[default]
    #[serde(rename = "TLS")]
    Tls,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

/// A single-user Basic authenticator applied to every route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub realm: String,
    pub username: String,
    /// Hex digest of the password.
    pub password_hash: String,
    #[serde(default = "default_hash_algorithm")]
    pub algorithm: String,
}

fn default_hash_algorithm() -> String {
    "SHA-1".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}
