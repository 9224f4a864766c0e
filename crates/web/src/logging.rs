//! Subscriber installation and access logging at a configurable level.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::{LogLevel, ServerConfig};

/// Installs a global fmt subscriber at `config.log_level`.
///
/// Returns false when a global subscriber was already set, which leaves that one in place.
pub fn init(config: &ServerConfig) -> bool {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::from(config.log_level)).finish();
    tracing::subscriber::set_global_default(subscriber).is_ok()
}

/// Emits an event at a level only known at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            $crate::config::LogLevel::Trace => ::tracing::trace!($($arg)+),
            $crate::config::LogLevel::Debug => ::tracing::debug!($($arg)+),
            $crate::config::LogLevel::Info => ::tracing::info!($($arg)+),
            $crate::config::LogLevel::Warn => ::tracing::warn!($($arg)+),
            $crate::config::LogLevel::Error => ::tracing::error!($($arg)+),
        }
    };
}

pub(crate) use log_at;

/// Whether an event at `level` would be recorded by the current subscriber.
pub(crate) fn enabled(level: LogLevel) -> bool {
    match level {
        LogLevel::Trace => tracing::enabled!(Level::TRACE),
        LogLevel::Debug => tracing::enabled!(Level::DEBUG),
        LogLevel::Info => tracing::enabled!(Level::INFO),
        LogLevel::Warn => tracing::enabled!(Level::WARN),
        LogLevel::Error => tracing::enabled!(Level::ERROR),
    }
}
