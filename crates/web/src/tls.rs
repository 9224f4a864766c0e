//! Building the TLS acceptor from PEM files.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::crypto::ring::default_provider;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::version::{TLS12, TLS13};
use tokio_rustls::rustls::{self, ServerConfig as RustlsServerConfig, SupportedProtocolVersion};
use tracing::error;

use crate::config::{TlsConfig, TlsProtocol};

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("tls is enabled but {0} is not configured")]
    MissingPath(&'static str),

    #[error("can't read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path} contains no certificates")]
    NoCertificates { path: PathBuf },

    #[error("{path} contains no private key")]
    NoPrivateKey { path: PathBuf },

    #[error("invalid tls configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

impl TlsProtocol {
    fn versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static ALL: [&SupportedProtocolVersion; 2] = [&TLS13, &TLS12];
        static ONLY_12: [&SupportedProtocolVersion; 1] = [&TLS12];
        static ONLY_13: [&SupportedProtocolVersion; 1] = [&TLS13];
        match self {
            TlsProtocol::Tls => &ALL,
            TlsProtocol::Tls12 => &ONLY_12,
            TlsProtocol::Tls13 => &ONLY_13,
        }
    }
}

/// The acceptor for `config`, or `None` when TLS is disabled.
pub fn acceptor(config: &TlsConfig) -> Result<Option<TlsAcceptor>, TlsError> {
    if !config.enabled {
        return Ok(None);
    }
    let cert_path = config.cert_path.as_deref().ok_or(TlsError::MissingPath("cert_path"))?;
    let key_path = config.key_path.as_deref().ok_or(TlsError::MissingPath("key_path"))?;

    let server_config = create_server_config(cert_path, key_path, config.protocol).inspect_err(|e| {
        error!(cause = %e, "failed to create tls server config");
    })?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

pub fn create_server_config(
    cert_path: &Path,
    key_path: &Path,
    protocol: TlsProtocol,
) -> Result<RustlsServerConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = RustlsServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_protocol_versions(protocol.versions())?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|e| TlsError::Read { path: path.to_path_buf(), source: e })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Read { path: path.to_path_buf(), source: e })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates { path: path.to_path_buf() });
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| TlsError::Read { path: path.to_path_buf(), source: e })?
        .ok_or_else(|| TlsError::NoPrivateKey { path: path.to_path_buf() })
}
