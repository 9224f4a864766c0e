//! HTTP Basic authentication against a single configured user.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use http::HeaderValue;
use md5::{Digest as _, Md5};
use ring::constant_time::verify_slices_are_equal;
use ring::digest;
use thiserror::Error;
use tracing::debug;

use crate::config::AuthConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unknown password hash algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("password hash is not valid hex for {algorithm}")]
    InvalidHash { algorithm: HashAlgorithm },

    #[error("realm contains characters not allowed in a header")]
    InvalidRealm,
}

/// Outcome of checking a request's credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Allow,
    Deny,
}

/// Decides whether a request may proceed.
///
/// A [`Challenge::Deny`] is answered with 401 and a Basic challenge for [`Authenticator::realm`].
pub trait Authenticator: Send + Sync + fmt::Debug {
    fn realm(&self) -> &str;

    /// `authorization` is the raw `Authorization` header, if any.
    fn challenge(&self, authorization: Option<&HeaderValue>) -> Challenge;

    /// The `WWW-Authenticate` value sent with a 401.
    fn www_authenticate(&self) -> HeaderValue;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Md5 => 16,
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }

    pub fn hash(self, data: &[u8]) -> Vec<u8> {
        let algorithm = match self {
            HashAlgorithm::Md5 => return Md5::digest(data).to_vec(),
            HashAlgorithm::Sha1 => &digest::SHA1_FOR_LEGACY_USE_ONLY,
            HashAlgorithm::Sha256 => &digest::SHA256,
            HashAlgorithm::Sha384 => &digest::SHA384,
            HashAlgorithm::Sha512 => &digest::SHA512,
        };
        digest::digest(algorithm, data).as_ref().to_vec()
    }
}

impl FromStr for HashAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Md5, Self::Sha1, Self::Sha256, Self::Sha384, Self::Sha512]
            .into_iter()
            .find(|algorithm| algorithm.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AuthError::UnknownAlgorithm(s.to_string()))
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One realm, one user, and the hex hash of that user's password.
pub struct SingleUserAuthenticator {
    realm: String,
    username: String,
    password_hash: Vec<u8>,
    algorithm: HashAlgorithm,
    www_authenticate: HeaderValue,
}

impl SingleUserAuthenticator {
    pub fn new(realm: &str, username: &str, password_hash_hex: &str, algorithm: &str) -> Result<Self, AuthError> {
        let algorithm: HashAlgorithm = algorithm.parse()?;
        let password_hash = decode_hex(password_hash_hex.trim())
            .filter(|hash| hash.len() == algorithm.output_len())
            .ok_or(AuthError::InvalidHash { algorithm })?;
        let www_authenticate =
            HeaderValue::try_from(format!("Basic realm=\"{realm}\"")).map_err(|_e| AuthError::InvalidRealm)?;

        Ok(Self { realm: realm.to_string(), username: username.to_string(), password_hash, algorithm, www_authenticate })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(&config.realm, &config.username, &config.password_hash, &config.algorithm)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        if username != self.username {
            return false;
        }
        let supplied = self.algorithm.hash(password.as_bytes());
        verify_slices_are_equal(&supplied, &self.password_hash).is_ok()
    }
}

impl fmt::Debug for SingleUserAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleUserAuthenticator")
            .field("realm", &self.realm)
            .field("username", &self.username)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Authenticator for SingleUserAuthenticator {
    fn realm(&self) -> &str {
        &self.realm
    }

    fn challenge(&self, authorization: Option<&HeaderValue>) -> Challenge {
        let Some((username, password)) = authorization.and_then(basic_credentials) else {
            return Challenge::Deny;
        };
        if self.verify(&username, &password) {
            Challenge::Allow
        } else {
            debug!(realm = %self.realm, %username, "rejected credentials");
            Challenge::Deny
        }
    }

    fn www_authenticate(&self) -> HeaderValue {
        self.www_authenticate.clone()
    }
}

/// Username and password of a `Basic` authorization header.
fn basic_credentials(header: &HeaderValue) -> Option<(String, String)> {
    let value = header.to_str().ok()?.trim();
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| {
            let high = (pair[0] as char).to_digit(16)?;
            let low = (pair[1] as char).to_digit(16)?;
            Some((high * 16 + low) as u8)
        })
        .collect()
}
