//! Mapping request paths onto a served directory without ever leaving it.
//!
//! Every rejection looks the same to the client (404); the [`PathError`] variant only
//! tells the log why.

use std::io;
use std::path::{Component, Path, PathBuf};

use percent_encoding::percent_decode_str;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("request path is outside the route prefix")]
    OutsidePrefix,

    #[error("request path is not valid percent-encoded utf-8")]
    InvalidEncoding,

    #[error("request path tries to traverse: {0}")]
    Traversal(String),

    #[error("resolved path escapes the served root")]
    EscapesRoot,

    #[error("resolved path is not a regular file")]
    NotAFile,

    #[error("can't resolve path: {0}")]
    Io(#[from] io::Error),
}

/// A canonical path of a regular file below a served root.
///
/// Only [`resolve`] constructs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    path: PathBuf,
    len: u64,
}

impl ResolvedPath {
    pub fn as_path(&self) -> &Path {
        &self.path
    }

    /// File size when it was resolved.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Resolves `request_path` (raw, still percent-encoded) below `served_root`.
///
/// The route prefix is stripped after decoding. Both the raw and the decoded
/// form are checked for traversal before the filesystem is touched, and the
/// canonical result must stay below the canonical root.
pub async fn resolve(served_root: &Path, route_prefix: &str, request_path: &str) -> Result<ResolvedPath, PathError> {
    if has_parent_segment(request_path) {
        return Err(PathError::Traversal(request_path.to_string()));
    }

    let decoded = percent_decode_str(request_path).decode_utf8().map_err(|_e| PathError::InvalidEncoding)?;
    let relative = strip_route_prefix(&decoded, route_prefix).ok_or(PathError::OutsidePrefix)?;
    check_relative(relative)?;

    let root = tokio::fs::canonicalize(served_root).await?;
    let canonical = tokio::fs::canonicalize(root.join(relative)).await?;
    if !canonical.starts_with(&root) {
        debug!(path = %canonical.display(), root = %root.display(), "resolved path escapes served root");
        return Err(PathError::EscapesRoot);
    }

    let metadata = tokio::fs::metadata(&canonical).await?;
    if !metadata.is_file() {
        return Err(PathError::NotAFile);
    }

    Ok(ResolvedPath { path: canonical, len: metadata.len() })
}

/// The part of `path` after `prefix`, without its leading separator.
pub(crate) fn strip_route_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

fn has_parent_segment(path: &str) -> bool {
    path.split(['/', '\\']).any(|segment| segment == "..")
}

fn check_relative(relative: &str) -> Result<(), PathError> {
    let traversal = || PathError::Traversal(relative.to_string());

    if relative.starts_with('/') || relative.contains('\\') || relative.contains('\0') || has_parent_segment(relative) {
        return Err(traversal());
    }

    // drive prefixes such as `C:`
    let mut chars = relative.chars();
    if let (Some(drive), Some(':')) = (chars.next(), chars.next())
        && drive.is_ascii_alphabetic()
    {
        return Err(traversal());
    }

    if Path::new(relative).components().any(|component| !matches!(component, Component::Normal(_) | Component::CurDir)) {
        return Err(traversal());
    }
    Ok(())
}
