//! Static asset serving with a path-traversal guard.
//!
//! Maps GET paths to files under a fixed asset root, serving only the
//! handful of suffixes the board GUI uses. Every request path is joined to
//! the canonicalized root and canonicalized again; anything that resolves
//! outside the root is rejected as not found, never served.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Suffix to content-type table for the board GUI's assets.
const CONTENT_TYPES: [(&str, &str); 5] = [
    (".html", "text/html"),
    (".js", "application/javascript"),
    (".css", "text/css"),
    (".png", "image/png"),
    (".pdf", "application/pdf"),
];

/// Errors from asset lookups.
#[derive(Debug, Error)]
pub enum AssetError {
    /// Unknown suffix, missing file, or a path escaping the root.
    #[error("file not found: {0}")]
    NotFound(String),
}

/// An asset file ready to be written to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Content type matched from the request suffix.
    pub content_type: &'static str,

    /// File bytes.
    pub bytes: Vec<u8>,
}

/// Serves files from a single directory tree.
pub struct AssetServer {
    root: PathBuf,
}

impl AssetServer {
    /// Creates a server rooted at `root`.
    ///
    /// The root is canonicalized up front so the containment check compares
    /// resolved paths on both sides.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    /// Looks up `request_path` (an absolute URL path such as `/board.js`).
    ///
    /// `/` is served as `/index.html`. Suffixes outside the content-type
    /// table, files that do not exist, and paths resolving outside the root
    /// all answer [`AssetError::NotFound`].
    pub async fn serve(&self, request_path: &str) -> Result<Asset, AssetError> {
        let request_path = if request_path == "/" {
            "/index.html"
        } else {
            request_path
        };

        let content_type = content_type_for(request_path)
            .ok_or_else(|| AssetError::NotFound(request_path.to_string()))?;

        let candidate = self.root.join(request_path.trim_start_matches('/'));
        let resolved = tokio::fs::canonicalize(&candidate)
            .await
            .map_err(|_| AssetError::NotFound(request_path.to_string()))?;
        if !resolved.starts_with(&self.root) {
            debug!(path = %request_path, "rejected path outside asset root");
            return Err(AssetError::NotFound(request_path.to_string()));
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|_| AssetError::NotFound(request_path.to_string()))?;
        Ok(Asset {
            content_type,
            bytes,
        })
    }
}

/// Returns the content type for a recognized suffix.
fn content_type_for(path: &str) -> Option<&'static str> {
    CONTENT_TYPES
        .iter()
        .find(|(suffix, _)| path.ends_with(suffix))
        .map(|(_, content_type)| *content_type)
}
