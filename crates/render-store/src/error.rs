//! Error types for the render store
//!
//! Remote failures are classified into a small taxonomy so callers can branch
//! on the variant instead of matching error messages:
//! - [`StoreError::AccessDenied`] for HTTP 403
//! - [`StoreError::NotFound`] for HTTP 404 on retrieval and delete paths
//! - [`StoreError::Upstream`] for every other status or transport failure

use std::path::PathBuf;
use thiserror::Error;

use crate::storage::{BlobError, fmt_status};

/// Boxed error handed in by the rendering engine
pub type RenderFailure = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`crate::ArtifactStore`] operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("AccessDenied (403): {0}")]
    AccessDenied(String),

    #[error("File does not exist: {key}")]
    NotFound { key: String },

    #[error("Upstream storage error{}: {message}", fmt_status(.status))]
    Upstream { status: Option<u16>, message: String },

    #[error("Invalid artifact id: {0:?}")]
    InvalidId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Rendering failed before anything reached the store
    #[error(transparent)]
    Render(RenderFailure),
}

impl StoreError {
    /// HTTP status associated with the failure, when there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::AccessDenied(_) => Some(403),
            StoreError::NotFound { .. } => Some(404),
            StoreError::Upstream { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, StoreError::AccessDenied(_))
    }

    /// Convert an upload failure. A 404 while writing means the container is
    /// missing, which is not the caller's "artifact not found".
    pub(crate) fn from_upload(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(key) => StoreError::Upstream {
                status: Some(404),
                message: format!("container not found while uploading '{}'", key),
            },
            other => other.into(),
        }
    }
}

impl From<BlobError> for StoreError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound(key) => StoreError::NotFound { key },
            BlobError::AccessDenied(message) => StoreError::AccessDenied(message),
            BlobError::Backend { status, message } => StoreError::Upstream { status, message },
            BlobError::InvalidKey(key) => StoreError::InvalidId(key),
            BlobError::Configuration(message) => StoreError::Config(message),
            BlobError::Io(e) => StoreError::Io(e),
        }
    }
}

/// Errors raised while reading the configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
