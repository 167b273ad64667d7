use std::path::{Path, PathBuf};

use crate::types::SombraError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Store file not found at the specified path.
    #[error("store not found: {0}")]
    MissingStore(PathBuf),
    /// Configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Configuration file is not valid TOML for [`crate::admin::CountsConfig`].
    #[error("failed to parse config {path}: {source}")]
    Config {
        /// Config file path.
        path: PathBuf,
        /// Parser failure.
        #[source]
        source: toml::de::Error,
    },
    /// Core store error.
    #[error(transparent)]
    Core(#[from] SombraError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_store(path: impl AsRef<Path>) -> Self {
        AdminError::MissingStore(path.as_ref().to_path_buf())
    }

    /// Maps a missing tree file onto [`AdminError::MissingStore`].
    pub(crate) fn from_core(err: SombraError) -> Self {
        match err {
            SombraError::TreeFileNotFound(path) => AdminError::MissingStore(path),
            other => AdminError::Core(other),
        }
    }
}
