//! Error types for manifest loading and package resolution.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid package.json at {path}: {source}")]
    InvalidManifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid package path: {0}")]
    InvalidPackagePath(String),

    #[error("package {name}@{range} not found")]
    PackageNotFound { name: String, range: String },

    #[error("no entry point for {package} (submodule: {submodule:?})")]
    EntryNotFound { package: String, submodule: String },

    #[error("failed to install {package}: {message}")]
    Install { package: String, message: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
