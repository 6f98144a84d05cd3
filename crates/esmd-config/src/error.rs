//! Error types for configuration loading and validation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("cdn_base_path must be empty or start with '/' and not end with '/': {0:?}")]
    InvalidBasePath(String),
}
