//! CLI error types.

use thiserror::Error;

use crate::config::ConfigError;

/// CLI errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration is invalid or missing required fields.
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    ConfigFile(#[from] ConfigError),

    /// An error occurred in the runtime layer.
    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The model endpoint could not be reached or answered with an error.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(self, Self::Runtime(runtime::Error::Model(_)))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
