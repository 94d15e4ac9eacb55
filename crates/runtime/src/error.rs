use thiserror::Error;

use crate::model::ModelError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("query must not be empty")]
    EmptyQuery,

    #[error("query cancelled")]
    Cancelled,

    #[error("model endpoint failed: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Mcp(#[from] mcp::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
