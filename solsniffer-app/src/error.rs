use solsniffer_connector::SnifferError;
use thiserror::Error;

/// Errors raised while bootstrapping the application.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to open the store at '{path}': {source}")]
    Store {
        path: String,
        #[source]
        source: SnifferError,
    },

    #[error("Connector error: {0}")]
    Connector(#[from] SnifferError),
}

impl AppError {
    /// Maps connector config failures onto [`AppError::InvalidConfig`].
    pub fn from_validation(err: SnifferError) -> Self {
        match err {
            SnifferError::Config(reason) => AppError::InvalidConfig(reason),
            other => AppError::Connector(other),
        }
    }
}
