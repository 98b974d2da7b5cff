use solana_client::client_error::ClientError;
use thiserror::Error;

/// A convenience alias used across the connector.
pub type Result<T, E = SnifferError> = std::result::Result<T, E>;

/// Defines the error taxonomy shared by every ingestion component.
///
/// Per-unit failures (a live message, a block, a balance entry, a record) are
/// contained and logged by the workers. Only startup failures are propagated.
#[derive(Error, Debug)]
pub enum SnifferError {
    /// The raw transaction lacks the signatures or accounts required for normalization.
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    /// A live-stream frame could not be interpreted.
    #[error("Invalid stream message: {0}")]
    InvalidMessage(String),

    /// A subscription handshake produced an unexpected or uncorrelated response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The streaming transport errored or was closed by the peer.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The chain RPC endpoint failed or returned an unusable answer.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The sink or checkpoint store rejected a write or read.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The governing cancellation token fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// Every attempt allowed by a retry policy failed.
    #[error("Operation failed after {attempts} attempts: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<SnifferError>,
    },
}

impl SnifferError {
    /// Returns `true` when the error (or the last error of an exhausted retry) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            SnifferError::Cancelled => true,
            SnifferError::RetryExhausted { last, .. } => last.is_cancelled(),
            _ => false,
        }
    }
}

impl From<ClientError> for SnifferError {
    fn from(err: ClientError) -> Self {
        SnifferError::UpstreamUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SnifferError {
    fn from(err: serde_json::Error) -> Self {
        SnifferError::Protocol(format!("JSON encoding failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_retry_reports_attempts_and_last_error() {
        let err = SnifferError::RetryExhausted {
            attempts: 3,
            last: Box::new(SnifferError::UpstreamUnavailable("timeout".into())),
        };
        assert_eq!(
            err.to_string(),
            "Operation failed after 3 attempts: Upstream unavailable: timeout"
        );
        assert!(!err.is_cancelled());
    }
}
