//! Error types for the lookup harness.
//!
//! Errors are classified by how the experiment reacts to them:
//! - **Fatal**: the participant aborts the run immediately (setup, provide,
//!   synchronization failures)
//! - **Recoverable**: logged and folded into the statistics (connect failures
//!   during the join phase, provider lookup misses)

use std::net::SocketAddr;

use thiserror::Error;

use crate::types::ContentId;

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running an experiment.
#[derive(Debug, Error)]
pub enum Error {
    /// Identity, transport or DHT construction failed.
    #[error("setup failed: {0}")]
    Setup(String),

    /// Connecting to the announced root failed.
    #[error("failed to connect to {addr}: {reason}")]
    Connect {
        /// Address we tried to reach.
        addr: SocketAddr,
        /// Underlying error message.
        reason: String,
    },

    /// Announcing ourselves as a provider failed.
    #[error("failed to provide {key}: {reason}")]
    Provide {
        /// Content identifier being announced.
        key: ContentId,
        /// Underlying error message.
        reason: String,
    },

    /// A provider lookup closed without any result.
    #[error("no provider found for {key}")]
    LookupMiss {
        /// Content identifier that was looked up.
        key: ContentId,
    },

    /// The synchronization service failed or shut down.
    #[error("sync service error: {0}")]
    Sync(String),

    /// Internal channel error.
    #[error("channel error: {0}")]
    Channel(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A topic payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error aborts the participant's run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Connect { .. } | Error::LookupMiss { .. })
    }
}

impl<T> From<async_channel::SendError<T>> for Error {
    fn from(err: async_channel::SendError<T>) -> Self {
        Error::Channel(err.to_string())
    }
}

impl From<async_channel::RecvError> for Error {
    fn from(err: async_channel::RecvError) -> Self {
        Error::Channel(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Connect {
            addr: "10.0.0.1:4001".parse().unwrap(),
            reason: "refused".into(),
        };
        assert!(err.to_string().contains("10.0.0.1:4001"));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_fatality() {
        let key = ContentId::from_message(b"x");
        assert!(!Error::LookupMiss { key }.is_fatal());
        assert!(!Error::Connect {
            addr: "127.0.0.1:1".parse().unwrap(),
            reason: String::new(),
        }
        .is_fatal());
        assert!(Error::Setup("no key".into()).is_fatal());
        assert!(Error::Provide {
            key,
            reason: "no peers".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_from_recv() {
        let (tx, rx) = async_channel::bounded::<u8>(1);
        drop(tx);
        let err: Error = rx.recv_blocking().unwrap_err().into();
        assert!(matches!(err, Error::Channel(_)));
    }
}
