//! Error types for relay sessions

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The source could not be reached or parsed, or the sink could not be allocated.
    #[error("Cannot open {address}: {reason}")]
    Open { address: String, reason: String },

    #[error("Cannot mirror stream {stream} into {address}: {reason}")]
    Topology {
        address: String,
        stream: usize,
        reason: String,
    },

    #[error("Cannot write header to {address}: {reason}")]
    Header { address: String, reason: String },

    #[error("Read from {address} failed: {reason}")]
    Read { address: String, reason: String },

    #[error("Write to {address} failed: {reason}")]
    Write { address: String, reason: String },

    #[error("Cannot write trailer to {address}: {reason}")]
    Trailer { address: String, reason: String },

    #[error("Cannot spawn relay worker: {0}")]
    Spawn(String),

    #[error("Relay worker panicked: {0}")]
    WorkerPanicked(String),
}

impl RelayError {
    pub fn open(address: &str, reason: impl ToString) -> Self {
        Self::Open {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn topology(address: &str, stream: usize, reason: impl ToString) -> Self {
        Self::Topology {
            address: address.to_string(),
            stream,
            reason: reason.to_string(),
        }
    }

    pub fn header(address: &str, reason: impl ToString) -> Self {
        Self::Header {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn read(address: &str, reason: impl ToString) -> Self {
        Self::Read {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn write(address: &str, reason: impl ToString) -> Self {
        Self::Write {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn trailer(address: &str, reason: impl ToString) -> Self {
        Self::Trailer {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True when the session failed before any packet was transferred.
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            Self::Open { .. } | Self::Topology { .. } | Self::Header { .. } | Self::Spawn(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
