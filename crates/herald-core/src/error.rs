//! Error taxonomy.
//!
//! `TransportError` is the status-coded shape every remote call fails with.
//! `HeraldError` covers everything else: configuration, run admission, storage.

use thiserror::Error;

use crate::types::OperationKind;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HeraldError>;

/// A failed remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The remote API answered with an error code.
    #[error("API error {status}: {description}")]
    Api {
        status: u16,
        description: String,
        /// Seconds to wait, only meaningful for 429.
        retry_after: Option<u64>,
    },
    /// No structured answer (connection reset, timeout, bad JSON).
    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn api(status: u16, description: impl Into<String>) -> Self {
        Self::Api {
            status,
            description: description.into(),
            retry_after: None,
        }
    }

    pub fn throttled(retry_after: u64) -> Self {
        Self::Api {
            status: 429,
            description: format!("Too Many Requests: retry after {retry_after}"),
            retry_after: Some(retry_after),
        }
    }

    /// HTTP-like status code, if the remote answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Network(_) => None,
        }
    }

    /// Editing a message to identical content, or a message that is already gone.
    pub fn is_benign_edit_failure(&self) -> bool {
        match self {
            Self::Api { description, .. } => {
                let d = description.to_ascii_lowercase();
                d.contains("message is not modified") || d.contains("message to edit not found")
            }
            Self::Network(_) => false,
        }
    }
}

/// Herald error type.
#[derive(Debug, Error)]
pub enum HeraldError {
    /// Rejected before a run starts: bad batch size, empty payload, no targets.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("a {0} run is already in progress")]
    AlreadyRunning(OperationKind),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("store error: {0}")]
    Store(String),

    #[error("chart error: {0}")]
    Chart(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
