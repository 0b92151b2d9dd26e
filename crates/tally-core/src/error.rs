//! Error types for tally-core

use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::LocalStoreError;
use crate::sync::SyncStage;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local store failure; the call is aborted before any remote attempt
    /// and the previously committed record state is intact.
    #[error("Local store error: {0}")]
    LocalStore(#[from] LocalStoreError),

    /// Remote service failure. For a remote push this is surfaced after the
    /// record's pending sync state has been rolled back to its pre-push
    /// snapshot, so a later retry sees the same queued operation.
    #[error("Remote sync error: {0}")]
    Remote(#[from] RemoteError),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A sync attempt advanced through its stages out of order. This is a
    /// coordinator bug guard, not a caller-recoverable condition.
    #[error("Invalid sync stage transition: {from:?} -> {to:?}")]
    Stage { from: SyncStage, to: SyncStage },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
