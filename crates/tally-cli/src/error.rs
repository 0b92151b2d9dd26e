use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tally_core::Error),
    #[error(transparent)]
    Store(#[from] tally_core::store::LocalStoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Collection name cannot be empty")]
    EmptyCollection,
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("No fields provided; pass key=value pairs")]
    EmptyFields,
    #[error("Invalid field pair '{0}'; expected key=value")]
    InvalidField(String),
    #[error("Record not found for id/prefix: {0}")]
    RecordNotFound(String),
    #[error("{0}")]
    AmbiguousRecordId(String),
    #[error("Editor command failed: {0}")]
    EditorFailed(String),
    #[error("Remote configuration error: {0}")]
    RemoteConfig(String),
    #[error(
        "No remote service is configured. Set TALLY_REMOTE_URL (and optionally TALLY_REMOTE_TOKEN) to enable `tally push`."
    )]
    RemoteNotConfigured,
}
