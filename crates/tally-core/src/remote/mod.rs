//! Remote service layer for Tally
//!
//! The service of record is an external collaborator behind the
//! [`RemoteService`] trait. The coordinator treats every error from it
//! uniformly as "remote push failed, roll back"; retry/backoff policy
//! belongs to the client implementation, not the coordinator.

mod http;

pub use http::HttpRemoteClient;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::sync::{SyncTarget, SyncVerb};

/// Errors raised by a remote service client.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// No remote endpoint is configured for this client
    #[error("Remote service is not configured")]
    NotConfigured,

    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Remote HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("Remote API error: {0}")]
    Api(String),

    /// The request or response could not be mapped to the wire contract
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
}

/// Contract consumed by the sync coordinator for remote replication.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Execute one verb against the service of record, returning the
    /// server's response payload (an object for record verbs, an array for
    /// collection reads, possibly `null` for delete acknowledgments).
    async fn sync(&self, verb: SyncVerb, target: &SyncTarget) -> Result<Value, RemoteError>;
}

/// An absent remote: every call fails with [`RemoteError::NotConfigured`].
///
/// Lets clients run offline-only with the same coordinator type, gating
/// pushes behind `skip_remote_sync`.
#[async_trait]
impl<R: RemoteService> RemoteService for Option<R> {
    async fn sync(&self, verb: SyncVerb, target: &SyncTarget) -> Result<Value, RemoteError> {
        match self {
            Some(remote) => remote.sync(verb, target).await,
            None => Err(RemoteError::NotConfigured),
        }
    }
}
