//! Local store layer for Tally
//!
//! The coordinator treats the local persistent store as a black box behind
//! the [`LocalStore`] trait. A libsql-backed adapter is bundled; anything
//! satisfying the contract (one success-or-error completion per call,
//! record and sync tag persisted atomically) can stand in.

mod libsql_store;

pub use libsql_store::LibSqlStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Record;
use crate::sync::{SyncTarget, SyncVerb};

/// Errors raised by a local store adapter.
///
/// Distinguishable from a normal absence of data, which is reported through
/// [`LocalData::None`].
#[derive(Debug, Error)]
pub enum LocalStoreError {
    /// The backing store could not be opened or is not usable
    #[error("Local store unavailable: {0}")]
    Unavailable(String),

    /// Backend failure while reading or persisting
    #[error("Local store backend error: {0}")]
    Backend(String),

    /// A stored row could not be decoded back into a record
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),

    /// The requested schema version is newer than the adapter supports
    #[error("Schema version {requested} is not supported (latest is {latest})")]
    UnsupportedSchema { requested: u32, latest: u32 },
}

/// Versioned description of the local store layout.
///
/// Opaque to the coordinator; the adapter reconciles its persisted version
/// against the requested one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSchema {
    pub version: u32,
}

impl StoreSchema {
    #[must_use]
    pub const fn new(version: u32) -> Self {
        Self { version }
    }
}

/// Data returned by a local store call.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalData {
    /// The operation completed without data (writes, read misses)
    None,
    /// A single record (record reads)
    Record(Record),
    /// An ordered result set (collection reads)
    Records(Vec<Record>),
}

/// Contract consumed by the sync coordinator for local persistence.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Probe the backing store, returning `false` when it is unavailable.
    async fn open(&self) -> Result<bool, LocalStoreError>;

    /// The schema version currently persisted, or `None` for a fresh store.
    async fn current_schema(&self) -> Result<Option<StoreSchema>, LocalStoreError>;

    /// Reconcile the persisted layout from `old` to `new`.
    async fn migrate(
        &self,
        new: &StoreSchema,
        old: Option<&StoreSchema>,
    ) -> Result<(), LocalStoreError>;

    /// Apply one verb to one target.
    ///
    /// Mutating verbs must persist the record together with its sync tag in
    /// a single atomic write, so a failure leaves the previously committed
    /// state intact.
    async fn sync(&self, verb: SyncVerb, target: &SyncTarget) -> Result<LocalData, LocalStoreError>;
}
