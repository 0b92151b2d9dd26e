//! Offline-first synchronization layer
//!
//! [`SyncCoordinator`] is the one component with real distributed-systems
//! obligations in Tally: it decides, for every mutation request, whether to
//! touch the local store, the remote service, both, or neither, in what
//! order, and how to roll back on partial failure.

mod coordinator;
mod stage;

pub use coordinator::SyncCoordinator;
pub use stage::SyncStage;

use crate::models::{Collection, Record};

/// CRUD verb requested by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncVerb {
    Create,
    Read,
    Update,
    Delete,
}

impl SyncVerb {
    /// Whether this verb mutates its target
    #[must_use]
    pub const fn is_mutation(self) -> bool {
        !matches!(self, Self::Read)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// The subject of a sync request.
///
/// The coordinator takes exclusive access to the target for the duration of
/// the call; updated state (including rolled-back sync tags after a failed
/// push) is visible to the caller on both success and error paths.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncTarget {
    Record(Record),
    Collection(Collection),
}

impl SyncTarget {
    /// Borrow the record, if this target is one
    #[must_use]
    pub const fn record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Collection(_) => None,
        }
    }

    /// Borrow the collection, if this target is one
    #[must_use]
    pub const fn collection(&self) -> Option<&Collection> {
        match self {
            Self::Record(_) => None,
            Self::Collection(collection) => Some(collection),
        }
    }

    /// Take the record out of the target, if it is one
    #[must_use]
    pub fn into_record(self) -> Option<Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Collection(_) => None,
        }
    }
}

/// Caller-supplied flags for one sync request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Bypass the local store entirely and go straight to the remote
    /// service. Used for requests that are inherently online-only.
    pub skip_offline: bool,
    /// Persist locally but do not attempt a remote push now.
    pub skip_remote_sync: bool,
}

impl SyncOptions {
    /// Bypass the local store for this request
    #[must_use]
    pub const fn skipping_offline(mut self) -> Self {
        self.skip_offline = true;
        self
    }

    /// Queue the mutation locally without pushing it now
    #[must_use]
    pub const fn skipping_remote_sync(mut self) -> Self {
        self.skip_remote_sync = true;
        self
    }
}

/// Where the data that satisfied a sync request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Local,
    Remote,
}

/// Result of a completed sync request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReceipt {
    /// Which side satisfied the request
    pub source: DataSource,
    /// The canonical id the record held before this push, when the remote
    /// service assigned a different one. Callers use this to re-key any
    /// state of their own indexed by the old id.
    pub previous_remote_id: Option<String>,
}

impl SyncReceipt {
    pub(crate) const fn local() -> Self {
        Self {
            source: DataSource::Local,
            previous_remote_id: None,
        }
    }

    pub(crate) const fn remote() -> Self {
        Self {
            source: DataSource::Remote,
            previous_remote_id: None,
        }
    }
}
