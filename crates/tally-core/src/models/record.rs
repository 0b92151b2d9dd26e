//! Record model

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Top-level response keys that are identity/bookkeeping rather than
/// business fields.
const RESERVED_KEYS: [&str; 5] = ["id", "key", "collection", "created_at", "updated_at"];

/// A unique local identifier for a record, using UUID v7 (time-sortable).
///
/// Assigned at creation and stable for the record's local lifetime, even
/// when the remote service later assigns a different canonical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new unique record ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The CRUD operation a record is queued to replay against the remote
/// service once connectivity permits.
///
/// A record carries at most one tag at a time. `Delete` dominates: once set,
/// no further local mutation changes it until a remote round-trip clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingSync {
    Create,
    Update,
    Delete,
}

impl PendingSync {
    /// Stable string form used by the local store column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl FromStr for PendingSync {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown pending sync tag: {other}")),
        }
    }
}

/// Snapshot of a record's sync pair, taken immediately before a remote push
/// so a failed push can be rolled back to exactly this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncSnapshot {
    pub pending_sync: Option<PendingSync>,
    pub last_local_mutation_at: Option<i64>,
}

/// A uniquely-identified business record.
///
/// Business data lives in `fields`; the coordinator owns the
/// `pending_sync`/`last_local_mutation_at` pair for the duration of one sync
/// attempt and hands the record back through the sync outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Local identity, assigned at creation
    pub id: RecordId,
    /// Logical collection this record belongs to
    pub collection: String,
    /// Canonical id acknowledged by the remote service; `None` until the
    /// first acknowledgment
    pub remote_id: Option<String>,
    /// Arbitrary business fields
    pub fields: Map<String, Value>,
    /// Queued offline mutation, if any
    pub pending_sync: Option<PendingSync>,
    /// Unix-ms timestamp of the last local mutation awaiting push
    pub last_local_mutation_at: Option<i64>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Record {
    /// Create a new record in the given collection with the given fields
    #[must_use]
    pub fn new(collection: impl Into<String>, fields: Map<String, Value>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: RecordId::new(),
            collection: collection.into(),
            remote_id: None,
            fields,
            pending_sync: None,
            last_local_mutation_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record has ever been acknowledged by the remote service
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.remote_id.is_none()
    }

    /// Get a business field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a business field
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Snapshot the sync pair for a later rollback
    #[must_use]
    pub const fn sync_snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            pending_sync: self.pending_sync,
            last_local_mutation_at: self.last_local_mutation_at,
        }
    }

    /// Clear the sync pair. Only valid immediately before a remote push
    /// attempt; pair with [`Record::restore_sync_state`] on failure.
    pub(crate) fn clear_sync_state(&mut self) {
        self.pending_sync = None;
        self.last_local_mutation_at = None;
    }

    /// Restore the sync pair from a pre-push snapshot
    pub(crate) fn restore_sync_state(&mut self, snapshot: SyncSnapshot) {
        self.pending_sync = snapshot.pending_sync;
        self.last_local_mutation_at = snapshot.last_local_mutation_at;
    }

    /// Merge a remote response object into the record.
    ///
    /// Adopts the server's canonical `id` and timestamps when present and
    /// merges the remaining keys into `fields`. Non-object payloads (empty
    /// bodies, delete acknowledgments) are ignored rather than rejected, so
    /// a minimal `{"id": ...}` acknowledgment never wipes business data.
    pub(crate) fn apply_remote(&mut self, data: &Value) {
        let Some(object) = data.as_object() else {
            return;
        };

        if let Some(id) = object.get("id").and_then(Value::as_str) {
            self.remote_id = Some(id.to_string());
        }
        if let Some(updated_at) = object.get("updated_at").and_then(Value::as_i64) {
            self.updated_at = updated_at;
        }

        for (key, value) in object {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Build a record from a remote response object during a collection
    /// fetch. Returns `None` for non-object items.
    #[must_use]
    pub(crate) fn from_remote(collection: &str, item: &Value) -> Option<Self> {
        item.as_object()?;
        let mut record = Self::new(collection, Map::new());
        record.apply_remote(item);
        Some(record)
    }
}
