//! Collection model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Record;

/// A named, ordered group of records representing a query result set.
///
/// Collections carry no pending sync state and are never queued for offline
/// mutation; only read operations apply to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Collection name, matching `Record::collection` of its members
    pub name: String,
    /// Records in result order
    pub records: Vec<Record>,
}

impl Collection {
    /// Create an empty collection with the given name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the result set with a remote response, preserving the local
    /// identity of records already held (matched by canonical id) so callers
    /// keep stable keys across refreshes. Non-object items are skipped.
    pub(crate) fn apply_remote_records(&mut self, items: &[Value]) {
        let previous = std::mem::take(&mut self.records);

        self.records = items
            .iter()
            .filter_map(|item| {
                let mut record = Record::from_remote(&self.name, item)?;
                if let Some(existing) = previous
                    .iter()
                    .find(|candidate| candidate.remote_id == record.remote_id)
                {
                    record.id = existing.id;
                    record.created_at = existing.created_at;
                }
                Some(record)
            })
            .collect();
    }
}
