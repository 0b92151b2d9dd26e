//! libsql-backed local store adapter

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT/OFFSET

use std::path::Path;

use async_trait::async_trait;
use libsql::{params, Builder, Connection, Database};
use serde_json::{Map, Value};

use super::{LocalData, LocalStore, LocalStoreError, StoreSchema};
use crate::models::{PendingSync, Record, RecordId};
use crate::sync::{SyncTarget, SyncVerb};

/// Latest schema version this adapter can migrate to
const LATEST_VERSION: u32 = 1;

const RECORD_COLUMNS: &str =
    "id, collection, remote_id, fields, pending_sync, last_local_mutation_at, created_at, updated_at";

impl From<libsql::Error> for LocalStoreError {
    fn from(error: libsql::Error) -> Self {
        Self::Backend(error.to_string())
    }
}

/// Local store persisting records in a libsql database.
///
/// One row per record; business fields are stored as a JSON column next to
/// the sync columns, so a record and its tag always commit together.
pub struct LibSqlStore {
    _db: Database,
    conn: Connection,
}

impl LibSqlStore {
    /// Open a store at the given path, creating the file if needed.
    ///
    /// Schema reconciliation is not run here; call
    /// [`LocalStore::migrate`] (normally through the coordinator) before
    /// record traffic.
    pub async fn open_path(path: impl AsRef<Path>) -> Result<Self, LocalStoreError> {
        let path = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path)
            .build()
            .await
            .map_err(|error| LocalStoreError::Unavailable(error.to_string()))?;
        Self::from_database(db).await
    }

    /// Open an in-memory store (useful for testing)
    pub async fn open_in_memory() -> Result<Self, LocalStoreError> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|error| LocalStoreError::Unavailable(error.to_string()))?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, LocalStoreError> {
        let conn = db
            .connect()
            .map_err(|error| LocalStoreError::Unavailable(error.to_string()))?;
        let store = Self { _db: db, conn };
        store.configure().await?;
        Ok(store)
    }

    /// Configure `SQLite` for reliable local writes
    async fn configure(&self) -> Result<(), LocalStoreError> {
        // Pragmas may be rejected by some backends; only foreign keys are
        // load-bearing.
        self.conn.execute("PRAGMA journal_mode = WAL;", ()).await.ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA foreign_keys = ON;", ()).await?;
        Ok(())
    }

    /// Records with a queued mutation, oldest local mutation first.
    ///
    /// Includes DELETE-pending rows that collection reads hide.
    pub async fn pending(&self) -> Result<Vec<Record>, LocalStoreError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS}
                     FROM records
                     WHERE pending_sync IS NOT NULL
                     ORDER BY last_local_mutation_at ASC"
                ),
                (),
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(&row)?);
        }
        Ok(records)
    }

    /// Record ids starting with the given prefix, most recently updated
    /// first, capped at `limit`.
    pub async fn find_ids_by_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>, LocalStoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id
                 FROM records
                 WHERE id LIKE ?
                 ORDER BY updated_at DESC
                 LIMIT ?",
                params![format!("{prefix}%"), limit as i64],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    async fn upsert_record(&self, record: &Record) -> Result<(), LocalStoreError> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|error| LocalStoreError::Backend(error.to_string()))?;

        self.conn
            .execute(
                "INSERT OR REPLACE INTO records
                 (id, collection, remote_id, fields, pending_sync, last_local_mutation_at, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.id.as_str(),
                    record.collection.clone(),
                    record.remote_id.clone(),
                    fields,
                    record.pending_sync.map(PendingSync::as_str),
                    record.last_local_mutation_at,
                    record.created_at,
                    record.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete_record(&self, id: RecordId) -> Result<(), LocalStoreError> {
        self.conn
            .execute("DELETE FROM records WHERE id = ?", params![id.as_str()])
            .await?;
        Ok(())
    }

    async fn read_record(&self, id: RecordId) -> Result<LocalData, LocalStoreError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                params![id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(LocalData::Record(parse_record(&row)?)),
            None => Ok(LocalData::None),
        }
    }

    async fn read_collection(&self, name: &str) -> Result<LocalData, LocalStoreError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS}
                     FROM records
                     WHERE collection = ?
                       AND (pending_sync IS NULL OR pending_sync != 'delete')
                     ORDER BY updated_at DESC"
                ),
                params![name],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(parse_record(&row)?);
        }
        Ok(LocalData::Records(records))
    }
}

#[async_trait]
impl LocalStore for LibSqlStore {
    async fn open(&self) -> Result<bool, LocalStoreError> {
        match self.conn.query("SELECT 1", ()).await {
            Ok(_) => Ok(true),
            Err(error) => {
                tracing::warn!("Local store probe failed: {error}");
                Ok(false)
            }
        }
    }

    async fn current_schema(&self) -> Result<Option<StoreSchema>, LocalStoreError> {
        let version = get_version(&self.conn).await?;
        Ok((version > 0).then(|| StoreSchema::new(version)))
    }

    async fn migrate(
        &self,
        new: &StoreSchema,
        old: Option<&StoreSchema>,
    ) -> Result<(), LocalStoreError> {
        if new.version > LATEST_VERSION {
            return Err(LocalStoreError::UnsupportedSchema {
                requested: new.version,
                latest: LATEST_VERSION,
            });
        }

        let from = old.map_or(0, |schema| schema.version);
        if from < 1 && new.version >= 1 {
            migrate_v1(&self.conn).await?;
        }
        Ok(())
    }

    async fn sync(&self, verb: SyncVerb, target: &SyncTarget) -> Result<LocalData, LocalStoreError> {
        match (verb, target) {
            (SyncVerb::Create | SyncVerb::Update, SyncTarget::Record(record)) => {
                self.upsert_record(record).await?;
                Ok(LocalData::None)
            }
            (SyncVerb::Delete, SyncTarget::Record(record)) => {
                self.delete_record(record.id).await?;
                Ok(LocalData::None)
            }
            (SyncVerb::Read, SyncTarget::Record(record)) => self.read_record(record.id).await,
            (SyncVerb::Read, SyncTarget::Collection(collection)) => {
                self.read_collection(&collection.name).await
            }
            (_, SyncTarget::Collection(_)) => Err(LocalStoreError::Backend(
                "collections are read-only".to_string(),
            )),
        }
    }
}

fn parse_record(row: &libsql::Row) -> Result<Record, LocalStoreError> {
    let id: String = row.get(0)?;
    let id = id
        .parse::<RecordId>()
        .map_err(|error| LocalStoreError::Corrupt(format!("invalid record id: {error}")))?;

    let fields: String = row.get(3)?;
    let fields: Map<String, Value> = serde_json::from_str(&fields)
        .map_err(|error| LocalStoreError::Corrupt(format!("invalid fields payload: {error}")))?;

    let pending_sync = row
        .get::<Option<String>>(4)?
        .map(|tag| {
            tag.parse::<PendingSync>()
                .map_err(LocalStoreError::Corrupt)
        })
        .transpose()?;

    Ok(Record {
        id,
        collection: row.get(1)?,
        remote_id: row.get(2)?,
        fields,
        pending_sync,
        last_local_mutation_at: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Get the persisted schema version, `0` for a fresh database
async fn get_version(conn: &Connection) -> Result<u32, LocalStoreError> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists = match rows.next().await? {
        Some(row) => row.get::<i32>(0)? != 0,
        None => false,
    };
    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;
    let version = match rows.next().await? {
        Some(row) => row.get::<i64>(0)?,
        None => 0,
    };

    Ok(u32::try_from(version).unwrap_or(0))
}

/// Migration to version 1: initial schema
async fn migrate_v1(conn: &Connection) -> Result<(), LocalStoreError> {
    // libsql doesn't have execute_batch, so we run each statement separately
    // inside a transaction for atomicity.
    conn.execute("BEGIN TRANSACTION", ()).await?;

    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS records (
            id TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            remote_id TEXT,
            fields TEXT NOT NULL,
            pending_sync TEXT,
            last_local_mutation_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_records_collection ON records(collection, updated_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_records_pending ON records(pending_sync)",
        "CREATE INDEX IF NOT EXISTS idx_records_remote ON records(remote_id)",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    for stmt in statements {
        if let Err(error) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(error.into());
        }
    }

    if let Err(error) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(error.into());
    }

    tracing::info!("Migrated local store to version 1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn setup() -> LibSqlStore {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        store
            .migrate(&StoreSchema::new(1), None)
            .await
            .unwrap();
        store
    }

    fn invoice(total: i64) -> Record {
        let mut record = Record::new("invoices", Map::new());
        record.set_field("total", json!(total));
        record
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_probe_succeeds_on_fresh_store() {
        let store = setup().await;
        assert!(store.open().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrations_are_idempotent() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        store.migrate(&StoreSchema::new(1), None).await.unwrap();
        let current = store.current_schema().await.unwrap();
        store
            .migrate(&StoreSchema::new(1), current.as_ref())
            .await
            .unwrap();

        assert_eq!(store.current_schema().await.unwrap(), Some(StoreSchema::new(1)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn fresh_store_has_no_schema() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        assert_eq!(store.current_schema().await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unsupported_schema_version_is_rejected() {
        let store = LibSqlStore::open_in_memory().await.unwrap();
        let error = store.migrate(&StoreSchema::new(99), None).await.unwrap_err();
        assert!(matches!(
            error,
            LocalStoreError::UnsupportedSchema { requested: 99, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_round_trips_with_sync_columns() {
        let store = setup().await;
        let mut record = invoice(120);
        record.pending_sync = Some(PendingSync::Update);
        record.last_local_mutation_at = Some(4321);
        record.remote_id = Some("srv-9".to_string());

        store
            .sync(SyncVerb::Update, &SyncTarget::Record(record.clone()))
            .await
            .unwrap();

        let fetched = store
            .sync(SyncVerb::Read, &SyncTarget::Record(record.clone()))
            .await
            .unwrap();
        assert_eq!(fetched, LocalData::Record(record));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_miss_is_not_an_error() {
        let store = setup().await;
        let data = store
            .sync(SyncVerb::Read, &SyncTarget::Record(invoice(1)))
            .await
            .unwrap();
        assert_eq!(data, LocalData::None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_the_row() {
        let store = setup().await;
        let record = invoice(10);
        store
            .sync(SyncVerb::Create, &SyncTarget::Record(record.clone()))
            .await
            .unwrap();
        store
            .sync(SyncVerb::Delete, &SyncTarget::Record(record.clone()))
            .await
            .unwrap();

        let data = store
            .sync(SyncVerb::Read, &SyncTarget::Record(record))
            .await
            .unwrap();
        assert_eq!(data, LocalData::None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collection_read_hides_delete_pending_rows() {
        let store = setup().await;

        let kept = invoice(10);
        let mut soft_deleted = invoice(20);
        soft_deleted.pending_sync = Some(PendingSync::Delete);

        store
            .sync(SyncVerb::Create, &SyncTarget::Record(kept.clone()))
            .await
            .unwrap();
        store
            .sync(SyncVerb::Update, &SyncTarget::Record(soft_deleted))
            .await
            .unwrap();

        let data = store
            .sync(
                SyncVerb::Read,
                &SyncTarget::Collection(Collection::new("invoices")),
            )
            .await
            .unwrap();
        let LocalData::Records(records) = data else {
            panic!("expected records");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, kept.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collection_mutations_are_rejected() {
        let store = setup().await;
        let error = store
            .sync(
                SyncVerb::Create,
                &SyncTarget::Collection(Collection::new("invoices")),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, LocalStoreError::Backend(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_lists_queued_records_in_mutation_order() {
        let store = setup().await;

        let mut first = invoice(1);
        first.pending_sync = Some(PendingSync::Create);
        first.last_local_mutation_at = Some(100);
        let mut second = invoice(2);
        second.pending_sync = Some(PendingSync::Delete);
        second.last_local_mutation_at = Some(50);
        let clean = invoice(3);

        for record in [&first, &second, &clean] {
            store
                .sync(SyncVerb::Create, &SyncTarget::Record((*record).clone()))
                .await
                .unwrap();
        }

        let pending = store.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[1].id, first.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("tally.db");
        let record = invoice(55);

        {
            let store = LibSqlStore::open_path(&db_path).await.unwrap();
            store.migrate(&StoreSchema::new(1), None).await.unwrap();
            store
                .sync(SyncVerb::Create, &SyncTarget::Record(record.clone()))
                .await
                .unwrap();
        }

        let reopened = LibSqlStore::open_path(&db_path).await.unwrap();
        assert_eq!(
            reopened.current_schema().await.unwrap(),
            Some(StoreSchema::new(1))
        );
        let fetched = reopened
            .sync(SyncVerb::Read, &SyncTarget::Record(record.clone()))
            .await
            .unwrap();
        assert_eq!(fetched, LocalData::Record(record));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn find_ids_by_prefix_matches_and_caps() {
        let store = setup().await;
        let record = invoice(10);
        store
            .sync(SyncVerb::Create, &SyncTarget::Record(record.clone()))
            .await
            .unwrap();

        let id = record.id.as_str();
        let matches = store.find_ids_by_prefix(&id[..8], 3).await.unwrap();
        assert_eq!(matches, vec![id]);

        let none = store.find_ids_by_prefix("zzzzzzzz", 3).await.unwrap();
        assert!(none.is_empty());
    }
}
