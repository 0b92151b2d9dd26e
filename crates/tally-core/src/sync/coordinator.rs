//! Synchronization coordinator
//!
//! Decides, for every mutation request, whether to touch the local store,
//! the remote service, both, or neither, in what order, and how to roll
//! back on partial failure.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::stage::SyncAttempt;
use super::{DataSource, SyncOptions, SyncReceipt, SyncStage, SyncTarget, SyncVerb};
use crate::error::{Error, Result};
use crate::models::{Collection, PendingSync, Record, RecordId};
use crate::remote::{RemoteError, RemoteService};
use crate::store::{LocalData, LocalStore, LocalStoreError, StoreSchema};
use crate::util::unix_timestamp_ms_now;

/// Offline-first synchronization coordinator.
///
/// Wraps a [`LocalStore`] and a [`RemoteService`] and reconciles
/// locally-queued record mutations against the service of record. Per
/// original request it performs at most one local-store call and one remote
/// call, and the returned future resolves exactly once - with the finalized
/// target on success, or with the rolled-back target on a failed push.
///
/// Operations for the same record id are serialized: a second request
/// arriving while a push for that id is in flight queues behind it, because
/// the optimistic-clear/rollback logic owns the record's sync pair for the
/// duration of one attempt. Collections carry no sync state and are exempt.
pub struct SyncCoordinator<S, R> {
    store: S,
    remote: R,
    locks: Mutex<HashMap<RecordId, Arc<Mutex<()>>>>,
}

impl<S: LocalStore, R: RemoteService> SyncCoordinator<S, R> {
    #[must_use]
    pub fn new(store: S, remote: R) -> Self {
        Self {
            store,
            remote,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped local store adapter
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The wrapped remote service client
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Open the local store and reconcile its schema to `new_schema`.
    ///
    /// Must complete before record-level sync traffic. If the store fails
    /// to open, the error is surfaced immediately and no migration is
    /// attempted; otherwise the adapter's own reconciliation result is
    /// passed through unchanged.
    pub async fn migrate(&self, new_schema: &StoreSchema) -> Result<()> {
        if !self.store.open().await? {
            return Err(Error::LocalStore(LocalStoreError::Unavailable(
                "local store failed to open".to_string(),
            )));
        }

        let old_schema = self.store.current_schema().await?;
        self.store.migrate(new_schema, old_schema.as_ref()).await?;
        Ok(())
    }

    /// Apply one verb to one target, locally and/or remotely.
    ///
    /// Dispatch order:
    ///
    /// 1. `options.skip_offline` delegates straight to the remote service;
    ///    the local store is never consulted.
    /// 2. Otherwise the mutation is persisted locally first (records gain
    ///    their pending sync tag here), then conditionally replayed against
    ///    the remote service.
    ///
    /// A failed remote push restores the record's sync pair to its pre-push
    /// snapshot before the error is returned, so the caller sees the same
    /// queued mutation a later retry will pick up.
    pub async fn sync(
        &self,
        verb: SyncVerb,
        target: &mut SyncTarget,
        options: SyncOptions,
    ) -> Result<SyncReceipt> {
        let _guard = match &*target {
            SyncTarget::Record(record) => Some(self.lock_record(record.id).await),
            SyncTarget::Collection(_) => None,
        };

        if options.skip_offline {
            return self.bypass(verb, target).await;
        }

        match target {
            SyncTarget::Record(record) => self.sync_record(verb, record, options).await,
            SyncTarget::Collection(collection) => {
                self.sync_collection(verb, collection, options).await
            }
        }
    }

    /// Bypass mode: verb and target go to the remote service unchanged.
    async fn bypass(&self, verb: SyncVerb, target: &mut SyncTarget) -> Result<SyncReceipt> {
        let mut attempt = SyncAttempt::new();
        attempt.advance(SyncStage::RemotePushPending)?;

        tracing::debug!(verb = verb.as_str(), "Bypassing local store");
        let data = self.remote.sync(verb, &*target).await?;

        attempt.advance(SyncStage::Finalizing)?;
        match target {
            SyncTarget::Record(record) => record.apply_remote(&data),
            SyncTarget::Collection(collection) => {
                collection.apply_remote_records(collection_items(&data)?);
            }
        }
        Ok(SyncReceipt::remote())
    }

    async fn sync_record(
        &self,
        verb: SyncVerb,
        record: &mut Record,
        options: SyncOptions,
    ) -> Result<SyncReceipt> {
        let mut attempt = SyncAttempt::new();
        attempt.advance(SyncStage::LocalWritePending)?;

        if verb == SyncVerb::Read {
            return self.read_record(record, options, &mut attempt).await;
        }

        let entry_state = record.sync_snapshot();
        let local_verb = stage_local_mutation(record, verb, unix_timestamp_ms_now());

        if let Err(error) = self
            .store
            .sync(local_verb, &SyncTarget::Record(record.clone()))
            .await
        {
            // Keep the caller's view aligned with the committed store state.
            record.restore_sync_state(entry_state);
            return Err(error.into());
        }

        let skip_push = options.skip_remote_sync
            || (verb == SyncVerb::Delete && record.pending_sync == Some(PendingSync::Create));
        if skip_push {
            tracing::debug!(
                record = %record.id,
                verb = verb.as_str(),
                "Mutation queued locally"
            );
            attempt.advance(SyncStage::Finalizing)?;
            return Ok(SyncReceipt::local());
        }

        let push_verb = record.pending_sync.map_or(verb, mapped_push_verb);
        self.push_record(push_verb, record, &mut attempt).await
    }

    async fn read_record(
        &self,
        record: &mut Record,
        options: SyncOptions,
        attempt: &mut SyncAttempt,
    ) -> Result<SyncReceipt> {
        let local = self
            .store
            .sync(SyncVerb::Read, &SyncTarget::Record(record.clone()))
            .await?;
        let found_locally = match local {
            LocalData::Record(stored) => {
                *record = stored;
                true
            }
            LocalData::None | LocalData::Records(_) => false,
        };

        // Unsynced local edits satisfy the read; a remote fetch here would
        // clobber them with the state as of the last push.
        if record.pending_sync.is_some() {
            attempt.advance(SyncStage::Finalizing)?;
            return Ok(SyncReceipt::local());
        }

        if options.skip_remote_sync {
            attempt.advance(SyncStage::Finalizing)?;
            return if found_locally {
                Ok(SyncReceipt::local())
            } else {
                Err(Error::NotFound(record.id.to_string()))
            };
        }

        attempt.advance(SyncStage::RemotePushPending)?;
        let data = self
            .remote
            .sync(SyncVerb::Read, &SyncTarget::Record(record.clone()))
            .await?;

        attempt.advance(SyncStage::Finalizing)?;
        record.apply_remote(&data);
        Ok(SyncReceipt::remote())
    }

    /// Remote-push stage for one record mutation.
    ///
    /// The record behaves as clean while the push is in flight; a failure
    /// restores the sync pair to the snapshot taken here, so a later
    /// retry sees the same pending state.
    async fn push_record(
        &self,
        requested: SyncVerb,
        record: &mut Record,
        attempt: &mut SyncAttempt,
    ) -> Result<SyncReceipt> {
        attempt.advance(SyncStage::RemotePushPending)?;

        let snapshot = record.sync_snapshot();
        record.clear_sync_state();
        let effective = resolve_push_verb(snapshot.pending_sync, requested);
        tracing::debug!(
            record = %record.id,
            requested = requested.as_str(),
            effective = effective.as_str(),
            "Pushing record to remote"
        );

        match self
            .remote
            .sync(effective, &SyncTarget::Record(record.clone()))
            .await
        {
            Ok(data) => {
                attempt.advance(SyncStage::Finalizing)?;
                let pre_push_id = record.remote_id.clone();
                record.apply_remote(&data);

                let previous_remote_id = match (&pre_push_id, &record.remote_id) {
                    (Some(old), Some(new)) if old != new => Some(old.clone()),
                    _ => None,
                };
                Ok(SyncReceipt {
                    source: DataSource::Remote,
                    previous_remote_id,
                })
            }
            Err(error) => {
                record.restore_sync_state(snapshot);
                tracing::warn!(
                    record = %record.id,
                    verb = effective.as_str(),
                    "Remote push failed, pending state rolled back: {error}"
                );
                Err(error.into())
            }
        }
    }

    async fn sync_collection(
        &self,
        verb: SyncVerb,
        collection: &mut Collection,
        options: SyncOptions,
    ) -> Result<SyncReceipt> {
        if verb != SyncVerb::Read {
            return Err(Error::InvalidInput(
                "collections are never queued for mutation; sync records individually".to_string(),
            ));
        }

        let mut attempt = SyncAttempt::new();
        attempt.advance(SyncStage::LocalWritePending)?;

        let local = self
            .store
            .sync(SyncVerb::Read, &SyncTarget::Collection(collection.clone()))
            .await?;
        if let LocalData::Records(records) = local {
            collection.records = records;
        }

        if options.skip_remote_sync {
            attempt.advance(SyncStage::Finalizing)?;
            return Ok(SyncReceipt::local());
        }

        attempt.advance(SyncStage::RemotePushPending)?;
        let data = self
            .remote
            .sync(SyncVerb::Read, &SyncTarget::Collection(collection.clone()))
            .await?;

        attempt.advance(SyncStage::Finalizing)?;
        collection.apply_remote_records(collection_items(&data)?);
        Ok(SyncReceipt::remote())
    }

    /// Serialize sync attempts per record id.
    ///
    /// Slots no longer referenced by any waiter are swept on each acquire.
    async fn lock_record(&self, id: RecordId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        slot.lock_owned().await
    }
}

/// Compute the new sync state for a local mutation and return the verb the
/// local store should apply.
///
/// A delete of a record that is not CREATE-pending is rewritten to a local
/// `update` (soft-delete): the local copy must stay available to drive the
/// later remote delete. A CREATE-pending record was never pushed, so its
/// local delete is physical.
fn stage_local_mutation(record: &mut Record, verb: SyncVerb, now_ms: i64) -> SyncVerb {
    if record.is_new() {
        record.pending_sync = Some(PendingSync::Create);
        record.last_local_mutation_at = Some(now_ms);
    } else if record.pending_sync != Some(PendingSync::Create) {
        record.last_local_mutation_at = Some(now_ms);
    }

    if record.pending_sync.is_none() {
        record.pending_sync = Some(if verb == SyncVerb::Delete {
            PendingSync::Delete
        } else {
            PendingSync::Update
        });
    }
    record.updated_at = now_ms;

    if verb == SyncVerb::Delete && record.pending_sync != Some(PendingSync::Create) {
        SyncVerb::Update
    } else {
        verb
    }
}

/// Verb replayed against the remote service for a queued tag.
const fn mapped_push_verb(tag: PendingSync) -> SyncVerb {
    match tag {
        PendingSync::Create => SyncVerb::Create,
        PendingSync::Update => SyncVerb::Update,
        PendingSync::Delete => SyncVerb::Delete,
    }
}

/// Effective remote verb for a push, resolved from the pre-push tag.
///
/// DELETE-pending wins unconditionally: a record queued for deletion is
/// always deleted remotely, whatever was asked afterwards. A CREATE-pending
/// record reaches the service as an upsert by client key (`update`) - or as
/// a single `delete` when that is the request, never a create-then-delete
/// pair.
const fn resolve_push_verb(prev: Option<PendingSync>, requested: SyncVerb) -> SyncVerb {
    match (prev, requested) {
        (Some(PendingSync::Delete), _) | (Some(PendingSync::Create), SyncVerb::Delete) => {
            SyncVerb::Delete
        }
        (Some(PendingSync::Create), _) => SyncVerb::Update,
        (Some(PendingSync::Update) | None, _) => requested,
    }
}

fn collection_items(data: &Value) -> Result<&[Value]> {
    data.as_array().map(Vec::as_slice).ok_or_else(|| {
        Error::Remote(RemoteError::InvalidPayload(
            "collection read did not return an array".to_string(),
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        calls: AtomicUsize,
        verbs: StdMutex<Vec<SyncVerb>>,
        rows: StdMutex<HashMap<RecordId, Record>>,
        fail_writes: AtomicBool,
        openable: Option<bool>,
        schema: Option<StoreSchema>,
        migrated: StdMutex<Option<(StoreSchema, Option<StoreSchema>)>>,
    }

    impl RecordingStore {
        fn with_rows(rows: &[Record]) -> Self {
            let store = Self::default();
            {
                let mut map = store.rows.lock().unwrap();
                for record in rows {
                    map.insert(record.id, record.clone());
                }
            }
            store
        }

        fn verbs(&self) -> Vec<SyncVerb> {
            self.verbs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LocalStore for RecordingStore {
        async fn open(&self) -> std::result::Result<bool, LocalStoreError> {
            Ok(self.openable.unwrap_or(true))
        }

        async fn current_schema(
            &self,
        ) -> std::result::Result<Option<StoreSchema>, LocalStoreError> {
            Ok(self.schema)
        }

        async fn migrate(
            &self,
            new: &StoreSchema,
            old: Option<&StoreSchema>,
        ) -> std::result::Result<(), LocalStoreError> {
            *self.migrated.lock().unwrap() = Some((*new, old.copied()));
            Ok(())
        }

        async fn sync(
            &self,
            verb: SyncVerb,
            target: &SyncTarget,
        ) -> std::result::Result<LocalData, LocalStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verbs.lock().unwrap().push(verb);

            if verb.is_mutation() && self.fail_writes.load(Ordering::SeqCst) {
                return Err(LocalStoreError::Backend("disk full".to_string()));
            }

            let mut rows = self.rows.lock().unwrap();
            match (verb, target) {
                (SyncVerb::Read, SyncTarget::Record(record)) => Ok(rows
                    .get(&record.id)
                    .cloned()
                    .map_or(LocalData::None, LocalData::Record)),
                (SyncVerb::Read, SyncTarget::Collection(collection)) => {
                    let mut records: Vec<Record> = rows
                        .values()
                        .filter(|record| {
                            record.collection == collection.name
                                && record.pending_sync != Some(PendingSync::Delete)
                        })
                        .cloned()
                        .collect();
                    records.sort_by_key(|record| record.id.as_str());
                    Ok(LocalData::Records(records))
                }
                (SyncVerb::Delete, SyncTarget::Record(record)) => {
                    rows.remove(&record.id);
                    Ok(LocalData::None)
                }
                (_, SyncTarget::Record(record)) => {
                    rows.insert(record.id, record.clone());
                    Ok(LocalData::None)
                }
                (_, SyncTarget::Collection(_)) => Err(LocalStoreError::Backend(
                    "collections are read-only".to_string(),
                )),
            }
        }
    }

    #[derive(Default)]
    struct RecordingRemote {
        calls: AtomicUsize,
        verbs: StdMutex<Vec<SyncVerb>>,
        responses: StdMutex<VecDeque<std::result::Result<Value, String>>>,
        delay: Option<Duration>,
        in_flight: AtomicBool,
        overlapped: AtomicBool,
    }

    impl RecordingRemote {
        fn respond_with(responses: Vec<std::result::Result<Value, String>>) -> Self {
            Self {
                responses: StdMutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn verbs(&self) -> Vec<SyncVerb> {
            self.verbs.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteService for RecordingRemote {
        async fn sync(
            &self,
            verb: SyncVerb,
            _target: &SyncTarget,
        ) -> std::result::Result<Value, RemoteError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.store(false, Ordering::SeqCst);

            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verbs.lock().unwrap().push(verb);

            let scripted = self.responses.lock().unwrap().pop_front();
            match scripted {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(RemoteError::Api(message)),
                None => Ok(json!({})),
            }
        }
    }

    fn invoice(total: i64) -> Record {
        let mut record = Record::new("invoices", Map::new());
        record.set_field("total", json!(total));
        record
    }

    fn synced_invoice(total: i64, remote_id: &str) -> Record {
        let mut record = invoice(total);
        record.remote_id = Some(remote_id.to_string());
        record
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_round_trip_adopts_canonical_id() {
        let remote = RecordingRemote::respond_with(vec![Ok(
            json!({"id": "srv-1", "total": 120, "status": "open"}),
        )]);
        let coordinator = SyncCoordinator::new(RecordingStore::default(), remote);

        let mut target = SyncTarget::Record(invoice(120));
        let receipt = coordinator
            .sync(SyncVerb::Create, &mut target, SyncOptions::default())
            .await
            .unwrap();

        let record = target.record().unwrap();
        assert_eq!(receipt.source, DataSource::Remote);
        assert_eq!(record.remote_id.as_deref(), Some("srv-1"));
        assert_eq!(record.pending_sync, None);
        assert_eq!(record.last_local_mutation_at, None);
        assert_eq!(record.field("status"), Some(&json!("open")));

        assert_eq!(coordinator.store().calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 1);
        // A never-acknowledged record reaches the service as an upsert by
        // client key.
        assert_eq!(coordinator.remote().verbs(), vec![SyncVerb::Update]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_push_restores_pending_state_for_retry() {
        let remote = RecordingRemote::respond_with(vec![Err("service unavailable".to_string())]);
        let coordinator = SyncCoordinator::new(RecordingStore::default(), remote);

        let mut target = SyncTarget::Record(synced_invoice(200, "srv-2"));
        let error = coordinator
            .sync(SyncVerb::Update, &mut target, SyncOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Remote(RemoteError::Api(_))));

        // The queued mutation survives the failure: the sync pair equals
        // its pre-push snapshot, not the optimistically cleared state.
        let record = target.record().unwrap();
        assert_eq!(record.pending_sync, Some(PendingSync::Update));
        assert!(record.last_local_mutation_at.is_some());

        assert_eq!(coordinator.store().calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_create_pending_record_never_calls_remote() {
        let mut record = invoice(40);
        record.pending_sync = Some(PendingSync::Create);
        record.last_local_mutation_at = Some(1000);
        let coordinator = SyncCoordinator::new(
            RecordingStore::with_rows(&[record.clone()]),
            RecordingRemote::default(),
        );

        let mut target = SyncTarget::Record(record);
        let receipt = coordinator
            .sync(SyncVerb::Delete, &mut target, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Local);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 0);
        // CREATE-pending rows are physically removed, not soft-deleted.
        assert_eq!(coordinator.store().verbs(), vec![SyncVerb::Delete]);
        assert!(coordinator.store().rows.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_synced_record_soft_deletes_locally() {
        let coordinator =
            SyncCoordinator::new(RecordingStore::default(), RecordingRemote::default());

        let mut target = SyncTarget::Record(synced_invoice(10, "srv-3"));
        coordinator
            .sync(SyncVerb::Delete, &mut target, SyncOptions::default())
            .await
            .unwrap();

        // Local copy is retained (soft-delete) to drive the remote delete.
        assert_eq!(coordinator.store().verbs(), vec![SyncVerb::Update]);
        assert_eq!(coordinator.remote().verbs(), vec![SyncVerb::Delete]);
        let rows = coordinator.store().rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_pending_dominates_later_pushes() {
        let mut record = synced_invoice(10, "srv-4");
        record.pending_sync = Some(PendingSync::Delete);
        record.last_local_mutation_at = Some(500);
        let coordinator =
            SyncCoordinator::new(RecordingStore::default(), RecordingRemote::default());

        let mut target = SyncTarget::Record(record);
        coordinator
            .sync(SyncVerb::Update, &mut target, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(coordinator.remote().verbs(), vec![SyncVerb::Delete]);
        assert_eq!(target.record().unwrap().pending_sync, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_with_pending_edits_is_served_locally() {
        let mut stored = synced_invoice(75, "srv-5");
        stored.pending_sync = Some(PendingSync::Update);
        stored.last_local_mutation_at = Some(2000);
        let coordinator = SyncCoordinator::new(
            RecordingStore::with_rows(&[stored.clone()]),
            RecordingRemote::default(),
        );

        let mut target = SyncTarget::Record(synced_invoice(0, "srv-5"));
        if let SyncTarget::Record(record) = &mut target {
            record.id = stored.id;
        }
        let receipt = coordinator
            .sync(SyncVerb::Read, &mut target, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Local);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 0);

        let record = target.record().unwrap();
        assert_eq!(record.pending_sync, Some(PendingSync::Update));
        assert_eq!(record.field("total"), Some(&json!(75)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn read_of_clean_record_refreshes_from_remote() {
        let stored = synced_invoice(75, "srv-6");
        let remote =
            RecordingRemote::respond_with(vec![Ok(json!({"id": "srv-6", "total": 80}))]);
        let coordinator = SyncCoordinator::new(RecordingStore::with_rows(&[stored.clone()]), remote);

        let mut target = SyncTarget::Record(stored);
        let receipt = coordinator
            .sync(SyncVerb::Read, &mut target, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Remote);
        assert_eq!(target.record().unwrap().field("total"), Some(&json!(80)));
        assert_eq!(coordinator.remote().verbs(), vec![SyncVerb::Read]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_read_miss_is_not_found() {
        let coordinator =
            SyncCoordinator::new(RecordingStore::default(), RecordingRemote::default());

        let mut target = SyncTarget::Record(invoice(1));
        let error = coordinator
            .sync(
                SyncVerb::Read,
                &mut target,
                SyncOptions::default().skipping_remote_sync(),
            )
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn skip_remote_sync_queues_the_mutation() {
        let coordinator =
            SyncCoordinator::new(RecordingStore::default(), RecordingRemote::default());

        let mut target = SyncTarget::Record(synced_invoice(60, "srv-7"));
        let receipt = coordinator
            .sync(
                SyncVerb::Update,
                &mut target,
                SyncOptions::default().skipping_remote_sync(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Local);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 0);

        let record = target.record().unwrap();
        assert_eq!(record.pending_sync, Some(PendingSync::Update));
        assert!(record.last_local_mutation_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_store_failure_aborts_before_any_remote_attempt() {
        let store = RecordingStore::default();
        store.fail_writes.store(true, Ordering::SeqCst);
        let coordinator = SyncCoordinator::new(store, RecordingRemote::default());

        let mut target = SyncTarget::Record(synced_invoice(30, "srv-8"));
        let error = coordinator
            .sync(SyncVerb::Update, &mut target, SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::LocalStore(_)));
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 0);
        // The caller's record matches the committed (unchanged) store state.
        assert_eq!(target.record().unwrap().pending_sync, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn skip_offline_bypasses_the_local_store() {
        let remote = RecordingRemote::respond_with(vec![Ok(json!({"id": "srv-9"}))]);
        let coordinator = SyncCoordinator::new(RecordingStore::default(), remote);

        let mut target = SyncTarget::Record(invoice(5));
        let receipt = coordinator
            .sync(
                SyncVerb::Create,
                &mut target,
                SyncOptions::default().skipping_offline(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Remote);
        assert_eq!(coordinator.store().calls.load(Ordering::SeqCst), 0);
        // Bypass mode sends the caller's verb unchanged.
        assert_eq!(coordinator.remote().verbs(), vec![SyncVerb::Create]);
        assert_eq!(target.record().unwrap().remote_id.as_deref(), Some("srv-9"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_reports_replaced_canonical_id() {
        let remote = RecordingRemote::respond_with(vec![Ok(json!({"id": "srv-new"}))]);
        let coordinator = SyncCoordinator::new(RecordingStore::default(), remote);

        let mut target = SyncTarget::Record(synced_invoice(15, "srv-old"));
        let receipt = coordinator
            .sync(SyncVerb::Update, &mut target, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.previous_remote_id.as_deref(), Some("srv-old"));
        assert_eq!(
            target.record().unwrap().remote_id.as_deref(),
            Some("srv-new")
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collection_read_merges_remote_and_preserves_local_keys() {
        let stored = synced_invoice(10, "srv-a");
        let remote = RecordingRemote::respond_with(vec![Ok(json!([
            {"id": "srv-a", "total": 11},
            {"id": "srv-b", "total": 22},
        ]))]);
        let coordinator = SyncCoordinator::new(RecordingStore::with_rows(&[stored.clone()]), remote);

        let mut target = SyncTarget::Collection(Collection::new("invoices"));
        let receipt = coordinator
            .sync(SyncVerb::Read, &mut target, SyncOptions::default())
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Remote);
        let collection = target.collection().unwrap();
        assert_eq!(collection.len(), 2);
        assert_eq!(collection.records[0].id, stored.id);
        assert_eq!(collection.records[0].field("total"), Some(&json!(11)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_collection_read_serves_local_rows() {
        let stored = synced_invoice(10, "srv-a");
        let coordinator = SyncCoordinator::new(
            RecordingStore::with_rows(&[stored]),
            RecordingRemote::default(),
        );

        let mut target = SyncTarget::Collection(Collection::new("invoices"));
        let receipt = coordinator
            .sync(
                SyncVerb::Read,
                &mut target,
                SyncOptions::default().skipping_remote_sync(),
            )
            .await
            .unwrap();

        assert_eq!(receipt.source, DataSource::Local);
        assert_eq!(target.collection().unwrap().len(), 1);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn collection_mutations_are_rejected() {
        let coordinator =
            SyncCoordinator::new(RecordingStore::default(), RecordingRemote::default());

        let mut target = SyncTarget::Collection(Collection::new("invoices"));
        let error = coordinator
            .sync(SyncVerb::Delete, &mut target, SyncOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(error, Error::InvalidInput(_)));
        assert_eq!(coordinator.store().calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn same_record_pushes_are_serialized() {
        let remote = RecordingRemote {
            delay: Some(Duration::from_millis(25)),
            ..RecordingRemote::default()
        };
        let coordinator = Arc::new(SyncCoordinator::new(RecordingStore::default(), remote));

        let record = synced_invoice(1, "srv-z");
        let mut tasks = Vec::new();
        for _ in 0..2 {
            let coordinator = Arc::clone(&coordinator);
            let mut target = SyncTarget::Record(record.clone());
            tasks.push(tokio::spawn(async move {
                coordinator
                    .sync(SyncVerb::Update, &mut target, SyncOptions::default())
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(coordinator.remote().calls.load(Ordering::SeqCst), 2);
        assert!(!coordinator.remote().overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrate_refuses_a_store_that_fails_to_open() {
        let store = RecordingStore {
            openable: Some(false),
            ..RecordingStore::default()
        };
        let coordinator = SyncCoordinator::new(store, RecordingRemote::default());

        let error = coordinator
            .migrate(&StoreSchema::new(2))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            Error::LocalStore(LocalStoreError::Unavailable(_))
        ));
        assert!(coordinator.store().migrated.lock().unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn migrate_hands_both_schemas_to_the_adapter() {
        let store = RecordingStore {
            schema: Some(StoreSchema::new(1)),
            ..RecordingStore::default()
        };
        let coordinator = SyncCoordinator::new(store, RecordingRemote::default());

        coordinator.migrate(&StoreSchema::new(2)).await.unwrap();
        let migrated = coordinator.store().migrated.lock().unwrap();
        assert_eq!(
            *migrated,
            Some((StoreSchema::new(2), Some(StoreSchema::new(1))))
        );
    }

    #[test]
    fn resolve_push_verb_matches_the_dispatch_table() {
        use PendingSync::{Create, Delete, Update};
        use SyncVerb as V;

        for requested in [V::Create, V::Update, V::Delete] {
            assert_eq!(resolve_push_verb(Some(Delete), requested), V::Delete);
        }
        assert_eq!(resolve_push_verb(Some(Create), V::Delete), V::Delete);
        assert_eq!(resolve_push_verb(Some(Create), V::Create), V::Update);
        assert_eq!(resolve_push_verb(Some(Create), V::Update), V::Update);
        assert_eq!(resolve_push_verb(Some(Update), V::Update), V::Update);
        assert_eq!(resolve_push_verb(None, V::Delete), V::Delete);
    }

    #[test]
    fn stage_local_mutation_tags_and_rewrites_verbs() {
        // New record: tagged CREATE whatever the verb.
        let mut fresh = invoice(1);
        assert_eq!(stage_local_mutation(&mut fresh, SyncVerb::Create, 10), SyncVerb::Create);
        assert_eq!(fresh.pending_sync, Some(PendingSync::Create));
        assert_eq!(fresh.last_local_mutation_at, Some(10));

        // Clean synced record: update tags UPDATE and bumps the clock.
        let mut clean = synced_invoice(1, "srv");
        assert_eq!(stage_local_mutation(&mut clean, SyncVerb::Update, 20), SyncVerb::Update);
        assert_eq!(clean.pending_sync, Some(PendingSync::Update));
        assert_eq!(clean.last_local_mutation_at, Some(20));

        // Clean synced record: delete tags DELETE and soft-deletes locally.
        let mut deleted = synced_invoice(1, "srv");
        assert_eq!(
            stage_local_mutation(&mut deleted, SyncVerb::Delete, 30),
            SyncVerb::Update
        );
        assert_eq!(deleted.pending_sync, Some(PendingSync::Delete));

        // DELETE dominates later mutations.
        let mut dominated = synced_invoice(1, "srv");
        dominated.pending_sync = Some(PendingSync::Delete);
        stage_local_mutation(&mut dominated, SyncVerb::Update, 40);
        assert_eq!(dominated.pending_sync, Some(PendingSync::Delete));

        // CREATE-pending record: local delete stays physical.
        let mut unpushed = invoice(1);
        unpushed.pending_sync = Some(PendingSync::Create);
        assert_eq!(
            stage_local_mutation(&mut unpushed, SyncVerb::Delete, 50),
            SyncVerb::Delete
        );
    }
}
