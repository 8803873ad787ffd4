//! In-process remote document store.
//!
//! # Responsibility
//! - Provide a `RemoteStore`/`IdentityProvider` pair with real push semantics
//!   and no network, for tests and offline demos.
//! - Allow failure injection (offline store, failing record ids, failing
//!   sign-in) so partial-failure paths can be exercised deterministically.
//!
//! # Invariants
//! - Every successful mutation pushes a full snapshot to every listener of
//!   the affected owner, including the writer's own listeners.
//! - A new listener immediately receives the current snapshot.

use crate::model::record::{now_epoch_ms, sort_newest_first, Record, RecordId, RecordPatch};
use crate::model::settings::RemoteConfig;
use crate::sync::remote_spi::{IdentityProvider, RemoteConnector, RemoteHandle, RemoteStore};
use crate::sync::remote_types::{
    FeedSink, OwnerId, OwnerSession, RemoteError, RemoteResult, RemoteStage, Subscription,
};
use log::{debug, warn};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

const PROVIDER_ID: &str = "memory";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedKind {
    Records,
    Tags,
}

struct Listener {
    id: u64,
    owner: OwnerId,
    kind: FeedKind,
    sink: FeedSink,
}

#[derive(Default)]
struct OwnerDocuments {
    records: BTreeMap<RecordId, Record>,
    tags: Vec<String>,
    tags_saved_at: Option<i64>,
}

#[derive(Default)]
struct MemoryState {
    owners: BTreeMap<OwnerId, OwnerDocuments>,
    listeners: Vec<Listener>,
    next_listener_id: u64,
    failing_records: HashSet<RecordId>,
    offline: bool,
    sign_in_failure: Option<String>,
}

impl MemoryState {
    fn documents(&mut self, owner: &OwnerId) -> &mut OwnerDocuments {
        self.owners.entry(owner.clone()).or_default()
    }

    fn records_snapshot(&self, owner: &OwnerId) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .owners
            .get(owner)
            .map(|docs| docs.records.values().cloned().collect())
            .unwrap_or_default();
        sort_newest_first(&mut records);
        records
    }

    fn tags_snapshot(&self, owner: &OwnerId) -> Vec<String> {
        self.owners
            .get(owner)
            .map(|docs| docs.tags.clone())
            .unwrap_or_default()
    }

    fn notify(&mut self, owner: &OwnerId, kind: FeedKind) {
        let records = match kind {
            FeedKind::Records => Some(self.records_snapshot(owner)),
            FeedKind::Tags => None,
        };
        let tags = match kind {
            FeedKind::Tags => Some(self.tags_snapshot(owner)),
            FeedKind::Records => None,
        };

        self.listeners.retain(|listener| {
            if &listener.owner != owner || listener.kind != kind {
                return true;
            }
            match (&records, &tags) {
                (Some(records), _) => listener.sink.send_records(records.clone()),
                (_, Some(tags)) => listener.sink.send_tags(tags.clone()),
                _ => true,
            }
        });
    }

    fn check_online(&self, stage: RemoteStage) -> RemoteResult<()> {
        if self.offline {
            return Err(RemoteError::new(
                PROVIDER_ID,
                stage,
                "unavailable",
                "memory remote is offline",
                true,
            ));
        }
        Ok(())
    }

    fn check_record(&self, stage: RemoteStage, id: RecordId) -> RemoteResult<()> {
        self.check_online(stage)?;
        if self.failing_records.contains(&id) {
            return Err(RemoteError::new(
                PROVIDER_ID,
                stage,
                "injected_failure",
                format!("write rejected for record {id}"),
                true,
            ));
        }
        Ok(())
    }
}

/// Shared in-memory document database; clones share state.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current records for an owner, newest first.
    pub fn records(&self, owner: &OwnerId) -> Vec<Record> {
        self.state().records_snapshot(owner)
    }

    /// Current tag registry document for an owner.
    pub fn tags(&self, owner: &OwnerId) -> Vec<String> {
        self.state().tags_snapshot(owner)
    }

    /// Last time the tag registry document was saved.
    pub fn tags_saved_at(&self, owner: &OwnerId) -> Option<i64> {
        self.state()
            .owners
            .get(owner)
            .and_then(|docs| docs.tags_saved_at)
    }

    /// Replaces an owner's whole collection as another writer would.
    pub fn replace_records(&self, owner: &OwnerId, records: Vec<Record>) {
        let mut state = self.state();
        let docs = state.documents(owner);
        docs.records = records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        state.notify(owner, FeedKind::Records);
    }

    /// Replaces an owner's tag document as another writer would.
    pub fn replace_tags(&self, owner: &OwnerId, tags: Vec<String>) {
        let mut state = self.state();
        let docs = state.documents(owner);
        docs.tags = tags;
        docs.tags_saved_at = Some(now_epoch_ms());
        state.notify(owner, FeedKind::Tags);
    }

    /// Makes every write/update/remove for `id` fail.
    pub fn fail_writes_for(&self, id: RecordId) {
        self.state().failing_records.insert(id);
    }

    pub fn clear_write_failures(&self) {
        self.state().failing_records.clear();
    }

    /// Makes every operation (and connection attempt) fail.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Makes sign-in fail with `message`, or succeed again with `None`.
    pub fn fail_sign_in(&self, message: Option<&str>) {
        self.state().sign_in_failure = message.map(str::to_string);
    }

    /// Number of live listeners across all owners and feeds.
    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    fn add_listener(&self, owner: &OwnerId, kind: FeedKind, sink: FeedSink) -> Subscription {
        let listener_id = {
            let mut state = self.state();
            state.next_listener_id += 1;
            let listener_id = state.next_listener_id;
            let delivered = match kind {
                FeedKind::Records => sink.send_records(state.records_snapshot(owner)),
                FeedKind::Tags => sink.send_tags(state.tags_snapshot(owner)),
            };
            if !delivered {
                return Subscription::inert();
            }
            state.listeners.push(Listener {
                id: listener_id,
                owner: owner.clone(),
                kind,
                sink,
            });
            listener_id
        };

        debug!(
            "event=remote_subscribe module=memory status=ok owner={owner} feed={kind:?} listener_id={listener_id}"
        );
        let shared = Arc::clone(&self.state);
        Subscription::new(move || {
            let mut state = shared
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.listeners.retain(|listener| listener.id != listener_id);
        })
    }
}

impl RemoteStore for MemoryRemote {
    fn fetch_all(&self, owner: &OwnerId) -> Vec<Record> {
        let state = self.state();
        if let Err(err) = state.check_online(RemoteStage::Fetch) {
            warn!("event=remote_fetch module=memory status=error owner={owner} error={err}");
            return Vec::new();
        }
        state.records_snapshot(owner)
    }

    fn subscribe(&self, owner: &OwnerId, sink: FeedSink) -> Subscription {
        self.add_listener(owner, FeedKind::Records, sink)
    }

    fn write(&self, owner: &OwnerId, record: &Record) -> RemoteResult<()> {
        let mut state = self.state();
        if let Err(err) = state.check_record(RemoteStage::Write, record.id) {
            warn!(
                "event=remote_write module=memory status=error owner={owner} record_id={} error={err}",
                record.id
            );
            return Err(err);
        }
        state
            .documents(owner)
            .records
            .insert(record.id, record.clone());
        state.notify(owner, FeedKind::Records);
        Ok(())
    }

    fn update(
        &self,
        owner: &OwnerId,
        id: RecordId,
        patch: &RecordPatch,
        updated_at: i64,
    ) -> RemoteResult<()> {
        let mut state = self.state();
        if let Err(err) = state.check_record(RemoteStage::Update, id) {
            warn!(
                "event=remote_update module=memory status=error owner={owner} record_id={id} error={err}"
            );
            return Err(err);
        }
        let Some(record) = state.documents(owner).records.get_mut(&id) else {
            warn!(
                "event=remote_update module=memory status=error owner={owner} record_id={id} error_code=not_found"
            );
            return Err(RemoteError::new(
                PROVIDER_ID,
                RemoteStage::Update,
                "not_found",
                format!("record {id} does not exist"),
                false,
            ));
        };
        record.apply_patch(patch);
        record.updated_at = updated_at;
        state.notify(owner, FeedKind::Records);
        Ok(())
    }

    fn remove(&self, owner: &OwnerId, id: RecordId) -> RemoteResult<()> {
        let mut state = self.state();
        if let Err(err) = state.check_record(RemoteStage::Remove, id) {
            warn!(
                "event=remote_remove module=memory status=error owner={owner} record_id={id} error={err}"
            );
            return Err(err);
        }
        let removed = state.documents(owner).records.remove(&id).is_some();
        if removed {
            state.notify(owner, FeedKind::Records);
        }
        Ok(())
    }

    fn get_tags(&self, owner: &OwnerId) -> Vec<String> {
        let state = self.state();
        if let Err(err) = state.check_online(RemoteStage::Tags) {
            warn!("event=remote_get_tags module=memory status=error owner={owner} error={err}");
            return Vec::new();
        }
        state.tags_snapshot(owner)
    }

    fn subscribe_tags(&self, owner: &OwnerId, sink: FeedSink) -> Subscription {
        self.add_listener(owner, FeedKind::Tags, sink)
    }

    fn save_tags(&self, owner: &OwnerId, tags: &[String]) -> RemoteResult<()> {
        let mut state = self.state();
        if let Err(err) = state.check_online(RemoteStage::Tags) {
            warn!("event=remote_save_tags module=memory status=error owner={owner} error={err}");
            return Err(err);
        }
        let docs = state.documents(owner);
        docs.tags = tags.to_vec();
        docs.tags_saved_at = Some(now_epoch_ms());
        state.notify(owner, FeedKind::Tags);
        Ok(())
    }
}

/// Identity provider handing out one fixed owner.
pub struct MemoryIdentity {
    remote: MemoryRemote,
    owner_id: OwnerId,
}

impl IdentityProvider for MemoryIdentity {
    fn sign_in(&self) -> RemoteResult<OwnerSession> {
        if let Some(message) = self.remote.state().sign_in_failure.clone() {
            return Err(RemoteError::new(
                PROVIDER_ID,
                RemoteStage::Auth,
                "sign_in_rejected",
                message,
                true,
            ));
        }
        Ok(OwnerSession {
            owner_id: self.owner_id.clone(),
            refresh_token: Some(format!("memory-refresh-{}", self.owner_id)),
        })
    }
}

/// Connector exposing a `MemoryRemote` under the `memory` provider id.
pub struct MemoryConnector {
    remote: MemoryRemote,
    owner_id: OwnerId,
}

impl MemoryConnector {
    pub const PROVIDER_ID: &'static str = PROVIDER_ID;

    pub fn new(remote: MemoryRemote, owner_id: impl Into<String>) -> Self {
        Self {
            remote,
            owner_id: OwnerId::new(owner_id),
        }
    }
}

impl RemoteConnector for MemoryConnector {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn connect(&self, config: &RemoteConfig) -> RemoteResult<RemoteHandle> {
        self.remote.state().check_online(RemoteStage::Connect)?;
        debug!(
            "event=remote_connect module=memory status=ok project_id={}",
            config.project_id.trim()
        );
        Ok(RemoteHandle {
            store: Arc::new(self.remote.clone()),
            identity: Arc::new(MemoryIdentity {
                remote: self.remote.clone(),
                owner_id: self.owner_id.clone(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryRemote;
    use crate::model::record::{now_epoch_ms, Record, RecordDraft, RecordPatch};
    use crate::sync::remote_spi::RemoteStore;
    use crate::sync::remote_types::{FeedEvent, FeedSink, OwnerId};
    use std::sync::mpsc;

    fn owner() -> OwnerId {
        OwnerId::new("owner-1")
    }

    #[test]
    fn subscribe_delivers_initial_and_subsequent_full_snapshots() {
        let remote = MemoryRemote::new();
        let first = Record::from_draft(RecordDraft::new("first"));
        remote.write(&owner(), &first).unwrap();

        let (sender, receiver) = mpsc::channel();
        let _subscription = remote.subscribe(&owner(), FeedSink::new(1, sender));
        let initial = receiver.try_recv().unwrap();
        assert_eq!(initial.event, FeedEvent::Records(vec![first.clone()]));

        let second = Record::from_draft(RecordDraft::new("second"));
        remote.write(&owner(), &second).unwrap();
        match receiver.try_recv().unwrap().event {
            FeedEvent::Records(records) => assert_eq!(records.len(), 2),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let remote = MemoryRemote::new();
        let (sender, receiver) = mpsc::channel();
        let subscription = remote.subscribe_tags(&owner(), FeedSink::new(1, sender));
        receiver.try_recv().unwrap();
        assert_eq!(remote.listener_count(), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(remote.listener_count(), 0);
        remote.save_tags(&owner(), &["a".to_string()]).unwrap();
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn update_merges_fields_and_remove_is_idempotent() {
        let remote = MemoryRemote::new();
        let record = Record::from_draft(RecordDraft::new("body").annotation("note"));
        remote.write(&owner(), &record).unwrap();

        remote
            .update(
                &owner(),
                record.id,
                &RecordPatch::default().flag(true),
                record.updated_at + 10,
            )
            .unwrap();
        let stored = remote.records(&owner()).remove(0);
        assert!(stored.flag);
        assert_eq!(stored.annotation.as_deref(), Some("note"));
        assert_eq!(stored.updated_at, record.updated_at + 10);

        remote.remove(&owner(), record.id).unwrap();
        remote.remove(&owner(), record.id).unwrap();
        assert!(remote.records(&owner()).is_empty());
    }

    #[test]
    fn injected_failures_are_returned_not_panicked() {
        let remote = MemoryRemote::new();
        let record = Record::from_draft(RecordDraft::new("body"));
        remote.fail_writes_for(record.id);
        let err = remote.write(&owner(), &record).unwrap_err();
        assert_eq!(err.code, "injected_failure");

        remote.clear_write_failures();
        remote.set_offline(true);
        assert!(remote.fetch_all(&owner()).is_empty());
        assert!(remote.get_tags(&owner()).is_empty());
        assert!(remote.write(&owner(), &record).is_err());
    }

    #[test]
    fn save_tags_stamps_the_registry_document() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.tags_saved_at(&owner()), None);

        let before = now_epoch_ms();
        remote.save_tags(&owner(), &["a".to_string()]).unwrap();
        let saved_at = remote.tags_saved_at(&owner()).unwrap();
        assert!(saved_at >= before);
        assert_eq!(remote.tags(&owner()), vec!["a".to_string()]);

        remote.set_offline(true);
        assert!(remote.save_tags(&owner(), &[]).is_err());
        assert_eq!(remote.tags_saved_at(&owner()), Some(saved_at));
    }

    #[test]
    fn owners_are_isolated() {
        let remote = MemoryRemote::new();
        let record = Record::from_draft(RecordDraft::new("body"));
        remote.write(&owner(), &record).unwrap();
        assert!(remote.fetch_all(&OwnerId::new("someone-else")).is_empty());
    }
}
