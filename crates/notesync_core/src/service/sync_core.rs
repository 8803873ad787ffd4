//! Synchronization core.
//!
//! # Responsibility
//! - Own the in-memory view (records + tag registry) and the settings blob.
//! - Route every mutation to whichever store the selector marks authoritative.
//! - Reconcile full-state feed deliveries into the view and orchestrate
//!   reconfiguration, migration and export/import.
//!
//! # Invariants
//! - The view is replaced, never merged, by feed deliveries.
//! - Feed deliveries are applied only while draining (`process_feed`,
//!   `wait_for_feed`, or at the start of a mutating operation), so the view
//!   never changes in the middle of an operation.
//! - At most one live subscription per feed; deliveries stamped with a
//!   superseded generation are dropped.
//! - Remote mutations are applied to the view first and reverted when the
//!   remote write fails.

use crate::model::record::{
    sort_newest_first, Record, RecordDraft, RecordId, RecordPatch, RecordValidationError,
};
use crate::model::settings::{ConfigError, Preferences, RemoteConfig, Settings};
use crate::model::tag_registry::TagRegistry;
use crate::repo::local_store::{LocalStore, StoreError};
use crate::service::store_selector::{
    ActiveStore, ConnectionStatus, InvalidTransition, RemoteSession, StoreSelector,
};
use crate::service::transfer::{
    parse_import_text, parse_import_value, ExportEnvelope, ImportPayload, ImportSummary,
};
use crate::sync::provider_registry::ProviderRegistry;
use crate::sync::remote_spi::{RemoteConnector, RemoteStore};
use crate::sync::remote_types::{
    FeedEvent, FeedMessage, FeedSink, OwnerId, OwnerSession, RemoteError, RemoteResult,
    Subscription,
};
use log::{debug, info, warn};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

/// Errors surfaced by sync core operations.
#[derive(Debug)]
pub enum SyncError {
    /// Target record is not in the view.
    NotFound(RecordId),
    /// Remote configuration rejected before any state change.
    Configuration(ConfigError),
    /// Connection handshake or identity establishment failed.
    Connection(RemoteError),
    /// Import payload shape is invalid; nothing was applied.
    ImportFormat(String),
    /// Record would violate model invariants.
    InvalidRecord(RecordValidationError),
    /// Operation requires a connected remote store.
    NotConnected,
    /// Single remote write failed; the view was reverted.
    Remote(RemoteError),
    /// Local persistence failure.
    Store(StoreError),
    InvalidTransition(InvalidTransition),
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "record not found: {id}"),
            Self::Configuration(err) => write!(f, "invalid remote configuration: {err}"),
            Self::Connection(err) => write!(f, "remote connection failed: {err}"),
            Self::ImportFormat(details) => write!(f, "invalid import payload: {details}"),
            Self::InvalidRecord(err) => write!(f, "{err}"),
            Self::NotConnected => write!(f, "remote store is not connected"),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::InvalidTransition(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Connection(err) | Self::Remote(err) => Some(err),
            Self::InvalidRecord(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::InvalidTransition(err) => Some(err),
            Self::NotFound(_) | Self::ImportFormat(_) | Self::NotConnected => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<InvalidTransition> for SyncError {
    fn from(value: InvalidTransition) -> Self {
        Self::InvalidTransition(value)
    }
}

impl From<RecordValidationError> for SyncError {
    fn from(value: RecordValidationError) -> Self {
        Self::InvalidRecord(value)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Canonical working set bound to one local store and a provider registry.
pub struct SyncCore<L: LocalStore> {
    local: L,
    registry: ProviderRegistry,
    selector: StoreSelector,
    /// Newest first.
    records: Vec<Record>,
    tags: TagRegistry,
    settings: Settings,
    feed_tx: Sender<FeedMessage>,
    feed_rx: Receiver<FeedMessage>,
    generation: u64,
    subscriptions: Vec<Subscription>,
}

impl<L: LocalStore> SyncCore<L> {
    /// Loads the working set from `local` and reconnects a persisted remote.
    ///
    /// A failed reconnect is logged and leaves the local store authoritative
    /// with status `error`.
    pub fn open(local: L, registry: ProviderRegistry) -> Self {
        let settings = local.load_settings();
        let records = local.load_records();
        let tags = local.load_tags();
        let (feed_tx, feed_rx) = mpsc::channel();

        info!(
            "event=core_open module=sync_core status=ok records={} tags={} remote_configured={}",
            records.len(),
            tags.len(),
            settings.remote.is_some()
        );

        let mut core = Self {
            local,
            registry,
            selector: StoreSelector::new(),
            records,
            tags,
            settings,
            feed_tx,
            feed_rx,
            generation: 0,
            subscriptions: Vec::new(),
        };

        if let Some(config) = core.settings.remote.clone() {
            if let Err(err) = core.reconfigure_store(config) {
                warn!("event=core_open module=sync_core status=degraded error={err}");
            }
        }
        core
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn status(&self) -> ConnectionStatus {
        self.selector.status()
    }

    pub fn is_remote(&self) -> bool {
        self.selector.is_remote()
    }

    pub fn owner_id(&self) -> Option<&OwnerId> {
        self.selector.session().map(|session| &session.owner_id)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn last_error(&self) -> Option<&str> {
        self.selector.last_error()
    }

    pub fn local_store(&self) -> &L {
        &self.local
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Creates a record in the active store and returns it.
    pub fn create_record(&mut self, draft: RecordDraft) -> SyncResult<Record> {
        self.process_feed();
        let record = Record::from_draft(draft);
        record.validate()?;

        let mut next = Vec::with_capacity(self.records.len() + 1);
        next.push(record.clone());
        next.extend(self.records.iter().cloned());
        sort_newest_first(&mut next);

        self.commit_records(next, |store, owner| store.write(owner, &record))?;
        info!(
            "event=record_create module=sync_core status=ok record_id={} remote={}",
            record.id,
            self.is_remote()
        );
        Ok(record)
    }

    /// Merges `patch` into an existing record and refreshes `updated_at`.
    pub fn update_record(&mut self, id: RecordId, patch: RecordPatch) -> SyncResult<Record> {
        self.process_feed();
        let patch = patch.normalized();
        let index = self.position(id).ok_or(SyncError::NotFound(id))?;

        let mut updated = self.records[index].clone();
        updated.apply_patch(&patch);
        updated.validate()?;

        let mut next = self.records.clone();
        next[index] = updated.clone();
        let updated_at = updated.updated_at;
        self.commit_records(next, |store, owner| {
            store.update(owner, id, &patch, updated_at)
        })?;

        debug!(
            "event=record_update module=sync_core status=ok record_id={id} fields={}",
            patch.field_names().join(",")
        );
        Ok(updated)
    }

    /// Deletes a record; an id absent from the view is a no-op.
    pub fn delete_record(&mut self, id: RecordId) -> SyncResult<()> {
        self.process_feed();
        if self.position(id).is_none() {
            debug!("event=record_delete module=sync_core status=noop record_id={id}");
            return Ok(());
        }

        let next: Vec<Record> = self
            .records
            .iter()
            .filter(|record| record.id != id)
            .cloned()
            .collect();
        self.commit_records(next, |store, owner| store.remove(owner, id))?;
        info!("event=record_delete module=sync_core status=ok record_id={id}");
        Ok(())
    }

    /// Flips the favorite marker. Concurrent toggles are last-writer-wins.
    pub fn toggle_flag(&mut self, id: RecordId) -> SyncResult<Record> {
        self.process_feed();
        let current = self.record(id).ok_or(SyncError::NotFound(id))?.flag;
        self.update_record(id, RecordPatch::default().flag(!current))
    }

    /// Adds one tag name. Returns the normalized name when it was new.
    pub fn add_tag(&mut self, name: &str) -> SyncResult<Option<String>> {
        Ok(self.add_tags([name])?.into_iter().next())
    }

    /// Adds many tag names and returns those that were new.
    pub fn add_tags<I, S>(&mut self, names: I) -> SyncResult<Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.process_feed();
        let mut next = self.tags.clone();
        let added = next.add_all(names);
        if added.is_empty() {
            return Ok(added);
        }

        self.commit_tags(next)?;
        debug!(
            "event=tag_add module=sync_core status=ok added={}",
            added.join(",")
        );
        Ok(added)
    }

    /// Removes a tag from the registry and from every record carrying it.
    ///
    /// Returns the number of records that were untagged. On a remote store a
    /// failing record update does not stop the others; the first failure is
    /// returned after all were attempted.
    pub fn delete_tag(&mut self, name: &str) -> SyncResult<usize> {
        self.process_feed();
        let name = name.trim();
        let mut next_tags = self.tags.clone();
        let registered = next_tags.remove(name);

        let mut next_records = self.records.clone();
        let mut affected = Vec::new();
        for record in next_records.iter_mut().filter(|record| record.has_tag(name)) {
            record.tags.retain(|tag| tag != name);
            record.touch();
            affected.push(record.clone());
        }

        if !registered && affected.is_empty() {
            debug!("event=tag_delete module=sync_core status=noop tag={name}");
            return Ok(0);
        }

        let Some(session) = self.selector.session().cloned() else {
            self.local
                .replace_all(&next_records, &next_tags, &self.settings)?;
            self.records = next_records;
            self.tags = next_tags;
            info!(
                "event=tag_delete module=sync_core status=ok tag={name} records={}",
                affected.len()
            );
            return Ok(affected.len());
        };

        let previous_records = std::mem::replace(&mut self.records, next_records);
        let previous_tags = std::mem::replace(&mut self.tags, next_tags);
        if let Err(err) = session
            .store
            .save_tags(&session.owner_id, self.tags.names())
        {
            self.records = previous_records;
            self.tags = previous_tags;
            return Err(SyncError::Remote(err));
        }

        let mut first_error = None;
        for record in &affected {
            let patch = RecordPatch::default().tags(record.tags.clone());
            let outcome =
                session
                    .store
                    .update(&session.owner_id, record.id, &patch, record.updated_at);
            if let Err(err) = outcome {
                warn!(
                    "event=tag_delete module=sync_core status=partial tag={name} record_id={} error={err}",
                    record.id
                );
                if let Some(original) = previous_records.iter().find(|r| r.id == record.id) {
                    if let Some(index) = self.position(record.id) {
                        self.records[index] = original.clone();
                    }
                }
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(SyncError::Remote(err)),
            None => {
                info!(
                    "event=tag_delete module=sync_core status=ok tag={name} records={} remote=true",
                    affected.len()
                );
                Ok(affected.len())
            }
        }
    }

    /// Connects to the remote store described by `config` and makes it
    /// authoritative.
    ///
    /// Invalid input fails with `Configuration` before any state change. A
    /// failed handshake keeps the previous store authoritative with status
    /// `error` and returns `Connection`.
    pub fn reconfigure_store(&mut self, config: RemoteConfig) -> SyncResult<()> {
        config.validate().map_err(SyncError::Configuration)?;
        let connector = self
            .registry
            .resolve(config.provider_id())
            .map_err(SyncError::Configuration)?;
        let config = self.carry_identity(config);

        info!(
            "event=store_reconfigure module=sync_core status=start provider={} project_id={}",
            config.provider_id(),
            config.project_id.trim()
        );

        let previous = self.selector.active().clone();
        self.teardown_subscriptions();
        self.selector.begin_connecting();

        let (session, owner) = match establish(connector.as_ref(), &config) {
            Ok(established) => established,
            Err(err) => {
                self.selector.failed(previous.clone(), err.to_string())?;
                if let ActiveStore::Remote(session) = &previous {
                    self.subscribe_session(session);
                }
                warn!(
                    "event=store_reconfigure module=sync_core status=error stage={} code={} retryable={} error={err}",
                    err.stage.as_str(),
                    err.code,
                    err.retryable
                );
                return Err(SyncError::Connection(err));
            }
        };

        let same_owner = self.selector.session().is_some_and(|current| {
            current.provider_id == session.provider_id && current.owner_id == session.owner_id
        });
        self.selector.connected(session.clone())?;
        if !same_owner {
            self.seed_view(&session);
        }
        self.subscribe_session(&session);

        let mut persisted = config;
        if owner.refresh_token.is_some() {
            persisted.refresh_token = owner.refresh_token;
        }
        self.settings.remote = Some(persisted);
        if let Err(err) = self.local.save_settings(&self.settings) {
            warn!(
                "event=store_reconfigure module=sync_core status=degraded error_code=settings_not_saved error={err}"
            );
        }

        let applied = self.process_feed();
        info!(
            "event=store_reconfigure module=sync_core status=ok provider={} owner={} initial_events={applied}",
            session.provider_id, session.owner_id
        );
        Ok(())
    }

    /// Re-runs the connection handshake with the persisted configuration.
    pub fn reconnect(&mut self) -> SyncResult<()> {
        let config = self
            .settings
            .remote
            .clone()
            .ok_or(SyncError::Configuration(ConfigError::NothingPersisted))?;
        self.reconfigure_store(config)
    }

    /// Drops the remote store and makes the local store authoritative again.
    ///
    /// The cleared configuration is persisted first; when that fails nothing
    /// changes and the remote session stays live.
    pub fn disconnect_remote(&mut self) -> SyncResult<()> {
        let mut next = self.settings.clone();
        next.remote = None;
        self.local.save_settings(&next)?;
        self.settings = next;
        self.teardown_subscriptions();
        self.selector.reset_to_local();
        self.records = self.local.load_records();
        self.tags = self.local.load_tags();
        info!(
            "event=store_disconnect module=sync_core status=ok records={}",
            self.records.len()
        );
        Ok(())
    }

    /// Copies every local record and tag into the connected remote store.
    ///
    /// Returns `Ok(false)` when at least one write failed; successful writes
    /// are not rolled back.
    pub fn migrate(&mut self) -> SyncResult<bool> {
        if !self.selector.is_remote_connected() {
            return Err(SyncError::NotConnected);
        }
        let session = self
            .selector
            .session()
            .cloned()
            .ok_or(SyncError::NotConnected)?;
        let owner = &session.owner_id;

        let local_records = self.local.load_records();
        let local_tags = self.local.load_tags();
        info!(
            "event=migrate module=sync_core status=start owner={owner} records={} tags={}",
            local_records.len(),
            local_tags.len()
        );

        let mut failed = 0usize;
        for record in &local_records {
            if let Err(err) = session.store.write(owner, record) {
                failed += 1;
                warn!(
                    "event=migrate module=sync_core status=partial record_id={} error={err}",
                    record.id
                );
            }
        }

        let merged = TagRegistry::from_names(session.store.get_tags(owner)).union(&local_tags);
        let tags_saved = match session.store.save_tags(owner, merged.names()) {
            Ok(()) => true,
            Err(err) => {
                warn!("event=migrate module=sync_core status=partial stage=tags error={err}");
                false
            }
        };

        self.process_feed();
        let complete = failed == 0 && tags_saved;
        info!(
            "event=migrate module=sync_core status={} written={} failed={failed} tags_saved={tags_saved}",
            if complete { "ok" } else { "partial" },
            local_records.len() - failed
        );
        Ok(complete)
    }

    /// Applies every queued feed delivery. Returns how many were applied.
    pub fn process_feed(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.feed_rx.try_recv() {
            if self.apply_feed(message) {
                applied += 1;
            }
        }
        applied
    }

    /// Blocks up to `timeout` for at least one current delivery, then drains
    /// the rest of the queue.
    pub fn wait_for_feed(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.feed_rx.recv_timeout(remaining) {
                Ok(message) => {
                    if self.apply_feed(message) {
                        return 1 + self.process_feed();
                    }
                }
                Err(_) => return 0,
            }
        }
    }

    /// Backup envelope of the current view and settings.
    pub fn export(&self) -> ExportEnvelope {
        ExportEnvelope::build(&self.records, &self.tags, &self.settings)
    }

    /// Validates and restores an import from JSON text.
    pub fn import_json(&mut self, text: &str) -> SyncResult<ImportSummary> {
        let payload = parse_import_text(text).map_err(SyncError::ImportFormat)?;
        self.apply_import(payload)
    }

    /// Validates and restores an already parsed import envelope.
    pub fn import_value(&mut self, value: &Value) -> SyncResult<ImportSummary> {
        let payload = parse_import_value(value).map_err(SyncError::ImportFormat)?;
        self.apply_import(payload)
    }

    /// Mutates preferences and persists the settings blob.
    pub fn update_preferences<F>(&mut self, update: F) -> SyncResult<()>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut next = self.settings.clone();
        update(&mut next.preferences);
        self.local.save_settings(&next)?;
        self.settings = next;
        Ok(())
    }

    fn apply_import(&mut self, payload: ImportPayload) -> SyncResult<ImportSummary> {
        let ImportPayload {
            records,
            tags,
            settings,
        } = payload;
        let tags = tags.unwrap_or_else(|| self.local.load_tags());
        let mut next_settings = self.settings.clone();
        if let Some(imported) = settings {
            next_settings.preferences = imported.preferences;
        }

        self.local.replace_all(&records, &tags, &next_settings)?;
        let summary = ImportSummary {
            records: records.len(),
            tags: tags.len(),
        };
        self.settings = next_settings;
        if !self.selector.is_remote() {
            self.records = records;
            self.tags = tags;
        }

        info!(
            "event=import module=sync_core status=ok records={} tags={} view_reloaded={}",
            summary.records,
            summary.tags,
            !self.selector.is_remote()
        );
        Ok(summary)
    }

    /// Writes `next` to the authoritative store and installs it as the view.
    fn commit_records<F>(&mut self, next: Vec<Record>, remote_write: F) -> SyncResult<()>
    where
        F: FnOnce(&dyn RemoteStore, &OwnerId) -> RemoteResult<()>,
    {
        match self.selector.session().cloned() {
            None => {
                self.local.save_records(&next)?;
                self.records = next;
                Ok(())
            }
            Some(session) => {
                let previous = std::mem::replace(&mut self.records, next);
                if let Err(err) = remote_write(session.store.as_ref(), &session.owner_id) {
                    self.records = previous;
                    return Err(SyncError::Remote(err));
                }
                Ok(())
            }
        }
    }

    fn commit_tags(&mut self, next: TagRegistry) -> SyncResult<()> {
        match self.selector.session().cloned() {
            None => {
                self.local.save_tags(&next)?;
                self.tags = next;
                Ok(())
            }
            Some(session) => {
                let previous = std::mem::replace(&mut self.tags, next);
                if let Err(err) = session
                    .store
                    .save_tags(&session.owner_id, self.tags.names())
                {
                    self.tags = previous;
                    return Err(SyncError::Remote(err));
                }
                Ok(())
            }
        }
    }

    fn apply_feed(&mut self, message: FeedMessage) -> bool {
        if message.generation != self.generation {
            debug!(
                "event=feed_apply module=sync_core status=stale generation={} current={}",
                message.generation, self.generation
            );
            return false;
        }
        match message.event {
            FeedEvent::Records(mut records) => {
                sort_newest_first(&mut records);
                debug!(
                    "event=feed_apply module=sync_core status=ok feed=records count={}",
                    records.len()
                );
                self.records = records;
            }
            FeedEvent::Tags(names) => {
                self.tags = TagRegistry::from_names(names);
                debug!(
                    "event=feed_apply module=sync_core status=ok feed=tags count={}",
                    self.tags.len()
                );
            }
        }
        true
    }

    /// Replaces the view with one-shot reads of the new owner's documents.
    ///
    /// Listeners may deliver their first snapshot later, from another thread.
    fn seed_view(&mut self, session: &RemoteSession) {
        let mut records = session.store.fetch_all(&session.owner_id);
        sort_newest_first(&mut records);
        self.records = records;
        self.tags = TagRegistry::from_names(session.store.get_tags(&session.owner_id));
        debug!(
            "event=view_seed module=sync_core status=ok owner={} records={} tags={}",
            session.owner_id,
            self.records.len(),
            self.tags.len()
        );
    }

    fn subscribe_session(&mut self, session: &RemoteSession) {
        self.generation += 1;
        let records_sink = FeedSink::new(self.generation, self.feed_tx.clone());
        let tags_sink = FeedSink::new(self.generation, self.feed_tx.clone());
        self.subscriptions
            .push(session.store.subscribe(&session.owner_id, records_sink));
        self.subscriptions
            .push(session.store.subscribe_tags(&session.owner_id, tags_sink));
    }

    fn teardown_subscriptions(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        self.generation += 1;
    }

    /// Reuses the persisted identity credential for the same project.
    fn carry_identity(&self, mut config: RemoteConfig) -> RemoteConfig {
        if config.refresh_token.is_some() {
            return config;
        }
        if let Some(saved) = self.settings.remote.as_ref() {
            if saved.provider_id() == config.provider_id()
                && saved.project_id.trim() == config.project_id.trim()
            {
                config.refresh_token = saved.refresh_token.clone();
            }
        }
        config
    }

    fn position(&self, id: RecordId) -> Option<usize> {
        self.records.iter().position(|record| record.id == id)
    }
}

impl<L: LocalStore> Drop for SyncCore<L> {
    fn drop(&mut self) {
        self.teardown_subscriptions();
    }
}

fn establish(
    connector: &dyn RemoteConnector,
    config: &RemoteConfig,
) -> RemoteResult<(RemoteSession, OwnerSession)> {
    let handle = connector.connect(config)?;
    let owner = handle.identity.sign_in()?;
    let session = RemoteSession {
        provider_id: connector.provider_id().to_string(),
        owner_id: owner.owner_id.clone(),
        store: handle.store,
    };
    Ok((session, owner))
}

#[cfg(test)]
mod tests {
    use super::{SyncCore, SyncError};
    use crate::model::record::{RecordDraft, RecordPatch};
    use crate::model::settings::{ConfigError, RemoteConfig};
    use crate::repo::local_store::{LocalStore, SqliteLocalStore};
    use crate::service::store_selector::ConnectionStatus;
    use crate::sync::memory::{MemoryConnector, MemoryRemote};
    use crate::sync::provider_registry::ProviderRegistry;
    use crate::model::record::Record;
    use crate::model::settings::Settings;
    use crate::model::tag_registry::TagRegistry;
    use crate::repo::local_store::StoreResult;
    use crate::sync::remote_types::{FeedEvent, FeedMessage, OwnerId};
    use std::cell::Cell;
    use std::sync::Arc;

    /// SQLite store whose settings writes can be switched to fail.
    struct FlakySettingsStore {
        inner: SqliteLocalStore,
        fail_settings: Cell<bool>,
    }

    impl LocalStore for FlakySettingsStore {
        fn load_records(&self) -> Vec<Record> {
            self.inner.load_records()
        }

        fn save_records(&self, records: &[Record]) -> StoreResult<()> {
            self.inner.save_records(records)
        }

        fn load_tags(&self) -> TagRegistry {
            self.inner.load_tags()
        }

        fn save_tags(&self, tags: &TagRegistry) -> StoreResult<()> {
            self.inner.save_tags(tags)
        }

        fn load_settings(&self) -> Settings {
            self.inner.load_settings()
        }

        fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
            if self.fail_settings.get() {
                return Err(rusqlite::Error::InvalidQuery.into());
            }
            self.inner.save_settings(settings)
        }
    }

    fn local_core() -> SyncCore<SqliteLocalStore> {
        SyncCore::open(
            SqliteLocalStore::in_memory().unwrap(),
            ProviderRegistry::new(),
        )
    }

    fn memory_core(remote: &MemoryRemote, owner: &str) -> SyncCore<SqliteLocalStore> {
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MemoryConnector::new(remote.clone(), owner)))
            .unwrap();
        SyncCore::open(SqliteLocalStore::in_memory().unwrap(), registry)
    }

    fn memory_config() -> RemoteConfig {
        RemoteConfig::new("key", "demo-project").with_provider("memory")
    }

    #[test]
    fn local_create_persists_and_sorts_newest_first() {
        let mut core = local_core();
        let first = core.create_record(RecordDraft::new("one")).unwrap();
        let second = core.create_record(RecordDraft::new("two")).unwrap();

        assert_eq!(core.records()[0].id, second.id);
        assert_eq!(core.records()[1].id, first.id);
        assert_eq!(core.local_store().load_records().len(), 2);
    }

    #[test]
    fn create_rejects_blank_content_without_touching_view() {
        let mut core = local_core();
        let err = core.create_record(RecordDraft::new("   ")).unwrap_err();
        assert!(matches!(err, SyncError::InvalidRecord(_)));
        assert!(core.records().is_empty());
    }

    #[test]
    fn update_unknown_record_is_not_found() {
        let mut core = local_core();
        let id = uuid::Uuid::new_v4();
        let err = core
            .update_record(id, RecordPatch::default().content("x"))
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(found) if found == id));
        assert!(matches!(core.toggle_flag(id), Err(SyncError::NotFound(_))));
    }

    #[test]
    fn stale_generation_events_are_discarded() {
        let mut core = local_core();
        core.feed_tx
            .send(FeedMessage {
                generation: core.generation + 1,
                event: FeedEvent::Tags(vec!["ghost".to_string()]),
            })
            .unwrap();
        assert_eq!(core.process_feed(), 0);
        assert!(core.tags().is_empty());
    }

    #[test]
    fn remote_write_failure_reverts_optimistic_update() {
        let remote = MemoryRemote::new();
        let mut core = memory_core(&remote, "owner-1");
        core.reconfigure_store(memory_config()).unwrap();
        let record = core.create_record(RecordDraft::new("body")).unwrap();
        core.process_feed();

        remote.fail_writes_for(record.id);
        let err = core.toggle_flag(record.id).unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(!core.record(record.id).unwrap().flag);
        assert!(!remote.records(&OwnerId::new("owner-1"))[0].flag);
    }

    #[test]
    fn reconnect_without_persisted_config_is_configuration_error() {
        let mut core = local_core();
        assert!(matches!(
            core.reconnect(),
            Err(SyncError::Configuration(ConfigError::NothingPersisted))
        ));
        assert_eq!(core.status(), ConnectionStatus::Unconfigured);
    }

    #[test]
    fn unknown_provider_is_configuration_error() {
        let mut core = local_core();
        let err = core
            .reconfigure_store(RemoteConfig::new("key", "demo-project").with_provider("nowhere"))
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Configuration(ConfigError::UnknownProvider(_))
        ));
        assert_eq!(core.status(), ConnectionStatus::Unconfigured);
    }

    #[test]
    fn reconfigure_persists_refresh_token_and_reuses_it() {
        let remote = MemoryRemote::new();
        let mut core = memory_core(&remote, "owner-1");
        core.reconfigure_store(memory_config()).unwrap();

        let saved = core.local_store().load_settings().remote.unwrap();
        assert_eq!(saved.refresh_token.as_deref(), Some("memory-refresh-owner-1"));

        core.reconnect().unwrap();
        assert_eq!(core.status(), ConnectionStatus::Connected);
        assert_eq!(remote.listener_count(), 2);
    }

    #[test]
    fn disconnect_with_failing_settings_write_keeps_remote_session() {
        let remote = MemoryRemote::new();
        let mut registry = ProviderRegistry::new();
        registry
            .register(Arc::new(MemoryConnector::new(remote.clone(), "owner-1")))
            .unwrap();
        let local = FlakySettingsStore {
            inner: SqliteLocalStore::in_memory().unwrap(),
            fail_settings: Cell::new(false),
        };
        let mut core = SyncCore::open(local, registry);
        core.reconfigure_store(memory_config()).unwrap();
        let record = core.create_record(RecordDraft::new("remote body")).unwrap();

        core.local_store().fail_settings.set(true);
        let err = core.disconnect_remote().unwrap_err();
        assert!(matches!(err, SyncError::Store(_)));

        assert!(core.is_remote());
        assert_eq!(core.status(), ConnectionStatus::Connected);
        assert!(core.settings().remote.is_some());
        assert!(core.local_store().load_settings().remote.is_some());
        assert_eq!(remote.listener_count(), 2);
        assert!(core.record(record.id).is_some());

        core.local_store().fail_settings.set(false);
        core.disconnect_remote().unwrap();
        assert!(!core.is_remote());
        assert!(core.local_store().load_settings().remote.is_none());
        assert_eq!(remote.listener_count(), 0);
    }

    #[test]
    fn connecting_seeds_view_from_remote_documents() {
        let remote = MemoryRemote::new();
        let owner = OwnerId::new("owner-1");
        let existing = Record::from_draft(RecordDraft::new("already remote"));
        remote.replace_records(&owner, vec![existing.clone()]);
        remote.replace_tags(&owner, vec!["old-a".to_string(), "old-b".to_string()]);

        let mut core = memory_core(&remote, "owner-1");
        core.create_record(RecordDraft::new("local only")).unwrap();
        core.reconfigure_store(memory_config()).unwrap();

        assert_eq!(remote.listener_count(), 2);
        assert_eq!(core.records().len(), 1);
        assert_eq!(core.records()[0].id, existing.id);
        assert_eq!(core.tags().names(), &["old-a", "old-b"]);
    }
}
