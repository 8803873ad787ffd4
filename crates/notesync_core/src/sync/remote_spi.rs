//! Service-provider interface for remote document stores.
//!
//! # Responsibility
//! - Define the adapter contract the sync core talks to.
//! - Keep transport and authentication details behind trait objects so the
//!   core can be exercised against an in-process fake.
//!
//! # Invariants
//! - Adapters never panic on transport failures; they log and return
//!   `RemoteError` (or an empty snapshot for one-shot reads).
//! - Subscriptions deliver full snapshots, starting with the current state.

use crate::model::record::{Record, RecordId, RecordPatch};
use crate::model::settings::RemoteConfig;
use crate::sync::remote_types::{
    FeedSink, OwnerId, OwnerSession, RemoteResult, Subscription,
};
use std::sync::Arc;

/// Per-owner document store for records and the tag registry.
pub trait RemoteStore: Send + Sync {
    /// One-shot read of every record; failures yield an empty set.
    fn fetch_all(&self, owner: &OwnerId) -> Vec<Record>;

    /// Registers a records listener that receives every full snapshot.
    fn subscribe(&self, owner: &OwnerId, sink: FeedSink) -> Subscription;

    /// Upserts one record by id, overwriting all fields.
    fn write(&self, owner: &OwnerId, record: &Record) -> RemoteResult<()>;

    /// Merges the patch fields and `updated_at` into an existing record.
    fn update(
        &self,
        owner: &OwnerId,
        id: RecordId,
        patch: &RecordPatch,
        updated_at: i64,
    ) -> RemoteResult<()>;

    /// Deletes one record; absent ids succeed.
    fn remove(&self, owner: &OwnerId, id: RecordId) -> RemoteResult<()>;

    /// One-shot read of the tag registry; failures yield an empty list.
    fn get_tags(&self, owner: &OwnerId) -> Vec<String>;

    /// Registers a tag registry listener that receives every full snapshot.
    fn subscribe_tags(&self, owner: &OwnerId, sink: FeedSink) -> Subscription;

    /// Replaces the tag registry document.
    fn save_tags(&self, owner: &OwnerId, tags: &[String]) -> RemoteResult<()>;
}

/// Establishes the owner identity that scopes remote documents.
pub trait IdentityProvider: Send + Sync {
    fn sign_in(&self) -> RemoteResult<OwnerSession>;
}

/// Connected adapter pair produced by a connector.
#[derive(Clone)]
pub struct RemoteHandle {
    pub store: Arc<dyn RemoteStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// Builds remote handles from user configuration.
pub trait RemoteConnector: Send + Sync {
    /// Stable lowercase provider id (`firestore`, `memory`, ...).
    fn provider_id(&self) -> &str;

    /// Performs the connection handshake for `config`.
    fn connect(&self, config: &RemoteConfig) -> RemoteResult<RemoteHandle>;
}
