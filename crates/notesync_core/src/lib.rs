//! Synchronization core for notesync.
//! Keeps one in-memory working set consistent with either a local SQLite
//! store or a remote real-time document store.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::record::{Record, RecordDraft, RecordId, RecordPatch, RecordValidationError};
pub use model::settings::{AiProvider, ConfigError, Preferences, RemoteConfig, Settings, Theme};
pub use model::tag_registry::TagRegistry;
pub use repo::local_store::{LocalStore, SqliteLocalStore, StoreError, StoreResult};
pub use service::store_selector::{ConnectionStatus, StoreSelector};
pub use service::sync_core::{SyncCore, SyncError, SyncResult};
pub use service::transfer::{ExportEnvelope, ImportSummary};
pub use sync::firestore::{FirestoreConnector, FirestoreEndpoints};
pub use sync::memory::{MemoryConnector, MemoryRemote};
pub use sync::provider_registry::{ProviderRegistry, ProviderRegistryError};
pub use sync::remote_spi::{IdentityProvider, RemoteConnector, RemoteHandle, RemoteStore};
pub use sync::remote_types::{OwnerId, RemoteError, RemoteStage, Subscription};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
