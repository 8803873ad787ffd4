//! Local record store contract and SQLite blob implementation.
//!
//! # Responsibility
//! - Persist the record collection, tag registry and settings as three
//!   independent serialized blobs keyed by fixed names.
//! - Keep SQL and serialization details inside the local persistence boundary.
//!
//! # Invariants
//! - `save_*` overwrites the whole blob; there is no partial local write.
//! - Missing or unparseable blobs load as empty/default, never as an error.

use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::record::{sort_newest_first, Record};
use crate::model::settings::Settings;
use crate::model::tag_registry::TagRegistry;
use log::{error, warn};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub const RECORDS_KEY: &str = "records";
pub const TAGS_KEY: &str = "tags";
pub const SETTINGS_KEY: &str = "settings";

pub type StoreResult<T> = Result<T, StoreError>;

/// Local persistence failure.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialize {
        key: &'static str,
        source: serde_json::Error,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialize { key, source } => {
                write!(f, "failed to serialize `{key}` blob: {source}")
            }
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialize { source, .. } => Some(source),
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Synchronous local persistence for the full working set.
pub trait LocalStore {
    /// Loads every record, newest first.
    fn load_records(&self) -> Vec<Record>;
    fn save_records(&self, records: &[Record]) -> StoreResult<()>;
    fn load_tags(&self) -> TagRegistry;
    fn save_tags(&self, tags: &TagRegistry) -> StoreResult<()>;
    fn load_settings(&self) -> Settings;
    fn save_settings(&self, settings: &Settings) -> StoreResult<()>;

    /// Overwrites all three blobs as one unit.
    fn replace_all(
        &self,
        records: &[Record],
        tags: &TagRegistry,
        settings: &Settings,
    ) -> StoreResult<()> {
        self.save_records(records)?;
        self.save_tags(tags)?;
        self.save_settings(settings)
    }
}

/// SQLite-backed blob store.
pub struct SqliteLocalStore {
    conn: Connection,
}

impl SqliteLocalStore {
    /// Opens (and migrates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self {
            conn: open_db(path)?,
        })
    }

    /// Opens a throwaway in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: open_db_in_memory()?,
        })
    }

    /// Wraps an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Raw blob text for one key, if present.
    pub fn raw_blob(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM blobs WHERE key = ?1;", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Overwrites one blob with raw text.
    pub fn put_raw_blob(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO blobs (key, value, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now') * 1000)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at;",
            params![key, value],
        )?;
        Ok(())
    }

    fn load_blob<T: DeserializeOwned>(&self, key: &'static str) -> Option<T> {
        let raw = match self.raw_blob(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                error!(
                    "event=blob_load module=local_store status=error key={key} error_code=read_failed error={err}"
                );
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(
                    "event=blob_load module=local_store status=corrupt key={key} bytes={} error={err}",
                    raw.len()
                );
                None
            }
        }
    }

    fn save_blob<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|source| StoreError::Serialize { key, source })?;
        self.put_raw_blob(key, &raw)
    }
}

impl LocalStore for SqliteLocalStore {
    fn load_records(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self.load_blob(RECORDS_KEY).unwrap_or_default();
        sort_newest_first(&mut records);
        records
    }

    fn save_records(&self, records: &[Record]) -> StoreResult<()> {
        self.save_blob(RECORDS_KEY, records)
    }

    fn load_tags(&self) -> TagRegistry {
        self.load_blob(TAGS_KEY).unwrap_or_default()
    }

    fn save_tags(&self, tags: &TagRegistry) -> StoreResult<()> {
        self.save_blob(TAGS_KEY, tags)
    }

    fn load_settings(&self) -> Settings {
        self.load_blob(SETTINGS_KEY).unwrap_or_default()
    }

    fn save_settings(&self, settings: &Settings) -> StoreResult<()> {
        self.save_blob(SETTINGS_KEY, settings)
    }

    fn replace_all(
        &self,
        records: &[Record],
        tags: &TagRegistry,
        settings: &Settings,
    ) -> StoreResult<()> {
        // Dropping the transaction on an early return rolls every blob back.
        let tx = self.conn.unchecked_transaction()?;
        self.save_records(records)?;
        self.save_tags(tags)?;
        self.save_settings(settings)?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalStore, SqliteLocalStore, RECORDS_KEY, SETTINGS_KEY, TAGS_KEY};
    use crate::model::record::{Record, RecordDraft};
    use crate::model::settings::{RemoteConfig, Settings, Theme};
    use crate::model::tag_registry::TagRegistry;

    #[test]
    fn empty_store_loads_defaults() {
        let store = SqliteLocalStore::in_memory().unwrap();
        assert!(store.load_records().is_empty());
        assert!(store.load_tags().is_empty());
        assert_eq!(store.load_settings(), Settings::default());
    }

    #[test]
    fn save_overwrites_whole_collection() {
        let store = SqliteLocalStore::in_memory().unwrap();
        let first = Record::from_draft(RecordDraft::new("first"));
        let second = Record::from_draft(RecordDraft::new("second"));
        store
            .save_records(&[first.clone(), second.clone()])
            .unwrap();
        store.save_records(&[second.clone()]).unwrap();

        assert_eq!(store.load_records(), vec![second]);
    }

    #[test]
    fn corrupt_blobs_load_as_empty() {
        let store = SqliteLocalStore::in_memory().unwrap();
        store.put_raw_blob(RECORDS_KEY, "{not json").unwrap();
        store.put_raw_blob(TAGS_KEY, "42").unwrap();
        store.put_raw_blob(SETTINGS_KEY, "[]").unwrap();

        assert!(store.load_records().is_empty());
        assert!(store.load_tags().is_empty());
        assert_eq!(store.load_settings(), Settings::default());
    }

    #[test]
    fn tags_and_settings_roundtrip() {
        let store = SqliteLocalStore::in_memory().unwrap();
        store
            .save_tags(&TagRegistry::from_names(["b", "a"]))
            .unwrap();
        let mut settings = Settings::default();
        settings.preferences.theme = Theme::Light;
        settings.remote = Some(RemoteConfig::new("key", "demo-project"));
        store.save_settings(&settings).unwrap();

        assert_eq!(store.load_tags().names(), &["b", "a"]);
        assert_eq!(store.load_settings(), settings);
    }

    #[test]
    fn replace_all_writes_every_blob() {
        let store = SqliteLocalStore::in_memory().unwrap();
        let record = Record::from_draft(RecordDraft::new("kept").tags(["x"]));
        let mut settings = Settings::default();
        settings.preferences.auto_suggest_tags = false;

        store
            .replace_all(
                std::slice::from_ref(&record),
                &TagRegistry::from_names(["x"]),
                &settings,
            )
            .unwrap();

        assert_eq!(store.load_records(), vec![record]);
        assert_eq!(store.load_tags().names(), &["x"]);
        assert!(!store.load_settings().preferences.auto_suggest_tags);
    }
}
