//! Domain model for synchronized notes.
//!
//! # Responsibility
//! - Define the record, tag registry and settings shapes shared by every
//!   backing store.
//!
//! # Invariants
//! - Every record is identified by a stable `RecordId`.
//! - Deletion is a hard delete; no tombstones are kept.

pub mod record;
pub mod settings;
pub mod tag_registry;
