//! Remote store adapters and connector selection.
//!
//! # Responsibility
//! - Define the remote store / identity SPI consumed by the sync core.
//! - Ship the Firestore REST adapter and an in-process memory adapter.
//! - Register connectors by provider id.
//!
//! # Invariants
//! - Adapters push full snapshots; consumers replace, never merge.
//! - Provider ids are lowercase `[a-z0-9_-]+`.

pub mod firestore;
pub mod memory;
pub mod provider_registry;
pub mod remote_spi;
pub mod remote_types;
