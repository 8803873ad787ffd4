//! Local persistence abstractions and implementations.
//!
//! # Responsibility
//! - Define the local record store contract used by the sync core.
//! - Isolate SQLite and serialization details from orchestration code.
//!
//! # Invariants
//! - Local reads never fail; corruption degrades to empty data.
//! - Local writes replace whole blobs.

pub mod local_store;
