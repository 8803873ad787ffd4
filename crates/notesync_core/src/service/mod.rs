//! Sync use-case layer.
//!
//! # Responsibility
//! - Own the working set and the store-selection state.
//! - Keep CLI and other front ends decoupled from store and adapter details.

pub mod store_selector;
pub mod sync_core;
pub mod transfer;
