//! # AdSync Store
//!
//! Local persistent store abstraction for AdSync.
//!
//! This crate provides:
//! - [`LocalStore`] - the entity and placement store trait consumed by
//!   the sync engine
//! - [`SyncRunStore`] - the append-only run history trait
//! - [`MemoryStore`] - a thread-safe in-memory backend implementing both
//!
//! ## Key Invariants
//!
//! - `mark_synced` writes `remote_id` and `sync_state` in one call, so a
//!   remote entity can never exist while its local record still reads
//!   unsynced (which would cause duplicate creation on retry)
//! - `save` rejects records that violate the remote-id/state invariant

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;

pub use backend::{campaign_ref_matches, LocalStore, SyncRunStore};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
