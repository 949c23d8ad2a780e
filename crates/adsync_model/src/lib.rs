//! # AdSync Model
//!
//! Shared domain types for the AdSync synchronization engine.
//!
//! This crate provides:
//! - [`EntityRef`] - the remote-or-local reference used for every
//!   dependency slot (a campaign's advertiser, a placement's zone, ...)
//! - [`LocalEntity`] and per-kind detail payloads for the local mirror
//! - [`Placement`] - the normalized placement record and its composite key
//! - [`SyncRun`] - the immutable record of one orchestration invocation
//!
//! ## Key Invariants
//!
//! - `remote_id` is present iff `sync_state` is `Synced` or
//!   `LinkedDuplicate`
//! - An [`EntityRef`] holds exactly one of a remote id or a local key,
//!   enforced by construction
//! - A [`SyncRun`] is append-only while the run executes and immutable
//!   once finalized

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod entity_ref;
mod placement;
mod run;

pub use entity::{
    AdvertisementDetail, CampaignDetail, EntityDetail, EntityKind, LocalEntity, SyncState,
};
pub use entity_ref::EntityRef;
pub use placement::{CombinedPlacement, EmbeddedPlacement, Placement, PlacementKey, PlacementSource};
pub use run::{
    ErrorCode, OperationRecord, Outcome, PhaseReport, PhaseStatus, PhaseTotals, SyncOperationKind,
    SyncPhase, SyncRun,
};
