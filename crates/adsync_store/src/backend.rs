//! Store traits.

use crate::error::StoreResult;
use adsync_model::{EntityKind, EntityRef, LocalEntity, Placement, SyncRun, SyncState};

/// The local entity and placement store consumed by the sync engine.
///
/// Implementations must be thread-safe; the engine shares one store
/// handle across the orchestrator, validator, resolver, and reconciler.
/// Updates are atomic per record: `mark_synced` writes `remote_id` and
/// `sync_state` together, never separately.
pub trait LocalStore: Send + Sync {
    /// Returns all entities of a kind within a network that still need
    /// a push, in creation order. Covers unsynced records and records
    /// whose last attempt failed; remote-backed records are excluded.
    fn find_pending(&self, kind: EntityKind, network_id: u64) -> StoreResult<Vec<LocalEntity>>;

    /// Returns all entities of a kind within a network, in creation order.
    fn find_by_network(&self, kind: EntityKind, network_id: u64) -> StoreResult<Vec<LocalEntity>>;

    /// Looks up one entity by its opaque store key.
    fn find_by_key(&self, key: &str) -> StoreResult<Option<LocalEntity>>;

    /// Looks up one entity of a kind by its remote id.
    fn find_by_remote_id(
        &self,
        kind: EntityKind,
        network_id: u64,
        remote_id: u64,
    ) -> StoreResult<Option<LocalEntity>>;

    /// Persists an entity, minting a store key if it has none yet.
    /// Returns the saved record. Rejects records that violate the
    /// remote-id/state invariant.
    fn save(&self, entity: LocalEntity) -> StoreResult<LocalEntity>;

    /// Transitions an entity to a remote-backed state: writes
    /// `remote_id`, `sync_state`, and `synced_at` in one update and
    /// clears `sync_errors`. `state` must be `Synced` or
    /// `LinkedDuplicate`.
    fn mark_synced(&self, key: &str, remote_id: u64, state: SyncState) -> StoreResult<()>;

    /// Records a failed sync attempt: appends the error and sets
    /// `sync_state` to `Failed`.
    fn mark_failed(&self, key: &str, error: &str) -> StoreResult<()>;

    /// Clears a campaign's embedded placement array in one update.
    fn clear_embedded_placements(&self, campaign_key: &str) -> StoreResult<()>;

    /// Returns all normalized placements within a network, in creation
    /// order.
    fn placements_for_network(&self, network_id: u64) -> StoreResult<Vec<Placement>>;

    /// Returns normalized placements belonging to a campaign, matching
    /// either its local key or (when synced) its remote id.
    fn placements_for_campaign(
        &self,
        campaign_key: &str,
        campaign_remote_id: Option<u64>,
    ) -> StoreResult<Vec<Placement>>;

    /// Inserts a normalized placement, minting a store key if it has
    /// none yet. Returns the saved record.
    fn insert_placement(&self, placement: Placement) -> StoreResult<Placement>;

    /// Transitions a placement to synced: rewrites its campaign and zone
    /// references to the resolved remote ids, sets `sync_state`, and
    /// clears `sync_errors`, all in one update.
    fn mark_placement_synced(
        &self,
        key: &str,
        campaign_id: u64,
        zone_id: u64,
    ) -> StoreResult<()>;

    /// Records a failed placement attempt: appends the error and sets
    /// `sync_state` to `Failed`.
    fn mark_placement_failed(&self, key: &str, error: &str) -> StoreResult<()>;
}

/// Returns true if a placement's campaign reference matches a campaign
/// identified by its local key and optional remote id.
///
/// Shared by store implementations so the local-or-remote match rule
/// stays uniform.
pub fn campaign_ref_matches(
    placement_ref: &EntityRef,
    campaign_key: &str,
    campaign_remote_id: Option<u64>,
) -> bool {
    match placement_ref {
        EntityRef::Local(key) => key == campaign_key,
        EntityRef::Remote(id) => campaign_remote_id == Some(*id),
    }
}

/// Append-only store for finalized sync runs.
pub trait SyncRunStore: Send + Sync {
    /// Appends a finalized run.
    fn append(&self, run: SyncRun) -> StoreResult<()>;

    /// Returns all runs recorded for a network, oldest first.
    fn runs_for_network(&self, network_id: u64) -> StoreResult<Vec<SyncRun>>;
}
