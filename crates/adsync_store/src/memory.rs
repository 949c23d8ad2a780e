//! In-memory store backend.

use crate::backend::{campaign_ref_matches, LocalStore, SyncRunStore};
use crate::error::{StoreError, StoreResult};
use adsync_model::{EntityKind, LocalEntity, Placement, SyncRun, SyncState};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// An in-memory store.
///
/// This backend keeps all records in memory and is suitable for:
/// - Unit and integration tests
/// - Ephemeral deployments that rebuild the mirror on startup
///
/// # Thread Safety
///
/// The store is thread-safe and can be shared across tasks behind an
/// `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, Row<LocalEntity>>>,
    placements: RwLock<HashMap<String, Row<Placement>>>,
    runs: RwLock<Vec<SyncRun>>,
    next_seq: RwLock<u64>,
}

/// A record plus its insertion sequence, used for stable ordering.
#[derive(Debug, Clone)]
struct Row<T> {
    seq: u64,
    record: T,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_seq(&self) -> u64 {
        let mut seq = self.next_seq.write();
        *seq += 1;
        *seq
    }

    fn mint_key(kind: EntityKind) -> String {
        format!("{}-{}", kind.as_str(), Uuid::new_v4())
    }

    /// Returns the number of entities in the store.
    pub fn entity_count(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns the number of normalized placements in the store.
    pub fn placement_count(&self) -> usize {
        self.placements.read().len()
    }

    fn collect_entities<F>(&self, filter: F) -> Vec<LocalEntity>
    where
        F: Fn(&LocalEntity) -> bool,
    {
        let entities = self.entities.read();
        let mut rows: Vec<&Row<LocalEntity>> =
            entities.values().filter(|r| filter(&r.record)).collect();
        rows.sort_by_key(|r| r.seq);
        rows.into_iter().map(|r| r.record.clone()).collect()
    }

    fn collect_placements<F>(&self, filter: F) -> Vec<Placement>
    where
        F: Fn(&Placement) -> bool,
    {
        let placements = self.placements.read();
        let mut rows: Vec<&Row<Placement>> =
            placements.values().filter(|r| filter(&r.record)).collect();
        rows.sort_by_key(|r| r.seq);
        rows.into_iter().map(|r| r.record.clone()).collect()
    }
}

impl LocalStore for MemoryStore {
    fn find_pending(&self, kind: EntityKind, network_id: u64) -> StoreResult<Vec<LocalEntity>> {
        Ok(self.collect_entities(|e| {
            e.kind() == kind && e.network_id == network_id && e.needs_sync()
        }))
    }

    fn find_by_network(&self, kind: EntityKind, network_id: u64) -> StoreResult<Vec<LocalEntity>> {
        Ok(self.collect_entities(|e| e.kind() == kind && e.network_id == network_id))
    }

    fn find_by_key(&self, key: &str) -> StoreResult<Option<LocalEntity>> {
        Ok(self.entities.read().get(key).map(|r| r.record.clone()))
    }

    fn find_by_remote_id(
        &self,
        kind: EntityKind,
        network_id: u64,
        remote_id: u64,
    ) -> StoreResult<Option<LocalEntity>> {
        Ok(self
            .collect_entities(|e| {
                e.kind() == kind && e.network_id == network_id && e.remote_id == Some(remote_id)
            })
            .into_iter()
            .next())
    }

    fn save(&self, mut entity: LocalEntity) -> StoreResult<LocalEntity> {
        if !entity.state_consistent() {
            return Err(StoreError::InvariantViolation {
                key: entity.local_key.clone(),
            });
        }

        if entity.local_key.is_empty() {
            entity.local_key = Self::mint_key(entity.kind());
        }

        let mut entities = self.entities.write();
        let seq = match entities.get(&entity.local_key) {
            Some(existing) => existing.seq,
            None => self.mint_seq(),
        };
        entities.insert(
            entity.local_key.clone(),
            Row {
                seq,
                record: entity.clone(),
            },
        );
        Ok(entity)
    }

    fn mark_synced(&self, key: &str, remote_id: u64, state: SyncState) -> StoreResult<()> {
        if !state.is_remote() {
            return Err(StoreError::InvariantViolation { key: key.into() });
        }

        let mut entities = self.entities.write();
        let row = entities
            .get_mut(key)
            .ok_or_else(|| StoreError::EntityNotFound { key: key.into() })?;

        // remote_id and sync_state transition in one write
        row.record.remote_id = Some(remote_id);
        row.record.sync_state = state;
        row.record.sync_errors.clear();
        row.record.synced_at = Some(Utc::now());
        Ok(())
    }

    fn mark_failed(&self, key: &str, error: &str) -> StoreResult<()> {
        let mut entities = self.entities.write();
        let row = entities
            .get_mut(key)
            .ok_or_else(|| StoreError::EntityNotFound { key: key.into() })?;

        row.record.sync_errors.push(error.to_string());
        row.record.sync_state = SyncState::Failed;
        Ok(())
    }

    fn clear_embedded_placements(&self, campaign_key: &str) -> StoreResult<()> {
        let mut entities = self.entities.write();
        let row = entities
            .get_mut(campaign_key)
            .ok_or_else(|| StoreError::EntityNotFound {
                key: campaign_key.into(),
            })?;

        if let Some(campaign) = row.record.campaign_mut() {
            campaign.embedded_placements.clear();
        }
        Ok(())
    }

    fn placements_for_network(&self, network_id: u64) -> StoreResult<Vec<Placement>> {
        Ok(self.collect_placements(|p| p.network_id == network_id))
    }

    fn placements_for_campaign(
        &self,
        campaign_key: &str,
        campaign_remote_id: Option<u64>,
    ) -> StoreResult<Vec<Placement>> {
        Ok(self.collect_placements(|p| {
            campaign_ref_matches(&p.campaign_ref, campaign_key, campaign_remote_id)
        }))
    }

    fn insert_placement(&self, mut placement: Placement) -> StoreResult<Placement> {
        if placement.local_key.is_empty() {
            placement.local_key = format!("placement-{}", Uuid::new_v4());
        }

        let mut placements = self.placements.write();
        let seq = match placements.get(&placement.local_key) {
            Some(existing) => existing.seq,
            None => self.mint_seq(),
        };
        placements.insert(
            placement.local_key.clone(),
            Row {
                seq,
                record: placement.clone(),
            },
        );
        Ok(placement)
    }

    fn mark_placement_synced(
        &self,
        key: &str,
        campaign_id: u64,
        zone_id: u64,
    ) -> StoreResult<()> {
        let mut placements = self.placements.write();
        let row = placements
            .get_mut(key)
            .ok_or_else(|| StoreError::PlacementNotFound { key: key.into() })?;

        row.record.campaign_ref = adsync_model::EntityRef::remote(campaign_id);
        row.record.zone_ref = adsync_model::EntityRef::remote(zone_id);
        row.record.sync_state = SyncState::Synced;
        row.record.sync_errors.clear();
        Ok(())
    }

    fn mark_placement_failed(&self, key: &str, error: &str) -> StoreResult<()> {
        let mut placements = self.placements.write();
        let row = placements
            .get_mut(key)
            .ok_or_else(|| StoreError::PlacementNotFound { key: key.into() })?;

        row.record.sync_errors.push(error.to_string());
        row.record.sync_state = SyncState::Failed;
        Ok(())
    }
}

impl SyncRunStore for MemoryStore {
    fn append(&self, run: SyncRun) -> StoreResult<()> {
        self.runs.write().push(run);
        Ok(())
    }

    fn runs_for_network(&self, network_id: u64) -> StoreResult<Vec<SyncRun>> {
        Ok(self
            .runs
            .read()
            .iter()
            .filter(|r| r.network_id == network_id)
            .cloned()
            .collect())
    }
}
