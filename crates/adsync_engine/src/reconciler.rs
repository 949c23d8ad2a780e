//! Placement reconciliation between embedded and normalized storage.
//!
//! Placement facts exist in two representations: inline arrays on their
//! owning campaign (embedded) and independent records in the store
//! (normalized). The reconciler migrates embedded entries into
//! normalized records, clears embedded arrays once every entry has a
//! confirmed normalized counterpart, and produces a de-duplicated
//! combined view for readers.
//!
//! Two entries describe the same placement fact when their
//! advertisement id and zone identity match; zone identity compares
//! resolved remote ids where available, so a local reference and a
//! remote reference to the same zone do not produce duplicates.

use crate::error::EngineResult;
use crate::resolver::IdResolver;
use adsync_model::{
    CombinedPlacement, EntityKind, EntityRef, LocalEntity, Placement, PlacementSource,
};
use adsync_store::LocalStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// The result of a migration pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOutcome {
    /// Embedded entries copied into new normalized records.
    pub migrated: u32,
    /// Embedded entries that already had a normalized counterpart.
    pub skipped_existing: u32,
}

/// The result of a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Keys of campaigns whose embedded arrays were cleared.
    pub cleared: Vec<String>,
    /// Keys of campaigns retained because at least one embedded entry
    /// lacks a confirmed counterpart.
    pub retained: Vec<String>,
    /// Total embedded entries removed.
    pub entries_removed: u32,
}

/// The identity of a zone for placement matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ZoneIdent {
    Id(u64),
    Key(String),
}

/// Reconciles the embedded and normalized placement representations.
pub struct PlacementReconciler {
    store: Arc<dyn LocalStore>,
    resolver: IdResolver,
}

impl PlacementReconciler {
    /// Creates a reconciler over the given store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        let resolver = IdResolver::new(Arc::clone(&store));
        Self { store, resolver }
    }

    /// Copies embedded placement entries into normalized records.
    ///
    /// Entries whose placement fact already exists in normalized form
    /// are skipped, so the pass is idempotent. Embedded arrays are left
    /// untouched; [`PlacementReconciler::cleanup_synced`] removes them
    /// once their counterparts are confirmed remotely.
    pub fn migrate(&self, network_id: u64) -> EngineResult<MigrateOutcome> {
        let mut outcome = MigrateOutcome::default();

        for campaign in self.store.find_by_network(EntityKind::Campaign, network_id)? {
            let Some(detail) = campaign.campaign() else {
                continue;
            };
            if detail.embedded_placements.is_empty() {
                continue;
            }

            let existing = self
                .store
                .placements_for_campaign(&campaign.local_key, campaign.remote_id)?;
            let mut seen = HashSet::new();
            for placement in &existing {
                seen.insert((placement.advertisement_id, self.zone_ident(&placement.zone_ref)?));
            }

            let advertiser_id = self.resolver.resolve(&detail.advertiser_ref)?;
            for entry in &detail.embedded_placements {
                let ident = (entry.advertisement_id, self.zone_ident(&entry.zone_ref)?);
                if seen.contains(&ident) {
                    outcome.skipped_existing += 1;
                    continue;
                }
                let placement = Placement::new(
                    campaign.network_id,
                    advertiser_id,
                    entry.advertisement_id,
                    EntityRef::local(campaign.local_key.clone()),
                    entry.zone_ref.clone(),
                )
                .with_restrictions(entry.restrictions.clone());
                self.store.insert_placement(placement)?;
                seen.insert(ident);
                outcome.migrated += 1;
            }
        }

        debug!(
            network_id,
            migrated = outcome.migrated,
            skipped = outcome.skipped_existing,
            "embedded placement migration finished"
        );
        Ok(outcome)
    }

    /// Clears the embedded arrays of synced campaigns whose entries are
    /// all confirmed.
    ///
    /// An entry is confirmed when a normalized counterpart exists that
    /// is itself remote-backed and whose campaign reference carries the
    /// campaign's remote id. Clearing is all-or-nothing per campaign: if
    /// any entry lacks a confirmed counterpart, every entry is kept.
    pub fn cleanup_synced(&self, network_id: u64) -> EngineResult<CleanupOutcome> {
        let mut outcome = CleanupOutcome::default();

        for campaign in self.store.find_by_network(EntityKind::Campaign, network_id)? {
            let Some(remote_id) = campaign.remote_id.filter(|_| campaign.sync_state.is_remote())
            else {
                continue;
            };
            let Some(detail) = campaign.campaign() else {
                continue;
            };
            if detail.embedded_placements.is_empty() {
                continue;
            }

            let normalized = self
                .store
                .placements_for_campaign(&campaign.local_key, Some(remote_id))?;
            let mut confirmed = HashSet::new();
            for placement in &normalized {
                if placement.sync_state.is_remote()
                    && placement.campaign_ref == EntityRef::remote(remote_id)
                {
                    confirmed
                        .insert((placement.advertisement_id, self.zone_ident(&placement.zone_ref)?));
                }
            }

            let mut all_confirmed = true;
            for entry in &detail.embedded_placements {
                let ident = (entry.advertisement_id, self.zone_ident(&entry.zone_ref)?);
                if !confirmed.contains(&ident) {
                    all_confirmed = false;
                    break;
                }
            }

            if all_confirmed {
                let removed = detail.embedded_placements.len() as u32;
                self.store.clear_embedded_placements(&campaign.local_key)?;
                info!(campaign = %campaign.local_key, removed, "cleared embedded placements");
                outcome.entries_removed += removed;
                outcome.cleared.push(campaign.local_key);
            } else {
                outcome.retained.push(campaign.local_key);
            }
        }

        Ok(outcome)
    }

    /// Returns a de-duplicated view over both representations of a
    /// campaign's placements.
    ///
    /// Normalized records win: when both representations carry the same
    /// placement fact, the normalized entry (with its authoritative sync
    /// state) appears and the embedded one is suppressed. An unknown
    /// campaign yields an empty view.
    pub fn read_combined(
        &self,
        network_id: u64,
        campaign_ref: &EntityRef,
    ) -> EngineResult<Vec<CombinedPlacement>> {
        let Some(campaign) = self.find_campaign(network_id, campaign_ref)? else {
            return Ok(Vec::new());
        };

        let mut combined = Vec::new();
        let mut seen = HashSet::new();

        for placement in self
            .store
            .placements_for_campaign(&campaign.local_key, campaign.remote_id)?
        {
            seen.insert((placement.advertisement_id, self.zone_ident(&placement.zone_ref)?));
            combined.push(CombinedPlacement {
                advertisement_id: placement.advertisement_id,
                zone_ref: placement.zone_ref,
                restrictions: placement.restrictions,
                sync_state: placement.sync_state,
                source: PlacementSource::Normalized,
            });
        }

        if let Some(detail) = campaign.campaign() {
            for entry in &detail.embedded_placements {
                let ident = (entry.advertisement_id, self.zone_ident(&entry.zone_ref)?);
                if seen.contains(&ident) {
                    continue;
                }
                combined.push(CombinedPlacement {
                    advertisement_id: entry.advertisement_id,
                    zone_ref: entry.zone_ref.clone(),
                    restrictions: entry.restrictions.clone(),
                    sync_state: adsync_model::SyncState::Unsynced,
                    source: PlacementSource::Embedded,
                });
            }
        }

        Ok(combined)
    }

    fn find_campaign(
        &self,
        network_id: u64,
        campaign_ref: &EntityRef,
    ) -> EngineResult<Option<LocalEntity>> {
        match campaign_ref {
            EntityRef::Local(key) => Ok(self.store.find_by_key(key)?),
            EntityRef::Remote(id) => {
                Ok(self
                    .store
                    .find_by_remote_id(EntityKind::Campaign, network_id, *id)?)
            }
        }
    }

    /// Zone identity for matching: the resolved remote id where one is
    /// available, else the local key.
    fn zone_ident(&self, zone_ref: &EntityRef) -> EngineResult<ZoneIdent> {
        if let Some(id) = self.resolver.resolve(zone_ref)? {
            return Ok(ZoneIdent::Id(id));
        }
        match zone_ref {
            EntityRef::Remote(id) => Ok(ZoneIdent::Id(*id)),
            EntityRef::Local(key) => Ok(ZoneIdent::Key(key.clone())),
        }
    }
}
