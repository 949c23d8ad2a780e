//! Placement records: embedded and normalized representations.

use crate::entity::SyncState;
use crate::entity_ref::EntityRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A placement fact stored inline on its owning campaign.
///
/// The advertisement id is always a remote id (advertisements are only
/// ever mirrored from the platform), while the zone may still be local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedPlacement {
    /// Remote advertisement id.
    pub advertisement_id: u64,
    /// The zone this placement targets.
    pub zone_ref: EntityRef,
    /// Keyword restrictions applied to the placement.
    #[serde(default)]
    pub restrictions: Vec<String>,
}

impl EmbeddedPlacement {
    /// Creates an embedded placement.
    pub fn new(advertisement_id: u64, zone_ref: EntityRef) -> Self {
        Self {
            advertisement_id,
            zone_ref,
            restrictions: Vec::new(),
        }
    }

    /// Sets the keyword restrictions.
    pub fn with_restrictions(mut self, restrictions: Vec<String>) -> Self {
        self.restrictions = restrictions;
        self
    }
}

/// A placement stored as an independent record in the normalized store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Opaque store key.
    pub local_key: String,
    /// The remote network this placement belongs to.
    pub network_id: u64,
    /// Remote advertiser id, set once the owning advertiser resolves.
    /// Always a remote id, never a local reference.
    pub advertiser_id: Option<u64>,
    /// Remote advertisement id.
    pub advertisement_id: u64,
    /// The campaign this placement belongs to.
    pub campaign_ref: EntityRef,
    /// The zone this placement targets.
    pub zone_ref: EntityRef,
    /// Keyword restrictions applied to the placement.
    #[serde(default)]
    pub restrictions: Vec<String>,
    /// Current synchronization state.
    pub sync_state: SyncState,
    /// Errors from failed sync attempts, oldest first.
    #[serde(default)]
    pub sync_errors: Vec<String>,
    /// When the normalized record was created.
    pub created_at: DateTime<Utc>,
}

impl Placement {
    /// Creates a new unsynced normalized placement.
    pub fn new(
        network_id: u64,
        advertiser_id: Option<u64>,
        advertisement_id: u64,
        campaign_ref: EntityRef,
        zone_ref: EntityRef,
    ) -> Self {
        Self {
            local_key: String::new(),
            network_id,
            advertiser_id,
            advertisement_id,
            campaign_ref,
            zone_ref,
            restrictions: Vec::new(),
            sync_state: SyncState::Unsynced,
            sync_errors: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Sets the keyword restrictions.
    pub fn with_restrictions(mut self, restrictions: Vec<String>) -> Self {
        self.restrictions = restrictions;
        self
    }

    /// Returns the composite identity key for duplicate matching.
    pub fn key(&self) -> PlacementKey {
        PlacementKey {
            advertisement_id: self.advertisement_id,
            zone_ref: self.zone_ref.clone(),
            campaign_ref: self.campaign_ref.clone(),
        }
    }
}

/// Composite key identifying one placement fact: advertisement + zone +
/// campaign. Two records with the same key describe the same placement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlacementKey {
    /// Remote advertisement id.
    pub advertisement_id: u64,
    /// The zone reference.
    pub zone_ref: EntityRef,
    /// The campaign reference.
    pub campaign_ref: EntityRef,
}

/// Which representation a combined placement entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementSource {
    /// From the normalized store; carries authoritative sync state.
    Normalized,
    /// From a campaign's embedded array.
    Embedded,
}

/// A de-duplicated view over the normalized and embedded representations
/// of a campaign's placements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedPlacement {
    /// Remote advertisement id.
    pub advertisement_id: u64,
    /// The zone this placement targets.
    pub zone_ref: EntityRef,
    /// Keyword restrictions.
    pub restrictions: Vec<String>,
    /// Sync state; embedded-only entries are always `Unsynced`.
    pub sync_state: SyncState,
    /// Which representation this entry came from.
    pub source: PlacementSource,
}
