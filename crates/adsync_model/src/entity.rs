//! Local mirror entities.

use crate::entity_ref::EntityRef;
use crate::placement::EmbeddedPlacement;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The kind of an advertising entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A network groups all other entities.
    Network,
    /// An advertiser within a network.
    Advertiser,
    /// A zone (ad slot) within a network.
    Zone,
    /// A campaign owned by an advertiser.
    Campaign,
    /// An advertisement, mirrored from the remote platform.
    Advertisement,
    /// A placement linking an advertisement to a zone within a campaign.
    Placement,
}

impl EntityKind {
    /// Returns the lowercase name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Network => "network",
            EntityKind::Advertiser => "advertiser",
            EntityKind::Zone => "zone",
            EntityKind::Campaign => "campaign",
            EntityKind::Advertisement => "advertisement",
            EntityKind::Placement => "placement",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The synchronization state of a local entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Created locally, not yet pushed to the remote platform.
    Unsynced,
    /// Created on the remote platform by a sync run.
    Synced,
    /// Matched to a pre-existing remote entity instead of creating one.
    LinkedDuplicate,
    /// The last sync attempt failed; see `sync_errors`.
    Failed,
}

impl SyncState {
    /// Returns true if the entity is backed by a remote record.
    ///
    /// This is the state side of the invariant: `remote_id` is present
    /// iff this returns true.
    pub fn is_remote(&self) -> bool {
        matches!(self, SyncState::Synced | SyncState::LinkedDuplicate)
    }

    /// Returns true if a record in this state should be pushed by the
    /// next sync run. Failed records stay candidates so a later run can
    /// retry them.
    pub fn needs_sync(&self) -> bool {
        matches!(self, SyncState::Unsynced | SyncState::Failed)
    }
}

/// Kind-specific data carried by a [`LocalEntity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EntityDetail {
    /// A network has no extra fields; it is the sync scope.
    Network,
    /// Advertiser fields.
    Advertiser {
        /// Optional free-form notes forwarded to the remote platform.
        notes: Option<String>,
    },
    /// Zone fields.
    Zone {
        /// Optional alias shown in the remote UI.
        alias: Option<String>,
        /// Whether the zone accepts self-serve placements.
        self_serve: bool,
    },
    /// Campaign fields.
    Campaign(CampaignDetail),
    /// Advertisement fields (always mirrored from remote).
    Advertisement(AdvertisementDetail),
}

impl EntityDetail {
    /// Returns the entity kind for this detail payload.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDetail::Network => EntityKind::Network,
            EntityDetail::Advertiser { .. } => EntityKind::Advertiser,
            EntityDetail::Zone { .. } => EntityKind::Zone,
            EntityDetail::Campaign(_) => EntityKind::Campaign,
            EntityDetail::Advertisement(_) => EntityKind::Advertisement,
        }
    }
}

/// Campaign-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDetail {
    /// The advertiser that owns this campaign. Must resolve to a remote
    /// id before the campaign itself can be pushed.
    pub advertiser_ref: EntityRef,
    /// Campaign start date, transmitted date-only.
    pub start_date: Option<NaiveDate>,
    /// Campaign end date, transmitted date-only.
    pub end_date: Option<NaiveDate>,
    /// Display type; omitted from the create payload when it equals the
    /// platform default.
    pub display_type: Option<String>,
    /// Relative weight for rotation.
    pub weight: Option<u32>,
    /// Placement facts stored inline on the campaign, migrated to the
    /// normalized store by the reconciler.
    #[serde(default)]
    pub embedded_placements: Vec<EmbeddedPlacement>,
}

impl CampaignDetail {
    /// Creates a campaign detail with the given advertiser reference.
    pub fn new(advertiser_ref: EntityRef) -> Self {
        Self {
            advertiser_ref,
            start_date: None,
            end_date: None,
            display_type: None,
            weight: None,
            embedded_placements: Vec::new(),
        }
    }
}

/// Advertisement fields.
///
/// Advertisements are never created by the engine; they enter the local
/// mirror through snapshot import and exist so embedded placements can be
/// validated against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertisementDetail {
    /// The remote advertiser this advertisement belongs to.
    pub advertiser_id: Option<u64>,
    /// Advertisement type as reported by the platform.
    pub ad_type: Option<String>,
}

/// An entity in the local mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalEntity {
    /// Opaque store key, unique across all kinds.
    pub local_key: String,
    /// The remote network this entity belongs to.
    pub network_id: u64,
    /// Display name; duplicate detection is name-based.
    pub name: String,
    /// Remote id, set once the entity is synced or linked.
    pub remote_id: Option<u64>,
    /// Current synchronization state.
    pub sync_state: SyncState,
    /// Errors from failed sync attempts, oldest first.
    pub sync_errors: Vec<String>,
    /// When the local record was created.
    pub created_at: DateTime<Utc>,
    /// When the entity reached a remote-backed state.
    pub synced_at: Option<DateTime<Utc>>,
    /// Kind-specific fields.
    pub detail: EntityDetail,
}

impl LocalEntity {
    /// Creates a new unsynced local entity. The store assigns `local_key`
    /// on first save; an empty key means "not yet persisted".
    pub fn new(network_id: u64, name: impl Into<String>, detail: EntityDetail) -> Self {
        Self {
            local_key: String::new(),
            network_id,
            name: name.into(),
            remote_id: None,
            sync_state: SyncState::Unsynced,
            sync_errors: Vec::new(),
            created_at: Utc::now(),
            synced_at: None,
            detail,
        }
    }

    /// Returns the entity kind.
    pub fn kind(&self) -> EntityKind {
        self.detail.kind()
    }

    /// Returns true if this entity is a candidate for sync: never
    /// pushed, or failed on a previous attempt.
    pub fn needs_sync(&self) -> bool {
        self.sync_state.needs_sync()
    }

    /// Returns the campaign detail, if this entity is a campaign.
    pub fn campaign(&self) -> Option<&CampaignDetail> {
        match &self.detail {
            EntityDetail::Campaign(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable access to the campaign detail, if this entity is a campaign.
    pub fn campaign_mut(&mut self) -> Option<&mut CampaignDetail> {
        match &mut self.detail {
            EntityDetail::Campaign(c) => Some(c),
            _ => None,
        }
    }

    /// Checks the remote-id/state invariant: `remote_id` is present iff
    /// the state is remote-backed.
    pub fn state_consistent(&self) -> bool {
        self.remote_id.is_some() == self.sync_state.is_remote()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_detail() {
        let adv = LocalEntity::new(1, "Acme", EntityDetail::Advertiser { notes: None });
        assert_eq!(adv.kind(), EntityKind::Advertiser);

        let camp = LocalEntity::new(
            1,
            "Spring",
            EntityDetail::Campaign(CampaignDetail::new(EntityRef::local("adv-1"))),
        );
        assert_eq!(camp.kind(), EntityKind::Campaign);
        assert!(camp.campaign().is_some());
        assert!(adv.campaign().is_none());
    }

    #[test]
    fn new_entity_needs_sync_and_is_consistent() {
        let e = LocalEntity::new(1, "Acme", EntityDetail::Advertiser { notes: None });
        assert!(e.needs_sync());
        assert_eq!(e.remote_id, None);
        assert!(e.sync_errors.is_empty());
        assert!(e.state_consistent());
    }

    #[test]
    fn failed_entity_remains_a_sync_candidate() {
        let mut e = LocalEntity::new(1, "Acme", EntityDetail::Advertiser { notes: None });
        e.sync_state = SyncState::Failed;
        assert!(e.needs_sync());

        e.sync_state = SyncState::Synced;
        e.remote_id = Some(5);
        assert!(!e.needs_sync());
    }

    #[test]
    fn state_consistency_detects_violation() {
        let mut e = LocalEntity::new(1, "Acme", EntityDetail::Advertiser { notes: None });
        e.remote_id = Some(5);
        // remote_id without a remote-backed state violates the invariant
        assert!(!e.state_consistent());

        e.sync_state = SyncState::Synced;
        assert!(e.state_consistent());

        e.sync_state = SyncState::LinkedDuplicate;
        assert!(e.state_consistent());
    }

    #[test]
    fn sync_state_remote_classification() {
        assert!(SyncState::Synced.is_remote());
        assert!(SyncState::LinkedDuplicate.is_remote());
        assert!(!SyncState::Unsynced.is_remote());
        assert!(!SyncState::Failed.is_remote());
    }
}
