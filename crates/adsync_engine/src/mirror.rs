//! Remote snapshot import.
//!
//! The mirror pulls existing remote entities into the local store so
//! references to them can be validated and resolved offline.
//! Advertisements in particular only ever enter the mirror this way;
//! the engine never creates them. Imported records arrive already
//! synced, carrying their remote id.

use crate::error::{EngineError, EngineResult};
use crate::limiter::{Priority, RateLimiter};
use crate::remote::{RemoteApi, RemoteEntity, RemoteScope};
use adsync_model::{AdvertisementDetail, EntityDetail, EntityKind, LocalEntity, SyncState};
use adsync_store::LocalStore;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Counters for one import pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    /// Entities reported by the remote platform.
    pub fetched: u32,
    /// New local mirror records created.
    pub inserted: u32,
    /// Existing records whose name was refreshed.
    pub updated: u32,
    /// Records already current.
    pub unchanged: u32,
}

impl ImportOutcome {
    fn merge(&mut self, other: ImportOutcome) {
        self.fetched += other.fetched;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }
}

/// Imports remote snapshots into the local mirror.
pub struct SnapshotMirror {
    store: Arc<dyn LocalStore>,
    api: Arc<dyn RemoteApi>,
    limiter: Arc<RateLimiter>,
}

impl SnapshotMirror {
    /// Creates a mirror over the given store, API, and limiter.
    pub fn new(
        store: Arc<dyn LocalStore>,
        api: Arc<dyn RemoteApi>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            api,
            limiter,
        }
    }

    /// Imports all mirrorable kinds (advertisers, zones, advertisements)
    /// for a network.
    pub async fn import_all(&self, network_id: u64) -> EngineResult<ImportOutcome> {
        let mut outcome = ImportOutcome::default();
        for kind in [
            EntityKind::Advertiser,
            EntityKind::Zone,
            EntityKind::Advertisement,
        ] {
            outcome.merge(self.import(network_id, kind).await?);
        }
        Ok(outcome)
    }

    /// Imports one kind's remote snapshot into the local mirror.
    ///
    /// Remote entities without a local counterpart are inserted already
    /// synced; counterparts whose name drifted are refreshed. Local-only
    /// records (unsynced work in progress) are never touched. Only
    /// advertisers, zones, and advertisements can be mirrored.
    pub async fn import(&self, network_id: u64, kind: EntityKind) -> EngineResult<ImportOutcome> {
        if !matches!(
            kind,
            EntityKind::Advertiser | EntityKind::Zone | EntityKind::Advertisement
        ) {
            return Err(EngineError::validation(format!(
                "{kind} snapshots cannot be imported"
            )));
        }

        // Imports are background work; they yield to sync operations.
        let api = Arc::clone(&self.api);
        let settled = self
            .limiter
            .enqueue(Priority::Low, move || {
                let api = Arc::clone(&api);
                async move {
                    api.list_by_scope(kind, RemoteScope::Network(network_id))
                        .await
                }
            })
            .await?;
        let remote_entities = settled.value;

        let mut outcome = ImportOutcome {
            fetched: remote_entities.len() as u32,
            ..ImportOutcome::default()
        };

        for remote in remote_entities {
            match self
                .store
                .find_by_remote_id(kind, network_id, remote.id)?
            {
                Some(mut existing) => {
                    if existing.name != remote.name {
                        existing.name = remote.name;
                        self.store.save(existing)?;
                        outcome.updated += 1;
                    } else {
                        outcome.unchanged += 1;
                    }
                }
                None => {
                    self.store.save(mirrored_entity(network_id, &remote)?)?;
                    outcome.inserted += 1;
                }
            }
        }

        debug!(
            network_id,
            kind = %kind,
            fetched = outcome.fetched,
            inserted = outcome.inserted,
            updated = outcome.updated,
            "snapshot import finished"
        );
        if outcome.inserted > 0 {
            info!(network_id, kind = %kind, inserted = outcome.inserted, "mirrored new remote entities");
        }
        Ok(outcome)
    }
}

/// Builds an already-synced local record from a remote entity.
fn mirrored_entity(network_id: u64, remote: &RemoteEntity) -> EngineResult<LocalEntity> {
    let detail = match remote.kind {
        EntityKind::Advertiser => EntityDetail::Advertiser { notes: None },
        EntityKind::Zone => EntityDetail::Zone {
            alias: attribute_str(&remote.attributes, "alias"),
            self_serve: remote
                .attributes
                .get("self_serve")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        },
        EntityKind::Advertisement => EntityDetail::Advertisement(AdvertisementDetail {
            advertiser_id: remote.attributes.get("advertiser_id").and_then(Value::as_u64),
            ad_type: attribute_str(&remote.attributes, "ad_type"),
        }),
        other => {
            return Err(EngineError::validation(format!(
                "{other} snapshots cannot be imported"
            )))
        }
    };

    let mut entity = LocalEntity::new(network_id, remote.name.clone(), detail);
    entity.remote_id = Some(remote.id);
    entity.sync_state = SyncState::Synced;
    entity.synced_at = Some(chrono::Utc::now());
    Ok(entity)
}

fn attribute_str(attributes: &Value, key: &str) -> Option<String> {
    attributes.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterConfig, RetryConfig};
    use crate::remote::MockRemoteApi;
    use adsync_store::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: Arc<MemoryStore>,
        api: Arc<MockRemoteApi>,
        mirror: SnapshotMirror,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockRemoteApi::new());
        let limiter = Arc::new(RateLimiter::new(
            LimiterConfig::default().with_max_per_second(100),
            RetryConfig::no_retry(),
        ));
        limiter.start();
        let mirror = SnapshotMirror::new(
            Arc::clone(&store) as Arc<dyn LocalStore>,
            Arc::clone(&api) as Arc<dyn RemoteApi>,
            limiter,
        );
        Fixture { store, api, mirror }
    }

    #[tokio::test(start_paused = true)]
    async fn imports_remote_entities_as_synced() {
        let f = fixture();
        let id = f
            .api
            .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);

        let outcome = f.mirror.import(1, EntityKind::Advertiser).await.unwrap();
        assert_eq!(outcome.fetched, 1);
        assert_eq!(outcome.inserted, 1);

        let imported = f
            .store
            .find_by_remote_id(EntityKind::Advertiser, 1, id)
            .unwrap()
            .unwrap();
        assert_eq!(imported.name, "Acme");
        assert_eq!(imported.sync_state, SyncState::Synced);
        assert!(imported.state_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn reimport_is_unchanged() {
        let f = fixture();
        f.api
            .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);

        f.mirror.import(1, EntityKind::Advertiser).await.unwrap();
        let second = f.mirror.import(1, EntityKind::Advertiser).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(f.store.entity_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn advertisement_attributes_are_mirrored() {
        let remote = RemoteEntity::new(50, "Banner", EntityKind::Advertisement)
            .with_attributes(json!({"advertiser_id": 10, "ad_type": "image"}));
        let entity = mirrored_entity(1, &remote).unwrap();

        match entity.detail {
            EntityDetail::Advertisement(detail) => {
                assert_eq!(detail.advertiser_id, Some(10));
                assert_eq!(detail.ad_type.as_deref(), Some("image"));
            }
            other => panic!("unexpected detail: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn campaigns_cannot_be_imported() {
        let f = fixture();
        let result = f.mirror.import(1, EntityKind::Campaign).await;
        assert!(matches!(result, Err(EngineError::Validation { .. })));
        assert_eq!(f.api.list_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn import_all_covers_three_kinds() {
        let f = fixture();
        f.api
            .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);
        f.api.seed(RemoteScope::Network(1), "Sidebar", EntityKind::Zone);
        f.api
            .seed(RemoteScope::Network(1), "Banner", EntityKind::Advertisement);

        let outcome = f.mirror.import_all(1).await.unwrap();
        assert_eq!(outcome.fetched, 3);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(f.api.list_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unsynced_local_work_is_untouched() {
        let f = fixture();
        let local = f
            .store
            .save(LocalEntity::new(
                1,
                "Draft",
                EntityDetail::Advertiser { notes: None },
            ))
            .unwrap();
        f.api
            .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);

        f.mirror.import(1, EntityKind::Advertiser).await.unwrap();

        let after = f.store.find_by_key(&local.local_key).unwrap().unwrap();
        assert_eq!(after.sync_state, SyncState::Unsynced);
        assert_eq!(f.store.entity_count(), 2);
    }
}
