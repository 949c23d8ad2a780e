//! End-to-end sync scenarios over the in-memory store and mock API.

use adsync_engine::{
    DryRunValidator, EngineConfig, LimiterConfig, MockRemoteApi, PlacementReconciler, Priority,
    RateLimiter, RemoteApi, RemoteScope, RetryConfig, SnapshotMirror, SyncOrchestrator,
};
use adsync_model::{
    CampaignDetail, EmbeddedPlacement, EntityDetail, EntityKind, EntityRef, ErrorCode,
    LocalEntity, Outcome, PlacementSource, SyncPhase, SyncState,
};
use adsync_store::{LocalStore, MemoryStore, SyncRunStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Harness {
    store: Arc<MemoryStore>,
    api: Arc<MockRemoteApi>,
    limiter: Arc<RateLimiter>,
    orchestrator: SyncOrchestrator,
}

impl Harness {
    fn new() -> Self {
        Self::with_limits(
            LimiterConfig::default()
                .with_max_concurrent(1)
                .with_max_per_second(100),
            RetryConfig::no_retry(),
        )
    }

    fn with_limits(limits: LimiterConfig, retry: RetryConfig) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockRemoteApi::new());
        let limiter = Arc::new(RateLimiter::new(limits, retry.clone()));
        limiter.start();
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&store) as Arc<dyn LocalStore>,
            Arc::clone(&store) as Arc<dyn SyncRunStore>,
            Arc::clone(&api) as Arc<dyn RemoteApi>,
            Arc::clone(&limiter),
            EngineConfig::default().with_retry(retry),
        );
        Self {
            store,
            api,
            limiter,
            orchestrator,
        }
    }

    fn save_advertiser(&self, name: &str) -> LocalEntity {
        self.store
            .save(LocalEntity::new(
                1,
                name,
                EntityDetail::Advertiser { notes: None },
            ))
            .unwrap()
    }

    fn save_zone(&self, name: &str) -> LocalEntity {
        self.store
            .save(LocalEntity::new(
                1,
                name,
                EntityDetail::Zone {
                    alias: None,
                    self_serve: false,
                },
            ))
            .unwrap()
    }

    fn save_campaign(&self, name: &str, detail: CampaignDetail) -> LocalEntity {
        self.store
            .save(LocalEntity::new(1, name, EntityDetail::Campaign(detail)))
            .unwrap()
    }
}

#[tokio::test(start_paused = true)]
async fn full_pipeline_syncs_in_dependency_order() {
    let h = Harness::new();

    let adv = h.save_advertiser("Acme");
    let zone = h.save_zone("Sidebar");
    let mut detail = CampaignDetail::new(EntityRef::local(adv.local_key.clone()));
    detail
        .embedded_placements
        .push(EmbeddedPlacement::new(5, EntityRef::local(zone.local_key.clone())));
    let campaign = h.save_campaign("Spring Sale", detail);

    let run = h.orchestrator.sync_all(1).await.unwrap();
    assert!(run.succeeded(), "run failed: {run:?}");

    // Every entity reached a remote-backed state
    for key in [&adv.local_key, &zone.local_key, &campaign.local_key] {
        let entity = h.store.find_by_key(key).unwrap().unwrap();
        assert_eq!(entity.sync_state, SyncState::Synced);
        assert!(entity.state_consistent());
    }

    // The embedded entry was migrated, pushed, and cleaned up
    let placements = h.store.placements_for_network(1).unwrap();
    assert_eq!(placements.len(), 1);
    assert_eq!(placements[0].sync_state, SyncState::Synced);
    assert!(matches!(placements[0].campaign_ref, EntityRef::Remote(_)));
    assert!(matches!(placements[0].zone_ref, EntityRef::Remote(_)));

    let campaign_after = h.store.find_by_key(&campaign.local_key).unwrap().unwrap();
    assert!(campaign_after
        .campaign()
        .unwrap()
        .embedded_placements
        .is_empty());

    // Phase order is fixed
    let phases: Vec<SyncPhase> = run.phases.iter().map(|p| p.phase).collect();
    assert_eq!(
        phases,
        vec![
            SyncPhase::Validation,
            SyncPhase::Advertisers,
            SyncPhase::Zones,
            SyncPhase::Campaigns,
            SyncPhase::Placements,
            SyncPhase::Cleanup,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn rerun_is_idempotent_with_zero_remote_calls() {
    let h = Harness::new();

    let adv = h.save_advertiser("Acme");
    let mut detail = CampaignDetail::new(EntityRef::local(adv.local_key));
    let zone = h.save_zone("Sidebar");
    detail
        .embedded_placements
        .push(EmbeddedPlacement::new(5, EntityRef::local(zone.local_key)));
    h.save_campaign("Spring Sale", detail);

    let first = h.orchestrator.sync_all(1).await.unwrap();
    assert!(first.succeeded());
    let calls = h.api.total_calls();

    let second = h.orchestrator.sync_all(1).await.unwrap();
    assert!(second.succeeded());
    assert_eq!(h.api.total_calls(), calls, "rerun made remote calls");
    assert_eq!(h.store.placement_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn zone_failure_does_not_block_the_campaign_phase() {
    let h = Harness::new();

    let adv = h.save_advertiser("Acme");
    h.api.fail_create("Sidebar", 500, "internal error", 1);
    let zone = h.save_zone("Sidebar");
    h.save_campaign(
        "Spring Sale",
        CampaignDetail::new(EntityRef::local(adv.local_key)),
    );

    let run = h.orchestrator.sync_all(1).await.unwrap();
    assert!(!run.succeeded());
    assert_eq!(run.total_failed(), 1);

    let zone_after = h.store.find_by_key(&zone.local_key).unwrap().unwrap();
    assert_eq!(zone_after.sync_state, SyncState::Failed);

    // The campaign phase still ran and succeeded
    let campaigns = run
        .phases
        .iter()
        .find(|p| p.phase == SyncPhase::Campaigns)
        .unwrap();
    assert_eq!(campaigns.totals.succeeded, 1);
    assert_eq!(campaigns.totals.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn campaign_with_failed_advertiser_fails_as_dependency() {
    let h = Harness::new();

    h.api.fail_create("Acme", 500, "internal error", 1);
    let adv = h.save_advertiser("Acme");
    h.save_campaign(
        "Spring Sale",
        CampaignDetail::new(EntityRef::local(adv.local_key)),
    );

    let run = h.orchestrator.sync_all(1).await.unwrap();
    let campaigns = run
        .phases
        .iter()
        .find(|p| p.phase == SyncPhase::Campaigns)
        .unwrap();
    assert_eq!(campaigns.totals.failed, 1);
    assert_eq!(
        campaigns.records[0].error_code,
        Some(ErrorCode::Dependency)
    );
    // The campaign failure consumed no remote calls: only the
    // advertiser's existence check and failed create went out, plus the
    // dry run's check.
    assert_eq!(h.api.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_advertiser_is_linked_and_informational() {
    let h = Harness::new();

    let remote_id = h
        .api
        .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);
    let adv = h.save_advertiser("Acme");

    // The dry run flags the duplicate by name
    let report = h.orchestrator.dry_run(1).await.unwrap();
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e.contains("Acme")));

    // The live run links instead of failing
    let run = h.orchestrator.sync_all(1).await.unwrap();
    assert!(run.succeeded());

    let after = h.store.find_by_key(&adv.local_key).unwrap().unwrap();
    assert_eq!(after.sync_state, SyncState::LinkedDuplicate);
    assert_eq!(after.remote_id, Some(remote_id));
    assert_eq!(h.api.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn placement_with_unresolvable_zone_fails_per_entry() {
    let h = Harness::new();

    let adv = h.save_advertiser("Acme");
    let zone = h.save_zone("Sidebar");
    let mut detail = CampaignDetail::new(EntityRef::local(adv.local_key));
    detail
        .embedded_placements
        .push(EmbeddedPlacement::new(5, EntityRef::local(zone.local_key)));
    detail
        .embedded_placements
        .push(EmbeddedPlacement::new(6, EntityRef::local("zone-gone")));
    h.save_campaign("Spring Sale", detail);

    let run = h.orchestrator.sync_all(1).await.unwrap();
    let placements_phase = run
        .phases
        .iter()
        .find(|p| p.phase == SyncPhase::Placements)
        .unwrap();
    assert_eq!(placements_phase.totals.succeeded, 1);
    assert_eq!(placements_phase.totals.failed, 1);

    let failed = placements_phase
        .records
        .iter()
        .find(|r| r.outcome == Outcome::Error)
        .unwrap();
    assert_eq!(failed.error_code, Some(ErrorCode::Dependency));

    // The good entry is confirmed but the campaign keeps its embedded
    // array because one entry never synced
    let campaigns = h.store.find_by_network(EntityKind::Campaign, 1).unwrap();
    assert_eq!(
        campaigns[0].campaign().unwrap().embedded_placements.len(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn sync_respects_the_per_second_window() {
    let h = Harness::with_limits(
        LimiterConfig::default()
            .with_max_concurrent(10)
            .with_max_per_second(2),
        RetryConfig::no_retry(),
    );
    for i in 0..3 {
        h.save_advertiser(&format!("Advertiser {i}"));
    }

    let started = Instant::now();
    let run = h.orchestrator.sync_all(1).await.unwrap();
    assert!(run.succeeded());

    // 3 advertisers cost 6 calls (existence check + create each) plus 3
    // dry-run checks: 9 calls at 2 per second spans at least 4 windows.
    assert_eq!(h.api.total_calls(), 9);
    assert!(started.elapsed() >= Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn combined_view_after_partial_sync() {
    let h = Harness::new();

    let adv = h.save_advertiser("Acme");
    let zone = h.save_zone("Sidebar");
    let mut detail = CampaignDetail::new(EntityRef::local(adv.local_key));
    detail
        .embedded_placements
        .push(EmbeddedPlacement::new(5, EntityRef::local(zone.local_key)));
    detail
        .embedded_placements
        .push(EmbeddedPlacement::new(6, EntityRef::local("zone-gone")));
    let campaign = h.save_campaign("Spring Sale", detail);

    h.orchestrator.sync_all(1).await.unwrap();

    let reconciler = PlacementReconciler::new(Arc::clone(&h.store) as Arc<dyn LocalStore>);
    let combined = reconciler
        .read_combined(1, &EntityRef::local(campaign.local_key))
        .unwrap();
    assert_eq!(combined.len(), 2);

    let synced = combined.iter().find(|c| c.advertisement_id == 5).unwrap();
    assert_eq!(synced.source, PlacementSource::Normalized);
    assert_eq!(synced.sync_state, SyncState::Synced);

    let failed = combined.iter().find(|c| c.advertisement_id == 6).unwrap();
    assert_eq!(failed.source, PlacementSource::Normalized);
    assert_eq!(failed.sync_state, SyncState::Failed);
}

#[tokio::test(start_paused = true)]
async fn mirrored_advertiser_satisfies_campaign_dependency() {
    let h = Harness::new();

    let remote_adv = h
        .api
        .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);
    let mirror = SnapshotMirror::new(
        Arc::clone(&h.store) as Arc<dyn LocalStore>,
        Arc::clone(&h.api) as Arc<dyn RemoteApi>,
        Arc::clone(&h.limiter),
    );
    let outcome = mirror.import(1, EntityKind::Advertiser).await.unwrap();
    assert_eq!(outcome.inserted, 1);

    h.save_campaign(
        "Spring Sale",
        CampaignDetail::new(EntityRef::remote(remote_adv)),
    );

    let run = h.orchestrator.sync_all(1).await.unwrap();
    assert!(run.succeeded());

    let campaigns = h.store.find_by_network(EntityKind::Campaign, 1).unwrap();
    assert_eq!(campaigns[0].sync_state, SyncState::Synced);
}

#[tokio::test(start_paused = true)]
async fn dry_run_through_the_validator_is_read_only() {
    let h = Harness::new();

    h.api
        .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);
    let adv = h.save_advertiser("Acme");

    let validator = DryRunValidator::new(
        Arc::clone(&h.store) as Arc<dyn LocalStore>,
        Arc::clone(&h.api) as Arc<dyn RemoteApi>,
        Arc::clone(&h.limiter),
    );
    let report = validator.validate(1).await.unwrap();
    assert!(!report.valid);

    let after = h.store.find_by_key(&adv.local_key).unwrap().unwrap();
    assert_eq!(after.sync_state, SyncState::Unsynced);
    assert_eq!(h.api.create_calls(), 0);
    assert_eq!(h.store.runs_for_network(1).unwrap().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn direct_limiter_use_orders_by_priority() {
    let h = Harness::with_limits(
        LimiterConfig::default()
            .with_max_concurrent(1)
            .with_max_per_second(100),
        RetryConfig::no_retry(),
    );
    let order: Arc<parking_lot::Mutex<Vec<&'static str>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));

    let blocker = {
        let order = Arc::clone(&order);
        h.limiter.enqueue(Priority::High, move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().push("first");
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, adsync_engine::EngineError>(())
            }
        })
    };
    let low = {
        let order = Arc::clone(&order);
        h.limiter.enqueue(Priority::Low, move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().push("low");
                Ok::<_, adsync_engine::EngineError>(())
            }
        })
    };
    let high = {
        let order = Arc::clone(&order);
        h.limiter.enqueue(Priority::High, move || {
            let order = Arc::clone(&order);
            async move {
                order.lock().push("high");
                Ok::<_, adsync_engine::EngineError>(())
            }
        })
    };

    let (a, b, c) = tokio::join!(blocker, low, high);
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(*order.lock(), vec!["first", "high", "low"]);
}
