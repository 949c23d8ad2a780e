//! Phased sync orchestration.
//!
//! A run pushes locally-created entities to the remote platform in
//! dependency order: advertisers, then zones, then campaigns, then
//! placements. Phases are strictly sequential; every entity of a phase
//! settles before the next phase starts. Per-entity failures are
//! recorded and never abort the phase, so one bad record cannot block
//! the rest of the network. Only store-connectivity failures abort a
//! run.
//!
//! Name collisions are resolved by linking: when an entity's name
//! already exists in its remote scope, the orchestrator adopts the
//! existing remote id instead of creating a second entity, and records
//! the operation as a link rather than a create.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::limiter::{Priority, RateLimiter, Settled};
use crate::reconciler::PlacementReconciler;
use crate::remote::{CreatePayload, RemoteApi, RemoteEntity, RemoteScope};
use crate::resolver::IdResolver;
use crate::validator::{DryRunReport, DryRunValidator};
use adsync_model::{
    EntityKind, LocalEntity, OperationRecord, Outcome, PhaseReport, PhaseStatus, PhaseTotals,
    SyncOperationKind, SyncPhase, SyncRun, SyncState,
};
use adsync_store::{LocalStore, SyncRunStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// What one successful link-or-create attempt produced.
struct Pushed {
    operation: SyncOperationKind,
    state: SyncState,
    remote_id: u64,
    retries: u32,
}

/// Drives sync runs for one store/API pair.
pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    runs: Arc<dyn SyncRunStore>,
    api: Arc<dyn RemoteApi>,
    limiter: Arc<RateLimiter>,
    config: EngineConfig,
    resolver: IdResolver,
    reconciler: PlacementReconciler,
    validator: DryRunValidator,
}

impl SyncOrchestrator {
    /// Creates an orchestrator. The limiter must already be started.
    pub fn new(
        store: Arc<dyn LocalStore>,
        runs: Arc<dyn SyncRunStore>,
        api: Arc<dyn RemoteApi>,
        limiter: Arc<RateLimiter>,
        config: EngineConfig,
    ) -> Self {
        let resolver = IdResolver::new(Arc::clone(&store));
        let reconciler = PlacementReconciler::new(Arc::clone(&store));
        let validator = DryRunValidator::new(
            Arc::clone(&store),
            Arc::clone(&api),
            Arc::clone(&limiter),
        );
        Self {
            store,
            runs,
            api,
            limiter,
            config,
            resolver,
            reconciler,
            validator,
        }
    }

    /// Runs a read-only dry run, reporting what a sync would do.
    pub async fn dry_run(&self, network_id: u64) -> EngineResult<DryRunReport> {
        self.validator.validate(network_id).await
    }

    /// Runs a full sync for one network and persists the finalized run.
    ///
    /// Phase order: validation (advisory), advertisers, zones,
    /// campaigns, placements (after migrating embedded entries),
    /// cleanup. A store-connectivity failure aborts the run; the
    /// aborted run is still persisted and returned.
    pub async fn sync_all(&self, network_id: u64) -> EngineResult<SyncRun> {
        let mut run = SyncRun::start(network_id);
        info!(network_id, "sync run started");

        match self.validator.validate(network_id).await {
            Ok(report) => run.push_phase(validation_phase(&report)),
            Err(err) => return self.finish_aborted(run, err),
        }

        match self.sync_advertisers(network_id).await {
            Ok(records) => run.push_phase(phase(SyncPhase::Advertisers, records)),
            Err(err) => return self.finish_aborted(run, err),
        }
        match self.sync_zones(network_id).await {
            Ok(records) => run.push_phase(phase(SyncPhase::Zones, records)),
            Err(err) => return self.finish_aborted(run, err),
        }
        match self.sync_campaigns(network_id).await {
            Ok(records) => run.push_phase(phase(SyncPhase::Campaigns, records)),
            Err(err) => return self.finish_aborted(run, err),
        }

        // Embedded placement facts become normalized records before the
        // placement phase pushes them.
        if let Err(err) = self.reconciler.migrate(network_id) {
            return self.finish_aborted(run, err);
        }
        match self.create_placements(network_id).await {
            Ok(records) => run.push_phase(phase(SyncPhase::Placements, records)),
            Err(err) => return self.finish_aborted(run, err),
        }

        match self.reconciler.cleanup_synced(network_id) {
            Ok(outcome) => {
                let mut records = Vec::new();
                for key in outcome.cleared {
                    records.push(OperationRecord {
                        entity_kind: EntityKind::Campaign,
                        entity_key: key,
                        operation: SyncOperationKind::Skip,
                        outcome: Outcome::Success,
                        error_code: None,
                        message: Some("embedded placements cleared".into()),
                        retry_count: 0,
                        remote_id_assigned: None,
                        duration: std::time::Duration::ZERO,
                    });
                }
                for key in outcome.retained {
                    records.push(OperationRecord::skipped(
                        EntityKind::Campaign,
                        key,
                        "embedded placements retained; not all entries confirmed",
                    ));
                }
                run.push_phase(phase(SyncPhase::Cleanup, records));
            }
            Err(err) => return self.finish_aborted(run, err),
        }

        run.finalize();
        info!(
            network_id,
            succeeded = run.succeeded(),
            failed = run.total_failed(),
            "sync run finished"
        );
        self.runs.append(run.clone())?;
        Ok(run)
    }

    /// Pushes pending advertisers for a network.
    pub async fn sync_advertisers(&self, network_id: u64) -> EngineResult<Vec<OperationRecord>> {
        self.sync_network_scoped(network_id, EntityKind::Advertiser)
            .await
    }

    /// Pushes pending zones for a network.
    pub async fn sync_zones(&self, network_id: u64) -> EngineResult<Vec<OperationRecord>> {
        self.sync_network_scoped(network_id, EntityKind::Zone).await
    }

    /// Advertisers and zones share the same flow: both are scoped to
    /// the network and have no local dependencies.
    async fn sync_network_scoped(
        &self,
        network_id: u64,
        kind: EntityKind,
    ) -> EngineResult<Vec<OperationRecord>> {
        let mut records = Vec::new();
        for entity in self.store.find_pending(kind, network_id)? {
            let payload = match kind {
                EntityKind::Advertiser => CreatePayload::advertiser(&entity),
                _ => CreatePayload::zone(&entity),
            };
            let payload = match payload {
                Ok(payload) => payload,
                Err(err) => {
                    records.push(self.record_failure(&entity, err)?);
                    continue;
                }
            };
            records.push(
                self.push_entity(&entity, payload, RemoteScope::Network(network_id))
                    .await?,
            );
        }
        log_phase(kind, &records);
        Ok(records)
    }

    /// Pushes pending campaigns for a network.
    ///
    /// A campaign whose advertiser reference does not resolve fails
    /// with a dependency error before any remote call is made.
    pub async fn sync_campaigns(&self, network_id: u64) -> EngineResult<Vec<OperationRecord>> {
        let mut records = Vec::new();
        for entity in self.store.find_pending(EntityKind::Campaign, network_id)? {
            let Some(detail) = entity.campaign() else {
                continue;
            };

            let advertiser_id = match self.resolver.resolve(&detail.advertiser_ref)? {
                Some(id) => id,
                None => {
                    let err = EngineError::dependency(detail.advertiser_ref.to_string());
                    records.push(self.record_failure(&entity, err)?);
                    continue;
                }
            };

            let payload = match CreatePayload::campaign(
                &entity,
                advertiser_id,
                &self.config.default_display_type,
            ) {
                Ok(payload) => payload,
                Err(err) => {
                    records.push(self.record_failure(&entity, err)?);
                    continue;
                }
            };
            records.push(
                self.push_entity(&entity, payload, RemoteScope::Advertiser(advertiser_id))
                    .await?,
            );
        }
        log_phase(EntityKind::Campaign, &records);
        Ok(records)
    }

    /// Pushes pending normalized placements for a network.
    ///
    /// Both the campaign and zone references must resolve to remote ids;
    /// an unresolvable reference fails that entry with a dependency
    /// error and zero remote calls.
    pub async fn create_placements(&self, network_id: u64) -> EngineResult<Vec<OperationRecord>> {
        let mut records = Vec::new();
        for placement in self.store.placements_for_network(network_id)? {
            if !placement.sync_state.needs_sync() {
                continue;
            }
            let started = Instant::now();

            let campaign_id = self.resolver.resolve(&placement.campaign_ref)?;
            let zone_id = self.resolver.resolve(&placement.zone_ref)?;
            let (campaign_id, zone_id) = match (campaign_id, zone_id) {
                (Some(campaign_id), Some(zone_id)) => (campaign_id, zone_id),
                (None, _) => {
                    records.push(self.record_placement_failure(
                        &placement.local_key,
                        EngineError::dependency(placement.campaign_ref.to_string()),
                        started,
                    )?);
                    continue;
                }
                (_, None) => {
                    records.push(self.record_placement_failure(
                        &placement.local_key,
                        EngineError::dependency(placement.zone_ref.to_string()),
                        started,
                    )?);
                    continue;
                }
            };

            let payload = CreatePayload::placement(
                campaign_id,
                placement.advertisement_id,
                zone_id,
                &placement.restrictions,
            );
            match self.remote_create(payload).await {
                Ok(created) => {
                    self.store
                        .mark_placement_synced(&placement.local_key, campaign_id, zone_id)?;
                    records.push(
                        OperationRecord::success(
                            EntityKind::Placement,
                            placement.local_key.clone(),
                            SyncOperationKind::Create,
                            created.value.id,
                            started.elapsed(),
                        )
                        .with_retries(created.retries),
                    );
                }
                Err(err) => {
                    if err.is_fatal() {
                        return Err(err);
                    }
                    records.push(self.record_placement_failure(
                        &placement.local_key,
                        err,
                        started,
                    )?);
                }
            }
        }
        log_phase(EntityKind::Placement, &records);
        Ok(records)
    }

    /// Link-or-create for one entity, persisting the outcome.
    async fn push_entity(
        &self,
        entity: &LocalEntity,
        payload: CreatePayload,
        scope: RemoteScope,
    ) -> EngineResult<OperationRecord> {
        let started = Instant::now();
        match self.link_or_create(entity, payload, scope).await {
            Ok(pushed) => {
                self.store
                    .mark_synced(&entity.local_key, pushed.remote_id, pushed.state)?;
                Ok(OperationRecord::success(
                    entity.kind(),
                    entity.local_key.clone(),
                    pushed.operation,
                    pushed.remote_id,
                    started.elapsed(),
                )
                .with_retries(pushed.retries))
            }
            Err(err) => {
                if err.is_fatal() {
                    return Err(err);
                }
                self.record_failure(entity, err)
            }
        }
    }

    /// Links to an existing remote entity with the same name, or creates
    /// a new one.
    async fn link_or_create(
        &self,
        entity: &LocalEntity,
        payload: CreatePayload,
        scope: RemoteScope,
    ) -> EngineResult<Pushed> {
        let kind = payload.kind;
        let exists = self
            .remote_exists(kind, entity.name.clone(), scope)
            .await?;

        if exists.value {
            let listed = self.remote_list(kind, scope).await?;
            let remote_id = listed
                .value
                .iter()
                .find(|remote| remote.name == entity.name)
                .map(|remote| remote.id)
                .ok_or_else(|| EngineError::Duplicate {
                    name: entity.name.clone(),
                })?;
            info!(
                kind = %kind,
                name = %entity.name,
                remote_id,
                "linked to existing remote entity"
            );
            return Ok(Pushed {
                operation: SyncOperationKind::Link,
                state: SyncState::LinkedDuplicate,
                remote_id,
                retries: exists.retries,
            });
        }

        let created = self.remote_create(payload).await?;
        Ok(Pushed {
            operation: SyncOperationKind::Create,
            state: SyncState::Synced,
            remote_id: created.value.id,
            retries: created.retries,
        })
    }

    /// Persists and records one entity failure.
    fn record_failure(
        &self,
        entity: &LocalEntity,
        err: EngineError,
    ) -> EngineResult<OperationRecord> {
        let message = err.to_string();
        self.store.mark_failed(&entity.local_key, &message)?;
        warn!(
            kind = %entity.kind(),
            key = %entity.local_key,
            error = %message,
            "entity sync failed"
        );
        Ok(OperationRecord::failure(
            entity.kind(),
            entity.local_key.clone(),
            SyncOperationKind::Create,
            err.error_code(),
            message,
            std::time::Duration::ZERO,
        )
        .with_retries(self.retries_consumed(&err)))
    }

    /// Persists and records one placement failure.
    fn record_placement_failure(
        &self,
        key: &str,
        err: EngineError,
        started: Instant,
    ) -> EngineResult<OperationRecord> {
        let message = err.to_string();
        self.store.mark_placement_failed(key, &message)?;
        warn!(key = %key, error = %message, "placement sync failed");
        Ok(OperationRecord::failure(
            EntityKind::Placement,
            key,
            SyncOperationKind::Create,
            err.error_code(),
            message,
            started.elapsed(),
        )
        .with_retries(self.retries_consumed(&err)))
    }

    /// A rate-limited error reaching the caller means the whole retry
    /// budget was consumed inside the limiter.
    fn retries_consumed(&self, err: &EngineError) -> u32 {
        if err.is_rate_limited() {
            self.config.retry.max_retries
        } else {
            0
        }
    }

    fn finish_aborted(&self, mut run: SyncRun, err: EngineError) -> EngineResult<SyncRun> {
        error!(network_id = run.network_id, error = %err, "sync run aborted");
        run.abort(err.to_string());
        self.runs.append(run.clone())?;
        Ok(run)
    }

    async fn remote_exists(
        &self,
        kind: EntityKind,
        name: String,
        scope: RemoteScope,
    ) -> EngineResult<Settled<bool>> {
        let api = Arc::clone(&self.api);
        self.limiter
            .enqueue(Priority::Normal, move || {
                let api = Arc::clone(&api);
                let name = name.clone();
                async move { api.exists_by_name(kind, &name, scope).await }
            })
            .await
    }

    async fn remote_list(
        &self,
        kind: EntityKind,
        scope: RemoteScope,
    ) -> EngineResult<Settled<Vec<RemoteEntity>>> {
        let api = Arc::clone(&self.api);
        self.limiter
            .enqueue(Priority::Normal, move || {
                let api = Arc::clone(&api);
                async move { api.list_by_scope(kind, scope).await }
            })
            .await
    }

    async fn remote_create(&self, payload: CreatePayload) -> EngineResult<Settled<RemoteEntity>> {
        let api = Arc::clone(&self.api);
        self.limiter
            .enqueue(Priority::Normal, move || {
                let api = Arc::clone(&api);
                let payload = payload.clone();
                async move { api.create(payload).await }
            })
            .await
    }
}

fn phase(phase: SyncPhase, records: Vec<OperationRecord>) -> PhaseReport {
    PhaseReport::from_records(phase, records)
}

/// The validation phase is advisory: its findings are reported but a
/// finding never fails the run, since duplicates are linked live.
fn validation_phase(report: &DryRunReport) -> PhaseReport {
    let considered = (report.duplicate_checks.len()
        + report.dependency_checks.len()
        + report.placement_checks.len()) as u32;
    PhaseReport {
        phase: SyncPhase::Validation,
        status: if considered == 0 {
            PhaseStatus::Skipped
        } else {
            PhaseStatus::Completed
        },
        totals: PhaseTotals {
            considered,
            succeeded: considered,
            failed: 0,
            skipped: 0,
        },
        records: Vec::new(),
    }
}

fn log_phase(kind: EntityKind, records: &[OperationRecord]) {
    let failed = records
        .iter()
        .filter(|r| r.outcome == Outcome::Error)
        .count();
    info!(
        kind = %kind,
        considered = records.len(),
        failed,
        "sync phase finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimiterConfig, RetryConfig};
    use crate::remote::MockRemoteApi;
    use adsync_model::{CampaignDetail, EntityDetail, EntityRef, ErrorCode, Placement};
    use adsync_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        api: Arc<MockRemoteApi>,
        orchestrator: SyncOrchestrator,
    }

    fn fixture() -> Fixture {
        fixture_with_retry(RetryConfig::no_retry())
    }

    fn fixture_with_retry(retry: RetryConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(MockRemoteApi::new());
        let limiter = Arc::new(RateLimiter::new(
            LimiterConfig::default()
                .with_max_per_second(100)
                .with_max_concurrent(1),
            retry.clone(),
        ));
        limiter.start();
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&store) as Arc<dyn LocalStore>,
            Arc::clone(&store) as Arc<dyn SyncRunStore>,
            Arc::clone(&api) as Arc<dyn RemoteApi>,
            limiter,
            EngineConfig::default().with_retry(retry),
        );
        Fixture {
            store,
            api,
            orchestrator,
        }
    }

    fn advertiser(name: &str) -> LocalEntity {
        LocalEntity::new(1, name, EntityDetail::Advertiser { notes: None })
    }

    #[tokio::test(start_paused = true)]
    async fn creates_unsynced_advertisers() {
        let f = fixture();
        let saved = f.store.save(advertiser("Acme")).unwrap();

        let records = f.orchestrator.sync_advertisers(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, SyncOperationKind::Create);
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(f.api.create_calls(), 1);

        let after = f.store.find_by_key(&saved.local_key).unwrap().unwrap();
        assert_eq!(after.sync_state, SyncState::Synced);
        assert_eq!(after.remote_id, records[0].remote_id_assigned);
        assert!(after.state_consistent());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_name_is_linked_not_created() {
        let f = fixture();
        let remote_id = f
            .api
            .seed(RemoteScope::Network(1), "Acme", EntityKind::Advertiser);
        let saved = f.store.save(advertiser("Acme")).unwrap();

        let records = f.orchestrator.sync_advertisers(1).await.unwrap();
        assert_eq!(records[0].operation, SyncOperationKind::Link);
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(records[0].remote_id_assigned, Some(remote_id));
        assert_eq!(f.api.create_calls(), 0);

        let after = f.store.find_by_key(&saved.local_key).unwrap().unwrap();
        assert_eq!(after.sync_state, SyncState::LinkedDuplicate);
        assert_eq!(after.remote_id, Some(remote_id));
    }

    #[tokio::test(start_paused = true)]
    async fn unresolvable_advertiser_fails_campaign_without_remote_calls() {
        let f = fixture();
        f.store
            .save(LocalEntity::new(
                1,
                "Spring",
                EntityDetail::Campaign(CampaignDetail::new(EntityRef::local("advertiser-gone"))),
            ))
            .unwrap();

        let records = f.orchestrator.sync_campaigns(1).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Error);
        assert_eq!(records[0].error_code, Some(ErrorCode::Dependency));
        assert_eq!(f.api.total_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn network_failure_marks_entity_failed() {
        let f = fixture();
        f.api.fail_create("Acme", 500, "internal error", 1);
        let saved = f.store.save(advertiser("Acme")).unwrap();

        let records = f.orchestrator.sync_advertisers(1).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Error);
        assert_eq!(records[0].error_code, Some(ErrorCode::Network));

        let after = f.store.find_by_key(&saved.local_key).unwrap().unwrap();
        assert_eq!(after.sync_state, SyncState::Failed);
        assert_eq!(after.sync_errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_reattempts_previously_failed_entities() {
        let f = fixture();
        f.api.fail_create("Acme", 500, "internal error", 1);
        let saved = f.store.save(advertiser("Acme")).unwrap();

        let first = f.orchestrator.sync_advertisers(1).await.unwrap();
        assert_eq!(first[0].outcome, Outcome::Error);
        assert_eq!(f.api.create_calls(), 1);

        // The failed record is still a candidate on the next run
        let second = f.orchestrator.sync_advertisers(1).await.unwrap();
        assert_eq!(second[0].outcome, Outcome::Success);
        assert_eq!(f.api.create_calls(), 2);

        let after = f.store.find_by_key(&saved.local_key).unwrap().unwrap();
        assert_eq!(after.sync_state, SyncState::Synced);
        assert!(after.sync_errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_reattempts_failed_placements() {
        let f = fixture();
        let p = f
            .store
            .insert_placement(Placement::new(
                1,
                Some(10),
                5,
                EntityRef::remote(33),
                EntityRef::remote(9),
            ))
            .unwrap();
        f.store
            .mark_placement_failed(&p.local_key, "remote API error (500): boom")
            .unwrap();

        let records = f.orchestrator.create_placements(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(f.api.create_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_create_retries_inside_the_limiter() {
        let f = fixture_with_retry(
            RetryConfig::default()
                .with_max_retries(3)
                .with_base_delay(std::time::Duration::from_millis(10)),
        );
        f.api.fail_create("Acme", 429, "rate limit exceeded", 2);
        f.store.save(advertiser("Acme")).unwrap();

        let records = f.orchestrator.sync_advertisers(1).await.unwrap();
        assert_eq!(records[0].outcome, Outcome::Success);
        assert_eq!(records[0].retry_count, 2);
        assert_eq!(f.api.create_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_skips_synced_entities_with_zero_calls() {
        let f = fixture();
        f.store.save(advertiser("Acme")).unwrap();

        f.orchestrator.sync_all(1).await.unwrap();
        let calls_after_first = f.api.total_calls();

        let run = f.orchestrator.sync_all(1).await.unwrap();
        assert!(run.succeeded());
        assert_eq!(f.api.total_calls(), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn runs_are_persisted() {
        let f = fixture();
        f.store.save(advertiser("Acme")).unwrap();

        f.orchestrator.sync_all(1).await.unwrap();
        let runs = f.store.runs_for_network(1).unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0]
            .phases
            .iter()
            .any(|p| p.phase == SyncPhase::Advertisers));
    }
}
