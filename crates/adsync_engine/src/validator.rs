//! Pre-flight dry-run validation.
//!
//! The validator inspects everything a sync run would push and reports
//! what would happen without mutating anything: no entity is created
//! remotely, no local record changes state. Remote existence checks go
//! through the rate limiter at high priority since they are cheap reads.

use crate::error::EngineResult;
use crate::limiter::{Priority, RateLimiter};
use crate::remote::{RemoteApi, RemoteScope};
use crate::resolver::IdResolver;
use adsync_model::{EntityKind, EntityRef};
use adsync_store::LocalStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// One name-collision check against the remote platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCheck {
    /// Local store key of the checked entity.
    pub entity_key: String,
    /// Kind of the checked entity.
    pub entity_kind: EntityKind,
    /// The name that was checked.
    pub name: String,
    /// Whether the name already exists in the relevant remote scope.
    pub exists_remotely: bool,
}

/// One dependency-resolution check for a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCheck {
    /// Local store key of the campaign.
    pub campaign_key: String,
    /// The campaign's name.
    pub campaign_name: String,
    /// The advertiser reference being resolved.
    pub advertiser_ref: EntityRef,
    /// Whether the reference currently resolves to a remote id.
    pub resolvable: bool,
}

/// One check of a campaign's embedded placement entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementCheck {
    /// Local store key of the owning campaign.
    pub campaign_key: String,
    /// Remote advertisement id of the entry.
    pub advertisement_id: u64,
    /// Whether the advertisement exists in the local mirror.
    pub advertisement_mirrored: bool,
    /// The zone reference being resolved.
    pub zone_ref: EntityRef,
    /// Whether the zone currently resolves to a remote id.
    pub zone_resolvable: bool,
}

/// The outcome of a dry run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunReport {
    /// The network that was validated.
    pub network_id: u64,
    /// True when no blocking problems were found.
    pub valid: bool,
    /// Blocking problems; each message names the affected entity.
    pub errors: Vec<String>,
    /// Non-blocking observations.
    pub warnings: Vec<String>,
    /// Name-collision checks performed, in processing order.
    pub duplicate_checks: Vec<DuplicateCheck>,
    /// Campaign dependency checks performed.
    pub dependency_checks: Vec<DependencyCheck>,
    /// Placement zone checks performed.
    pub placement_checks: Vec<PlacementCheck>,
}

impl DryRunReport {
    fn new(network_id: u64) -> Self {
        Self {
            network_id,
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            duplicate_checks: Vec::new(),
            dependency_checks: Vec::new(),
            placement_checks: Vec::new(),
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Read-only validator producing a [`DryRunReport`].
pub struct DryRunValidator {
    store: Arc<dyn LocalStore>,
    api: Arc<dyn RemoteApi>,
    limiter: Arc<RateLimiter>,
    resolver: IdResolver,
}

impl DryRunValidator {
    /// Creates a validator over the given store, API, and limiter.
    pub fn new(
        store: Arc<dyn LocalStore>,
        api: Arc<dyn RemoteApi>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let resolver = IdResolver::new(Arc::clone(&store));
        Self {
            store,
            api,
            limiter,
            resolver,
        }
    }

    /// Validates everything a sync run for `network_id` would push.
    ///
    /// Reports name collisions, unresolvable campaign dependencies, and
    /// unresolvable placement zones. Mutates nothing, locally or
    /// remotely.
    pub async fn validate(&self, network_id: u64) -> EngineResult<DryRunReport> {
        let mut report = DryRunReport::new(network_id);

        self.check_named_entities(network_id, EntityKind::Advertiser, &mut report)
            .await?;
        self.check_named_entities(network_id, EntityKind::Zone, &mut report)
            .await?;
        self.check_campaigns(network_id, &mut report).await?;
        self.check_placements(network_id, &mut report).await?;

        debug!(
            network_id,
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "dry run finished"
        );
        Ok(report)
    }

    /// Duplicate-name checks for advertisers and zones, which are both
    /// scoped to the network.
    async fn check_named_entities(
        &self,
        network_id: u64,
        kind: EntityKind,
        report: &mut DryRunReport,
    ) -> EngineResult<()> {
        for entity in self.store.find_pending(kind, network_id)? {
            if entity.name.trim().is_empty() {
                report.error(format!("{kind} \"{}\" has an empty name", entity.local_key));
                continue;
            }
            let exists = self
                .exists(kind, &entity.name, RemoteScope::Network(network_id))
                .await?;
            if exists {
                report.error(format!(
                    "{kind} \"{}\" already exists on the remote platform",
                    entity.name
                ));
            }
            report.duplicate_checks.push(DuplicateCheck {
                entity_key: entity.local_key,
                entity_kind: kind,
                name: entity.name,
                exists_remotely: exists,
            });
        }
        Ok(())
    }

    /// Campaign checks: the advertiser dependency must resolve, and the
    /// name must be unique within the resolved advertiser's scope.
    async fn check_campaigns(
        &self,
        network_id: u64,
        report: &mut DryRunReport,
    ) -> EngineResult<()> {
        for entity in self.store.find_pending(EntityKind::Campaign, network_id)? {
            let Some(campaign) = entity.campaign() else {
                continue;
            };
            let advertiser_id = self.resolver.resolve(&campaign.advertiser_ref)?;
            report.dependency_checks.push(DependencyCheck {
                campaign_key: entity.local_key.clone(),
                campaign_name: entity.name.clone(),
                advertiser_ref: campaign.advertiser_ref.clone(),
                resolvable: advertiser_id.is_some(),
            });

            // An unresolved advertiser blocks even if it would sync in
            // the same run; the duplicate check cannot be scoped yet.
            let Some(advertiser_id) = advertiser_id else {
                report.error(format!(
                    "campaign \"{}\" references advertiser {} which does not resolve to a remote id",
                    entity.name, campaign.advertiser_ref
                ));
                continue;
            };

            let exists = self
                .exists(
                    EntityKind::Campaign,
                    &entity.name,
                    RemoteScope::Advertiser(advertiser_id),
                )
                .await?;
            if exists {
                report.error(format!(
                    "campaign \"{}\" already exists for advertiser {advertiser_id}",
                    entity.name
                ));
            }
            report.duplicate_checks.push(DuplicateCheck {
                entity_key: entity.local_key,
                entity_kind: EntityKind::Campaign,
                name: entity.name,
                exists_remotely: exists,
            });
        }
        Ok(())
    }

    /// Checks the embedded placements of unsynced campaigns: the
    /// advertisement must be present in the local mirror (warning
    /// otherwise) and the zone must resolve to a remote id, since a
    /// placement cannot be created against an unsynced zone.
    async fn check_placements(
        &self,
        network_id: u64,
        report: &mut DryRunReport,
    ) -> EngineResult<()> {
        for entity in self.store.find_pending(EntityKind::Campaign, network_id)? {
            let Some(campaign) = entity.campaign() else {
                continue;
            };
            for placement in &campaign.embedded_placements {
                let mirrored = self
                    .store
                    .find_by_remote_id(
                        EntityKind::Advertisement,
                        network_id,
                        placement.advertisement_id,
                    )?
                    .is_some();
                if !mirrored {
                    report.warning(format!(
                        "campaign \"{}\": advertisement {} is not in the local mirror",
                        entity.name, placement.advertisement_id
                    ));
                }

                let resolvable = self.resolver.is_resolvable(&placement.zone_ref)?;
                if !resolvable {
                    report.error(format!(
                        "campaign \"{}\": placement for advertisement {} references zone {} which does not resolve to a remote id",
                        entity.name, placement.advertisement_id, placement.zone_ref
                    ));
                }

                report.placement_checks.push(PlacementCheck {
                    campaign_key: entity.local_key.clone(),
                    advertisement_id: placement.advertisement_id,
                    advertisement_mirrored: mirrored,
                    zone_ref: placement.zone_ref.clone(),
                    zone_resolvable: resolvable,
                });
            }
        }
        Ok(())
    }

    /// Runs one existence check through the limiter at high priority.
    async fn exists(
        &self,
        kind: EntityKind,
        name: &str,
        scope: RemoteScope,
    ) -> EngineResult<bool> {
        let api = Arc::clone(&self.api);
        let name = name.to_string();
        let settled = self
            .limiter
            .enqueue(Priority::High, move || {
                let api = Arc::clone(&api);
                let name = name.clone();
                async move { api.exists_by_name(kind, &name, scope).await }
            })
            .await?;
        Ok(settled.value)
    }
}
