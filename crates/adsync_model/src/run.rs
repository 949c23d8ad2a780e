//! Sync run records.
//!
//! A [`SyncRun`] groups one orchestration invocation into ordered phases,
//! each carrying per-entity [`OperationRecord`]s and aggregate totals.
//! The run is built up while the orchestrator executes and finalized
//! (made immutable) when the call returns.

use crate::entity::EntityKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The ordered phases of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Pre-flight validation (dry run).
    Validation,
    /// Advertiser creation/linking.
    Advertisers,
    /// Zone creation/linking.
    Zones,
    /// Campaign creation/linking.
    Campaigns,
    /// Placement creation from embedded entries.
    Placements,
    /// Embedded-placement cleanup after reconciliation.
    Cleanup,
}

impl SyncPhase {
    /// Returns the lowercase name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Validation => "validation",
            SyncPhase::Advertisers => "advertisers",
            SyncPhase::Zones => "zones",
            SyncPhase::Campaigns => "campaigns",
            SyncPhase::Placements => "placements",
            SyncPhase::Cleanup => "cleanup",
        }
    }
}

/// The outcome of a completed phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// All attempted entities succeeded.
    Completed,
    /// At least one entity failed.
    Failed,
    /// The phase had nothing to do or was not run.
    Skipped,
}

/// Aggregate counts for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTotals {
    /// Entities examined by the phase.
    pub considered: u32,
    /// Entities that synced or linked successfully.
    pub succeeded: u32,
    /// Entities that failed.
    pub failed: u32,
    /// Entities skipped without an attempt.
    pub skipped: u32,
}

/// The operation attempted for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperationKind {
    /// A new remote entity was (to be) created.
    Create,
    /// A pre-existing remote entity was linked instead.
    Link,
    /// The entity was skipped.
    Skip,
}

/// The final outcome of one entity's operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The operation succeeded.
    Success,
    /// The operation failed; see `error_code`.
    Error,
    /// The operation was retried (transient record, not final).
    Retry,
    /// The operation was skipped.
    Skipped,
}

/// Error classification for failed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Name collision that could not be resolved to a linkable id.
    Duplicate,
    /// A required related entity is not yet resolvable to a remote id.
    Dependency,
    /// Transport or remote API failure.
    Network,
    /// The payload was malformed before transmission.
    Validation,
}

impl ErrorCode {
    /// Returns the canonical upper-case code string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Duplicate => "DUPLICATE",
            ErrorCode::Dependency => "DEPENDENCY",
            ErrorCode::Network => "NETWORK",
            ErrorCode::Validation => "VALIDATION",
        }
    }
}

/// The record of one attempted entity operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Kind of the entity operated on.
    pub entity_kind: EntityKind,
    /// Local store key of the entity.
    pub entity_key: String,
    /// What was attempted.
    pub operation: SyncOperationKind,
    /// How it ended.
    pub outcome: Outcome,
    /// Error classification for failures.
    pub error_code: Option<ErrorCode>,
    /// Human-readable error message for failures.
    pub message: Option<String>,
    /// How many limiter-level retries the operation consumed.
    pub retry_count: u32,
    /// The remote id assigned on success.
    pub remote_id_assigned: Option<u64>,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
}

impl OperationRecord {
    /// Creates a success record.
    pub fn success(
        entity_kind: EntityKind,
        entity_key: impl Into<String>,
        operation: SyncOperationKind,
        remote_id: u64,
        duration: Duration,
    ) -> Self {
        Self {
            entity_kind,
            entity_key: entity_key.into(),
            operation,
            outcome: Outcome::Success,
            error_code: None,
            message: None,
            retry_count: 0,
            remote_id_assigned: Some(remote_id),
            duration,
        }
    }

    /// Creates a failure record.
    pub fn failure(
        entity_kind: EntityKind,
        entity_key: impl Into<String>,
        operation: SyncOperationKind,
        error_code: ErrorCode,
        message: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            entity_kind,
            entity_key: entity_key.into(),
            operation,
            outcome: Outcome::Error,
            error_code: Some(error_code),
            message: Some(message.into()),
            retry_count: 0,
            remote_id_assigned: None,
            duration,
        }
    }

    /// Creates a skip record.
    pub fn skipped(
        entity_kind: EntityKind,
        entity_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_kind,
            entity_key: entity_key.into(),
            operation: SyncOperationKind::Skip,
            outcome: Outcome::Skipped,
            error_code: None,
            message: Some(message.into()),
            retry_count: 0,
            remote_id_assigned: None,
            duration: Duration::ZERO,
        }
    }

    /// Sets the retry count consumed by this operation.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }
}

/// The report for one completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    /// Which phase this is.
    pub phase: SyncPhase,
    /// Outcome of the phase.
    pub status: PhaseStatus,
    /// Aggregate counts.
    pub totals: PhaseTotals,
    /// Per-entity records, in processing order.
    pub records: Vec<OperationRecord>,
}

impl PhaseReport {
    /// Builds a report from a phase's operation records, deriving totals
    /// and status.
    pub fn from_records(phase: SyncPhase, records: Vec<OperationRecord>) -> Self {
        let mut totals = PhaseTotals::default();
        for record in &records {
            totals.considered += 1;
            match record.outcome {
                Outcome::Success => totals.succeeded += 1,
                Outcome::Error => totals.failed += 1,
                Outcome::Skipped => totals.skipped += 1,
                Outcome::Retry => {}
            }
        }

        let status = if totals.failed > 0 {
            PhaseStatus::Failed
        } else if totals.considered == 0 {
            PhaseStatus::Skipped
        } else {
            PhaseStatus::Completed
        };

        Self {
            phase,
            status,
            totals,
            records,
        }
    }
}

/// The record of one orchestration invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    /// The network the run was scoped to.
    pub network_id: u64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished; `None` while in progress.
    pub finished_at: Option<DateTime<Utc>>,
    /// Phase reports in execution order.
    pub phases: Vec<PhaseReport>,
    /// A run-aborting failure (store connectivity, bootstrap panic).
    pub fatal_error: Option<String>,
}

impl SyncRun {
    /// Starts a new run for the given network.
    pub fn start(network_id: u64) -> Self {
        Self {
            network_id,
            started_at: Utc::now(),
            finished_at: None,
            phases: Vec::new(),
            fatal_error: None,
        }
    }

    /// Appends a completed phase report.
    pub fn push_phase(&mut self, report: PhaseReport) {
        self.phases.push(report);
    }

    /// Marks the run finished.
    pub fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Records a run-aborting failure and finishes the run.
    pub fn abort(&mut self, error: impl Into<String>) {
        self.fatal_error = Some(error.into());
        self.finalize();
    }

    /// Overall success: the run finished without a fatal error and no
    /// entity failed in any phase.
    pub fn succeeded(&self) -> bool {
        self.fatal_error.is_none()
            && self.finished_at.is_some()
            && self.phases.iter().all(|p| p.totals.failed == 0)
    }

    /// Total failed entities across all phases.
    pub fn total_failed(&self) -> u32 {
        self.phases.iter().map(|p| p.totals.failed).sum()
    }
}
