//! # AdSync Engine
//!
//! Synchronization engine for the AdSync local mirror.
//!
//! This crate provides:
//! - A priority-based rate limiter with retry and exponential backoff
//! - A read-only dry-run validator for pre-flight reports
//! - The phased sync orchestrator (advertisers → zones → campaigns →
//!   placements)
//! - The placement reconciler (embedded vs. normalized storage)
//! - The shared local→remote id resolver
//! - A remote snapshot importer keeping the local mirror current
//!
//! ## Architecture
//!
//! Phases execute strictly sequentially: all advertisers settle before
//! any zone starts, and so on. Within a phase, every remote call goes
//! through the rate limiter, which alone enforces the concurrency and
//! per-second ceilings. Per-entity failures never abort a phase.
//!
//! ## Key Invariants
//!
//! - `remote_id` and `sync_state` are persisted together, never
//!   separately
//! - Only rate-limit-classified failures are retried; dependency and
//!   validation failures never are
//! - Re-invoking the orchestrator skips already-synced entities and
//!   issues zero remote calls for them
//! - A dry run mutates nothing

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod limiter;
mod mirror;
mod orchestrator;
mod reconciler;
mod remote;
mod resolver;
mod validator;

pub use config::{EngineConfig, LimiterConfig, RetryConfig};
pub use error::{EngineError, EngineResult};
pub use limiter::{LimiterStatus, Priority, RateLimiter, Settled};
pub use mirror::{ImportOutcome, SnapshotMirror};
pub use orchestrator::SyncOrchestrator;
pub use reconciler::{CleanupOutcome, MigrateOutcome, PlacementReconciler};
pub use remote::{CreatePayload, MockRemoteApi, RemoteApi, RemoteEntity, RemoteScope};
pub use resolver::IdResolver;
pub use validator::{
    DependencyCheck, DryRunReport, DryRunValidator, DuplicateCheck, PlacementCheck,
};
