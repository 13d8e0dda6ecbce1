//! Adaptive quality control core for bonded live streaming.
//!
//! This crate owns the decision pipeline between raw telemetry and the
//! encoder's quality tier:
//!
//! - **[`MetricsAggregator`]** — Pure per-tick computation over the two
//!   telemetry feeds (bonding receiver + ingest server): composite
//!   health score with per-component breakdown, divergence detection,
//!   and a raw tier recommendation from per-tier thresholds.
//!
//! - **[`RetryWrapper`]** — Hysteresis between recommendation and
//!   action: a change must persist for `retry_attempts` consecutive
//!   ticks (offline for its own dwell) before it becomes an
//!   [`Authorization`].
//!
//! - **[`QualityStateMachine`]** — The five quality tiers plus a
//!   transient recovery dwell for upgrades. Enforces one-step
//!   adjacency; only offline drops and manual overrides may jump.
//!
//! - **[`Supervisor`]** — The tick loop tying it together: concurrent
//!   telemetry fetches under per-source deadlines, strictly sequential
//!   decisions, lock-free [`ControlSnapshot`] publication via
//!   `ArcSwap`, health on a `watch` channel, and transition events on
//!   a `broadcast` channel. Steered through a [`ControlHandle`].
//!
//! All tunables live in the immutable [`ControlConfig`], validated
//! once at startup.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod machine;
pub mod model;
pub mod retry;
pub mod supervisor;

pub use aggregate::{AggregateOutcome, MetricsAggregator, Recommendation};
pub use config::{
    ControlConfig, CreditCurves, DowngradeTrigger, HealthWeights, TierPolicy, TierTable,
    UpgradeEnvelope,
};
pub use error::CoreError;
pub use machine::{QualityStateMachine, RecoveryMarker, TransitionError};
pub use model::{
    CompositeHealth, HealthBreakdown, HealthStatus, QualityLevel, QualityPreset, Resolution,
    SourceKind, StateTransition, TransitionReason,
};
pub use retry::{Authorization, Candidate, RetrySnapshot, RetryWrapper};
pub use supervisor::{Command, ControlHandle, ControlSnapshot, SourceStatus, Supervisor};
