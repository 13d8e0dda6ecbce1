//! Domain model: quality tiers, health, and transition events.

pub mod health;
pub mod level;
pub mod transition;

pub use health::{CompositeHealth, HealthBreakdown, HealthStatus, SourceKind};
pub use level::{QualityLevel, QualityPreset, Resolution};
pub use transition::{StateTransition, TransitionReason};
