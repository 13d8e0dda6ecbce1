// Composite health scoring model.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Which telemetry feeds contributed to a health computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Both,
    Network,
    Ingest,
    Neither,
}

/// Coarse health band derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    Offline,
    /// No fresh telemetry from either source.
    Unknown,
}

impl HealthStatus {
    /// Band the score: ≥75 healthy, ≥50 degraded, ≥25 critical, else
    /// offline.
    pub fn from_score(score: u8) -> Self {
        match score {
            75.. => Self::Healthy,
            50..=74 => Self::Degraded,
            25..=49 => Self::Critical,
            _ => Self::Offline,
        }
    }
}

/// Points contributed by each scoring component, already weighted.
/// Kept alongside the score so a dashboard can show what is dragging
/// it down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthBreakdown {
    pub bitrate: f64,
    pub packet_loss: f64,
    pub rtt: f64,
    pub redundancy: f64,
}

/// One health observation, computed per tick from whatever telemetry
/// was fresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompositeHealth {
    /// Composite score, 0–100.
    pub score: u8,
    pub status: HealthStatus,
    /// Network and ingest disagree about the delivered bitrate.
    pub divergence: bool,
    pub primary_source: SourceKind,
    pub breakdown: HealthBreakdown,
    pub computed_at: DateTime<Utc>,
}

impl CompositeHealth {
    /// Health before the first tick, or when both sources are stale.
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            score: 0,
            status: HealthStatus::Unknown,
            divergence: false,
            primary_source: SourceKind::Neither,
            breakdown: HealthBreakdown::default(),
            computed_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bands() {
        assert_eq!(HealthStatus::from_score(100), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(75), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(74), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(25), HealthStatus::Critical);
        assert_eq!(HealthStatus::from_score(24), HealthStatus::Offline);
        assert_eq!(HealthStatus::from_score(0), HealthStatus::Offline);
    }
}
