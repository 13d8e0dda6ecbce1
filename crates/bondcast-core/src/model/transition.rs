// Quality transition events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::level::QualityLevel;

/// Why a transition (or a recommendation) happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    BandwidthLow,
    LossHigh,
    RttHigh,
    Offline,
    Recovered,
    ManualOverride,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BandwidthLow => "bandwidth_low",
            Self::LossHigh => "loss_high",
            Self::RttHigh => "rtt_high",
            Self::Offline => "offline",
            Self::Recovered => "recovered",
            Self::ManualOverride => "manual_override",
        };
        f.write_str(name)
    }
}

/// One authorized quality change. Broadcast to collaborators (encoder
/// control, scene switching) and retained as the most recent
/// transition in the published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateTransition {
    pub from: QualityLevel,
    pub to: QualityLevel,
    pub reason: TransitionReason,
    pub occurred_at: DateTime<Utc>,
}
