// Immutable control configuration.
//
// Everything tunable lives here and is validated once at startup;
// after construction the config is shared read-only. Threshold
// ordering violations are the only fatal error class — a config that
// passes validation cannot make the control loop oscillate by
// construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::level::{QualityLevel, QualityPreset};

/// Conditions that force a drop out of a tier. OR semantics: any one
/// firing recommends the next worse tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DowngradeTrigger {
    /// Drop when aggregate bandwidth falls below this.
    pub bandwidth_floor_mbps: f64,
    /// Drop when packet loss exceeds this.
    pub loss_ceiling_pct: f64,
    /// Drop when the worst-link RTT exceeds this.
    pub rtt_ceiling_ms: f64,
}

/// Conditions that must ALL hold to step up out of a tier.
/// Deliberately stricter than the corresponding downgrade trigger so
/// the two can never both fire on the same sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpgradeEnvelope {
    pub min_bandwidth_mbps: f64,
    pub max_loss_pct: f64,
    /// Checked against the best-link RTT.
    pub max_rtt_ms: f64,
}

impl UpgradeEnvelope {
    /// Whether a sample satisfies the whole envelope.
    pub fn admits(&self, bandwidth_mbps: f64, loss_pct: f64, min_rtt_ms: f64) -> bool {
        bandwidth_mbps > self.min_bandwidth_mbps
            && loss_pct < self.max_loss_pct
            && min_rtt_ms < self.max_rtt_ms
    }
}

/// Per-tier policy: the encoder preset plus the thresholds for leaving
/// the tier in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub preset: QualityPreset,
    /// `None` at the bottom video tier; the offline floor handles the
    /// drop to `Error`.
    pub downgrade: Option<DowngradeTrigger>,
    /// `None` at the ceiling.
    pub upgrade: Option<UpgradeEnvelope>,
}

/// The full tier ladder. `Error` has no policy of its own; upgrades
/// out of it go through `error_recovery`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub high: TierPolicy,
    pub medium: TierPolicy,
    pub low: TierPolicy,
    pub very_low: TierPolicy,
    /// Envelope for climbing out of `Error` back to `VeryLow`.
    pub error_recovery: UpgradeEnvelope,
}

impl TierTable {
    pub fn policy(&self, level: QualityLevel) -> Option<&TierPolicy> {
        match level {
            QualityLevel::High => Some(&self.high),
            QualityLevel::Medium => Some(&self.medium),
            QualityLevel::Low => Some(&self.low),
            QualityLevel::VeryLow => Some(&self.very_low),
            QualityLevel::Error => None,
        }
    }

    pub fn preset(&self, level: QualityLevel) -> Option<&QualityPreset> {
        self.policy(level).map(|p| &p.preset)
    }

    /// Bitrate the encoder is expected to produce at `level`. `Error`
    /// falls back to the bottom video preset for scoring purposes.
    pub fn target_bitrate_kbps(&self, level: QualityLevel) -> f64 {
        let preset = self.preset(level).unwrap_or(&self.very_low.preset);
        f64::from(preset.bitrate_kbps)
    }

    pub fn downgrade_trigger(&self, level: QualityLevel) -> Option<&DowngradeTrigger> {
        self.policy(level).and_then(|p| p.downgrade.as_ref())
    }

    /// Envelope governing an upgrade out of `level`.
    pub fn upgrade_envelope(&self, level: QualityLevel) -> Option<&UpgradeEnvelope> {
        match level {
            QualityLevel::Error => Some(&self.error_recovery),
            _ => self.policy(level).and_then(|p| p.upgrade.as_ref()),
        }
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            high: TierPolicy {
                preset: QualityPreset::new(1920, 1080, 30, 4500),
                downgrade: Some(DowngradeTrigger {
                    bandwidth_floor_mbps: 5.0,
                    loss_ceiling_pct: 2.0,
                    rtt_ceiling_ms: 400.0,
                }),
                upgrade: None,
            },
            medium: TierPolicy {
                preset: QualityPreset::new(1280, 720, 30, 2500),
                downgrade: Some(DowngradeTrigger {
                    bandwidth_floor_mbps: 3.0,
                    loss_ceiling_pct: 3.0,
                    rtt_ceiling_ms: 450.0,
                }),
                upgrade: Some(UpgradeEnvelope {
                    min_bandwidth_mbps: 7.0,
                    max_loss_pct: 0.5,
                    max_rtt_ms: 100.0,
                }),
            },
            low: TierPolicy {
                preset: QualityPreset::new(854, 480, 24, 1200),
                downgrade: Some(DowngradeTrigger {
                    bandwidth_floor_mbps: 1.5,
                    loss_ceiling_pct: 5.0,
                    rtt_ceiling_ms: 500.0,
                }),
                upgrade: Some(UpgradeEnvelope {
                    min_bandwidth_mbps: 4.5,
                    max_loss_pct: 0.5,
                    max_rtt_ms: 80.0,
                }),
            },
            very_low: TierPolicy {
                preset: QualityPreset::new(640, 360, 24, 600),
                downgrade: None,
                upgrade: Some(UpgradeEnvelope {
                    min_bandwidth_mbps: 2.5,
                    max_loss_pct: 1.0,
                    max_rtt_ms: 100.0,
                }),
            },
            error_recovery: UpgradeEnvelope {
                min_bandwidth_mbps: 1.0,
                max_loss_pct: 2.0,
                max_rtt_ms: 200.0,
            },
        }
    }
}

/// Weights for the composite health score. Defaults sum to 100 so the
/// score reads as a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    pub bitrate: f64,
    pub packet_loss: f64,
    pub rtt: f64,
    pub redundancy: f64,
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            bitrate: 40.0,
            packet_loss: 30.0,
            rtt: 20.0,
            redundancy: 10.0,
        }
    }
}

/// Linear credit curves for the loss and RTT score components: full
/// credit at or below `*_full_credit`, zero at or above `*_zero_credit`,
/// linear in between.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreditCurves {
    pub loss_full_credit_pct: f64,
    pub loss_zero_credit_pct: f64,
    pub rtt_full_credit_ms: f64,
    pub rtt_zero_credit_ms: f64,
}

impl Default for CreditCurves {
    fn default() -> Self {
        Self {
            loss_full_credit_pct: 1.0,
            loss_zero_credit_pct: 5.0,
            rtt_full_credit_ms: 100.0,
            rtt_zero_credit_ms: 500.0,
        }
    }
}

/// Everything the control core needs, fixed for the lifetime of the
/// loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Control loop cadence.
    pub tick_interval: Duration,
    /// A sample older than this counts as absent.
    pub staleness_window: Duration,
    /// Per-source fetch deadline within a tick.
    pub fetch_timeout: Duration,
    /// Consecutive ticks a candidate must persist before a transition
    /// is authorized.
    pub retry_attempts: u32,
    /// Skip the retry count and the recovery dwell on upgrades.
    pub instant_recovery: bool,
    /// How long offline conditions must persist before dropping to
    /// `Error`.
    pub offline_dwell: Duration,
    /// How long upgrade conditions must keep holding before a counted
    /// upgrade is confirmed.
    pub recovery_dwell: Duration,
    /// Below this aggregate bandwidth the link counts as offline.
    pub offline_floor_mbps: f64,
    /// Bitrate agreement ratio under which the two sources are flagged
    /// as diverging.
    pub divergence_tolerance: f64,
    /// Fraction of raw network bandwidth usable as video payload when
    /// estimating delivered bitrate without an ingest reading.
    pub bonded_efficiency: f64,
    pub initial_level: QualityLevel,
    pub weights: HealthWeights,
    pub curves: CreditCurves,
    pub tiers: TierTable,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            staleness_window: Duration::from_secs(6),
            fetch_timeout: Duration::from_millis(1500),
            retry_attempts: 5,
            instant_recovery: false,
            offline_dwell: Duration::from_secs(20),
            recovery_dwell: Duration::from_secs(60),
            offline_floor_mbps: 0.5,
            divergence_tolerance: 0.7,
            bonded_efficiency: 0.8,
            initial_level: QualityLevel::High,
            weights: HealthWeights::default(),
            curves: CreditCurves::default(),
            tiers: TierTable::default(),
        }
    }
}

impl ControlConfig {
    /// Startup validation. A config that fails here must never reach
    /// the control loop.
    pub fn validate(&self) -> Result<(), CoreError> {
        let t = &self.tiers;

        let bitrates = [
            t.high.preset.bitrate_kbps,
            t.medium.preset.bitrate_kbps,
            t.low.preset.bitrate_kbps,
            t.very_low.preset.bitrate_kbps,
        ];
        if !bitrates.windows(2).all(|w| w[0] > w[1]) {
            return Err(CoreError::Config(
                "preset bitrates must be strictly decreasing from HIGH to VERY_LOW".into(),
            ));
        }

        let floors: Vec<f64> = [&t.high, &t.medium, &t.low]
            .iter()
            .filter_map(|p| p.downgrade.map(|d| d.bandwidth_floor_mbps))
            .collect();
        if !floors.windows(2).all(|w| w[0] > w[1]) {
            return Err(CoreError::Config(
                "bandwidth floors must be strictly decreasing from HIGH to LOW".into(),
            ));
        }
        if floors.iter().any(|f| *f <= self.offline_floor_mbps) {
            return Err(CoreError::Config(
                "every tier bandwidth floor must sit above the offline floor".into(),
            ));
        }

        let ceilings: Vec<f64> = [&t.high, &t.medium, &t.low]
            .iter()
            .filter_map(|p| p.downgrade.map(|d| d.loss_ceiling_pct))
            .collect();
        if !ceilings.windows(2).all(|w| w[0] <= w[1]) {
            return Err(CoreError::Config(
                "loss ceilings must be non-decreasing from HIGH to LOW".into(),
            ));
        }

        for (policy, name) in [
            (&t.medium, "MEDIUM"),
            (&t.low, "LOW"),
            (&t.very_low, "VERY_LOW"),
        ] {
            if let (Some(up), Some(down)) = (&policy.upgrade, &policy.downgrade) {
                if up.min_bandwidth_mbps <= down.bandwidth_floor_mbps {
                    return Err(CoreError::Config(format!(
                        "{name} upgrade min bandwidth must exceed its downgrade floor"
                    )));
                }
            }
        }
        if t.error_recovery.min_bandwidth_mbps <= self.offline_floor_mbps {
            return Err(CoreError::Config(
                "error recovery min bandwidth must exceed the offline floor".into(),
            ));
        }

        if self.retry_attempts == 0 {
            return Err(CoreError::Config("retry_attempts must be at least 1".into()));
        }
        for (window, name) in [
            (self.tick_interval, "tick_interval"),
            (self.staleness_window, "staleness_window"),
            (self.fetch_timeout, "fetch_timeout"),
            (self.offline_dwell, "offline_dwell"),
            (self.recovery_dwell, "recovery_dwell"),
        ] {
            if window.is_zero() {
                return Err(CoreError::Config(format!("{name} must be non-zero")));
            }
        }
        if !(self.divergence_tolerance > 0.0 && self.divergence_tolerance <= 1.0) {
            return Err(CoreError::Config(
                "divergence_tolerance must be in (0, 1]".into(),
            ));
        }
        if !(self.bonded_efficiency > 0.0 && self.bonded_efficiency <= 1.0) {
            return Err(CoreError::Config(
                "bonded_efficiency must be in (0, 1]".into(),
            ));
        }
        if self.curves.loss_zero_credit_pct <= self.curves.loss_full_credit_pct
            || self.curves.rtt_zero_credit_ms <= self.curves.rtt_full_credit_ms
        {
            return Err(CoreError::Config(
                "credit curves must have zero-credit points above full-credit points".into(),
            ));
        }

        Ok(())
    }
}
