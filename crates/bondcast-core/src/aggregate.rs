// Dual-source metrics aggregation.
//
// Pure per-tick computation: takes whatever samples are on hand, the
// current level, and a timestamp, and produces a health observation
// plus a raw recommendation. All hysteresis lives downstream in the
// retry wrapper; this module reacts to every tick's numbers directly.

use std::sync::Arc;

use bondcast_telemetry::{IngestSample, NetworkSample};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::ControlConfig;
use crate::model::health::{CompositeHealth, HealthBreakdown, HealthStatus, SourceKind};
use crate::model::level::QualityLevel;
use crate::model::transition::TransitionReason;

/// What the current tick's telemetry says the level should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Recommendation {
    /// Conditions neither force a drop nor admit a climb.
    Hold,
    Change {
        target: QualityLevel,
        reason: TransitionReason,
    },
}

/// One tick's aggregation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateOutcome {
    pub health: CompositeHealth,
    /// `None` when both sources are stale — distinct from
    /// [`Recommendation::Hold`], which is an informed "stay put".
    pub recommendation: Option<Recommendation>,
}

/// Stateless aggregator over the two telemetry feeds.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    config: Arc<ControlConfig>,
}

impl MetricsAggregator {
    pub fn new(config: Arc<ControlConfig>) -> Self {
        Self { config }
    }

    /// Compute health and a recommendation from the freshest available
    /// telemetry. Deterministic: identical inputs yield identical
    /// outcomes.
    pub fn aggregate(
        &self,
        network: Option<&NetworkSample>,
        ingest: Option<&IngestSample>,
        current: QualityLevel,
        now: DateTime<Utc>,
    ) -> AggregateOutcome {
        let window = self.config.staleness_window;
        let network = network.filter(|s| s.age(now) <= window);
        let ingest = ingest.filter(|s| s.age(now) <= window);

        let primary_source = match (network, ingest) {
            (Some(_), Some(_)) => SourceKind::Both,
            (Some(_), None) => SourceKind::Network,
            (None, Some(_)) => SourceKind::Ingest,
            (None, None) => SourceKind::Neither,
        };

        if primary_source == SourceKind::Neither {
            debug!("both telemetry sources stale, holding");
            return AggregateOutcome {
                health: CompositeHealth::unknown(now),
                recommendation: None,
            };
        }

        let breakdown = self.score(network, ingest, current);
        let raw = breakdown.bitrate + breakdown.packet_loss + breakdown.rtt + breakdown.redundancy;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let score = raw.round().clamp(0.0, 100.0) as u8;

        let divergence = self.divergence(network, ingest);
        let health = CompositeHealth {
            score,
            status: HealthStatus::from_score(score),
            divergence,
            primary_source,
            breakdown,
            computed_at: now,
        };

        let recommendation = self.recommend(network, ingest, current);
        AggregateOutcome {
            health,
            recommendation: Some(recommendation),
        }
    }

    /// Weighted component scores. An absent source's components earn
    /// half weight so a single dead feed degrades the score instead of
    /// zeroing it.
    fn score(
        &self,
        network: Option<&NetworkSample>,
        ingest: Option<&IngestSample>,
        current: QualityLevel,
    ) -> HealthBreakdown {
        let weights = &self.config.weights;
        let curves = &self.config.curves;
        let target_kbps = self.config.tiers.target_bitrate_kbps(current);

        let bitrate = match (ingest, network) {
            (Some(ing), _) => {
                let credit = (ing.bitrate_kbps / target_kbps).clamp(0.0, 1.0);
                credit * weights.bitrate
            }
            (None, Some(net)) => {
                // Estimate delivered bitrate from raw link capacity.
                let estimated_kbps = net.bandwidth_mbps * 1000.0 * self.config.bonded_efficiency;
                let credit = (estimated_kbps / target_kbps).clamp(0.0, 1.0);
                credit * weights.bitrate * 0.5
            }
            (None, None) => 0.0,
        };

        let (packet_loss, rtt, redundancy) = match network {
            Some(net) => {
                let loss_credit = linear_credit(
                    net.packet_loss_pct,
                    curves.loss_full_credit_pct,
                    curves.loss_zero_credit_pct,
                );
                let rtt_credit =
                    linear_credit(net.rtt_ms, curves.rtt_full_credit_ms, curves.rtt_zero_credit_ms);
                let redundancy_credit = match net.active_uplinks {
                    0 => 0.0,
                    1 => 0.5,
                    _ => 1.0,
                };
                (
                    loss_credit * weights.packet_loss,
                    rtt_credit * weights.rtt,
                    redundancy_credit * weights.redundancy,
                )
            }
            None => (
                weights.packet_loss * 0.5,
                weights.rtt * 0.5,
                weights.redundancy * 0.5,
            ),
        };

        HealthBreakdown {
            bitrate,
            packet_loss,
            rtt,
            redundancy,
        }
    }

    /// Both sources fresh and their bitrate readings disagree beyond
    /// the tolerance ratio. Flags a local encoder/uplink problem; it
    /// never forces a transition by itself.
    fn divergence(&self, network: Option<&NetworkSample>, ingest: Option<&IngestSample>) -> bool {
        let (Some(net), Some(ing)) = (network, ingest) else {
            return false;
        };
        if !ing.connected {
            return false;
        }
        let net_kbps = net.bandwidth_mbps * 1000.0 * self.config.bonded_efficiency;
        let ing_kbps = ing.bitrate_kbps;
        if net_kbps <= 0.0 || ing_kbps <= 0.0 {
            return false;
        }
        let ratio = net_kbps.min(ing_kbps) / net_kbps.max(ing_kbps);
        ratio < self.config.divergence_tolerance
    }

    /// Raw threshold evaluation against the current tier.
    fn recommend(
        &self,
        network: Option<&NetworkSample>,
        ingest: Option<&IngestSample>,
        current: QualityLevel,
    ) -> Recommendation {
        // Offline checks first; they outrank everything.
        if let Some(net) = network {
            if net.active_uplinks == 0 || net.bandwidth_mbps < self.config.offline_floor_mbps {
                return offline_or_hold(current);
            }
        }
        if let Some(ing) = ingest {
            if !ing.connected {
                return offline_or_hold(current);
            }
        }

        // Tier thresholds need the network feed; without it, hold.
        let Some(net) = network else {
            return Recommendation::Hold;
        };

        if let Some(trigger) = self.config.tiers.downgrade_trigger(current) {
            let reason = if net.packet_loss_pct > trigger.loss_ceiling_pct {
                Some(TransitionReason::LossHigh)
            } else if net.bandwidth_mbps < trigger.bandwidth_floor_mbps {
                Some(TransitionReason::BandwidthLow)
            } else if net.max_rtt_ms > trigger.rtt_ceiling_ms {
                Some(TransitionReason::RttHigh)
            } else {
                None
            };
            if let (Some(reason), Some(target)) = (reason, current.step_down()) {
                return Recommendation::Change { target, reason };
            }
        }

        if let (Some(envelope), Some(target)) = (
            self.config.tiers.upgrade_envelope(current),
            current.step_up(),
        ) {
            if envelope.admits(net.bandwidth_mbps, net.packet_loss_pct, net.min_rtt_ms) {
                return Recommendation::Change {
                    target,
                    reason: TransitionReason::Recovered,
                };
            }
        }

        Recommendation::Hold
    }
}

fn linear_credit(value: f64, full_at: f64, zero_at: f64) -> f64 {
    if value <= full_at {
        1.0
    } else if value >= zero_at {
        0.0
    } else {
        (zero_at - value) / (zero_at - full_at)
    }
}

fn offline_or_hold(current: QualityLevel) -> Recommendation {
    if current == QualityLevel::Error {
        Recommendation::Hold
    } else {
        Recommendation::Change {
            target: QualityLevel::Error,
            reason: TransitionReason::Offline,
        }
    }
}
