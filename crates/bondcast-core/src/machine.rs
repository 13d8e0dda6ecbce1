// Quality state machine.
//
// Holds the current level plus an optional in-flight recovery marker.
// The machine only ever moves when handed an authorization, and it
// enforces adjacency: ordinary transitions move exactly one step, only
// the offline drop and manual overrides may jump.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ControlConfig;
use crate::model::level::QualityLevel;
use crate::model::transition::{StateTransition, TransitionReason};
use crate::retry::Authorization;

/// Rejected authorization. The caller logs it and carries on; state
/// never changes on rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("target {target} is not adjacent to {current}")]
    NotAdjacent {
        current: QualityLevel,
        target: QualityLevel,
    },
    #[error("already at the best level")]
    AtCeiling,
}

/// An upgrade waiting out its confirmation dwell. The current level
/// stays in force until the marker matures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryMarker {
    pub target: QualityLevel,
    pub entered_at: DateTime<Utc>,
}

pub struct QualityStateMachine {
    initial: QualityLevel,
    recovery_dwell: Duration,
    level: QualityLevel,
    recovery: Option<RecoveryMarker>,
    last_transition: Option<StateTransition>,
}

impl QualityStateMachine {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            initial: config.initial_level,
            recovery_dwell: config.recovery_dwell,
            level: config.initial_level,
            recovery: None,
            last_transition: None,
        }
    }

    pub fn level(&self) -> QualityLevel {
        self.level
    }

    pub fn recovery(&self) -> Option<&RecoveryMarker> {
        self.recovery.as_ref()
    }

    pub fn last_transition(&self) -> Option<&StateTransition> {
        self.last_transition.as_ref()
    }

    /// Execute an authorization. `Ok(None)` means the authorization
    /// was accepted but produced no transition yet (recovery entry, or
    /// an offline drop while already at `Error`).
    pub fn apply(
        &mut self,
        auth: &Authorization,
        now: DateTime<Utc>,
    ) -> Result<Option<StateTransition>, TransitionError> {
        match *auth {
            Authorization::Downgrade { target, reason } => {
                if self.level.step_down() != Some(target) {
                    return Err(TransitionError::NotAdjacent {
                        current: self.level,
                        target,
                    });
                }
                self.cancel_recovery("downgrade authorized");
                Ok(Some(self.transition(target, reason, now)))
            }
            Authorization::Offline => {
                self.cancel_recovery("link offline");
                if self.level == QualityLevel::Error {
                    return Ok(None);
                }
                Ok(Some(self.transition(
                    QualityLevel::Error,
                    TransitionReason::Offline,
                    now,
                )))
            }
            Authorization::UpgradeInstant { target } => {
                let step = self.level.step_up().ok_or(TransitionError::AtCeiling)?;
                if target != step {
                    return Err(TransitionError::NotAdjacent {
                        current: self.level,
                        target,
                    });
                }
                self.cancel_recovery("instant upgrade authorized");
                Ok(Some(self.transition(step, TransitionReason::Recovered, now)))
            }
            Authorization::UpgradeViaRecovery { target } => {
                let step = self.level.step_up().ok_or(TransitionError::AtCeiling)?;
                if target != step {
                    return Err(TransitionError::NotAdjacent {
                        current: self.level,
                        target,
                    });
                }
                // Idempotent: re-authorizing the same target keeps the
                // original dwell clock.
                if self.recovery.is_none_or(|m| m.target != step) {
                    debug!(target = %step, "entering recovery");
                    self.recovery = Some(RecoveryMarker {
                        target: step,
                        entered_at: now,
                    });
                }
                Ok(None)
            }
        }
    }

    /// Advance an in-flight recovery. `holds` reports whether this
    /// tick's telemetry still supports the upgrade; any wobble aborts
    /// and the dwell starts over on the next authorization.
    pub fn update_recovery(&mut self, holds: bool, now: DateTime<Utc>) -> Option<StateTransition> {
        let marker = self.recovery?;
        if !holds {
            self.cancel_recovery("conditions no longer hold");
            return None;
        }
        let elapsed = (now - marker.entered_at).to_std().unwrap_or_default();
        if elapsed < self.recovery_dwell {
            return None;
        }
        self.recovery = None;
        Some(self.transition(marker.target, TransitionReason::Recovered, now))
    }

    /// Operator override: any jump allowed.
    pub fn force(&mut self, target: QualityLevel, now: DateTime<Utc>) -> Option<StateTransition> {
        self.cancel_recovery("manual override");
        if target == self.level {
            return None;
        }
        Some(self.transition(target, TransitionReason::ManualOverride, now))
    }

    /// Return to the configured initial tier (session restart).
    pub fn reset(&mut self, now: DateTime<Utc>) -> Option<StateTransition> {
        self.force(self.initial, now)
    }

    fn transition(
        &mut self,
        to: QualityLevel,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> StateTransition {
        let event = StateTransition {
            from: self.level,
            to,
            reason,
            occurred_at: now,
        };
        info!(from = %event.from, to = %event.to, %reason, "quality transition");
        self.level = to;
        self.last_transition = Some(event.clone());
        event
    }

    fn cancel_recovery(&mut self, why: &str) {
        if let Some(marker) = self.recovery.take() {
            debug!(target = %marker.target, why, "recovery aborted");
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    use super::*;

    fn machine() -> QualityStateMachine {
        QualityStateMachine::new(&ControlConfig::default())
    }

    fn machine_at(level: QualityLevel) -> QualityStateMachine {
        let config = ControlConfig {
            initial_level: level,
            ..ControlConfig::default()
        };
        QualityStateMachine::new(&config)
    }

    #[test]
    fn downgrade_moves_one_step() {
        let mut m = machine();
        let now = Utc::now();

        let t = m
            .apply(
                &Authorization::Downgrade {
                    target: QualityLevel::Medium,
                    reason: TransitionReason::LossHigh,
                },
                now,
            )
            .unwrap()
            .unwrap();

        assert_eq!(t.from, QualityLevel::High);
        assert_eq!(t.to, QualityLevel::Medium);
        assert_eq!(m.level(), QualityLevel::Medium);
    }

    #[test]
    fn non_adjacent_downgrade_rejected_without_state_change() {
        let mut m = machine();
        let now = Utc::now();

        let result = m.apply(
            &Authorization::Downgrade {
                target: QualityLevel::VeryLow,
                reason: TransitionReason::BandwidthLow,
            },
            now,
        );

        assert_eq!(
            result,
            Err(TransitionError::NotAdjacent {
                current: QualityLevel::High,
                target: QualityLevel::VeryLow,
            })
        );
        assert_eq!(m.level(), QualityLevel::High);
    }

    #[test]
    fn offline_reaches_error_from_any_level() {
        let now = Utc::now();
        for start in [
            QualityLevel::High,
            QualityLevel::Medium,
            QualityLevel::Low,
            QualityLevel::VeryLow,
        ] {
            let mut m = machine_at(start);
            let t = m.apply(&Authorization::Offline, now).unwrap().unwrap();
            assert_eq!(t.to, QualityLevel::Error);
            assert_eq!(t.reason, TransitionReason::Offline);
        }
    }

    #[test]
    fn offline_at_error_is_a_no_op() {
        let mut m = machine_at(QualityLevel::Error);
        let now = Utc::now();

        assert_eq!(m.apply(&Authorization::Offline, now), Ok(None));
        assert_eq!(m.level(), QualityLevel::Error);
    }

    #[test]
    fn instant_upgrade_rejected_at_ceiling() {
        let mut m = machine();
        let now = Utc::now();

        let result = m.apply(
            &Authorization::UpgradeInstant {
                target: QualityLevel::High,
            },
            now,
        );

        assert_eq!(result, Err(TransitionError::AtCeiling));
    }

    #[test]
    fn recovery_confirms_after_the_dwell() {
        let mut m = machine_at(QualityLevel::Low);
        let start = Utc::now();

        let entered = m
            .apply(
                &Authorization::UpgradeViaRecovery {
                    target: QualityLevel::Medium,
                },
                start,
            )
            .unwrap();
        assert_eq!(entered, None);
        assert_eq!(m.level(), QualityLevel::Low, "level holds during recovery");

        // Mid-dwell: nothing yet.
        let mid = start + ChronoDuration::seconds(30);
        assert_eq!(m.update_recovery(true, mid), None);

        // Dwell complete: the upgrade lands.
        let done = start + ChronoDuration::seconds(60);
        let t = m.update_recovery(true, done).unwrap();
        assert_eq!(t.to, QualityLevel::Medium);
        assert_eq!(t.reason, TransitionReason::Recovered);
        assert_eq!(m.recovery(), None);
    }

    #[test]
    fn recovery_aborts_when_conditions_wobble() {
        let mut m = machine_at(QualityLevel::Low);
        let start = Utc::now();

        m.apply(
            &Authorization::UpgradeViaRecovery {
                target: QualityLevel::Medium,
            },
            start,
        )
        .unwrap();

        assert_eq!(m.update_recovery(false, start), None);
        assert_eq!(m.recovery(), None);
        assert_eq!(m.level(), QualityLevel::Low);
    }

    #[test]
    fn reauthorizing_recovery_keeps_the_original_clock() {
        let mut m = machine_at(QualityLevel::Low);
        let start = Utc::now();
        let auth = Authorization::UpgradeViaRecovery {
            target: QualityLevel::Medium,
        };

        m.apply(&auth, start).unwrap();
        m.apply(&auth, start + ChronoDuration::seconds(30)).unwrap();

        assert_eq!(m.recovery().unwrap().entered_at, start);
    }

    #[test]
    fn downgrade_cancels_recovery() {
        let mut m = machine_at(QualityLevel::Low);
        let now = Utc::now();

        m.apply(
            &Authorization::UpgradeViaRecovery {
                target: QualityLevel::Medium,
            },
            now,
        )
        .unwrap();
        m.apply(
            &Authorization::Downgrade {
                target: QualityLevel::VeryLow,
                reason: TransitionReason::BandwidthLow,
            },
            now,
        )
        .unwrap();

        assert_eq!(m.recovery(), None);
        assert_eq!(m.level(), QualityLevel::VeryLow);
    }

    #[test]
    fn force_allows_any_jump_and_reset_returns_to_initial() {
        let mut m = machine();
        let now = Utc::now();

        let t = m.force(QualityLevel::VeryLow, now).unwrap();
        assert_eq!(t.reason, TransitionReason::ManualOverride);
        assert_eq!(m.level(), QualityLevel::VeryLow);

        let back = m.reset(now).unwrap();
        assert_eq!(back.to, QualityLevel::High);
    }

    #[test]
    fn error_climbs_back_via_recovery() {
        let mut m = machine_at(QualityLevel::Error);
        let start = Utc::now();

        m.apply(
            &Authorization::UpgradeViaRecovery {
                target: QualityLevel::VeryLow,
            },
            start,
        )
        .unwrap();
        let done = start + ChronoDuration::seconds(60);
        let t = m.update_recovery(true, done).unwrap();

        assert_eq!(t.from, QualityLevel::Error);
        assert_eq!(t.to, QualityLevel::VeryLow);
    }
}
