// Anti-flap wrapper between the aggregator and the state machine.
//
// A recommendation only becomes an authorization after it has
// persisted: ordinary changes must repeat for `retry_attempts`
// consecutive ticks, offline must persist for the offline dwell.
// Exactly one candidate is tracked at a time — a different candidate
// resets the previous count to zero, so a flapping signal never
// accumulates.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::aggregate::Recommendation;
use crate::config::ControlConfig;
use crate::model::level::QualityLevel;
use crate::model::transition::TransitionReason;

/// A change being counted toward authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Candidate {
    Downgrade(QualityLevel),
    Upgrade(QualityLevel),
}

/// A change the wrapper has cleared for the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Downgrade {
        target: QualityLevel,
        reason: TransitionReason,
    },
    /// Offline conditions persisted for the full dwell; drop to
    /// `Error` from wherever we are.
    Offline,
    /// Upgrade one step right now (`instant_recovery` mode).
    UpgradeInstant { target: QualityLevel },
    /// Upgrade one step after the machine's recovery dwell confirms.
    UpgradeViaRecovery { target: QualityLevel },
}

/// Read-only view of the wrapper's counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RetrySnapshot {
    pub candidate: Option<Candidate>,
    pub count: u32,
    pub offline_since: Option<DateTime<Utc>>,
}

pub struct RetryWrapper {
    attempts: u32,
    instant_recovery: bool,
    offline_dwell: Duration,
    candidate: Option<(Candidate, u32)>,
    offline_since: Option<DateTime<Utc>>,
}

impl RetryWrapper {
    pub fn new(config: &ControlConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            instant_recovery: config.instant_recovery,
            offline_dwell: config.offline_dwell,
            candidate: None,
            offline_since: None,
        }
    }

    /// Feed one tick's recommendation through the counters.
    pub fn evaluate(
        &mut self,
        recommendation: Option<&Recommendation>,
        current: QualityLevel,
        now: DateTime<Utc>,
    ) -> Option<Authorization> {
        let (target, reason) = match recommendation {
            // Stale telemetry or an informed hold: either way the
            // streak is broken.
            None | Some(Recommendation::Hold) => {
                self.reset();
                return None;
            }
            Some(Recommendation::Change { target, reason }) => (*target, *reason),
        };

        if reason == TransitionReason::Offline {
            return self.evaluate_offline(now);
        }
        self.offline_since = None;

        if target == current {
            self.reset();
            return None;
        }

        if target.is_worse_than(current) {
            let count = self.bump(Candidate::Downgrade(target));
            debug!(%target, count, attempts = self.attempts, "downgrade candidate");
            if count >= self.attempts {
                self.reset();
                return Some(Authorization::Downgrade { target, reason });
            }
            return None;
        }

        // Upgrades are clamped to exactly one step regardless of how
        // far the recommendation jumps.
        let Some(step) = current.step_up() else {
            self.reset();
            return None;
        };
        if self.instant_recovery {
            self.reset();
            return Some(Authorization::UpgradeInstant { target: step });
        }
        let count = self.bump(Candidate::Upgrade(step));
        debug!(target = %step, count, attempts = self.attempts, "upgrade candidate");
        if count >= self.attempts {
            self.reset();
            return Some(Authorization::UpgradeViaRecovery { target: step });
        }
        None
    }

    fn evaluate_offline(&mut self, now: DateTime<Utc>) -> Option<Authorization> {
        self.candidate = None;
        let since = *self.offline_since.get_or_insert(now);
        let streak = (now - since).to_std().unwrap_or_default();
        debug!(streak_secs = streak.as_secs(), "offline streak");
        if streak >= self.offline_dwell {
            self.reset();
            return Some(Authorization::Offline);
        }
        None
    }

    /// Increment the candidate's count, resetting first if the
    /// candidate changed.
    fn bump(&mut self, candidate: Candidate) -> u32 {
        let count = match self.candidate {
            Some((existing, count)) if existing == candidate => count + 1,
            _ => 1,
        };
        self.candidate = Some((candidate, count));
        count
    }

    fn reset(&mut self) {
        self.candidate = None;
        self.offline_since = None;
    }

    /// Clear all counters (used on manual overrides and resets).
    pub fn clear(&mut self) {
        self.reset();
    }

    pub fn snapshot(&self) -> RetrySnapshot {
        RetrySnapshot {
            candidate: self.candidate.map(|(c, _)| c),
            count: self.candidate.map_or(0, |(_, n)| n),
            offline_since: self.offline_since,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    use super::*;

    fn wrapper() -> RetryWrapper {
        RetryWrapper::new(&ControlConfig::default())
    }

    fn change(target: QualityLevel, reason: TransitionReason) -> Recommendation {
        Recommendation::Change { target, reason }
    }

    #[test]
    fn downgrade_authorized_on_the_fifth_consecutive_tick() {
        let mut retry = wrapper();
        let now = Utc::now();
        let rec = change(QualityLevel::VeryLow, TransitionReason::BandwidthLow);

        for tick in 1..5 {
            let auth = retry.evaluate(Some(&rec), QualityLevel::Low, now);
            assert_eq!(auth, None, "tick {tick}");
        }
        let auth = retry.evaluate(Some(&rec), QualityLevel::Low, now);
        assert_eq!(
            auth,
            Some(Authorization::Downgrade {
                target: QualityLevel::VeryLow,
                reason: TransitionReason::BandwidthLow,
            })
        );
        // Counters reset after authorization.
        assert_eq!(retry.snapshot().count, 0);
    }

    #[test]
    fn different_candidate_resets_the_count() {
        let mut retry = wrapper();
        let now = Utc::now();
        let down = change(QualityLevel::VeryLow, TransitionReason::BandwidthLow);
        let up = change(QualityLevel::Medium, TransitionReason::Recovered);

        for _ in 0..3 {
            assert_eq!(retry.evaluate(Some(&down), QualityLevel::Low, now), None);
        }
        assert_eq!(retry.snapshot().count, 3);

        // One upgrade recommendation wipes the downgrade streak.
        assert_eq!(retry.evaluate(Some(&up), QualityLevel::Low, now), None);
        assert_eq!(
            retry.snapshot().candidate,
            Some(Candidate::Upgrade(QualityLevel::Medium))
        );
        assert_eq!(retry.snapshot().count, 1);
    }

    #[test]
    fn hold_clears_counters() {
        let mut retry = wrapper();
        let now = Utc::now();
        let down = change(QualityLevel::VeryLow, TransitionReason::LossHigh);

        for _ in 0..4 {
            retry.evaluate(Some(&down), QualityLevel::Low, now);
        }
        retry.evaluate(Some(&Recommendation::Hold), QualityLevel::Low, now);
        assert_eq!(retry.snapshot().count, 0);

        // Back to square one: the next four downgrades still do not
        // authorize.
        for _ in 0..4 {
            assert_eq!(retry.evaluate(Some(&down), QualityLevel::Low, now), None);
        }
    }

    #[test]
    fn stale_telemetry_clears_counters() {
        let mut retry = wrapper();
        let now = Utc::now();
        let down = change(QualityLevel::Low, TransitionReason::BandwidthLow);

        for _ in 0..4 {
            retry.evaluate(Some(&down), QualityLevel::Medium, now);
        }
        retry.evaluate(None, QualityLevel::Medium, now);
        assert_eq!(retry.snapshot().count, 0);
    }

    #[test]
    fn offline_bypasses_counters_but_waits_out_the_dwell() {
        let mut retry = wrapper();
        let start = Utc::now();
        let offline = change(QualityLevel::Error, TransitionReason::Offline);

        assert_eq!(retry.evaluate(Some(&offline), QualityLevel::High, start), None);
        // 10 seconds in: still inside the 20s dwell.
        let mid = start + ChronoDuration::seconds(10);
        assert_eq!(retry.evaluate(Some(&offline), QualityLevel::High, mid), None);
        // Past the dwell: authorized regardless of retry_attempts.
        let late = start + ChronoDuration::seconds(20);
        assert_eq!(
            retry.evaluate(Some(&offline), QualityLevel::High, late),
            Some(Authorization::Offline)
        );
    }

    #[test]
    fn offline_streak_resets_on_recovery() {
        let mut retry = wrapper();
        let start = Utc::now();
        let offline = change(QualityLevel::Error, TransitionReason::Offline);

        retry.evaluate(Some(&offline), QualityLevel::High, start);
        retry.evaluate(Some(&Recommendation::Hold), QualityLevel::High, start);
        assert_eq!(retry.snapshot().offline_since, None);

        // A fresh offline streak starts over.
        let later = start + ChronoDuration::seconds(25);
        assert_eq!(
            retry.evaluate(Some(&offline), QualityLevel::High, later),
            None
        );
    }

    #[test]
    fn instant_recovery_authorizes_on_first_healthy_tick() {
        let config = ControlConfig {
            instant_recovery: true,
            ..ControlConfig::default()
        };
        let mut retry = RetryWrapper::new(&config);
        let now = Utc::now();
        let up = change(QualityLevel::Medium, TransitionReason::Recovered);

        assert_eq!(
            retry.evaluate(Some(&up), QualityLevel::Low, now),
            Some(Authorization::UpgradeInstant {
                target: QualityLevel::Medium
            })
        );
    }

    #[test]
    fn upgrades_clamp_to_one_step() {
        let mut retry = wrapper();
        let now = Utc::now();
        // Recommendation jumps all the way to High from VeryLow.
        let up = change(QualityLevel::High, TransitionReason::Recovered);

        for _ in 0..4 {
            retry.evaluate(Some(&up), QualityLevel::VeryLow, now);
        }
        let auth = retry.evaluate(Some(&up), QualityLevel::VeryLow, now);
        assert_eq!(
            auth,
            Some(Authorization::UpgradeViaRecovery {
                target: QualityLevel::Low
            })
        );
    }

    #[test]
    fn counted_upgrade_goes_via_recovery() {
        let mut retry = wrapper();
        let now = Utc::now();
        let up = change(QualityLevel::Medium, TransitionReason::Recovered);

        for _ in 0..4 {
            assert_eq!(retry.evaluate(Some(&up), QualityLevel::Low, now), None);
        }
        assert_eq!(
            retry.evaluate(Some(&up), QualityLevel::Low, now),
            Some(Authorization::UpgradeViaRecovery {
                target: QualityLevel::Medium
            })
        );
    }
}
