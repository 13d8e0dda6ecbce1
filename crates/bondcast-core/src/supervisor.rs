// Tick-driven control loop.
//
// One task owns everything mutable: the latest samples, the retry
// counters, and the state machine. Telemetry is fetched concurrently
// under per-source deadlines, but the decision pipeline runs strictly
// sequentially — tick N completes (including snapshot publication)
// before tick N+1 starts, and commands are consumed inside the same
// loop so the single-writer property holds.

use std::sync::Arc;

use arc_swap::ArcSwap;
use bondcast_telemetry::{Error as TelemetryError, IngestSample, NetworkSample, TelemetrySource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate::{MetricsAggregator, Recommendation};
use crate::config::ControlConfig;
use crate::error::CoreError;
use crate::machine::QualityStateMachine;
use crate::model::health::CompositeHealth;
use crate::model::level::{QualityLevel, QualityPreset};
use crate::model::transition::StateTransition;
use crate::retry::{RetrySnapshot, RetryWrapper};

const COMMAND_BUFFER: usize = 16;
const TRANSITION_BUFFER: usize = 64;

/// Operator commands consumed by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ForceLevel(QualityLevel),
    Reset,
}

/// Per-source polling diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceStatus {
    pub total_polls: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<bondcast_telemetry::ErrorKind>,
}

impl SourceStatus {
    fn record_success(&mut self, now: DateTime<Utc>) {
        self.total_polls += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        self.last_error = None;
    }

    fn record_failure(&mut self, error: &TelemetryError) {
        self.total_polls += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error.kind());
    }
}

/// Immutable snapshot of the whole control state, republished every
/// tick. Collaborators read it lock-free through the handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlSnapshot {
    pub level: QualityLevel,
    /// `None` at `Error` (audio-only).
    pub preset: Option<QualityPreset>,
    /// Target of an in-flight recovery, if any.
    pub recovering_to: Option<QualityLevel>,
    pub last_transition: Option<StateTransition>,
    pub health: CompositeHealth,
    pub retry: RetrySnapshot,
    pub network_source: SourceStatus,
    pub ingest_source: SourceStatus,
    pub tick: u64,
    pub updated_at: DateTime<Utc>,
}

struct Shared {
    snapshot: ArcSwap<ControlSnapshot>,
    health_tx: watch::Sender<CompositeHealth>,
    transitions: broadcast::Sender<StateTransition>,
    cancel: CancellationToken,
}

/// Cloneable handle for observing and steering the control loop.
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl ControlHandle {
    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<ControlSnapshot> {
        self.shared.snapshot.load_full()
    }

    /// Watch channel carrying each tick's health.
    pub fn health(&self) -> watch::Receiver<CompositeHealth> {
        self.shared.health_tx.subscribe()
    }

    /// Broadcast of authorized transitions.
    pub fn transitions(&self) -> broadcast::Receiver<StateTransition> {
        self.shared.transitions.subscribe()
    }

    /// Pin the level manually, bypassing hysteresis.
    pub async fn force_level(&self, level: QualityLevel) -> Result<(), CoreError> {
        self.commands
            .send(Command::ForceLevel(level))
            .await
            .map_err(|_| CoreError::ControlLoopClosed)
    }

    /// Return to the configured initial tier.
    pub async fn reset(&self) -> Result<(), CoreError> {
        self.commands
            .send(Command::Reset)
            .await
            .map_err(|_| CoreError::ControlLoopClosed)
    }

    /// Request graceful shutdown; `run()` returns after the current
    /// tick.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

/// The control loop itself, generic over its two telemetry feeds.
pub struct Supervisor<N, I>
where
    N: TelemetrySource<Sample = NetworkSample>,
    I: TelemetrySource<Sample = IngestSample>,
{
    config: Arc<ControlConfig>,
    network: N,
    ingest: I,
    aggregator: MetricsAggregator,
    retry: RetryWrapper,
    machine: QualityStateMachine,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    latest_network: Option<NetworkSample>,
    latest_ingest: Option<IngestSample>,
    network_status: SourceStatus,
    ingest_status: SourceStatus,
    last_health: CompositeHealth,
    tick: u64,
}

impl<N, I> Supervisor<N, I>
where
    N: TelemetrySource<Sample = NetworkSample>,
    I: TelemetrySource<Sample = IngestSample>,
{
    /// Validate the config and wire up the loop. The returned handle
    /// stays valid until `run()` exits.
    pub fn new(
        config: ControlConfig,
        network: N,
        ingest: I,
    ) -> Result<(Self, ControlHandle), CoreError> {
        config.validate()?;
        let config = Arc::new(config);
        let now = Utc::now();

        let initial = ControlSnapshot {
            level: config.initial_level,
            preset: config.tiers.preset(config.initial_level).copied(),
            recovering_to: None,
            last_transition: None,
            health: CompositeHealth::unknown(now),
            retry: RetryWrapper::new(&config).snapshot(),
            network_source: SourceStatus::default(),
            ingest_source: SourceStatus::default(),
            tick: 0,
            updated_at: now,
        };

        let (health_tx, _) = watch::channel(CompositeHealth::unknown(now));
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let shared = Arc::new(Shared {
            snapshot: ArcSwap::from_pointee(initial),
            health_tx,
            transitions,
            cancel: CancellationToken::new(),
        });
        let handle = ControlHandle {
            shared: Arc::clone(&shared),
            commands: command_tx,
        };

        let supervisor = Self {
            aggregator: MetricsAggregator::new(Arc::clone(&config)),
            retry: RetryWrapper::new(&config),
            machine: QualityStateMachine::new(&config),
            config,
            network,
            ingest,
            shared,
            commands: command_rx,
            latest_network: None,
            latest_ingest: None,
            network_status: SourceStatus::default(),
            ingest_status: SourceStatus::default(),
            last_health: CompositeHealth::unknown(now),
            tick: 0,
        };
        Ok((supervisor, handle))
    }

    /// Drive the loop until cancelled. Strictly sequential: a tick
    /// either completes in full or (on cancellation mid-fetch) is
    /// discarded in full.
    pub async fn run(mut self) {
        let cancel = self.shared.cancel.clone();
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval = ?self.config.tick_interval,
            initial = %self.config.initial_level,
            "control loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("control loop shutting down");
                    return;
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                }
                _ = ticker.tick() => {
                    // A cancel mid-fetch discards the tick entirely.
                    let cancelled = tokio::select! {
                        biased;
                        () = cancel.cancelled() => true,
                        () = self.poll_sources() => false,
                    };
                    if cancelled {
                        info!("control loop shutting down");
                        return;
                    }
                    self.advance(Utc::now());
                }
            }
        }
    }

    /// Fetch both sources concurrently, each under its own deadline.
    /// Failures are isolated: the other source's result still lands,
    /// and the previous sample stays until it ages out.
    async fn poll_sources(&mut self) {
        let deadline = self.config.fetch_timeout;
        #[allow(clippy::cast_possible_truncation)]
        let timeout_ms = deadline.as_millis() as u64;

        let (net, ing) = tokio::join!(
            tokio::time::timeout(deadline, self.network.fetch()),
            tokio::time::timeout(deadline, self.ingest.fetch()),
        );
        let now = Utc::now();

        match flatten(net, timeout_ms) {
            Ok(sample) => {
                self.network_status.record_success(now);
                self.latest_network = Some(sample);
            }
            Err(err) => {
                self.network_status.record_failure(&err);
                warn!(source = "network", %err, "telemetry fetch failed");
            }
        }
        match flatten(ing, timeout_ms) {
            Ok(sample) => {
                self.ingest_status.record_success(now);
                self.latest_ingest = Some(sample);
            }
            Err(err) => {
                self.ingest_status.record_failure(&err);
                warn!(source = "ingest", %err, "telemetry fetch failed");
            }
        }
    }

    /// The pure decision pipeline for one tick. No awaits.
    fn advance(&mut self, now: DateTime<Utc>) {
        self.tick += 1;
        let current = self.machine.level();

        let outcome = self.aggregator.aggregate(
            self.latest_network.as_ref(),
            self.latest_ingest.as_ref(),
            current,
            now,
        );

        let mut transition = match self
            .retry
            .evaluate(outcome.recommendation.as_ref(), current, now)
        {
            Some(auth) => match self.machine.apply(&auth, now) {
                Ok(t) => t,
                Err(err) => {
                    warn!(%err, "authorization rejected");
                    None
                }
            },
            None => None,
        };

        if transition.is_none() {
            let holds = recovery_holds(outcome.recommendation.as_ref(), self.machine.level());
            transition = self.machine.update_recovery(holds, now);
        }

        self.last_health = outcome.health;
        self.publish(transition, now);
    }

    fn handle_command(&mut self, command: Command) {
        let now = Utc::now();
        info!(?command, "operator command");
        self.retry.clear();
        let transition = match command {
            Command::ForceLevel(level) => self.machine.force(level, now),
            Command::Reset => self.machine.reset(now),
        };
        self.publish(transition, now);
    }

    fn publish(&mut self, transition: Option<StateTransition>, now: DateTime<Utc>) {
        let level = self.machine.level();
        let snapshot = ControlSnapshot {
            level,
            preset: self.config.tiers.preset(level).copied(),
            recovering_to: self.machine.recovery().map(|m| m.target),
            last_transition: self.machine.last_transition().cloned(),
            health: self.last_health.clone(),
            retry: self.retry.snapshot(),
            network_source: self.network_status.clone(),
            ingest_source: self.ingest_status.clone(),
            tick: self.tick,
            updated_at: now,
        };
        debug!(
            tick = snapshot.tick,
            %level,
            score = snapshot.health.score,
            "snapshot published"
        );
        self.shared.snapshot.store(Arc::new(snapshot));
        self.shared.health_tx.send_replace(self.last_health.clone());
        if let Some(event) = transition {
            // Nobody listening is fine.
            let _ = self.shared.transitions.send(event);
        }
    }
}

/// Whether this tick's telemetry still supports an in-flight recovery:
/// the aggregator must still be recommending a climb. Stale telemetry,
/// a hold, or any downward pressure aborts the dwell.
fn recovery_holds(recommendation: Option<&Recommendation>, current: QualityLevel) -> bool {
    matches!(
        recommendation,
        Some(Recommendation::Change { target, .. }) if target.is_better_than(current)
    )
}

fn flatten<T>(
    result: Result<Result<T, TelemetryError>, tokio::time::error::Elapsed>,
    timeout_ms: u64,
) -> Result<T, TelemetryError> {
    match result {
        Ok(inner) => inner,
        Err(_) => Err(TelemetryError::Timeout { timeout_ms }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_holds_only_on_upward_recommendations() {
        let up = Recommendation::Change {
            target: QualityLevel::Medium,
            reason: crate::model::transition::TransitionReason::Recovered,
        };
        let down = Recommendation::Change {
            target: QualityLevel::VeryLow,
            reason: crate::model::transition::TransitionReason::BandwidthLow,
        };

        assert!(recovery_holds(Some(&up), QualityLevel::Low));
        assert!(!recovery_holds(Some(&down), QualityLevel::Low));
        assert!(!recovery_holds(Some(&Recommendation::Hold), QualityLevel::Low));
        assert!(!recovery_holds(None, QualityLevel::Low));
    }
}
