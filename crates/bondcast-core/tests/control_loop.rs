#![allow(clippy::unwrap_used)]
// End-to-end control loop tests with scripted telemetry sources and
// paused tokio time.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;

use bondcast_core::{ControlConfig, HealthStatus, QualityLevel, Supervisor, TransitionReason};
use bondcast_telemetry::{Error, IngestSample, NetworkSample, TelemetrySource};

// ── Scripted sources ────────────────────────────────────────────────
//
// Each fetch pops the next scripted entry; when the script runs out
// the last entry repeats. Samples are stamped at fetch time so they
// are always fresh.

enum Step {
    Network { bw: f64, loss: f64, rtt: f64, uplinks: u32 },
    Ingest { kbps: f64, connected: bool },
    Fail,
}

struct Scripted {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
}

impl Scripted {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
        }
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(step) = steps.pop_front() {
            *last = Some(copy_step(&step));
            step
        } else {
            last.as_ref().map_or(Step::Fail, copy_step)
        }
    }
}

fn copy_step(step: &Step) -> Step {
    match *step {
        Step::Network { bw, loss, rtt, uplinks } => Step::Network { bw, loss, rtt, uplinks },
        Step::Ingest { kbps, connected } => Step::Ingest { kbps, connected },
        Step::Fail => Step::Fail,
    }
}

struct NetworkScript(Scripted);

impl TelemetrySource for NetworkScript {
    type Sample = NetworkSample;

    async fn fetch(&self) -> Result<NetworkSample, Error> {
        match self.0.next_step() {
            Step::Network { bw, loss, rtt, uplinks } => Ok(NetworkSample {
                bandwidth_mbps: bw,
                packet_loss_pct: loss,
                rtt_ms: rtt,
                min_rtt_ms: rtt,
                max_rtt_ms: rtt,
                active_uplinks: uplinks,
                captured_at: Utc::now(),
            }),
            _ => Err(Error::Parse {
                message: "scripted failure".into(),
            }),
        }
    }
}

struct IngestScript(Scripted);

impl TelemetrySource for IngestScript {
    type Sample = IngestSample;

    async fn fetch(&self) -> Result<IngestSample, Error> {
        match self.0.next_step() {
            Step::Ingest { kbps, connected } => Ok(IngestSample {
                bitrate_kbps: kbps,
                frame_rate: 30.0,
                dropped_frames: 0,
                connected,
                captured_at: Utc::now(),
            }),
            _ => Err(Error::Parse {
                message: "scripted failure".into(),
            }),
        }
    }
}

fn good_network() -> Step {
    Step::Network { bw: 9.0, loss: 0.2, rtt: 45.0, uplinks: 2 }
}

fn bad_network() -> Step {
    // Below the MEDIUM floor but above the offline floor.
    Step::Network { bw: 2.0, loss: 0.3, rtt: 60.0, uplinks: 2 }
}

fn good_ingest() -> Step {
    Step::Ingest { kbps: 2450.0, connected: true }
}

fn repeat(step: fn() -> Step, n: usize) -> Vec<Step> {
    (0..n).map(|_| step()).collect()
}

fn test_config() -> ControlConfig {
    ControlConfig {
        retry_attempts: 3,
        ..ControlConfig::default()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn persistent_degradation_causes_one_downgrade() {
    let config = ControlConfig {
        initial_level: QualityLevel::Medium,
        ..test_config()
    };
    let network = NetworkScript(Scripted::new(repeat(bad_network, 20)));
    let ingest = IngestScript(Scripted::new(repeat(good_ingest, 20)));

    let (supervisor, handle) = Supervisor::new(config, network, ingest).unwrap();
    let mut transitions = handle.transitions();
    let task = tokio::spawn(supervisor.run());

    let event = timeout(Duration::from_secs(30), transitions.recv())
        .await
        .expect("transition within 30s of virtual time")
        .unwrap();

    assert_eq!(event.from, QualityLevel::Medium);
    assert_eq!(event.to, QualityLevel::Low);
    assert_eq!(event.reason, TransitionReason::BandwidthLow);

    // Exactly one transition: the next window must come up empty while
    // conditions stay merely "bad for MEDIUM" (fine for LOW).
    let second = timeout(Duration::from_secs(20), transitions.recv()).await;
    assert!(second.is_err(), "unexpected second transition: {second:?}");

    assert_eq!(handle.snapshot().level, QualityLevel::Low);
    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn brief_blip_does_not_transition() {
    let config = ControlConfig {
        initial_level: QualityLevel::Medium,
        ..test_config()
    };
    // Two bad ticks, then healthy again — under the 3-attempt bar.
    let mut steps = repeat(bad_network, 2);
    steps.extend(repeat(good_network, 20));
    let network = NetworkScript(Scripted::new(steps));
    let ingest = IngestScript(Scripted::new(repeat(good_ingest, 22)));

    let (supervisor, handle) = Supervisor::new(config, network, ingest).unwrap();
    let mut transitions = handle.transitions();
    let task = tokio::spawn(supervisor.run());

    let result = timeout(Duration::from_secs(20), transitions.recv()).await;
    assert!(result.is_err(), "no transition expected, got {result:?}");
    assert_eq!(handle.snapshot().level, QualityLevel::Medium);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn instant_recovery_upgrades_on_first_healthy_window() {
    let config = ControlConfig {
        initial_level: QualityLevel::Low,
        instant_recovery: true,
        ..test_config()
    };
    // 9 Mbps / 0.2% / 45ms clears the LOW upgrade envelope.
    let network = NetworkScript(Scripted::new(repeat(good_network, 10)));
    let ingest = IngestScript(Scripted::new(repeat(good_ingest, 10)));

    let (supervisor, handle) = Supervisor::new(config, network, ingest).unwrap();
    let mut transitions = handle.transitions();
    let task = tokio::spawn(supervisor.run());

    let event = timeout(Duration::from_secs(10), transitions.recv())
        .await
        .expect("immediate upgrade")
        .unwrap();

    assert_eq!(event.from, QualityLevel::Low);
    assert_eq!(event.to, QualityLevel::Medium);
    assert_eq!(event.reason, TransitionReason::Recovered);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn upgrades_never_jump_even_when_conditions_are_excellent() {
    let config = ControlConfig {
        initial_level: QualityLevel::VeryLow,
        instant_recovery: true,
        ..test_config()
    };
    let network = NetworkScript(Scripted::new(repeat(good_network, 10)));
    let ingest = IngestScript(Scripted::new(repeat(good_ingest, 10)));

    let (supervisor, handle) = Supervisor::new(config, network, ingest).unwrap();
    let mut transitions = handle.transitions();
    let task = tokio::spawn(supervisor.run());

    let first = timeout(Duration::from_secs(10), transitions.recv())
        .await
        .expect("first upgrade")
        .unwrap();
    assert_eq!(first.from, QualityLevel::VeryLow);
    assert_eq!(first.to, QualityLevel::Low, "one step at a time");

    let second = timeout(Duration::from_secs(10), transitions.recv())
        .await
        .expect("second upgrade")
        .unwrap();
    assert_eq!(second.from, QualityLevel::Low);
    assert_eq!(second.to, QualityLevel::Medium);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn ingest_failures_do_not_cause_spurious_downgrades() {
    let config = ControlConfig {
        initial_level: QualityLevel::Medium,
        ..test_config()
    };
    let network = NetworkScript(Scripted::new(repeat(good_network, 20)));
    // Ingest adapter down the whole time.
    let ingest = IngestScript(Scripted::new(vec![Step::Fail]));

    let (supervisor, handle) = Supervisor::new(config, network, ingest).unwrap();
    let mut transitions = handle.transitions();
    let task = tokio::spawn(supervisor.run());

    let result = timeout(Duration::from_secs(20), transitions.recv()).await;
    assert!(result.is_err(), "no transition expected, got {result:?}");

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.level, QualityLevel::Medium);
    assert!(snapshot.ingest_source.consecutive_failures >= 3);
    assert_eq!(snapshot.network_source.consecutive_failures, 0);
    // Network-only scoring still produces a usable health figure.
    assert_ne!(snapshot.health.status, HealthStatus::Unknown);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn manual_override_jumps_and_clears_counters() {
    let config = ControlConfig {
        initial_level: QualityLevel::High,
        ..test_config()
    };
    let network = NetworkScript(Scripted::new(repeat(good_network, 20)));
    let ingest = IngestScript(Scripted::new(repeat(good_ingest, 20)));

    let (supervisor, handle) = Supervisor::new(config, network, ingest).unwrap();
    let mut transitions = handle.transitions();
    let task = tokio::spawn(supervisor.run());

    handle.force_level(QualityLevel::VeryLow).await.unwrap();

    let event = timeout(Duration::from_secs(10), transitions.recv())
        .await
        .expect("override transition")
        .unwrap();
    assert_eq!(event.to, QualityLevel::VeryLow);
    assert_eq!(event.reason, TransitionReason::ManualOverride);

    handle.shutdown();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_is_graceful() {
    let network = NetworkScript(Scripted::new(repeat(good_network, 5)));
    let ingest = IngestScript(Scripted::new(repeat(good_ingest, 5)));

    let (supervisor, handle) = Supervisor::new(test_config(), network, ingest).unwrap();
    let task = tokio::spawn(supervisor.run());

    handle.shutdown();
    timeout(Duration::from_secs(5), task)
        .await
        .expect("run() exits promptly")
        .unwrap();
}

#[test]
fn invalid_config_is_rejected_up_front() {
    let mut config = test_config();
    config.tiers.medium.preset.bitrate_kbps = 9000;

    let network = NetworkScript(Scripted::new(vec![]));
    let ingest = IngestScript(Scripted::new(vec![]));
    assert!(Supervisor::new(config, network, ingest).is_err());
}
