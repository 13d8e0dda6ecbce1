// Normalized telemetry samples.
//
// Both adapters normalize their origin-specific stats into these two
// types so the aggregator can consume bonding metrics and ingest
// metrics through a single shape. Samples are immutable once captured.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Error;

/// One observation of the bonded transport, aggregated over all links.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSample {
    /// Estimated aggregate goodput across active uplinks.
    pub bandwidth_mbps: f64,
    /// Packet loss over all links, 0–100.
    pub packet_loss_pct: f64,
    /// Mean RTT over active links.
    pub rtt_ms: f64,
    /// Best-link RTT. Upgrade envelopes check this one.
    pub min_rtt_ms: f64,
    /// Worst-link RTT. Downgrade ceilings check this one.
    pub max_rtt_ms: f64,
    /// Number of uplinks currently carrying traffic.
    pub active_uplinks: u32,
    pub captured_at: DateTime<Utc>,
}

impl NetworkSample {
    /// Reject out-of-range values. A sample that fails validation is
    /// discarded for the tick, same as a fetch failure.
    pub fn validate(&self) -> Result<(), Error> {
        check_non_negative("bandwidth_mbps", self.bandwidth_mbps)?;
        check_range("packet_loss_pct", self.packet_loss_pct, 0.0, 100.0)?;
        check_non_negative("rtt_ms", self.rtt_ms)?;
        check_non_negative("min_rtt_ms", self.min_rtt_ms)?;
        check_non_negative("max_rtt_ms", self.max_rtt_ms)?;
        Ok(())
    }

    /// Sample age relative to `now`. Negative skew counts as zero.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.captured_at).to_std().unwrap_or_default()
    }
}

/// One observation of the ingest server, scoped to a single stream key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestSample {
    /// Bitrate actually received at the ingest point.
    pub bitrate_kbps: f64,
    /// Received frame rate, when the origin reports it (0 otherwise).
    pub frame_rate: f64,
    /// Cumulative dropped-frame count for the session.
    pub dropped_frames: u64,
    /// Whether the stream key has a live publisher right now.
    pub connected: bool,
    pub captured_at: DateTime<Utc>,
}

impl IngestSample {
    pub fn validate(&self) -> Result<(), Error> {
        check_non_negative("bitrate_kbps", self.bitrate_kbps)?;
        check_non_negative("frame_rate", self.frame_rate)?;
        Ok(())
    }

    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.captured_at).to_std().unwrap_or_default()
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), Error> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Malformed { field, value })
    }
}

fn check_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), Error> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(Error::Malformed { field, value })
    }
}
