// Bonding receiver stats client.
//
// The bonding receiver (the far end of the multi-uplink transport)
// exposes a JSON stats document with one record per uplink. This
// client aggregates the per-link records into a single
// [`NetworkSample`] so the controller never has to know how many
// modems the field unit is carrying.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::sample::NetworkSample;
use crate::source::TelemetrySource;
use crate::transport::TransportConfig;

/// Stats for a single uplink as reported by the receiver.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LinkStats {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub packets_sent: u64,
    #[serde(default)]
    pub packets_acked: u64,
    #[serde(default)]
    pub packets_lost: u64,
    #[serde(default)]
    pub rtt_ms: f64,
    #[serde(default)]
    pub bandwidth_bps: f64,
    #[serde(default)]
    pub window_size: u64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Raw receiver stats document.
#[derive(Debug, Deserialize)]
struct ReceiverStatsDoc {
    #[serde(default)]
    total_packets: u64,
    #[serde(default)]
    packets_reordered: u64,
    #[serde(default)]
    links: Vec<LinkStats>,
}

/// Aggregated receiver statistics, including the per-link breakdown
/// for diagnostics. [`NetworkSample`] is the normalized subset the
/// controller consumes.
#[derive(Debug, Clone, Serialize)]
pub struct ReceiverStats {
    pub total_packets_received: u64,
    pub total_packets_reordered: u64,
    pub total_bandwidth_bps: f64,
    pub avg_rtt_ms: f64,
    pub min_rtt_ms: f64,
    pub max_rtt_ms: f64,
    pub packet_loss_pct: f64,
    pub active_links: u32,
    pub links: Vec<LinkStats>,
}

impl ReceiverStats {
    fn from_doc(doc: ReceiverStatsDoc) -> Self {
        let active: Vec<&LinkStats> = doc.links.iter().filter(|l| l.active).collect();
        let total_bandwidth_bps: f64 = active.iter().map(|l| l.bandwidth_bps).sum();
        let rtts: Vec<f64> = active
            .iter()
            .map(|l| l.rtt_ms)
            .filter(|rtt| *rtt > 0.0)
            .collect();

        let total_sent: u64 = doc.links.iter().map(|l| l.packets_sent).sum();
        let total_lost: u64 = doc.links.iter().map(|l| l.packets_lost).sum();
        #[allow(clippy::cast_precision_loss)]
        let packet_loss_pct = if total_sent > 0 {
            (total_lost as f64 / total_sent as f64) * 100.0
        } else {
            0.0
        };

        let avg_rtt_ms = if rtts.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = rtts.iter().sum::<f64>() / rtts.len() as f64;
            mean
        };
        let min_rtt_ms = rtts.iter().copied().fold(f64::INFINITY, f64::min);
        let max_rtt_ms = rtts.iter().copied().fold(0.0, f64::max);

        #[allow(clippy::cast_possible_truncation)]
        let active_links = active.len() as u32;

        Self {
            total_packets_received: doc.total_packets,
            total_packets_reordered: doc.packets_reordered,
            total_bandwidth_bps,
            avg_rtt_ms,
            min_rtt_ms: if min_rtt_ms.is_finite() { min_rtt_ms } else { 0.0 },
            max_rtt_ms,
            packet_loss_pct,
            active_links,
            links: doc.links,
        }
    }

    /// Normalize into the controller-facing sample shape.
    pub fn to_network_sample(&self) -> NetworkSample {
        NetworkSample {
            bandwidth_mbps: self.total_bandwidth_bps / 1_000_000.0,
            packet_loss_pct: self.packet_loss_pct,
            rtt_ms: self.avg_rtt_ms,
            min_rtt_ms: self.min_rtt_ms,
            max_rtt_ms: self.max_rtt_ms,
            active_uplinks: self.active_links,
            captured_at: Utc::now(),
        }
    }
}

/// HTTP client for the bonding receiver's stats endpoint.
pub struct BondingStatsClient {
    http: reqwest::Client,
    stats_url: Url,
}

impl BondingStatsClient {
    pub fn new(stats_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stats_url,
        })
    }

    /// Build from an existing `reqwest::Client` (used by tests).
    pub fn with_client(http: reqwest::Client, stats_url: Url) -> Self {
        Self { http, stats_url }
    }

    /// Fetch the full stats document, including the per-link breakdown.
    pub async fn fetch_receiver_stats(&self) -> Result<ReceiverStats, Error> {
        debug!("GET {}", self.stats_url);
        let resp = self.http.get(self.stats_url.clone()).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        let doc: ReceiverStatsDoc = resp.json().await.map_err(|e| Error::Parse {
            message: e.to_string(),
        })?;

        let stats = ReceiverStats::from_doc(doc);
        debug!(
            active_links = stats.active_links,
            bandwidth_mbps = stats.total_bandwidth_bps / 1_000_000.0,
            "receiver stats fetched"
        );
        Ok(stats)
    }
}

impl TelemetrySource for BondingStatsClient {
    type Sample = NetworkSample;

    async fn fetch(&self) -> Result<NetworkSample, Error> {
        let sample = self.fetch_receiver_stats().await?.to_network_sample();
        sample.validate()?;
        Ok(sample)
    }
}
