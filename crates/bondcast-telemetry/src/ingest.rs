// Ingest server stats client.
//
// Polls the streaming server's stats endpoint for the ground truth
// about what actually arrived at the ingest point. The bonding
// receiver tells us what the network *should* carry; the ingest server
// tells us what the encoder *did* deliver — the aggregator compares
// the two for divergence.

use chrono::Utc;
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::sample::IngestSample;
use crate::source::TelemetrySource;
use crate::transport::TransportConfig;

/// Supported ingest server flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerKind {
    /// nginx-rtmp `stat` module (XML document).
    #[serde(rename = "nginx-rtmp")]
    NginxRtmp,
    /// Generic SRT gateway stats (JSON).
    #[serde(rename = "srt")]
    Srt,
    /// Node-Media-Server `/api/streams` (JSON).
    #[serde(rename = "node-media-server")]
    NodeMedia,
}

/// HTTP client for an ingest server's stats endpoint, scoped to one
/// stream key.
pub struct IngestStatsClient {
    http: reqwest::Client,
    stats_url: Url,
    stream_key: String,
    kind: ServerKind,
}

impl IngestStatsClient {
    pub fn new(
        stats_url: Url,
        stream_key: impl Into<String>,
        kind: ServerKind,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stats_url,
            stream_key: stream_key.into(),
            kind,
        })
    }

    /// Build from an existing `reqwest::Client` (used by tests).
    pub fn with_client(
        http: reqwest::Client,
        stats_url: Url,
        stream_key: impl Into<String>,
        kind: ServerKind,
    ) -> Self {
        Self {
            http,
            stats_url,
            stream_key: stream_key.into(),
            kind,
        }
    }

    /// Fetch one stats sample for the configured stream key.
    pub async fn fetch_stats(&self) -> Result<IngestSample, Error> {
        match self.kind {
            ServerKind::NginxRtmp => self.fetch_nginx_rtmp().await,
            ServerKind::Srt => self.fetch_srt().await,
            ServerKind::NodeMedia => self.fetch_node_media().await,
        }
    }

    async fn fetch_nginx_rtmp(&self) -> Result<IngestSample, Error> {
        let body = self.get_text(self.stats_url.clone()).await?;
        let sample = parse_nginx_rtmp(&body, &self.stream_key)?;
        debug!(
            bitrate_kbps = sample.bitrate_kbps,
            connected = sample.connected,
            "nginx-rtmp stats fetched"
        );
        Ok(sample)
    }

    async fn fetch_srt(&self) -> Result<IngestSample, Error> {
        let doc: SrtStatsDoc = self.get_json(self.stats_url.clone()).await?;
        Ok(IngestSample {
            // SRT gateways report bps
            bitrate_kbps: doc.bitrate / 1000.0,
            frame_rate: doc.frame_rate,
            dropped_frames: doc.dropped_frames,
            connected: doc.connected,
            captured_at: Utc::now(),
        })
    }

    async fn fetch_node_media(&self) -> Result<IngestSample, Error> {
        let url = self.stats_url.join("api/streams")?;
        let doc: NodeMediaDoc = self.get_json(url).await?;

        // Node-Media-Server keys streams by app; our key is "app/name".
        let app = self.stream_key.split('/').next().unwrap_or_default();
        for stream in &doc.streams {
            if stream.app == app {
                let video = stream.video.as_ref();
                let audio = stream.audio.as_ref();
                let bitrate_kbps = (video.map_or(0.0, |t| t.bitrate)
                    + audio.map_or(0.0, |t| t.bitrate))
                    / 1000.0;
                return Ok(IngestSample {
                    bitrate_kbps,
                    frame_rate: video.map_or(0.0, |t| t.fps),
                    dropped_frames: 0,
                    connected: true,
                    captured_at: Utc::now(),
                });
            }
        }

        Ok(disconnected_sample())
    }

    async fn get_text(&self, url: Url) -> Result<String, Error> {
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.text().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {url}");
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }
        resp.json().await.map_err(|e| Error::Parse {
            message: e.to_string(),
        })
    }
}

impl TelemetrySource for IngestStatsClient {
    type Sample = IngestSample;

    async fn fetch(&self) -> Result<IngestSample, Error> {
        let sample = self.fetch_stats().await?;
        sample.validate()?;
        Ok(sample)
    }
}

/// "Stream key not publishing" sample: zero bitrate, disconnected.
fn disconnected_sample() -> IngestSample {
    IngestSample {
        bitrate_kbps: 0.0,
        frame_rate: 0.0,
        dropped_frames: 0,
        connected: false,
        captured_at: Utc::now(),
    }
}

// ── nginx-rtmp XML parsing ──────────────────────────────────────────
//
// The stat module document nests <stream> elements under
// <rtmp>/<server>/<application>/<live>; we only care about the stream
// whose <name> matches our key, and its <bw_in> (bytes/s).

fn parse_nginx_rtmp(xml: &str, stream_key: &str) -> Result<IngestSample, Error> {
    let mut reader = Reader::from_str(xml);

    let mut in_stream = false;
    let mut current_tag: Option<Vec<u8>> = None;
    let mut name = String::new();
    let mut bw_in_bytes: f64 = 0.0;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(e) => match e.name().as_ref() {
                b"stream" => {
                    in_stream = true;
                    name.clear();
                    bw_in_bytes = 0.0;
                    current_tag = None;
                }
                tag @ (b"name" | b"bw_in") if in_stream => {
                    current_tag = Some(tag.to_vec());
                }
                _ => current_tag = None,
            },
            XmlEvent::Text(t) if in_stream => {
                if let Some(ref tag) = current_tag {
                    let text = t.unescape()?;
                    let text = text.trim();
                    match tag.as_slice() {
                        b"name" => name = text.to_owned(),
                        b"bw_in" => bw_in_bytes = text.parse().unwrap_or(0.0),
                        _ => {}
                    }
                }
            }
            XmlEvent::End(e) => {
                if e.name().as_ref() == b"stream" {
                    in_stream = false;
                    if name == stream_key {
                        return Ok(IngestSample {
                            // bytes/s → kbps
                            bitrate_kbps: bw_in_bytes * 8.0 / 1000.0,
                            frame_rate: 0.0,
                            dropped_frames: 0,
                            connected: true,
                            captured_at: Utc::now(),
                        });
                    }
                }
                current_tag = None;
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    // Stream key not found — the publisher is not connected.
    Ok(disconnected_sample())
}

// ── JSON documents ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SrtStatsDoc {
    #[serde(default)]
    bitrate: f64,
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    frame_rate: f64,
    #[serde(default)]
    dropped_frames: u64,
}

#[derive(Debug, Deserialize)]
struct NodeMediaDoc {
    #[serde(default)]
    streams: Vec<NodeMediaStream>,
}

#[derive(Debug, Deserialize)]
struct NodeMediaStream {
    #[serde(default)]
    app: String,
    video: Option<TrackStats>,
    audio: Option<TrackStats>,
}

#[derive(Debug, Deserialize)]
struct TrackStats {
    #[serde(default)]
    bitrate: f64,
    #[serde(default)]
    fps: f64,
}
