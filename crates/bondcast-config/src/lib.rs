//! Configuration for the bondcast daemon.
//!
//! TOML file + `BONDCAST_`-prefixed environment overrides, merged over
//! compiled defaults, then translated into the core's immutable
//! [`ControlConfig`]. Threshold-ordering violations are fatal at load
//! time; everything else has a sensible default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use bondcast_core::{ControlConfig, CoreError, CreditCurves, HealthWeights, QualityLevel, TierTable};
use bondcast_telemetry::{ServerKind, TransportConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("invalid {field} URL: {source}")]
    Url {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML settings structs ───────────────────────────────────────────

/// Top-level settings file.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub control: ControlSettings,

    #[serde(default)]
    pub network: NetworkEndpoint,

    #[serde(default)]
    pub ingest: IngestEndpoint,

    /// Full tier ladder (presets + thresholds). Defaults match the
    /// built-in ladder; override per tier in the file when tuning.
    #[serde(default)]
    pub tiers: TierTable,
}

/// Control loop tunables, durations as integers in the file.
#[derive(Debug, Deserialize, Serialize)]
pub struct ControlSettings {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_staleness_window_secs")]
    pub staleness_window_secs: u64,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default)]
    pub instant_recovery: bool,

    #[serde(default = "default_offline_dwell_secs")]
    pub offline_dwell_secs: u64,

    #[serde(default = "default_recovery_dwell_secs")]
    pub recovery_dwell_secs: u64,

    #[serde(default = "default_offline_floor_mbps")]
    pub offline_floor_mbps: f64,

    #[serde(default = "default_divergence_tolerance")]
    pub divergence_tolerance: f64,

    #[serde(default = "default_bonded_efficiency")]
    pub bonded_efficiency: f64,

    #[serde(default = "default_initial_level")]
    pub initial_level: QualityLevel,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            staleness_window_secs: default_staleness_window_secs(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            instant_recovery: false,
            offline_dwell_secs: default_offline_dwell_secs(),
            recovery_dwell_secs: default_recovery_dwell_secs(),
            offline_floor_mbps: default_offline_floor_mbps(),
            divergence_tolerance: default_divergence_tolerance(),
            bonded_efficiency: default_bonded_efficiency(),
            initial_level: default_initial_level(),
        }
    }
}

fn default_tick_interval_secs() -> u64 {
    2
}
fn default_staleness_window_secs() -> u64 {
    6
}
fn default_fetch_timeout_ms() -> u64 {
    1500
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_offline_dwell_secs() -> u64 {
    20
}
fn default_recovery_dwell_secs() -> u64 {
    60
}
fn default_offline_floor_mbps() -> f64 {
    0.5
}
fn default_divergence_tolerance() -> f64 {
    0.7
}
fn default_bonded_efficiency() -> f64 {
    0.8
}
fn default_initial_level() -> QualityLevel {
    QualityLevel::High
}

/// Bonding receiver stats endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct NetworkEndpoint {
    pub stats_url: String,

    #[serde(default = "default_endpoint_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for NetworkEndpoint {
    fn default() -> Self {
        Self {
            stats_url: "http://127.0.0.1:8181/stats".into(),
            timeout_secs: default_endpoint_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

/// Ingest server stats endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct IngestEndpoint {
    pub stats_url: String,

    /// "nginx-rtmp", "srt", or "node-media-server".
    pub server: ServerKind,

    pub stream_key: String,

    #[serde(default = "default_endpoint_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for IngestEndpoint {
    fn default() -> Self {
        Self {
            stats_url: "http://127.0.0.1:8080/stat".into(),
            server: ServerKind::NginxRtmp,
            stream_key: "live/stream".into(),
            timeout_secs: default_endpoint_timeout_secs(),
            accept_invalid_certs: false,
        }
    }
}

fn default_endpoint_timeout_secs() -> u64 {
    5
}

// ── Translation to core / telemetry config ─────────────────────────

impl Settings {
    /// Build the validated control config.
    pub fn control_config(&self) -> Result<ControlConfig, ConfigError> {
        let c = &self.control;
        let config = ControlConfig {
            tick_interval: Duration::from_secs(c.tick_interval_secs),
            staleness_window: Duration::from_secs(c.staleness_window_secs),
            fetch_timeout: Duration::from_millis(c.fetch_timeout_ms),
            retry_attempts: c.retry_attempts,
            instant_recovery: c.instant_recovery,
            offline_dwell: Duration::from_secs(c.offline_dwell_secs),
            recovery_dwell: Duration::from_secs(c.recovery_dwell_secs),
            offline_floor_mbps: c.offline_floor_mbps,
            divergence_tolerance: c.divergence_tolerance,
            bonded_efficiency: c.bonded_efficiency,
            initial_level: c.initial_level,
            weights: HealthWeights::default(),
            curves: CreditCurves::default(),
            tiers: self.tiers.clone(),
        };
        config.validate().map_err(|err| match err {
            CoreError::Config(message) => ConfigError::Validation(message),
            other => ConfigError::Validation(other.to_string()),
        })?;
        Ok(config)
    }

    pub fn network_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.network.stats_url).map_err(|source| ConfigError::Url {
            field: "network.stats_url",
            source,
        })
    }

    pub fn ingest_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.ingest.stats_url).map_err(|source| ConfigError::Url {
            field: "ingest.stats_url",
            source,
        })
    }

    pub fn network_transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.network.timeout_secs),
            danger_accept_invalid_certs: self.network.accept_invalid_certs,
        }
    }

    pub fn ingest_transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: Duration::from_secs(self.ingest.timeout_secs),
            danger_accept_invalid_certs: self.ingest.accept_invalid_certs,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "bondcast", "bondcast").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("bondcast");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Load settings from the given file (or the canonical path) plus
/// `BONDCAST_`-prefixed environment overrides. Missing file is fine;
/// defaults apply.
///
/// Nested keys use a double underscore in the environment:
/// `BONDCAST_CONTROL__RETRY_ATTEMPTS=3`.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let default_path = config_path();
    let path = path.unwrap_or(&default_path);

    let figment = Figment::new()
        .merge(Serialized::defaults(Settings::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BONDCAST_").split("__"));

    let settings: Settings = figment.extract()?;
    Ok(settings)
}
