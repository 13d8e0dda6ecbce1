//! Telemetry adapters for the bonded-streaming control loop.
//!
//! Two origins feed the controller, each behind its own HTTP stats
//! client:
//!
//! - **[`BondingStatsClient`]** — polls the bonding receiver's JSON
//!   stats endpoint and aggregates the per-uplink records into one
//!   [`NetworkSample`] (total bandwidth, blended loss, RTT spread,
//!   active uplink count).
//!
//! - **[`IngestStatsClient`]** — polls the ingest server for what the
//!   encoder actually delivered, normalized into an [`IngestSample`].
//!   Speaks nginx-rtmp XML, SRT gateway JSON, and Node-Media-Server
//!   JSON depending on [`ServerKind`].
//!
//! Both implement [`TelemetrySource`], the seam the control loop polls
//! through. Adapters never retry or cache; one call is one fetch, and
//! every failure surfaces as an [`Error`] for the caller to isolate.

pub mod bonding;
pub mod error;
pub mod ingest;
pub mod sample;
pub mod source;
pub mod transport;

pub use bonding::{BondingStatsClient, LinkStats, ReceiverStats};
pub use error::{Error, ErrorKind};
pub use ingest::{IngestStatsClient, ServerKind};
pub use sample::{IngestSample, NetworkSample};
pub use source::TelemetrySource;
pub use transport::TransportConfig;
