// The seam between the control loop and a telemetry origin.

use std::future::Future;

use crate::error::Error;

/// A telemetry origin that can be polled for its latest sample.
///
/// The control loop owns the polling cadence and the per-fetch
/// deadline; implementations just perform one fetch. A failed fetch is
/// isolated per source — the caller records the error and keeps the
/// previous sample until it ages out of the staleness window.
pub trait TelemetrySource: Send + Sync {
    type Sample: Send;

    /// Fetch one sample from the origin.
    fn fetch(&self) -> impl Future<Output = Result<Self::Sample, Error>> + Send;
}
