// Core error taxonomy.

use thiserror::Error;

/// Errors surfaced by the control core.
///
/// Configuration problems are the only fatal class; everything
/// telemetry-side degrades to "no sample this tick" inside the loop
/// and only crosses this boundary when a caller fetches directly.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The control configuration failed startup validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A telemetry adapter failed.
    #[error(transparent)]
    Telemetry(#[from] bondcast_telemetry::Error),

    /// The control loop has shut down and no longer accepts commands.
    #[error("control loop is not running")]
    ControlLoopClosed,
}
