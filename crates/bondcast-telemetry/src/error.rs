// Adapter error taxonomy.
//
// The control loop treats every failure here as "no sample this tick",
// but the distinct variants stay observable for diagnostics: an origin
// that is reachable-but-erroring is a different operational problem
// from one that times out or returns garbage.

use thiserror::Error;

/// Errors produced by the telemetry adapters.
#[derive(Debug, Error)]
pub enum Error {
    /// The HTTP request itself failed (connect, TLS, body read).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The origin did not answer within the fetch timeout.
    #[error("fetch timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The origin answered with a non-success status.
    #[error("stats endpoint returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body could not be parsed into a stats document.
    #[error("failed to parse stats response: {message}")]
    Parse { message: String },

    /// A parsed sample carried an out-of-range value.
    #[error("malformed sample: {field} = {value}")]
    Malformed { field: &'static str, value: f64 },

    /// The stats URL in the configuration is not a valid URL.
    #[error("invalid stats URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Coarse classification of an [`Error`], kept in per-source
/// diagnostics so dashboards can distinguish failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Timeout,
    Api,
    Parse,
    Malformed,
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(e) if e.is_timeout() => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Api { .. } => ErrorKind::Api,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::InvalidUrl(_) => ErrorKind::Config,
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::Parse {
            message: err.to_string(),
        }
    }
}
