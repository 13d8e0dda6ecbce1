// HTTP transport configuration shared by both stats clients.

use std::time::Duration;

use crate::error::Error;

/// Settings for building the underlying `reqwest::Client`.
///
/// Both stats origins are LAN-local services (the bonding receiver and
/// the ingest server), so the defaults are short timeouts and no
/// redirect following.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Client-level request timeout. The control loop applies its own
    /// per-tick deadline on top of this.
    pub timeout: Duration,
    /// Accept self-signed certificates (common for on-device ingest
    /// servers exposing stats over https).
    pub danger_accept_invalid_certs: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            danger_accept_invalid_certs: false,
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this configuration.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs)
            .build()?;
        Ok(client)
    }
}
