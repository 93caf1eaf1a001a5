// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted gateway settings shared by the daemon and embedding hosts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Config key under which [`GatewaySettings`] are stored.
pub const GATEWAY_SETTINGS_KEY: &str = "gateway";

/// Default broadcast channel for replica comparison.
pub const DEFAULT_COMPARE_CHANNEL: &str = "$quilt.compare";

/// Tunables for a gateway process.
///
/// Every field has a default so partially written config files still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Scope shared by a gateway and the services it discovers.
    pub scope: String,
    /// Delay between discovery probes while services are still missing.
    pub poll_interval_ms: u64,
    /// Heartbeat of the mesh `quiltd` boots. Gateways refresh their
    /// directories on the heartbeat their broker reports.
    pub heartbeat_interval_ms: u64,
    /// Attempts made by a directory before falling back to its last pick.
    pub directory_retries: u32,
    /// Pause between directory attempts.
    pub directory_retry_delay_ms: u64,
    /// Event name used for the replica compare broadcast.
    pub compare_channel: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            scope: "default".into(),
            poll_interval_ms: 1_000,
            heartbeat_interval_ms: 5_000,
            directory_retries: 5,
            directory_retry_delay_ms: 25,
            compare_channel: DEFAULT_COMPARE_CHANNEL.into(),
        }
    }
}

impl GatewaySettings {
    /// Discovery poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Heartbeat interval as a [`Duration`], never below one millisecond.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Directory retry delay as a [`Duration`].
    pub fn directory_retry_delay(&self) -> Duration {
        Duration::from_millis(self.directory_retry_delay_ms)
    }
}
