//! Session and input tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── SessionConfig ────────────────────────────────────────────────

/// Parameters of one streaming session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the streaming host, e.g. `http://192.168.1.20:8080`.
    pub host_url: String,
    /// Upper bound on address gathering before the offer is sent anyway.
    pub gather_timeout_ms: u64,
    /// Telemetry sampling period.
    pub telemetry_interval_ms: u64,
    /// Emit an extended diagnostic record every N telemetry ticks.
    pub diagnostic_every: u64,
    /// Label of the input / telemetry side-channel.
    pub side_channel_label: String,
    /// STUN / TURN server URLs handed to the connectivity backend.
    pub ice_servers: Vec<String>,
    /// Timeout for host HTTP requests.
    pub request_timeout_ms: u64,
}

impl SessionConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host_url: "http://127.0.0.1:8080".into(),
            gather_timeout_ms: 3000,
            telemetry_interval_ms: 1000,
            diagnostic_every: 5,
            side_channel_label: "input".into(),
            ice_servers: vec!["stun:stun.l.google.com:19302".into()],
            request_timeout_ms: 10_000,
        }
    }
}

// ── GamepadConfig ────────────────────────────────────────────────

/// Physical controller polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamepadConfig {
    /// Raw analog magnitude below which an axis reads as exactly 0.
    pub dead_zone: f64,
    /// Minimum change (on the ±32767 scale) before an axis is re-sent.
    pub emit_threshold: i32,
    /// Sampling period while a controller is active.
    pub poll_interval_ms: u64,
    /// Discovery period while no controller is active.
    pub discovery_interval_ms: u64,
}

impl GamepadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms.max(1))
    }
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            dead_zone: 0.15,
            emit_threshold: 500,
            poll_interval_ms: 16,
            discovery_interval_ms: 1000,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let session = SessionConfig::default();
        assert_eq!(session.gather_timeout(), Duration::from_secs(3));
        assert_eq!(session.telemetry_interval(), Duration::from_secs(1));
        assert_eq!(session.diagnostic_every, 5);
        assert_eq!(session.side_channel_label, "input");

        let pad = GamepadConfig::default();
        assert_eq!(pad.poll_interval(), Duration::from_millis(16));
        assert_eq!(pad.emit_threshold, 500);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let session: SessionConfig =
            serde_json::from_str(r#"{"host_url":"http://10.0.0.2:8080"}"#).unwrap();
        assert_eq!(session.host_url, "http://10.0.0.2:8080");
        assert_eq!(session.gather_timeout_ms, 3000);
    }
}
