//! Client configuration.

use std::path::Path;

use gamelink_core::{GamepadConfig, QualityLevel, SessionConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host address and session timing.
    pub session: SessionConfig,
    /// Input settings.
    pub input: InputConfig,
    /// Persisted quality level.
    pub quality: QualityConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Input settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Physical controller polling.
    pub gamepad: GamepadConfig,
    /// Radius of the virtual sticks, in pointer units.
    pub joystick_radius: f64,
}

/// Quality settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Level restored at startup: "720p", "1080p", "2k" or "4k".
    pub initial: QualityLevel,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            gamepad: GamepadConfig::default(),
            joystick_radius: 50.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = ClientConfig::default_toml().unwrap();
        assert!(text.contains("host_url"));
        assert!(text.contains("[input.gamepad]"));
        assert!(text.contains(r#"initial = "1080p""#));
    }

    #[test]
    fn roundtrip_config() {
        let text = ClientConfig::default_toml().unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.session.gather_timeout_ms, 3000);
        assert_eq!(parsed.input.gamepad.emit_threshold, 500);
        assert_eq!(parsed.quality.initial, QualityLevel::Medium);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [session]
            host_url = "http://192.168.1.20:8080"

            [quality]
            initial = "4k"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.session.host_url, "http://192.168.1.20:8080");
        assert_eq!(parsed.session.side_channel_label, "input");
        assert_eq!(parsed.quality.initial, QualityLevel::Ultra);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ClientConfig::load(Path::new("/nonexistent/gamelink.toml"));
        assert_eq!(cfg.input.joystick_radius, 50.0);
    }
}
