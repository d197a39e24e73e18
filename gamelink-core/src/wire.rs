//! Side-channel wire messages.
//!
//! One JSON object per message, carried over an unordered, unreliable
//! data channel:
//!
//! ```text
//! {"type":"BUTTON","code":"A","value":1}
//! {"type":"AXIS","code":"LEFT_X","value":-16384}
//! {"type":"STATS","fps":60,"bitrate":"1.50","latency":12,
//!  "audio":{"bytes":0,"packets":0,"packetsLost":0,"jitter":0.0,"timestamp":0.0}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::GamelinkError;
use crate::input::{InputEvent, InputKind};

/// Largest magnitude an axis value may carry on the wire.
pub const AXIS_MAX: i32 = 32767;

// ── WireMessage ──────────────────────────────────────────────────

/// A single side-channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum WireMessage {
    /// Button press (`1`) or release (`0`).
    Button { code: String, value: u8 },
    /// Analog axis position in `[-32767, 32767]`.
    Axis { code: String, value: i32 },
    /// Link-health snapshot forwarded to the host.
    Stats {
        fps: u32,
        /// Mbps with two fractional digits, e.g. `"1.50"`.
        bitrate: String,
        /// Round-trip latency in milliseconds.
        latency: u32,
        audio: AudioReport,
    },
}

/// Raw audio counters attached to every `STATS` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioReport {
    pub bytes: u64,
    pub packets: u64,
    pub packets_lost: i64,
    pub jitter: f64,
    pub timestamp: f64,
}

impl WireMessage {
    /// Build the wire form of an input event.
    ///
    /// Button values collapse to `0`/`1`; axis values are clamped to
    /// the signed 16-bit range.
    pub fn from_input(event: &InputEvent) -> Self {
        match event.kind {
            InputKind::Button => WireMessage::Button {
                code: event.code.clone(),
                value: u8::from(event.value != 0),
            },
            InputKind::Axis => WireMessage::Axis {
                code: event.code.clone(),
                value: event.value.clamp(-AXIS_MAX, AXIS_MAX),
            },
        }
    }

    /// Returns `true` for `BUTTON` and `AXIS` messages.
    pub fn is_input(&self) -> bool {
        !matches!(self, WireMessage::Stats { .. })
    }

    fn validate(&self) -> Result<(), GamelinkError> {
        match self {
            WireMessage::Button { value, .. } if *value > 1 => Err(GamelinkError::InvalidMessage(
                format!("button value {value} is not 0 or 1"),
            )),
            WireMessage::Axis { value, .. } if !(-AXIS_MAX..=AXIS_MAX).contains(value) => Err(
                GamelinkError::InvalidMessage(format!("axis value {value} out of range")),
            ),
            WireMessage::Button { code, .. } | WireMessage::Axis { code, .. }
                if code.is_empty() =>
            {
                Err(GamelinkError::InvalidMessage("empty input code".into()))
            }
            WireMessage::Stats { bitrate, .. } if bitrate.parse::<f64>().is_err() => Err(
                GamelinkError::InvalidMessage(format!("bitrate {bitrate:?} is not decimal")),
            ),
            _ => Ok(()),
        }
    }
}

// ── Codec ────────────────────────────────────────────────────────

/// Serialize a message to its JSON text form.
pub fn encode(message: &WireMessage) -> Result<String, GamelinkError> {
    Ok(serde_json::to_string(message)?)
}

/// Parse and validate a JSON text message.
pub fn decode(text: &str) -> Result<WireMessage, GamelinkError> {
    let message: WireMessage = serde_json::from_str(text)?;
    message.validate()?;
    Ok(message)
}

/// Format a bitrate in Mbps the way `STATS` carries it.
pub fn format_bitrate(mbps: f64) -> String {
    format!("{mbps:.2}")
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_wire_shape() {
        let text = encode(&WireMessage::from_input(&InputEvent::button("A", true))).unwrap();
        assert_eq!(text, r#"{"type":"BUTTON","code":"A","value":1}"#);
    }

    #[test]
    fn axis_is_clamped_on_encode() {
        let msg = WireMessage::from_input(&InputEvent::axis("LEFT_X", -40000));
        assert_eq!(
            msg,
            WireMessage::Axis {
                code: "LEFT_X".into(),
                value: -32767
            }
        );
    }

    #[test]
    fn stats_wire_shape() {
        let msg = WireMessage::Stats {
            fps: 60,
            bitrate: format_bitrate(1.5),
            latency: 12,
            audio: AudioReport {
                packets_lost: 3,
                ..Default::default()
            },
        };
        let value: serde_json::Value = serde_json::from_str(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "STATS");
        assert_eq!(value["bitrate"], "1.50");
        assert_eq!(value["audio"]["packetsLost"], 3);
    }

    #[test]
    fn decode_rejects_out_of_range_values() {
        assert!(decode(r#"{"type":"BUTTON","code":"A","value":2}"#).is_err());
        assert!(decode(r#"{"type":"AXIS","code":"LEFT_Y","value":40000}"#).is_err());
        assert!(decode(r#"{"type":"AXIS","code":"LEFT_X","value":-2147483648}"#).is_err());
        assert!(decode(r#"{"type":"AXIS","code":"LEFT_X","value":-32767}"#).is_ok());
        assert!(decode(r#"{"type":"AXIS","code":"","value":0}"#).is_err());
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let err = decode(r#"{"type":"MOUSE","x":1}"#).unwrap_err();
        assert!(matches!(err, GamelinkError::Encoding(_)));
    }

    #[test]
    fn decode_accepts_host_stats() {
        let msg = decode(
            r#"{"type":"STATS","fps":30,"bitrate":"12.25","latency":40,
                "audio":{"bytes":10,"packets":2,"packetsLost":0,"jitter":0.01,"timestamp":5.0}}"#,
        )
        .unwrap();
        assert!(!msg.is_input());
    }
}
