//! Discrete quality ladder.
//!
//! The ladder is cyclic: `720p → 1080p → 2k → 4k → 720p …`. Changing
//! the level is a local state change, one notification to the host,
//! and (only while connected) a full session restart. There is no
//! in-place renegotiation of a live session.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GamelinkError;
use crate::host::HostApi;
use crate::session::{SessionHandle, SessionState};

// ── QualityLevel ─────────────────────────────────────────────────

/// One rung of the quality ladder.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum QualityLevel {
    #[serde(rename = "720p")]
    Low,
    #[default]
    #[serde(rename = "1080p")]
    Medium,
    #[serde(rename = "2k")]
    High,
    #[serde(rename = "4k")]
    Ultra,
}

impl QualityLevel {
    /// The ladder in cycle order.
    pub const LADDER: [QualityLevel; 4] = [Self::Low, Self::Medium, Self::High, Self::Ultra];

    /// The next rung, wrapping from `Ultra` back to `Low`.
    pub fn next(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High => Self::Ultra,
            Self::Ultra => Self::Low,
        }
    }

    /// Wire / display label.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Low => "720p",
            Self::Medium => "1080p",
            Self::High => "2k",
            Self::Ultra => "4k",
        }
    }

    /// Human-facing preset name.
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Low => "Performance (720p)",
            Self::Medium => "Balanced (1080p)",
            Self::High => "Quality (1440p)",
            Self::Ultra => "Ultra (4K)",
        }
    }

    /// Encode resolution the host applies for this level.
    pub const fn resolution(self) -> (u32, u32) {
        match self {
            Self::Low => (1280, 720),
            Self::Medium => (1920, 1080),
            Self::High => (2560, 1440),
            Self::Ultra => (3840, 2160),
        }
    }

    /// Target encode bitrate in kbps.
    pub const fn bitrate_kbps(self) -> u32 {
        match self {
            Self::Low => 25_000,
            Self::Medium => 20_000,
            Self::High => 35_000,
            Self::Ultra => 55_000,
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QualityLevel {
    type Err = GamelinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::LADDER
            .into_iter()
            .find(|level| level.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GamelinkError::UnknownQuality(s.to_string()))
    }
}

// ── QualityController ────────────────────────────────────────────

/// Owns the current [`QualityLevel`] and applies changes to the host
/// and the live session.
///
/// The level is process-wide state; it outlives every session.
pub struct QualityController {
    current: QualityLevel,
    host: Arc<dyn HostApi>,
    session: SessionHandle,
}

impl QualityController {
    pub fn new(host: Arc<dyn HostApi>, session: SessionHandle) -> Self {
        Self {
            current: QualityLevel::default(),
            host,
            session,
        }
    }

    /// The level currently in effect.
    pub fn current(&self) -> QualityLevel {
        self.current
    }

    /// Restore a persisted level at startup. Does not contact the host.
    pub fn restore(&mut self, level: QualityLevel) {
        info!(quality = %level, "restored quality level");
        self.current = level;
    }

    /// Move to the next rung of the ladder.
    ///
    /// The host is notified first so it can prepare the new encode
    /// pipeline; a connected session is then restarted. When the
    /// session is not connected only the level and the host change.
    ///
    /// A failed notification keeps the new local level but skips the
    /// restart.
    pub async fn advance(&mut self) -> Result<QualityLevel, GamelinkError> {
        let next = self.current.next();
        self.current = next;
        info!(quality = %next, "quality changed to {}", next.display_name());

        if let Err(e) = self.host.set_quality(next).await {
            warn!(quality = %next, "host did not accept quality change: {e}");
            return Err(e);
        }

        if self.session.state() == SessionState::Connected {
            self.session.restart("quality change").await?;
        }

        Ok(next)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_cycles() {
        let mut level = QualityLevel::Low;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(level.label());
            level = level.next();
        }
        assert_eq!(seen, ["720p", "1080p", "2k", "4k", "720p"]);
    }

    #[test]
    fn default_is_1080p() {
        assert_eq!(QualityLevel::default(), QualityLevel::Medium);
    }

    #[test]
    fn parse_labels() {
        assert_eq!("2k".parse::<QualityLevel>().unwrap(), QualityLevel::High);
        assert_eq!("4K".parse::<QualityLevel>().unwrap(), QualityLevel::Ultra);
        assert!(matches!(
            "8k".parse::<QualityLevel>(),
            Err(GamelinkError::UnknownQuality(_))
        ));
    }

    #[test]
    fn presets_match_host_table() {
        assert_eq!(QualityLevel::High.resolution(), (2560, 1440));
        assert_eq!(QualityLevel::Ultra.bitrate_kbps(), 55_000);
        assert_eq!(QualityLevel::Low.bitrate_kbps(), 25_000);
    }

    #[test]
    fn serde_uses_labels() {
        assert_eq!(serde_json::to_string(&QualityLevel::Low).unwrap(), r#""720p""#);
        let level: QualityLevel = serde_json::from_str(r#""1080p""#).unwrap();
        assert_eq!(level, QualityLevel::Medium);
    }
}
