//! Domain-specific error types for the gamelink session layer.
//!
//! All fallible operations return `Result<T, GamelinkError>`.
//! Every error is session-scoped: nothing here is fatal to the process
//! and all of it is recoverable by an explicit restart.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the gamelink core.
#[derive(Debug, Error)]
pub enum GamelinkError {
    // ── Negotiation Errors ───────────────────────────────────────
    /// The offer/answer exchange failed or the host was unreachable.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Address gathering did not report completion before the deadline.
    ///
    /// Soft failure: negotiation proceeds with whatever was gathered.
    #[error("address gathering timed out after {0:?}")]
    AddressGatheringTimeout(Duration),

    /// `start` was requested while a session is already live.
    #[error("a session is already active")]
    AlreadyActive,

    /// A session state transition was attempted from the wrong state.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    /// An in-flight operation was superseded by `stop` or `restart`.
    #[error("operation cancelled")]
    Cancelled,

    // ── Transport Errors ─────────────────────────────────────────
    /// Connectivity to the host was reported as failed or disconnected.
    #[error("connectivity lost")]
    ConnectivityLost,

    /// The side-channel is not open; input is dropped.
    #[error("side-channel unavailable")]
    TransportUnavailable,

    /// An internal mpsc / oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Host API Errors ──────────────────────────────────────────
    /// The host answered with a non-success status.
    #[error("host returned {status} for {endpoint}")]
    Host { endpoint: &'static str, status: u16 },

    /// The HTTP layer reported an error.
    #[error("http error: {0}")]
    Http(String),

    // ── Telemetry ────────────────────────────────────────────────
    /// A derived metric could not be computed (missing previous sample,
    /// zero denominator). Reported as "unknown", never as a fault.
    #[error("telemetry computation skipped: {0}")]
    TelemetryComputationSkipped(&'static str),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a wire message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A decoded message carried an out-of-range or malformed field.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A quality label did not match any rung of the ladder.
    #[error("unknown quality level: {0}")]
    UnknownQuality(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl GamelinkError {
    /// Always `true`: errors end at most the current session.
    pub fn is_session_scoped(&self) -> bool {
        true
    }

    /// Whether this error should be surfaced to the user.
    ///
    /// Input loss and skipped telemetry are expected during reconnects
    /// and stay silent.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            GamelinkError::NegotiationFailed(_)
                | GamelinkError::ConnectivityLost
                | GamelinkError::Host { .. }
                | GamelinkError::Http(_)
        )
    }

    /// Collapse any error raised during the handshake into
    /// [`GamelinkError::NegotiationFailed`].
    pub fn into_negotiation(self) -> Self {
        match self {
            e @ (GamelinkError::NegotiationFailed(_) | GamelinkError::Cancelled) => e,
            other => GamelinkError::NegotiationFailed(other.to_string()),
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for GamelinkError {
    fn from(s: String) -> Self {
        GamelinkError::Other(s)
    }
}

impl From<&str> for GamelinkError {
    fn from(s: &str) -> Self {
        GamelinkError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for GamelinkError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        GamelinkError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for GamelinkError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        GamelinkError::ChannelClosed
    }
}

impl From<serde_json::Error> for GamelinkError {
    fn from(e: serde_json::Error) -> Self {
        GamelinkError::Encoding(e.to_string())
    }
}

impl From<reqwest::Error> for GamelinkError {
    fn from(e: reqwest::Error) -> Self {
        GamelinkError::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = GamelinkError::NegotiationFailed("no answer".into());
        assert!(e.to_string().contains("no answer"));

        let e = GamelinkError::Host {
            endpoint: "/offer",
            status: 502,
        };
        assert!(e.to_string().contains("502"));
        assert!(e.to_string().contains("/offer"));
    }

    #[test]
    fn from_string() {
        let e: GamelinkError = "something broke".into();
        assert!(matches!(e, GamelinkError::Other(_)));
    }

    #[test]
    fn from_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let e: GamelinkError = err.into();
        assert!(matches!(e, GamelinkError::Encoding(_)));
    }

    #[test]
    fn visibility_follows_taxonomy() {
        assert!(GamelinkError::ConnectivityLost.is_user_visible());
        assert!(GamelinkError::NegotiationFailed(String::new()).is_user_visible());
        assert!(!GamelinkError::TransportUnavailable.is_user_visible());
        let skipped = GamelinkError::TelemetryComputationSkipped("no previous sample");
        assert!(!skipped.is_user_visible());
        assert!(GamelinkError::AlreadyActive.is_session_scoped());
    }

    #[test]
    fn handshake_errors_collapse_to_negotiation_failed() {
        let e = GamelinkError::Http("connection refused".into()).into_negotiation();
        assert!(matches!(e, GamelinkError::NegotiationFailed(ref m) if m.contains("refused")));

        let e = GamelinkError::Cancelled.into_negotiation();
        assert!(matches!(e, GamelinkError::Cancelled));
    }
}
