//! Session lifecycle state machine.
//!
//! Provides a `SessionState` enum with validated transitions that
//! return `Result` instead of panicking, plus the user-facing
//! [`SessionStatus`].

use crate::error::GamelinkError;

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle phase of the live session.
///
/// ```text
///  Idle ──► Negotiating ──► GatheringAddresses ──► AwaitingRemoteAnswer ──► Connected
///  Closed ─────▲  ▲                                                              │
///              │  └──────────────────── Degraded ◄──── (any non-Closed) ◄────────┘
///              └──────────────────────── stop / failure (any) ──► Closed
/// ```
///
/// Transitions only move forward. `Degraded` leaves through an
/// explicit restart (`Negotiating`) or `stop` (`Closed`), never on its
/// own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Nothing started yet.
    #[default]
    Idle,
    /// Offer being created.
    Negotiating,
    /// Waiting (bounded) for address gathering.
    GatheringAddresses,
    /// Offer submitted, waiting for the answer and the first media.
    AwaitingRemoteAnswer,
    /// Media is flowing.
    Connected,
    /// Connectivity lost. Needs an explicit restart.
    Degraded,
    /// Torn down. Stale callbacks are ignored here.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Negotiating => write!(f, "Negotiating"),
            Self::GatheringAddresses => write!(f, "GatheringAddresses"),
            Self::AwaitingRemoteAnswer => write!(f, "AwaitingRemoteAnswer"),
            Self::Connected => write!(f, "Connected"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionState {
    /// A session is being set up or is running; `start` is refused.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Negotiating
                | Self::GatheringAddresses
                | Self::AwaitingRemoteAnswer
                | Self::Connected
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Negotiating`.
    ///
    /// Valid from: `Idle`, `Closed`, `Degraded` (explicit restart).
    pub fn begin_negotiation(&mut self) -> Result<(), GamelinkError> {
        match self {
            Self::Idle | Self::Closed | Self::Degraded => {
                *self = Self::Negotiating;
                Ok(())
            }
            _ => Err(GamelinkError::AlreadyActive),
        }
    }

    /// Transition to `GatheringAddresses`.
    ///
    /// Valid from: `Negotiating`.
    pub fn begin_gathering(&mut self) -> Result<(), GamelinkError> {
        match self {
            Self::Negotiating => {
                *self = Self::GatheringAddresses;
                Ok(())
            }
            _ => Err(GamelinkError::InvalidTransition(
                "cannot gather addresses: not in Negotiating state",
            )),
        }
    }

    /// Transition to `AwaitingRemoteAnswer`.
    ///
    /// Valid from: `GatheringAddresses`.
    pub fn await_answer(&mut self) -> Result<(), GamelinkError> {
        match self {
            Self::GatheringAddresses => {
                *self = Self::AwaitingRemoteAnswer;
                Ok(())
            }
            _ => Err(GamelinkError::InvalidTransition(
                "cannot await answer: not in GatheringAddresses state",
            )),
        }
    }

    /// Transition to `Connected` on the first inbound media.
    ///
    /// Valid from: `AwaitingRemoteAnswer`.
    pub fn media_arrived(&mut self) -> Result<(), GamelinkError> {
        match self {
            Self::AwaitingRemoteAnswer => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(GamelinkError::InvalidTransition(
                "cannot connect: not in AwaitingRemoteAnswer state",
            )),
        }
    }

    /// Transition to `Degraded` after a terminal connectivity failure.
    ///
    /// Valid from: any state except `Closed` and `Idle`.
    pub fn degrade(&mut self) -> Result<(), GamelinkError> {
        match self {
            Self::Negotiating
            | Self::GatheringAddresses
            | Self::AwaitingRemoteAnswer
            | Self::Connected
            | Self::Degraded => {
                *self = Self::Degraded;
                Ok(())
            }
            Self::Idle | Self::Closed => Err(GamelinkError::InvalidTransition(
                "cannot degrade: no session",
            )),
        }
    }

    /// Force the state to `Closed`. Valid from any state.
    pub fn close(&mut self) {
        *self = Self::Closed;
    }
}

// ── SessionStatus ────────────────────────────────────────────────

/// What the user should currently see about the session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Status or error text. `None` once media flows.
    pub message: Option<String>,
    /// Offer a reconnect action.
    pub show_reconnect: bool,
}

impl SessionStatus {
    pub fn new(state: SessionState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: Some(message.into()),
            show_reconnect: false,
        }
    }

    pub fn cleared(state: SessionState) -> Self {
        Self {
            state,
            message: None,
            show_reconnect: false,
        }
    }

    pub fn reconnect(state: SessionState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: Some(message.into()),
            show_reconnect: true,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut state = SessionState::default();
        assert_eq!(state, SessionState::Idle);
        state.begin_negotiation().unwrap();
        state.begin_gathering().unwrap();
        state.await_answer().unwrap();
        state.media_arrived().unwrap();
        assert_eq!(state, SessionState::Connected);
        assert!(state.is_active());
    }

    #[test]
    fn start_refused_while_active() {
        for active in [
            SessionState::Negotiating,
            SessionState::GatheringAddresses,
            SessionState::AwaitingRemoteAnswer,
            SessionState::Connected,
        ] {
            let mut state = active;
            assert!(matches!(
                state.begin_negotiation(),
                Err(GamelinkError::AlreadyActive)
            ));
            assert_eq!(state, active);
        }
    }

    #[test]
    fn degraded_never_jumps_to_connected() {
        let mut state = SessionState::Degraded;
        assert!(state.media_arrived().is_err());
        assert!(state.await_answer().is_err());
        assert_eq!(state, SessionState::Degraded);

        state.begin_negotiation().unwrap();
        assert_eq!(state, SessionState::Negotiating);
    }

    #[test]
    fn degrade_from_any_live_state() {
        for from in [
            SessionState::Negotiating,
            SessionState::GatheringAddresses,
            SessionState::AwaitingRemoteAnswer,
            SessionState::Connected,
        ] {
            let mut state = from;
            state.degrade().unwrap();
            assert_eq!(state, SessionState::Degraded);
        }
        let mut closed = SessionState::Closed;
        assert!(closed.degrade().is_err());
        assert_eq!(closed, SessionState::Closed);
    }

    #[test]
    fn close_from_anywhere() {
        for from in [
            SessionState::Idle,
            SessionState::Negotiating,
            SessionState::Connected,
            SessionState::Degraded,
            SessionState::Closed,
        ] {
            let mut state = from;
            state.close();
            assert!(state.is_closed());
        }
    }

    #[test]
    fn display() {
        assert_eq!(SessionState::AwaitingRemoteAnswer.to_string(), "AwaitingRemoteAnswer");
    }
}
