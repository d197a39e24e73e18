//! # gamelink-core
//!
//! Session layer of the gamelink remote game-streaming client.
//!
//! This crate contains:
//! - **Session**: `SessionController` actor and `SessionState` machine driving
//!   the offer/answer handshake against the streaming host
//! - **Negotiation**: `NegotiationCapability` / `Transport` / `SideChannel`
//!   traits implemented by a connectivity backend
//! - **Input**: `InputTransport` with axis suppression, gamepad polling and
//!   virtual joysticks
//! - **Telemetry**: `TelemetryCollector` deriving link health every second
//! - **Quality**: the cyclic `QualityLevel` ladder and `QualityController`
//! - **Wire**: JSON side-channel messages (`BUTTON`, `AXIS`, `STATS`)
//! - **Host**: `HttpHost`, the `/offer` and `/api/quality` endpoints
//! - **Error**: `GamelinkError`, typed and `thiserror`-based

pub mod config;
pub mod error;
pub mod host;
pub mod input;
pub mod negotiation;
pub mod quality;
pub mod session;
pub mod telemetry;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::{GamepadConfig, SessionConfig};
pub use error::GamelinkError;
pub use host::{HostApi, HttpHost, SessionDescription};
pub use input::{
    DispatchOutcome, GamepadBackend, GamepadPoller, InputEvent, InputIntake, InputKind,
    InputSource, InputTransport, VirtualJoystick,
};
pub use negotiation::{
    ConnectivityState, EventSink, MediaSample, MediaSink, NegotiationCapability, SideChannel,
    TrackKind, Transport, TransportEvent,
};
pub use quality::{QualityController, QualityLevel};
pub use session::{SessionController, SessionHandle, SessionState, SessionStatus};
pub use telemetry::{Bitrate, RawCounters, StatsSnapshot, TelemetryCollector};
pub use wire::WireMessage;
