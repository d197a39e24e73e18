//! Session lifecycle: state machine and controller.

pub mod controller;
pub mod state;

pub use controller::{SessionController, SessionHandle};
pub use state::{SessionState, SessionStatus};
