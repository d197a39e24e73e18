//! # gamelink-client: streaming client
//!
//! Connects to a streaming host over WebRTC using the session layer
//! in `gamelink-core`, and lets an operator drive the session and
//! send controller input from the console.

pub mod config;
pub mod console;
pub mod rtc;
