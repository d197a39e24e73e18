//! Input transport.
//!
//! Input sources (virtual on-screen controls, the physical gamepad
//! poller, the console) push [`InputEvent`]s onto a single
//! [`InputIntake`]. The [`InputTransport`] turns them into `BUTTON` /
//! `AXIS` wire messages on the session's side-channel:
//!
//! - buttons are sent on every state change, never suppressed;
//! - axes from a physical gamepad are sent only when they move more
//!   than the emission threshold away from the last sent value for the
//!   same (device, axis) pair;
//! - axes from virtual sticks are sent on every move;
//! - with no open side-channel, or while input is disabled (edit
//!   mode), events are dropped silently.
//!
//! Delivery is best-effort: unordered, no retry.

pub mod gamepad;
pub mod joystick;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::GamelinkError;
use crate::negotiation::SideChannel;
use crate::wire::{self, WireMessage};

pub use gamepad::{GamepadBackend, GamepadInfo, GamepadNotification, GamepadPoller, GamepadState};
pub use joystick::VirtualJoystick;

/// Axis movement (on the ±32767 scale) a physical gamepad must exceed
/// before a new value is sent.
pub const DEFAULT_EMIT_THRESHOLD: i32 = 500;

// ── InputEvent ───────────────────────────────────────────────────

/// Kind of a discrete input action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    Button,
    Axis,
}

/// One user action, consumed exactly once by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: InputKind,
    /// Control identifier, e.g. `"A"` or `"LEFT_X"`.
    pub code: String,
    /// `0`/`1` for buttons, `-32767..=32767` for axes.
    pub value: i32,
}

impl InputEvent {
    pub fn button(code: impl Into<String>, pressed: bool) -> Self {
        Self {
            kind: InputKind::Button,
            code: code.into(),
            value: i32::from(pressed),
        }
    }

    pub fn axis(code: impl Into<String>, value: i32) -> Self {
        Self {
            kind: InputKind::Axis,
            code: code.into(),
            value,
        }
    }
}

/// Where an event came from. Only physical gamepads are rate-limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputSource {
    /// Touch / pointer driven controls and the console.
    Virtual,
    /// Physical controller, by device index.
    Gamepad(u32),
}

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Axis update within the emission threshold.
    Suppressed,
    /// Input is disabled (edit mode).
    Disabled,
    /// No open side-channel, or the send failed.
    Dropped,
}

// ── AxisFilter ───────────────────────────────────────────────────

/// Last sent value per (device, axis), used to decide whether a new
/// physical axis reading is worth transmitting.
#[derive(Debug, Default)]
pub struct AxisFilter {
    threshold: i32,
    last_sent: HashMap<(u32, String), i32>,
}

impl AxisFilter {
    pub fn new(threshold: i32) -> Self {
        Self {
            threshold,
            last_sent: HashMap::new(),
        }
    }

    /// Returns `true` and records `value` when it differs from the last
    /// sent value by more than the threshold. Unseen axes start at `0`.
    pub fn admit(&mut self, device: u32, code: &str, value: i32) -> bool {
        let key = (device, code.to_string());
        let last = self.last_sent.get(&key).copied().unwrap_or(0);
        if last.abs_diff(value) > self.threshold.unsigned_abs() {
            self.last_sent.insert(key, value);
            true
        } else {
            false
        }
    }

    pub fn last_sent(&self, device: u32, code: &str) -> Option<i32> {
        self.last_sent.get(&(device, code.to_string())).copied()
    }
}

// ── InputTransport ───────────────────────────────────────────────

/// Serializes input onto the current side-channel.
///
/// The channel slot is guarded by an async `RwLock`: sends hold the
/// read side across the write, so [`detach`](Self::detach) returns
/// only once no send can still reach the old channel.
pub struct InputTransport {
    channel: RwLock<Option<Arc<dyn SideChannel>>>,
    axes: Mutex<AxisFilter>,
    enabled: AtomicBool,
}

impl InputTransport {
    pub fn new(emit_threshold: i32) -> Self {
        Self {
            channel: RwLock::new(None),
            axes: Mutex::new(AxisFilter::new(emit_threshold)),
            enabled: AtomicBool::new(true),
        }
    }

    /// Route input to `channel` from now on.
    pub async fn attach(&self, channel: Arc<dyn SideChannel>) {
        debug!(label = channel.label(), "input attached to side-channel");
        *self.channel.write().await = Some(channel);
    }

    /// Stop routing input. Waits for in-flight sends to finish.
    pub async fn detach(&self) -> Option<Arc<dyn SideChannel>> {
        self.channel.write().await.take()
    }

    /// Whether a side-channel is attached and open.
    pub async fn is_connected(&self) -> bool {
        self.channel
            .read()
            .await
            .as_ref()
            .is_some_and(|channel| channel.is_open())
    }

    /// Enable or disable all input dispatch (disabled in edit mode).
    pub fn set_input_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn input_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Send an event from a virtual source.
    pub async fn send(&self, event: InputEvent) -> DispatchOutcome {
        self.dispatch(InputSource::Virtual, event).await
    }

    /// Apply gating and suppression, then send `event`.
    ///
    /// Never fails: input loss while disconnected is expected.
    pub async fn dispatch(&self, source: InputSource, event: InputEvent) -> DispatchOutcome {
        if !self.input_enabled() {
            return DispatchOutcome::Disabled;
        }

        if let (InputKind::Axis, InputSource::Gamepad(device)) = (event.kind, source) {
            let admitted = match self.axes.lock() {
                Ok(mut axes) => axes.admit(device, &event.code, event.value),
                Err(poisoned) => poisoned.into_inner().admit(device, &event.code, event.value),
            };
            if !admitted {
                return DispatchOutcome::Suppressed;
            }
        }

        let guard = self.channel.read().await;
        let Some(channel) = guard.as_ref().filter(|channel| channel.is_open()) else {
            trace!(code = %event.code, "{}", GamelinkError::TransportUnavailable);
            return DispatchOutcome::Dropped;
        };

        let text = match wire::encode(&WireMessage::from_input(&event)) {
            Ok(text) => text,
            Err(e) => {
                debug!("input encode failed: {e}");
                return DispatchOutcome::Dropped;
            }
        };

        match channel.send_text(&text).await {
            Ok(()) => DispatchOutcome::Sent,
            Err(e) => {
                trace!("input send failed: {e}");
                DispatchOutcome::Dropped
            }
        }
    }

    /// Create the single intake point and spawn the task draining it.
    ///
    /// The task ends when every [`InputIntake`] clone is dropped.
    pub fn intake(self: &Arc<Self>, capacity: usize) -> (InputIntake, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(InputSource, InputEvent)>(capacity);
        let transport = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some((source, event)) = rx.recv().await {
                transport.dispatch(source, event).await;
            }
        });
        (InputIntake { tx }, handle)
    }
}

impl Default for InputTransport {
    fn default() -> Self {
        Self::new(DEFAULT_EMIT_THRESHOLD)
    }
}

// ── InputIntake ──────────────────────────────────────────────────

/// Cloneable handle input sources push events into.
#[derive(Debug, Clone)]
pub struct InputIntake {
    tx: mpsc::Sender<(InputSource, InputEvent)>,
}

impl InputIntake {
    pub async fn push(&self, source: InputSource, event: InputEvent) -> Result<(), GamelinkError> {
        self.tx.send((source, event)).await?;
        Ok(())
    }

    pub async fn push_all(
        &self,
        source: InputSource,
        events: impl IntoIterator<Item = InputEvent>,
    ) -> Result<(), GamelinkError> {
        for event in events {
            self.push(source, event).await?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Side-channel that records what it was asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub open: AtomicBool,
        pub sent: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        pub fn open() -> Arc<Self> {
            let channel = Self::default();
            channel.open.store(true, Ordering::SeqCst);
            Arc::new(channel)
        }

        pub fn messages(&self) -> Vec<WireMessage> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|text| wire::decode(text).unwrap())
                .collect()
        }
    }

    #[async_trait]
    impl SideChannel for RecordingChannel {
        fn label(&self) -> &str {
            "input"
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        async fn send_text(&self, text: &str) -> Result<(), GamelinkError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn close(&self) -> Result<(), GamelinkError> {
            self.open.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn axis_filter_threshold_is_strict() {
        let mut filter = AxisFilter::new(500);
        assert!(!filter.admit(0, "LEFT_X", 500));
        assert!(filter.admit(0, "LEFT_X", 501));
        assert!(!filter.admit(0, "LEFT_X", 1000));
        assert!(filter.admit(0, "LEFT_X", 1002));
        assert_eq!(filter.last_sent(0, "LEFT_X"), Some(1002));
        // Independent per device and per axis.
        assert!(filter.admit(1, "LEFT_X", 1002));
        assert!(!filter.admit(0, "LEFT_Y", 100));
    }

    #[test]
    fn axis_filter_handles_extreme_values() {
        let mut filter = AxisFilter::new(500);
        assert!(filter.admit(0, "RIGHT_X", i32::MAX));
        assert!(filter.admit(0, "RIGHT_X", i32::MIN));
        assert_eq!(filter.last_sent(0, "RIGHT_X"), Some(i32::MIN));
        assert!(!filter.admit(0, "RIGHT_X", i32::MIN + 500));
    }

    #[tokio::test]
    async fn drops_silently_without_channel() {
        let transport = InputTransport::default();
        let outcome = transport.send(InputEvent::button("A", true)).await;
        assert_eq!(outcome, DispatchOutcome::Dropped);
    }

    #[tokio::test]
    async fn drops_when_channel_not_open() {
        let transport = InputTransport::default();
        let channel = Arc::new(RecordingChannel::default());
        transport.attach(channel.clone()).await;
        assert_eq!(
            transport.send(InputEvent::button("A", true)).await,
            DispatchOutcome::Dropped
        );
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn buttons_are_never_suppressed() {
        let transport = InputTransport::default();
        let channel = RecordingChannel::open();
        transport.attach(channel.clone()).await;

        let presses = [true, false, true, true, false, false];
        for pressed in presses {
            let outcome = transport
                .dispatch(InputSource::Gamepad(0), InputEvent::button("B", pressed))
                .await;
            assert_eq!(outcome, DispatchOutcome::Sent);
        }

        let values: Vec<u8> = channel
            .messages()
            .into_iter()
            .map(|m| match m {
                WireMessage::Button { value, .. } => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, [1, 0, 1, 1, 0, 0]);
    }

    #[tokio::test]
    async fn gamepad_axes_are_rate_limited_virtual_are_not() {
        let transport = InputTransport::default();
        let channel = RecordingChannel::open();
        transport.attach(channel.clone()).await;

        for value in [100, 200, 300] {
            assert_eq!(
                transport
                    .dispatch(InputSource::Gamepad(0), InputEvent::axis("LEFT_X", value))
                    .await,
                DispatchOutcome::Suppressed
            );
            assert_eq!(
                transport.send(InputEvent::axis("RIGHT_X", value)).await,
                DispatchOutcome::Sent
            );
        }
        assert_eq!(channel.messages().len(), 3);
    }

    #[tokio::test]
    async fn emitted_gamepad_axes_respect_threshold() {
        let transport = InputTransport::default();
        let channel = RecordingChannel::open();
        transport.attach(channel.clone()).await;

        let readings = [0, 120, 600, 900, 1150, 1200, -300, -250, 32767, 32500, 0];
        for value in readings {
            transport
                .dispatch(InputSource::Gamepad(0), InputEvent::axis("LEFT_Y", value))
                .await;
        }

        let sent: Vec<i32> = channel
            .messages()
            .into_iter()
            .map(|m| match m {
                WireMessage::Axis { value, .. } => value,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(sent, [600, 1200, -300, 32767, 0]);

        let mut last = 0;
        for value in sent {
            assert!((value - last).abs() > DEFAULT_EMIT_THRESHOLD);
            last = value;
        }
    }

    #[tokio::test]
    async fn edit_mode_disables_dispatch() {
        let transport = InputTransport::default();
        let channel = RecordingChannel::open();
        transport.attach(channel.clone()).await;

        transport.set_input_enabled(false);
        assert_eq!(
            transport.send(InputEvent::button("A", true)).await,
            DispatchOutcome::Disabled
        );
        transport.set_input_enabled(true);
        assert_eq!(
            transport.send(InputEvent::button("A", true)).await,
            DispatchOutcome::Sent
        );
    }

    #[tokio::test]
    async fn detach_stops_delivery_to_old_channel() {
        let transport = InputTransport::default();
        let old = RecordingChannel::open();
        transport.attach(old.clone()).await;
        assert!(transport.is_connected().await);

        let detached = transport.detach().await;
        assert!(detached.is_some());
        transport.send(InputEvent::button("X", true)).await;
        assert!(old.sent.lock().unwrap().is_empty());
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn intake_preserves_order() {
        let transport = Arc::new(InputTransport::default());
        let channel = RecordingChannel::open();
        transport.attach(channel.clone()).await;

        let (intake, pump) = transport.intake(16);
        intake
            .push_all(
                InputSource::Virtual,
                [
                    InputEvent::button("A", true),
                    InputEvent::axis("LEFT_X", 10),
                    InputEvent::button("A", false),
                ],
            )
            .await
            .unwrap();
        drop(intake);
        pump.await.unwrap();

        assert_eq!(
            channel.messages(),
            vec![
                WireMessage::Button {
                    code: "A".into(),
                    value: 1
                },
                WireMessage::Axis {
                    code: "LEFT_X".into(),
                    value: 10
                },
                WireMessage::Button {
                    code: "A".into(),
                    value: 0
                },
            ]
        );
    }
}
