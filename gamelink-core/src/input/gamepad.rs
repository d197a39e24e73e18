//! Physical controller polling.
//!
//! Controllers are sampled at a fixed rate while one is active and not
//! at all otherwise. Discovery runs once per second while no
//! controller is active, in addition to connect / disconnect
//! notifications, since some platforms never notify for a controller
//! that was already attached.
//!
//! Only one controller is active at a time. A second one is ignored
//! until the active one goes away.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GamepadConfig;
use crate::input::{InputEvent, InputIntake, InputSource};
use crate::wire::AXIS_MAX;

/// Standard-mapping button index → wire code.
pub const BUTTON_MAP: [&str; 17] = [
    "A", "B", "X", "Y", "LB", "RB", "LT", "RT", "SELECT", "START", "L3", "R3", "DPAD_UP",
    "DPAD_DOWN", "DPAD_LEFT", "DPAD_RIGHT", "HOME",
];

/// Standard-mapping axis index → wire code.
pub const AXIS_MAP: [&str; 4] = ["LEFT_X", "LEFT_Y", "RIGHT_X", "RIGHT_Y"];

// ── Backend ──────────────────────────────────────────────────────

/// Identity of an attached controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamepadInfo {
    pub index: u32,
    pub id: String,
}

/// One snapshot of a controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GamepadState {
    pub buttons: Vec<bool>,
    /// Raw analog values in `-1.0..=1.0`.
    pub axes: Vec<f64>,
}

/// Platform controller API.
pub trait GamepadBackend: Send + Sync {
    /// Controllers currently attached.
    fn connected(&self) -> Vec<GamepadInfo>;

    /// Current state of controller `index`, `None` once it is gone.
    fn state(&self, index: u32) -> Option<GamepadState>;
}

/// Platform connect / disconnect notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GamepadNotification {
    Connected(GamepadInfo),
    Disconnected(u32),
}

/// Apply the dead zone and scale a raw reading to the wire range.
pub fn scale_axis(raw: f64, dead_zone: f64) -> i32 {
    let raw = raw.clamp(-1.0, 1.0);
    if raw.abs() < dead_zone {
        return 0;
    }
    (raw * f64::from(AXIS_MAX)).round() as i32
}

// ── GamepadPoller ────────────────────────────────────────────────

/// Turns controller snapshots into [`InputEvent`]s.
///
/// Buttons are diffed against the previous snapshot. Axes are sent
/// on every sample; the [`InputTransport`](crate::input::InputTransport)
/// applies the per-axis emission threshold.
pub struct GamepadPoller {
    backend: Arc<dyn GamepadBackend>,
    config: GamepadConfig,
    active: Option<GamepadInfo>,
    prev_buttons: Vec<bool>,
}

impl GamepadPoller {
    pub fn new(backend: Arc<dyn GamepadBackend>, config: GamepadConfig) -> Self {
        Self {
            backend,
            config,
            active: None,
            prev_buttons: Vec::new(),
        }
    }

    pub fn active(&self) -> Option<&GamepadInfo> {
        self.active.as_ref()
    }

    /// Adopt `info` unless a controller is already active.
    pub fn on_connect(&mut self, info: GamepadInfo) -> bool {
        if let Some(active) = &self.active {
            debug!(index = info.index, active = active.index, "ignoring second gamepad");
            return false;
        }
        info!(index = info.index, id = %info.id, "gamepad connected");
        self.active = Some(info);
        self.prev_buttons.clear();
        true
    }

    /// Release the active controller if it is `index`.
    pub fn on_disconnect(&mut self, index: u32) -> bool {
        if self.active.as_ref().is_some_and(|a| a.index == index) {
            info!(index, "gamepad disconnected");
            self.active = None;
            self.prev_buttons.clear();
            true
        } else {
            false
        }
    }

    /// Adopt the first attached controller, if none is active.
    pub fn discover(&mut self) -> bool {
        if self.active.is_some() {
            return false;
        }
        match self.backend.connected().into_iter().next() {
            Some(info) => self.on_connect(info),
            None => false,
        }
    }

    /// Read the active controller once.
    ///
    /// A controller that no longer reports state is treated as
    /// disconnected.
    pub fn sample(&mut self) -> Vec<InputEvent> {
        let Some(index) = self.active.as_ref().map(|a| a.index) else {
            return Vec::new();
        };
        let Some(state) = self.backend.state(index) else {
            self.on_disconnect(index);
            return Vec::new();
        };

        let mut events = Vec::new();

        if self.prev_buttons.len() < state.buttons.len() {
            self.prev_buttons.resize(state.buttons.len(), false);
        }
        for (i, &pressed) in state.buttons.iter().enumerate() {
            if self.prev_buttons[i] == pressed {
                continue;
            }
            self.prev_buttons[i] = pressed;
            if let Some(code) = BUTTON_MAP.get(i) {
                events.push(InputEvent::button(*code, pressed));
            }
        }

        for (i, &raw) in state.axes.iter().enumerate() {
            if let Some(code) = AXIS_MAP.get(i) {
                events.push(InputEvent::axis(*code, scale_axis(raw, self.config.dead_zone)));
            }
        }

        events
    }

    /// Drive discovery and polling until cancelled or the intake closes.
    pub async fn run(
        mut self,
        intake: InputIntake,
        mut notifications: mpsc::Receiver<GamepadNotification>,
        cancel: CancellationToken,
    ) {
        let mut discovery = time::interval(self.config.discovery_interval());
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut poll = time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(note) = notifications.recv() => match note {
                    GamepadNotification::Connected(info) => {
                        if self.on_connect(info) {
                            poll.reset();
                        }
                    }
                    GamepadNotification::Disconnected(index) => {
                        self.on_disconnect(index);
                    }
                },
                _ = discovery.tick(), if self.active.is_none() => {
                    if self.discover() {
                        poll.reset();
                    }
                }
                _ = poll.tick(), if self.active.is_some() => {
                    let Some(index) = self.active.as_ref().map(|a| a.index) else {
                        continue;
                    };
                    let events = self.sample();
                    if intake.push_all(InputSource::Gamepad(index), events).await.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("gamepad poller stopped");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::input::tests::RecordingChannel;
    use crate::input::InputTransport;
    use crate::wire::WireMessage;

    #[derive(Default)]
    struct FakePads {
        pads: Mutex<HashMap<u32, (String, GamepadState)>>,
    }

    impl FakePads {
        fn plug(&self, index: u32, id: &str) {
            self.pads
                .lock()
                .unwrap()
                .insert(index, (id.to_string(), GamepadState::default()));
        }

        fn unplug(&self, index: u32) {
            self.pads.lock().unwrap().remove(&index);
        }

        fn set(&self, index: u32, buttons: Vec<bool>, axes: Vec<f64>) {
            if let Some((_, state)) = self.pads.lock().unwrap().get_mut(&index) {
                *state = GamepadState { buttons, axes };
            }
        }
    }

    impl GamepadBackend for FakePads {
        fn connected(&self) -> Vec<GamepadInfo> {
            let pads = self.pads.lock().unwrap();
            let mut list: Vec<_> = pads
                .iter()
                .map(|(index, (id, _))| GamepadInfo {
                    index: *index,
                    id: id.clone(),
                })
                .collect();
            list.sort_by_key(|info| info.index);
            list
        }

        fn state(&self, index: u32) -> Option<GamepadState> {
            self.pads.lock().unwrap().get(&index).map(|(_, s)| s.clone())
        }
    }

    fn pad(index: u32) -> GamepadInfo {
        GamepadInfo {
            index,
            id: format!("pad-{index}"),
        }
    }

    #[test]
    fn dead_zone_reads_exactly_zero() {
        for raw in [0.0, 0.05, -0.1, 0.149, -0.1499] {
            assert_eq!(scale_axis(raw, 0.15), 0);
        }
        assert_eq!(scale_axis(0.15, 0.15), 4915);
        assert_eq!(scale_axis(1.0, 0.15), 32767);
        assert_eq!(scale_axis(-1.0, 0.15), -32767);
        assert_eq!(scale_axis(-3.0, 0.15), -32767);
    }

    #[test]
    fn first_come_first_served() {
        let backend = Arc::new(FakePads::default());
        let mut poller = GamepadPoller::new(backend, GamepadConfig::default());

        assert!(poller.on_connect(pad(0)));
        assert!(!poller.on_connect(pad(1)));
        assert_eq!(poller.active().map(|a| a.index), Some(0));

        assert!(!poller.on_disconnect(1));
        assert!(poller.on_disconnect(0));
        assert!(poller.active().is_none());
        assert!(poller.on_connect(pad(1)));
    }

    #[test]
    fn discovery_picks_up_already_attached_pad() {
        let backend = Arc::new(FakePads::default());
        let mut poller = GamepadPoller::new(backend.clone(), GamepadConfig::default());
        assert!(!poller.discover());

        backend.plug(2, "ipega");
        assert!(poller.discover());
        assert_eq!(poller.active().map(|a| a.id.as_str()), Some("ipega"));
        assert!(!poller.discover());
    }

    #[test]
    fn sample_diffs_buttons_and_maps_codes() {
        let backend = Arc::new(FakePads::default());
        backend.plug(0, "pad");
        let mut poller = GamepadPoller::new(backend.clone(), GamepadConfig::default());
        poller.discover();

        let mut buttons = vec![false; 18];
        buttons[0] = true;
        buttons[17] = true; // unmapped
        backend.set(0, buttons.clone(), vec![0.5, 0.1]);
        let events = poller.sample();
        assert_eq!(
            events,
            vec![
                InputEvent::button("A", true),
                InputEvent::axis("LEFT_X", 16384),
                InputEvent::axis("LEFT_Y", 0),
            ]
        );

        // Unchanged buttons are not repeated.
        backend.set(0, buttons.clone(), vec![]);
        assert!(poller.sample().is_empty());

        buttons[0] = false;
        buttons[12] = true;
        backend.set(0, buttons, vec![]);
        assert_eq!(
            poller.sample(),
            vec![
                InputEvent::button("A", false),
                InputEvent::button("DPAD_UP", true),
            ]
        );
    }

    #[test]
    fn vanished_pad_is_released() {
        let backend = Arc::new(FakePads::default());
        backend.plug(0, "pad");
        let mut poller = GamepadPoller::new(backend.clone(), GamepadConfig::default());
        poller.discover();

        backend.unplug(0);
        assert!(poller.sample().is_empty());
        assert!(poller.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_only_while_active() {
        let backend = Arc::new(FakePads::default());
        let transport = Arc::new(InputTransport::default());
        let channel = RecordingChannel::open();
        transport.attach(channel.clone()).await;
        let (intake, pump) = transport.intake(64);

        let (notify_tx, notify_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let poller = GamepadPoller::new(backend.clone(), GamepadConfig::default());
        let task = tokio::spawn(poller.run(intake, notify_rx, cancel.clone()));

        time::sleep(Duration::from_millis(100)).await;
        assert!(channel.messages().is_empty());

        backend.plug(0, "pad");
        backend.set(0, vec![true], vec![0.9]);
        notify_tx
            .send(GamepadNotification::Connected(pad(0)))
            .await
            .unwrap();
        time::sleep(Duration::from_millis(100)).await;

        // One press, and the axis once despite many polls.
        assert_eq!(
            channel.messages(),
            vec![
                WireMessage::Button {
                    code: "A".into(),
                    value: 1
                },
                WireMessage::Axis {
                    code: "LEFT_X".into(),
                    value: 29490
                },
            ]
        );

        cancel.cancel();
        task.await.unwrap();
        pump.await.unwrap();
    }
}
