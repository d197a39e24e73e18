//! On-screen analog stick.
//!
//! Pointer positions are relative to the stick centre and clamped to
//! its visual radius. Every move is sent; virtual sticks are
//! touch-driven and need to feel direct, so no emission threshold
//! applies.

use crate::input::InputEvent;
use crate::wire::AXIS_MAX;

/// One virtual stick with its two axes and its click button.
#[derive(Debug, Clone)]
pub struct VirtualJoystick {
    axis_x: &'static str,
    axis_y: &'static str,
    button: &'static str,
    radius: f64,
    pointer: Option<u64>,
}

impl VirtualJoystick {
    pub fn new(
        axis_x: &'static str,
        axis_y: &'static str,
        button: &'static str,
        radius: f64,
    ) -> Self {
        Self {
            axis_x,
            axis_y,
            button,
            radius: radius.max(f64::EPSILON),
            pointer: None,
        }
    }

    pub fn left(radius: f64) -> Self {
        Self::new("LEFT_X", "LEFT_Y", "L3", radius)
    }

    pub fn right(radius: f64) -> Self {
        Self::new("RIGHT_X", "RIGHT_Y", "R3", radius)
    }

    pub fn is_active(&self) -> bool {
        self.pointer.is_some()
    }

    /// Pointer `id` went down at offset (`dx`, `dy`) from the centre.
    pub fn press(&mut self, id: u64, dx: f64, dy: f64) -> Vec<InputEvent> {
        self.pointer = Some(id);
        let mut events = vec![InputEvent::button(self.button, true)];
        events.extend(self.move_to(id, dx, dy));
        events
    }

    /// Pointer `id` moved. Other pointers are ignored.
    pub fn move_to(&mut self, id: u64, dx: f64, dy: f64) -> Vec<InputEvent> {
        if self.pointer != Some(id) {
            return Vec::new();
        }
        let (x, y) = self.axis_values(dx, dy);
        vec![InputEvent::axis(self.axis_x, x), InputEvent::axis(self.axis_y, y)]
    }

    /// Pointer `id` went up or was cancelled.
    pub fn release(&mut self, id: u64) -> Vec<InputEvent> {
        if self.pointer != Some(id) {
            return Vec::new();
        }
        self.pointer = None;
        vec![
            InputEvent::axis(self.axis_x, 0),
            InputEvent::axis(self.axis_y, 0),
            InputEvent::button(self.button, false),
        ]
    }

    fn axis_values(&self, dx: f64, dy: f64) -> (i32, i32) {
        let distance = dx.hypot(dy);
        let (x, y) = if distance > self.radius {
            let scale = self.radius / distance;
            (dx * scale, dy * scale)
        } else {
            (dx, dy)
        };
        let max = f64::from(AXIS_MAX);
        (
            (x / self.radius * max).round() as i32,
            (y / self.radius * max).round() as i32,
        )
    }
}
