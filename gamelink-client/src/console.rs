//! Line-oriented operator console.
//!
//! ```text
//! start | stop | restart          session lifecycle
//! quality                         advance the quality ladder
//! button <CODE> <0|1>             press / release a button
//! axis <CODE> <value>             set an axis (-32767..=32767)
//! stick <left|right> <dx> <dy>    drag a virtual stick
//! stick <left|right> release      let go of a virtual stick
//! edit <on|off>                   edit mode (input disabled)
//! status                          session state and last stats
//! quit
//! ```

use gamelink_core::{
    Bitrate, GamelinkError, InputEvent, InputIntake, InputSource, QualityController,
    SessionHandle, VirtualJoystick,
};

/// Pointer id used for console-driven sticks.
const CONSOLE_POINTER: u64 = 0;

// ── ConsoleCommand ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stick {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Restart,
    Quality,
    Button { code: String, pressed: bool },
    Axis { code: String, value: i32 },
    StickMove { stick: Stick, dx: f64, dy: f64 },
    StickRelease(Stick),
    Edit(bool),
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Result<Self, GamelinkError>> {
        let mut words = line.split_whitespace();
        let verb = words.next()?;
        let args: Vec<&str> = words.collect();
        Some(Self::from_words(verb, &args))
    }

    fn from_words(verb: &str, args: &[&str]) -> Result<Self, GamelinkError> {
        let usage = |text: &str| GamelinkError::InvalidMessage(format!("usage: {text}"));

        match (verb.to_ascii_lowercase().as_str(), args) {
            ("start", []) => Ok(Self::Start),
            ("stop", []) => Ok(Self::Stop),
            ("restart", []) => Ok(Self::Restart),
            ("quality", []) => Ok(Self::Quality),
            ("status", []) => Ok(Self::Status),
            ("help" | "?", []) => Ok(Self::Help),
            ("quit" | "exit", []) => Ok(Self::Quit),
            ("button", [code, value]) => {
                let pressed = match *value {
                    "1" => true,
                    "0" => false,
                    _ => return Err(usage("button <CODE> <0|1>")),
                };
                Ok(Self::Button {
                    code: code.to_ascii_uppercase(),
                    pressed,
                })
            }
            ("axis", [code, value]) => {
                let value: i32 = value.parse().map_err(|_| usage("axis <CODE> <value>"))?;
                Ok(Self::Axis {
                    code: code.to_ascii_uppercase(),
                    value,
                })
            }
            ("stick", [side, rest @ ..]) => {
                let stick = match side.to_ascii_lowercase().as_str() {
                    "left" => Stick::Left,
                    "right" => Stick::Right,
                    _ => return Err(usage("stick <left|right> <dx> <dy>")),
                };
                match rest {
                    ["release"] => Ok(Self::StickRelease(stick)),
                    [dx, dy] => {
                        let coordinate = |text: &str| {
                            text.parse::<f64>()
                                .map_err(|_| usage("stick <left|right> <dx> <dy>"))
                        };
                        let (dx, dy) = (coordinate(*dx)?, coordinate(*dy)?);
                        Ok(Self::StickMove { stick, dx, dy })
                    }
                    _ => Err(usage("stick <left|right> <dx> <dy> | release")),
                }
            }
            ("edit", [mode]) => match mode.to_ascii_lowercase().as_str() {
                "on" => Ok(Self::Edit(true)),
                "off" => Ok(Self::Edit(false)),
                _ => Err(usage("edit <on|off>")),
            },
            (other, _) => Err(GamelinkError::InvalidMessage(format!(
                "unknown command {other:?}, try `help`"
            ))),
        }
    }
}

// ── Console ──────────────────────────────────────────────────────

/// Executes console commands against the session and input intake.
pub struct Console {
    session: SessionHandle,
    quality: QualityController,
    intake: InputIntake,
    left: VirtualJoystick,
    right: VirtualJoystick,
}

impl Console {
    pub fn new(
        session: SessionHandle,
        quality: QualityController,
        intake: InputIntake,
        joystick_radius: f64,
    ) -> Self {
        Self {
            session,
            quality,
            intake,
            left: VirtualJoystick::left(joystick_radius),
            right: VirtualJoystick::right(joystick_radius),
        }
    }

    /// Run one command, returning the text to show the operator.
    pub async fn execute(&mut self, command: ConsoleCommand) -> Result<String, GamelinkError> {
        match command {
            ConsoleCommand::Start => {
                self.session.start().await?;
                Ok("negotiated, waiting for media".into())
            }
            ConsoleCommand::Stop => {
                self.session.stop().await?;
                Ok("stopped".into())
            }
            ConsoleCommand::Restart => {
                self.session.restart("operator").await?;
                Ok("restarted".into())
            }
            ConsoleCommand::Quality => {
                let level = self.quality.advance().await?;
                Ok(format!("quality: {}", level.display_name()))
            }
            ConsoleCommand::Button { code, pressed } => {
                self.push(vec![InputEvent::button(code, pressed)]).await?;
                Ok(String::new())
            }
            ConsoleCommand::Axis { code, value } => {
                self.push(vec![InputEvent::axis(code, value)]).await?;
                Ok(String::new())
            }
            ConsoleCommand::StickMove { stick, dx, dy } => {
                let joystick = self.stick(stick);
                let events = if joystick.is_active() {
                    joystick.move_to(CONSOLE_POINTER, dx, dy)
                } else {
                    joystick.press(CONSOLE_POINTER, dx, dy)
                };
                self.push(events).await?;
                Ok(String::new())
            }
            ConsoleCommand::StickRelease(stick) => {
                let events = self.stick(stick).release(CONSOLE_POINTER);
                self.push(events).await?;
                Ok(String::new())
            }
            ConsoleCommand::Edit(on) => {
                self.session.input().set_input_enabled(!on);
                Ok(format!("edit mode {}", if on { "on" } else { "off" }))
            }
            ConsoleCommand::Status => Ok(self.status_line()),
            ConsoleCommand::Help => Ok(HELP.trim().to_string()),
            ConsoleCommand::Quit => Ok("bye".into()),
        }
    }

    fn stick(&mut self, stick: Stick) -> &mut VirtualJoystick {
        match stick {
            Stick::Left => &mut self.left,
            Stick::Right => &mut self.right,
        }
    }

    async fn push(&self, events: Vec<InputEvent>) -> Result<(), GamelinkError> {
        self.intake.push_all(InputSource::Virtual, events).await
    }

    fn status_line(&self) -> String {
        let status = self.session.status();
        let mut line = format!("state: {}, quality: {}", status.state, self.quality.current());
        if let Some(message) = &status.message {
            line.push_str(&format!(", {message}"));
        }
        if status.show_reconnect {
            line.push_str(" (restart to reconnect)");
        }
        if let Some(stats) = self.session.stats_receiver().borrow().as_ref() {
            let bitrate = match stats.bitrate {
                Bitrate::Mbps(mbps) => format!("{mbps:.2} Mbps"),
                Bitrate::Unknown => "-".into(),
            };
            line.push_str(&format!(
                ", {} fps, {bitrate}, rtt {} ms, audio latency {:.0} ms",
                stats.video_fps, stats.rtt_ms, stats.audio.jitter_buffer_delay_ms
            ));
        }
        if !self.session.input().input_enabled() {
            line.push_str(", input disabled");
        }
        line
    }
}

const HELP: &str = r#"
start | stop | restart          session lifecycle
quality                         advance the quality ladder
button <CODE> <0|1>             press / release a button
axis <CODE> <value>             set an axis (-32767..=32767)
stick <left|right> <dx> <dy>    drag a virtual stick
stick <left|right> release      let go of a virtual stick
edit <on|off>                   edit mode (input disabled)
status                          session state and last stats
quit
"#;

// ── Tests ────────────────────────────────────────────────────────
