//! Link-health sampling.
//!
//! Every second the collector reads the transport's cumulative
//! counters, derives rates against the previous reading, and forwards
//! a compact `STATS` message to the host. Every fifth tick it also
//! emits an extended diagnostic record for operators.
//!
//! Derived values that cannot be computed (no previous reading, zero
//! elapsed time, zero denominator) are reported as unknown or zero,
//! never as a fault.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::GamelinkError;
use crate::negotiation::{SideChannel, TrackKind, Transport};
use crate::wire::{self, AudioReport, WireMessage};

// ── Raw counters ─────────────────────────────────────────────────

/// Cumulative inbound video counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoCounters {
    pub bytes_received: u64,
    /// Instantaneous rate reported by the transport, if any.
    pub frames_per_second: Option<f64>,
}

/// Cumulative inbound audio counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioCounters {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
    /// Interarrival jitter in seconds.
    pub jitter: f64,
    /// Total playout buffering in seconds.
    pub jitter_buffer_delay: f64,
    pub jitter_buffer_emitted_count: u64,
    /// Report timestamp in milliseconds.
    pub timestamp: f64,
}

/// Whether a track is still delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackLiveness {
    pub kind: TrackKind,
    pub live: bool,
}

/// One reading of the transport's counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCounters {
    pub video: Option<VideoCounters>,
    pub audio: Option<AudioCounters>,
    /// Round-trip time of the last succeeded connectivity probe, seconds.
    pub round_trip_time: Option<f64>,
    pub tracks: Vec<TrackLiveness>,
}

// ── Snapshot ─────────────────────────────────────────────────────

/// Video bitrate derived from two consecutive readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bitrate {
    /// No previous reading yet, or no time elapsed.
    Unknown,
    Mbps(f64),
}

impl Bitrate {
    pub fn mbps(self) -> Option<f64> {
        match self {
            Self::Unknown => None,
            Self::Mbps(v) => Some(v),
        }
    }
}

impl std::fmt::Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "--"),
            Self::Mbps(v) => write!(f, "{v:.1} Mbps"),
        }
    }
}

/// Derived audio health.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioStats {
    pub bytes_received: u64,
    pub packets_received: u64,
    pub packets_lost: i64,
    pub jitter_seconds: f64,
    pub jitter_buffer_delay_ms: f64,
}

/// Health metrics for one sampling tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Rounded frames per second; `0` means unknown / idle.
    pub video_fps: u32,
    pub bitrate: Bitrate,
    pub rtt_ms: u32,
    pub audio: AudioStats,
}

/// Extended record emitted every few ticks for operator debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticRecord {
    pub tick: u64,
    /// `packetsLost / packetsReceived`, `None` when nothing was received.
    pub loss_rate: Option<f64>,
    pub audio: AudioStats,
    pub tracks: Vec<TrackLiveness>,
}

impl DiagnosticRecord {
    /// Loss rate as a percentage with two decimals, or `N/A`.
    pub fn loss_rate_display(&self) -> String {
        match self.loss_rate {
            Some(rate) => format!("{:.2}%", rate * 100.0),
            None => "N/A".to_string(),
        }
    }
}

/// Everything one tick produces.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub snapshot: StatsSnapshot,
    /// `STATS` message for the host, if there is anything to report.
    pub forward: Option<WireMessage>,
    pub diagnostic: Option<DiagnosticRecord>,
}

// ── TelemetryCollector ───────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct PreviousReading {
    bytes_received: u64,
    at: Instant,
}

/// Derives [`StatsSnapshot`]s from consecutive counter readings.
///
/// One collector belongs to one session; the previous reading is
/// replaced in the same `&mut self` call that consumes it.
#[derive(Debug)]
pub struct TelemetryCollector {
    previous: Option<PreviousReading>,
    ticks: u64,
    diagnostic_every: u64,
}

impl TelemetryCollector {
    pub fn new(diagnostic_every: u64) -> Self {
        Self {
            previous: None,
            ticks: 0,
            diagnostic_every: diagnostic_every.max(1),
        }
    }

    /// Forget the previous reading; the next tick reports no bitrate.
    pub fn reset(&mut self) {
        self.previous = None;
        self.ticks = 0;
    }

    /// Number of ticks processed since construction or reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Process one counter reading taken at `now`.
    pub fn tick(&mut self, counters: &RawCounters, now: Instant) -> TickOutcome {
        self.ticks += 1;

        let (video_fps, bitrate) = match &counters.video {
            Some(video) => {
                let fps = video.frames_per_second.map(|f| f.round().max(0.0) as u32).unwrap_or(0);
                (fps, self.derive_bitrate(video.bytes_received, now))
            }
            None => (0, Bitrate::Unknown),
        };

        let rtt_ms = counters
            .round_trip_time
            .map(|rtt| (rtt * 1000.0).round().max(0.0) as u32)
            .unwrap_or(0);

        let audio = counters.audio.as_ref().map(audio_stats).unwrap_or_default();

        let snapshot = StatsSnapshot {
            video_fps,
            bitrate,
            rtt_ms,
            audio,
        };

        let forward = match Self::forward_message(&snapshot, counters.audio.as_ref()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!("no STATS forward this tick: {e}");
                None
            }
        };

        let diagnostic = (self.ticks % self.diagnostic_every == 0).then(|| DiagnosticRecord {
            tick: self.ticks,
            loss_rate: counters.audio.as_ref().and_then(|a| {
                (a.packets_received > 0).then(|| a.packets_lost as f64 / a.packets_received as f64)
            }),
            audio: snapshot.audio.clone(),
            tracks: counters.tracks.clone(),
        });

        TickOutcome {
            snapshot,
            forward,
            diagnostic,
        }
    }

    fn derive_bitrate(&mut self, bytes_received: u64, now: Instant) -> Bitrate {
        let previous = self.previous.replace(PreviousReading {
            bytes_received,
            at: now,
        });

        let Some(previous) = previous else {
            return Bitrate::Unknown;
        };

        let elapsed = now.saturating_duration_since(previous.at).as_secs_f64();
        if elapsed <= 0.0 {
            return Bitrate::Unknown;
        }

        let delta = bytes_received.saturating_sub(previous.bytes_received) as f64;
        Bitrate::Mbps(delta * 8.0 / (elapsed * 1e6))
    }

    fn forward_message(
        snapshot: &StatsSnapshot,
        audio: Option<&AudioCounters>,
    ) -> Result<WireMessage, GamelinkError> {
        if snapshot.video_fps == 0 {
            return Err(GamelinkError::TelemetryComputationSkipped("video fps unknown"));
        }
        let Some(mbps) = snapshot.bitrate.mbps() else {
            return Err(GamelinkError::TelemetryComputationSkipped("no previous sample"));
        };

        let audio = audio
            .map(|a| AudioReport {
                bytes: a.bytes_received,
                packets: a.packets_received,
                packets_lost: a.packets_lost,
                jitter: a.jitter,
                timestamp: a.timestamp,
            })
            .unwrap_or_default();

        Ok(WireMessage::Stats {
            fps: snapshot.video_fps,
            bitrate: wire::format_bitrate(mbps),
            latency: snapshot.rtt_ms,
            audio,
        })
    }

    /// Sample `transport` every `period` until `cancel` fires.
    ///
    /// `STATS` messages go out on `channel` when it is open; snapshots
    /// are published on `snapshots` for the status display.
    pub async fn run(
        mut self,
        transport: Arc<dyn Transport>,
        channel: Arc<dyn SideChannel>,
        period: Duration,
        snapshots: Arc<watch::Sender<Option<StatsSnapshot>>>,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let counters = match transport.read_counters().await {
                Ok(c) => c,
                Err(e) => {
                    debug!("counter read failed: {e}");
                    continue;
                }
            };

            let outcome = self.tick(&counters, Instant::now());

            if let Some(message) = outcome.forward {
                if channel.is_open() {
                    match wire::encode(&message) {
                        Ok(text) => {
                            if let Err(e) = channel.send_text(&text).await {
                                debug!("STATS send failed: {e}");
                            }
                        }
                        Err(e) => debug!("STATS encode failed: {e}"),
                    }
                }
            }

            if let Some(record) = &outcome.diagnostic {
                info!(
                    tick = record.tick,
                    loss_rate = %record.loss_rate_display(),
                    audio_bytes = record.audio.bytes_received,
                    audio_packets = record.audio.packets_received,
                    audio_lost = record.audio.packets_lost,
                    jitter = record.audio.jitter_seconds,
                    audio_latency_ms = record.audio.jitter_buffer_delay_ms,
                    tracks = ?record.tracks,
                    "link diagnostics"
                );
                if record.audio.bytes_received == 0 {
                    info!("no audio bytes received yet");
                }
            }

            let _ = snapshots.send(Some(outcome.snapshot));
        }

        debug!(ticks = self.ticks, "telemetry stopped");
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(5)
    }
}

fn audio_stats(audio: &AudioCounters) -> AudioStats {
    let jitter_buffer_delay_ms = if audio.jitter_buffer_emitted_count > 0 {
        audio.jitter_buffer_delay / audio.jitter_buffer_emitted_count as f64 * 1000.0
    } else {
        0.0
    };

    AudioStats {
        bytes_received: audio.bytes_received,
        packets_received: audio.packets_received,
        packets_lost: audio.packets_lost,
        jitter_seconds: audio.jitter,
        jitter_buffer_delay_ms,
    }
}

// ── Tests ────────────────────────────────────────────────────────
