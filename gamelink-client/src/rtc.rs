//! WebRTC connectivity backend.
//!
//! Implements the core's negotiation traits on top of the `webrtc`
//! crate: one peer connection per session with receive-only video and
//! audio transceivers, an unordered data channel for input and
//! telemetry, and RTP reader tasks that feed the media sink and the
//! link counters.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice::candidate::CandidatePairState;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use gamelink_core::telemetry::{AudioCounters, TrackLiveness, VideoCounters};
use gamelink_core::{
    ConnectivityState, EventSink, GamelinkError, MediaSample, MediaSink, NegotiationCapability,
    RawCounters, SessionDescription, SideChannel, TrackKind, Transport, TransportEvent,
};

fn rtc_error(context: &'static str) -> impl FnOnce(webrtc::Error) -> GamelinkError {
    move |e| GamelinkError::NegotiationFailed(format!("{context}: {e}"))
}

// ── Track counters ───────────────────────────────────────────────

/// Cumulative RTP counters for one inbound track.
#[derive(Debug, Default)]
struct TrackCounters {
    bytes: AtomicU64,
    packets: AtomicU64,
    lost: AtomicI64,
    /// Completed frames (RTP marker bit).
    frames: AtomicU64,
    /// Interarrival jitter in seconds, stored as `f64` bits.
    jitter: AtomicU64,
    live: AtomicBool,
    seen: AtomicBool,
}

impl TrackCounters {
    fn jitter(&self) -> f64 {
        f64::from_bits(self.jitter.load(Ordering::SeqCst))
    }

    fn set_jitter(&self, seconds: f64) {
        self.jitter.store(seconds.to_bits(), Ordering::SeqCst);
    }
}

/// Tracks sequence numbers to count gaps as loss.
#[derive(Debug, Default)]
struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    /// Packets missing between the previous sequence number and `seq`.
    fn gap(&mut self, seq: u16) -> i64 {
        let gap = match self.last {
            Some(last) => {
                let delta = seq.wrapping_sub(last);
                // Reordered or duplicate packets count as no loss.
                if delta == 0 || delta > u16::MAX / 2 {
                    return 0;
                }
                i64::from(delta) - 1
            }
            None => 0,
        };
        self.last = Some(seq);
        gap
    }
}

/// RFC 3550 interarrival jitter estimate for one RTP stream.
#[derive(Debug)]
struct JitterEstimator {
    clock_rate: f64,
    previous: Option<(u32, Instant)>,
    /// Current estimate in RTP timestamp units.
    jitter: f64,
}

impl JitterEstimator {
    fn new(clock_rate: u32) -> Self {
        Self {
            clock_rate: f64::from(clock_rate.max(1)),
            previous: None,
            jitter: 0.0,
        }
    }

    /// Fold in one packet and return the estimate in seconds.
    fn update(&mut self, rtp_timestamp: u32, arrival: Instant) -> f64 {
        if let Some((prev_timestamp, prev_arrival)) = self.previous {
            let arrival_delta =
                arrival.saturating_duration_since(prev_arrival).as_secs_f64() * self.clock_rate;
            // Reinterpret so wrapped or reordered timestamps give a signed delta.
            let sent_delta = f64::from(rtp_timestamp.wrapping_sub(prev_timestamp) as i32);
            let transit_delta = (arrival_delta - sent_delta).abs();
            self.jitter += (transit_delta - self.jitter) / 16.0;
        }
        self.previous = Some((rtp_timestamp, arrival));
        self.jitter / self.clock_rate
    }
}

/// Converts cumulative frame counts into a frame rate between reads.
#[derive(Debug, Default)]
struct FrameRate {
    previous: Option<(u64, Instant)>,
}

impl FrameRate {
    fn update(&mut self, frames: u64, now: Instant) -> Option<f64> {
        let previous = self.previous.replace((frames, now));
        let (prev_frames, prev_at) = previous?;
        let elapsed = now.saturating_duration_since(prev_at).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some(frames.saturating_sub(prev_frames) as f64 / elapsed)
    }
}

// ── WebRtcCapability ─────────────────────────────────────────────

/// [`NegotiationCapability`] backed by the `webrtc` crate.
pub struct WebRtcCapability {
    ice_servers: Vec<String>,
}

impl WebRtcCapability {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl NegotiationCapability for WebRtcCapability {
    async fn create_transport(
        &self,
        media: MediaSink,
        events: EventSink,
    ) -> Result<Arc<dyn Transport>, GamelinkError> {
        let transport = WebRtcTransport::connect(&self.ice_servers, media, events).await?;
        Ok(Arc::new(transport))
    }
}

// ── WebRtcTransport ──────────────────────────────────────────────

/// One peer connection to the streaming host.
pub struct WebRtcTransport {
    peer: Arc<RTCPeerConnection>,
    events: EventSink,
    gathering: AsyncMutex<Option<mpsc::Receiver<()>>>,
    video: Arc<TrackCounters>,
    audio: Arc<TrackCounters>,
    frame_rate: Mutex<FrameRate>,
    cancel: CancellationToken,
}

impl WebRtcTransport {
    async fn connect(
        ice_servers: &[String],
        media: MediaSink,
        events: EventSink,
    ) -> Result<Self, GamelinkError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(rtc_error("register codecs"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(rtc_error("register interceptors"))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let peer = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(rtc_error("create peer connection"))?,
        );

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            peer.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(rtc_error("add transceiver"))?;
        }

        let transport = Self {
            peer,
            events,
            gathering: AsyncMutex::new(None),
            video: Arc::new(TrackCounters::default()),
            audio: Arc::new(TrackCounters::default()),
            frame_rate: Mutex::new(FrameRate::default()),
            cancel: CancellationToken::new(),
        };
        transport.install_handlers(media);
        Ok(transport)
    }

    fn install_handlers(&self, media: MediaSink) {
        let events = self.events.clone();
        self.peer
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let events = events.clone();
                Box::pin(async move {
                    if let Some(state) = connectivity_from(state) {
                        debug!(session = events.generation(), ?state, "ice connection state");
                        events.emit(TransportEvent::Connectivity(state));
                    }
                })
            }));

        let events = self.events.clone();
        let video = Arc::clone(&self.video);
        let audio = Arc::clone(&self.audio);
        let cancel = self.cancel.clone();
        self.peer.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = events.clone();
            let media = media.clone();
            let cancel = cancel.clone();
            let (kind, counters) = match track.kind() {
                RTPCodecType::Audio => (TrackKind::Audio, Arc::clone(&audio)),
                _ => (TrackKind::Video, Arc::clone(&video)),
            };
            Box::pin(async move {
                info!(
                    session = events.generation(),
                    %kind,
                    codec = %track.codec().capability.mime_type,
                    "remote track"
                );
                tokio::spawn(read_track(track, kind, counters, media, events, cancel));
            })
        }));
    }

    fn audio_counters(&self) -> Option<AudioCounters> {
        if !self.audio.seen.load(Ordering::SeqCst) {
            return None;
        }
        // No playout happens here; samples go straight to the media sink,
        // so there is no jitter-buffer delay to report.
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or_default();
        Some(AudioCounters {
            bytes_received: self.audio.bytes.load(Ordering::SeqCst),
            packets_received: self.audio.packets.load(Ordering::SeqCst),
            packets_lost: self.audio.lost.load(Ordering::SeqCst),
            jitter: self.audio.jitter(),
            timestamp,
            ..Default::default()
        })
    }

    async fn round_trip_time(&self) -> Option<f64> {
        let report = self.peer.get_stats().await;
        succeeded_round_trip(report.reports.values().filter_map(|stats| match stats {
            StatsReportType::CandidatePair(pair) => {
                Some((pair.state, pair.nominated, pair.current_round_trip_time))
            }
            _ => None,
        }))
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn create_side_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn SideChannel>, GamelinkError> {
        let init = RTCDataChannelInit {
            ordered: Some(false),
            ..Default::default()
        };
        let channel = self
            .peer
            .create_data_channel(label, Some(init))
            .await
            .map_err(rtc_error("create data channel"))?;

        let events = self.events.clone();
        channel.on_open(Box::new(move || {
            let events = events.clone();
            Box::pin(async move { events.emit(TransportEvent::SideChannelOpen) })
        }));
        let events = self.events.clone();
        channel.on_close(Box::new(move || {
            let events = events.clone();
            Box::pin(async move { events.emit(TransportEvent::SideChannelClosed) })
        }));

        Ok(Arc::new(WebRtcSideChannel { channel }))
    }

    async fn create_offer(&self) -> Result<SessionDescription, GamelinkError> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(rtc_error("create offer"))?;
        // Subscribe before gathering starts.
        let gathering = self.peer.gathering_complete_promise().await;
        *self.gathering.lock().await = Some(gathering);
        self.peer
            .set_local_description(offer.clone())
            .await
            .map_err(rtc_error("set local description"))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn gathering_complete(&self) {
        let receiver = self.gathering.lock().await.take();
        if let Some(mut receiver) = receiver {
            let _ = receiver.recv().await;
        }
    }

    async fn local_description(&self) -> Result<SessionDescription, GamelinkError> {
        let local = self.peer.local_description().await.ok_or_else(|| {
            GamelinkError::NegotiationFailed("no local description after offer".into())
        })?;
        Ok(SessionDescription {
            sdp: local.sdp,
            kind: local.sdp_type.to_string(),
        })
    }

    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), GamelinkError> {
        let answer = RTCSessionDescription::answer(answer.sdp).map_err(rtc_error("parse answer"))?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(rtc_error("set remote description"))
    }

    async fn read_counters(&self) -> Result<RawCounters, GamelinkError> {
        let frames_per_second = match self.frame_rate.lock() {
            Ok(mut rate) => rate.update(self.video.frames.load(Ordering::SeqCst), Instant::now()),
            Err(poisoned) => poisoned
                .into_inner()
                .update(self.video.frames.load(Ordering::SeqCst), Instant::now()),
        };

        let video = self.video.seen.load(Ordering::SeqCst).then(|| VideoCounters {
            bytes_received: self.video.bytes.load(Ordering::SeqCst),
            frames_per_second,
        });

        let tracks = [(TrackKind::Video, &self.video), (TrackKind::Audio, &self.audio)]
            .into_iter()
            .filter(|(_, counters)| counters.seen.load(Ordering::SeqCst))
            .map(|(kind, counters)| TrackLiveness {
                kind,
                live: counters.live.load(Ordering::SeqCst),
            })
            .collect();

        Ok(RawCounters {
            video,
            audio: self.audio_counters(),
            round_trip_time: self.round_trip_time().await,
            tracks,
        })
    }

    async fn close(&self) -> Result<(), GamelinkError> {
        self.cancel.cancel();
        self.peer
            .close()
            .await
            .map_err(|e| GamelinkError::Other(format!("close peer connection: {e}")))
    }
}

/// Read RTP from `track` until it ends or the transport closes.
async fn read_track(
    track: Arc<TrackRemote>,
    kind: TrackKind,
    counters: Arc<TrackCounters>,
    media: MediaSink,
    events: EventSink,
    cancel: CancellationToken,
) {
    let mut sequence = SequenceTracker::default();
    let mut jitter = JitterEstimator::new(track.codec().capability.clock_rate);
    counters.live.store(true, Ordering::SeqCst);

    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            read = track.read_rtp() => match read {
                Ok((packet, _attributes)) => packet,
                Err(e) => {
                    debug!(%kind, "track ended: {e}");
                    break;
                }
            },
        };

        counters.bytes.fetch_add(packet.payload.len() as u64, Ordering::SeqCst);
        counters.packets.fetch_add(1, Ordering::SeqCst);
        counters
            .lost
            .fetch_add(sequence.gap(packet.header.sequence_number), Ordering::SeqCst);
        if packet.header.marker {
            counters.frames.fetch_add(1, Ordering::SeqCst);
        }
        counters.set_jitter(jitter.update(packet.header.timestamp, Instant::now()));

        if !counters.seen.swap(true, Ordering::SeqCst) {
            events.emit(TransportEvent::MediaArrived(kind));
        }

        media.publish(MediaSample {
            kind,
            payload: packet.payload,
            received_at: Instant::now(),
        });
    }

    counters.live.store(false, Ordering::SeqCst);
}

/// RTT of a succeeded candidate pair, preferring the nominated one.
fn succeeded_round_trip(
    pairs: impl IntoIterator<Item = (CandidatePairState, bool, f64)>,
) -> Option<f64> {
    let mut fallback = None;
    for (state, nominated, rtt) in pairs {
        if state != CandidatePairState::Succeeded || rtt <= 0.0 {
            continue;
        }
        if nominated {
            return Some(rtt);
        }
        fallback.get_or_insert(rtt);
    }
    fallback
}

fn connectivity_from(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCIceConnectionState::Completed => Some(ConnectivityState::Completed),
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

// ── WebRtcSideChannel ────────────────────────────────────────────

/// Unordered data channel carrying input and `STATS`.
pub struct WebRtcSideChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl SideChannel for WebRtcSideChannel {
    fn label(&self) -> &str {
        self.channel.label()
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: &str) -> Result<(), GamelinkError> {
        self.channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!("data channel send failed: {e}");
                GamelinkError::TransportUnavailable
            })
    }

    async fn close(&self) -> Result<(), GamelinkError> {
        self.channel
            .close()
            .await
            .map_err(|e| GamelinkError::Other(format!("close data channel: {e}")))
    }
}

// ── Tests ────────────────────────────────────────────────────────
