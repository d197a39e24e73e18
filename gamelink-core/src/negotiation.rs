//! Connectivity capability boundary.
//!
//! The session controller drives negotiation through these traits and
//! never touches a concrete connectivity stack. A backend supplies a
//! [`NegotiationCapability`] that allocates one [`Transport`] per
//! session attempt; the transport owns the peer connection, the
//! side-channel, and the inbound media tracks.
//!
//! Callbacks from the backend (media arrived, connectivity changed)
//! flow back through an [`EventSink`] stamped with the session
//! generation, so anything a torn-down transport still emits can be
//! recognised and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::error::GamelinkError;
use crate::host::SessionDescription;
use crate::telemetry::RawCounters;

/// Buffered samples per media subscriber before the oldest are dropped.
const MEDIA_SINK_CAPACITY: usize = 256;

// ── Media ────────────────────────────────────────────────────────

/// Kind of an inbound media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// One inbound media payload, handed to the rendering collaborator.
#[derive(Debug, Clone)]
pub struct MediaSample {
    pub kind: TrackKind,
    pub payload: Bytes,
    pub received_at: Instant,
}

/// Live media stream handle shared with the renderer.
///
/// The transport publishes into it; the renderer subscribes. The
/// session only creates the sink and hands it over.
#[derive(Debug, Clone)]
pub struct MediaSink {
    tx: broadcast::Sender<MediaSample>,
}

impl MediaSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MEDIA_SINK_CAPACITY);
        Self { tx }
    }

    /// Subscribe to samples published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaSample> {
        self.tx.subscribe()
    }

    /// Publish a sample. Returns the number of subscribers reached.
    pub fn publish(&self, sample: MediaSample) -> usize {
        self.tx.send(sample).unwrap_or(0)
    }
}

impl Default for MediaSink {
    fn default() -> Self {
        Self::new()
    }
}

// ── Transport events ─────────────────────────────────────────────

/// Connectivity state as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// `failed` and `disconnected` end the usable life of a session.
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }
}

/// Asynchronous notifications a transport raises during its life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// First (or any) media sample arrived on a track.
    MediaArrived(TrackKind),
    /// Connectivity changed.
    Connectivity(ConnectivityState),
    SideChannelOpen,
    SideChannelClosed,
}

/// Generation-stamped sender for [`TransportEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    /// Session generation this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Silently dropped once the controller is gone.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send((self.generation, event));
    }
}

// ── Capability traits ────────────────────────────────────────────

/// Unordered, unreliable message path used for input and telemetry.
#[async_trait]
pub trait SideChannel: Send + Sync {
    fn label(&self) -> &str;

    /// Whether messages can currently be sent.
    fn is_open(&self) -> bool;

    /// Send one text message. Best-effort: no retry, no ordering.
    async fn send_text(&self, text: &str) -> Result<(), GamelinkError>;

    async fn close(&self) -> Result<(), GamelinkError>;
}

/// One negotiated connection attempt, exclusively owned by a session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Create the side-channel. Called once, before the offer.
    async fn create_side_channel(&self, label: &str) -> Result<Arc<dyn SideChannel>, GamelinkError>;

    /// Create the local offer and install it as the local description.
    async fn create_offer(&self) -> Result<SessionDescription, GamelinkError>;

    /// Resolves once address gathering reports completion.
    ///
    /// May never resolve on restrictive networks; callers bound it.
    async fn gathering_complete(&self);

    /// The local description including whatever addresses were gathered.
    async fn local_description(&self) -> Result<SessionDescription, GamelinkError>;

    /// Install the host's answer.
    async fn apply_answer(&self, answer: SessionDescription) -> Result<(), GamelinkError>;

    /// Read cumulative transport counters for telemetry.
    async fn read_counters(&self) -> Result<RawCounters, GamelinkError>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<(), GamelinkError>;
}

/// Factory for transports; the injected connectivity backend.
#[async_trait]
pub trait NegotiationCapability: Send + Sync {
    /// Allocate a fresh transport that publishes media into `media`
    /// and reports asynchronous events through `events`.
    async fn create_transport(
        &self,
        media: MediaSink,
        events: EventSink,
    ) -> Result<Arc<dyn Transport>, GamelinkError>;
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_connectivity_states() {
        assert!(ConnectivityState::Failed.is_terminal_failure());
        assert!(ConnectivityState::Disconnected.is_terminal_failure());
        assert!(!ConnectivityState::Checking.is_terminal_failure());
        assert!(!ConnectivityState::Closed.is_terminal_failure());
    }

    #[test]
    fn event_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        sink.emit(TransportEvent::MediaArrived(TrackKind::Video));
        assert_eq!(
            rx.try_recv().unwrap(),
            (7, TransportEvent::MediaArrived(TrackKind::Video))
        );
    }

    #[tokio::test]
    async fn media_sink_fans_out() {
        let sink = MediaSink::new();
        assert_eq!(
            sink.publish(MediaSample {
                kind: TrackKind::Audio,
                payload: Bytes::from_static(b"x"),
                received_at: Instant::now(),
            }),
            0
        );

        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        sink.publish(MediaSample {
            kind: TrackKind::Video,
            payload: Bytes::from_static(b"frame"),
            received_at: Instant::now(),
        });
        assert_eq!(a.recv().await.unwrap().payload, Bytes::from_static(b"frame"));
        assert_eq!(b.recv().await.unwrap().kind, TrackKind::Video);
    }
}
