//! Session controller actor.
//!
//! All lifecycle transitions are serialized through one task. Callers
//! talk to it through a [`SessionHandle`]; the negotiation task and
//! the transport report back over generation-stamped channels, so an
//! event from a superseded session is recognised and dropped.
//!
//! ```text
//!  SessionHandle ──Command──► SessionController ──spawn──► negotiation task
//!                                   ▲     ▲                     │
//!                                   │     └──── (gen, Step) ────┘
//!                                   └──── (gen, TransportEvent) ◄── Transport
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::GamelinkError;
use crate::host::HostApi;
use crate::input::InputTransport;
use crate::negotiation::{
    EventSink, MediaSink, NegotiationCapability, SideChannel, Transport, TransportEvent,
};
use crate::session::state::{SessionState, SessionStatus};
use crate::telemetry::{StatsSnapshot, TelemetryCollector};

const COMMAND_CAPACITY: usize = 16;

type StartReply = oneshot::Sender<Result<(), GamelinkError>>;

// ── Messages ─────────────────────────────────────────────────────

enum Command {
    Start { reply: StartReply },
    Stop { reply: oneshot::Sender<()> },
    Restart { reason: String, reply: StartReply },
}

/// Progress reported by the negotiation task.
#[derive(Debug)]
enum Step {
    /// Local offer created; gathering addresses.
    OfferCreated,
    /// Gathering finished or timed out; offer submitted to the host.
    OfferSubmitted,
    Completed(Result<(), GamelinkError>),
}

// ── LiveSession ──────────────────────────────────────────────────

/// Resources exclusively owned by the current session.
struct LiveSession {
    generation: u64,
    transport: Arc<dyn Transport>,
    side_channel: Arc<dyn SideChannel>,
    cancel: CancellationToken,
    negotiation: Option<JoinHandle<()>>,
    telemetry: Option<JoinHandle<()>>,
    pending_start: Option<StartReply>,
}

impl LiveSession {
    /// Stop background work without releasing the connection.
    async fn halt(&mut self) {
        self.cancel.cancel();
        for handle in [self.negotiation.take(), self.telemetry.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Release everything. Returns the unanswered start request, if any.
    async fn release(mut self, input: &InputTransport) -> Option<StartReply> {
        // Input first: nothing dispatched from here on reaches this channel.
        input.detach().await;
        self.halt().await;

        if let Err(e) = self.side_channel.close().await {
            debug!(session = self.generation, "side-channel close failed: {e}");
        }
        if let Err(e) = self.transport.close().await {
            debug!(session = self.generation, "transport close failed: {e}");
        }

        self.pending_start.take()
    }
}

// ── SessionController ────────────────────────────────────────────

/// Owns the [`SessionState`] machine and the live session.
///
/// # Lifetime
///
/// Create with [`new`](Self::new) and drive with [`run`](Self::run)
/// (or use [`spawn`](Self::spawn)). The loop ends, releasing any live
/// session, once every [`SessionHandle`] is dropped.
pub struct SessionController {
    config: SessionConfig,
    capability: Arc<dyn NegotiationCapability>,
    host: Arc<dyn HostApi>,
    input: Arc<InputTransport>,

    state: SessionState,
    generation: u64,
    live: Option<LiveSession>,

    commands: mpsc::Receiver<Command>,
    steps_tx: mpsc::UnboundedSender<(u64, Step)>,
    steps_rx: mpsc::UnboundedReceiver<(u64, Step)>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,

    state_tx: watch::Sender<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
    media_tx: watch::Sender<Option<MediaSink>>,
    stats_tx: Arc<watch::Sender<Option<StatsSnapshot>>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        capability: Arc<dyn NegotiationCapability>,
        host: Arc<dyn HostApi>,
        input: Arc<InputTransport>,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (steps_tx, steps_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());
        let (media_tx, media_rx) = watch::channel(None);
        let (stats_tx, stats_rx) = watch::channel(None);

        let handle = SessionHandle {
            commands: command_tx,
            state: state_rx,
            status: status_rx,
            media: media_rx,
            stats: stats_rx,
            input: Arc::clone(&input),
        };

        let controller = Self {
            config,
            capability,
            host,
            input,
            state: SessionState::Idle,
            generation: 0,
            live: None,
            commands,
            steps_tx,
            steps_rx,
            events_tx,
            events_rx,
            state_tx,
            status_tx,
            media_tx,
            stats_tx: Arc::new(stats_tx),
        };

        (controller, handle)
    }

    /// Create a controller and run it on a new task.
    pub fn spawn(
        config: SessionConfig,
        capability: Arc<dyn NegotiationCapability>,
        host: Arc<dyn HostApi>,
        input: Arc<InputTransport>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(config, capability, host, input);
        (handle, tokio::spawn(controller.run()))
    }

    /// Process commands and callbacks until every handle is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                Some((generation, step)) = self.steps_rx.recv() => {
                    self.on_step(generation, step).await;
                }
                Some((generation, event)) = self.events_rx.recv() => {
                    self.on_event(generation, event).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
            }
        }

        self.stop_session().await;
        debug!("session controller stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => self.start_session(reply).await,
            Command::Stop { reply } => {
                self.stop_session().await;
                let _ = reply.send(());
            }
            Command::Restart { reason, reply } => {
                info!(session = self.generation, %reason, "restarting session");
                self.stop_session().await;
                self.start_session(reply).await;
            }
        }
    }

    // ── Start ────────────────────────────────────────────────────

    async fn start_session(&mut self, reply: StartReply) {
        if self.state.is_active() {
            let _ = reply.send(Err(GamelinkError::AlreadyActive));
            return;
        }

        // Restart out of Degraded: the old connection goes first.
        if let Some(old) = self.live.take() {
            if let Some(pending) = old.release(&self.input).await {
                let _ = pending.send(Err(GamelinkError::Cancelled));
            }
            self.media_tx.send_replace(None);
        }

        if let Err(e) = self.state.begin_negotiation() {
            let _ = reply.send(Err(e));
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        self.publish(SessionStatus::new(self.state, "Starting stream..."));
        info!(session = generation, state = %self.state, "session starting");

        let (transport, side_channel, media) = match self.allocate(generation).await {
            Ok(allocated) => allocated,
            Err(e) => {
                let e = e.into_negotiation();
                error!(session = generation, "session setup failed: {e}");
                self.state.close();
                self.publish(SessionStatus::reconnect(self.state, e.to_string()));
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.input.attach(Arc::clone(&side_channel)).await;
        self.media_tx.send_replace(Some(media));

        let cancel = CancellationToken::new();
        let negotiation = tokio::spawn(negotiate(
            generation,
            Arc::clone(&transport),
            Arc::clone(&self.host),
            self.config.gather_timeout(),
            self.steps_tx.clone(),
            cancel.clone(),
        ));

        self.live = Some(LiveSession {
            generation,
            transport,
            side_channel,
            cancel,
            negotiation: Some(negotiation),
            telemetry: None,
            pending_start: Some(reply),
        });
    }

    /// Allocate the transport, side-channel and media sink. On failure
    /// nothing stays allocated.
    async fn allocate(
        &self,
        generation: u64,
    ) -> Result<(Arc<dyn Transport>, Arc<dyn SideChannel>, MediaSink), GamelinkError> {
        let media = MediaSink::new();
        let events = EventSink::new(generation, self.events_tx.clone());
        let transport = self.capability.create_transport(media.clone(), events).await?;

        match transport
            .create_side_channel(&self.config.side_channel_label)
            .await
        {
            Ok(channel) => Ok((transport, channel, media)),
            Err(e) => {
                let _ = transport.close().await;
                Err(e)
            }
        }
    }

    // ── Stop ─────────────────────────────────────────────────────

    async fn stop_session(&mut self) {
        if let Some(live) = self.live.take() {
            let generation = live.generation;
            if let Some(pending) = live.release(&self.input).await {
                let _ = pending.send(Err(GamelinkError::Cancelled));
            }
            debug!(session = generation, "session resources released");
        }

        self.media_tx.send_replace(None);
        self.stats_tx.send_replace(None);

        if !self.state.is_closed() {
            let from = self.state;
            self.state.close();
            info!(session = self.generation, from = %from, "session closed");
            self.publish(SessionStatus::cleared(self.state));
        }
    }

    /// Tear down after a failed handshake.
    async fn fail_session(&mut self, e: GamelinkError) {
        let e = e.into_negotiation();
        error!(session = self.generation, "{e}");

        let pending = match self.live.take() {
            Some(live) => live.release(&self.input).await,
            None => None,
        };
        self.media_tx.send_replace(None);
        self.state.close();
        self.publish(SessionStatus::reconnect(self.state, e.to_string()));

        if let Some(pending) = pending {
            let _ = pending.send(Err(e));
        }
    }

    // ── Callbacks ────────────────────────────────────────────────

    fn is_current(&self, generation: u64) -> bool {
        !self.state.is_closed() && self.live.as_ref().is_some_and(|l| l.generation == generation)
    }

    async fn on_step(&mut self, generation: u64, step: Step) {
        if !self.is_current(generation) {
            debug!(session = generation, ?step, "dropping stale negotiation step");
            return;
        }

        match step {
            Step::OfferCreated => {
                if let Err(e) = self.state.begin_gathering() {
                    debug!(session = generation, "{e}");
                    return;
                }
                info!(session = generation, state = %self.state, "offer created");
                self.publish(SessionStatus::new(self.state, "Gathering addresses..."));
            }
            Step::OfferSubmitted => {
                if let Err(e) = self.state.await_answer() {
                    debug!(session = generation, "{e}");
                    return;
                }
                info!(session = generation, state = %self.state, "offer submitted");
                self.publish(SessionStatus::new(self.state, "Waiting for host..."));
            }
            Step::Completed(Ok(())) => {
                info!(session = generation, "remote answer applied");
                if let Some(live) = self.live.as_mut() {
                    live.negotiation = None;
                    if let Some(pending) = live.pending_start.take() {
                        let _ = pending.send(Ok(()));
                    }
                }
            }
            Step::Completed(Err(e)) => self.fail_session(e).await,
        }
    }

    async fn on_event(&mut self, generation: u64, event: TransportEvent) {
        if !self.is_current(generation) {
            debug!(session = generation, ?event, "dropping stale transport event");
            return;
        }

        match event {
            TransportEvent::MediaArrived(kind) => {
                if self.state == SessionState::Connected {
                    debug!(session = generation, %kind, "additional track live");
                    return;
                }
                if let Err(e) = self.state.media_arrived() {
                    debug!(session = generation, %kind, "ignoring media: {e}");
                    return;
                }
                info!(session = generation, %kind, state = %self.state, "media flowing");
                self.publish(SessionStatus::cleared(self.state));
                self.start_telemetry();
            }
            TransportEvent::Connectivity(connectivity) if connectivity.is_terminal_failure() => {
                if self.state == SessionState::Degraded || self.state.degrade().is_err() {
                    return;
                }
                warn!(session = generation, ?connectivity, "{}", GamelinkError::ConnectivityLost);

                let pending = match self.live.as_mut() {
                    Some(live) => {
                        live.halt().await;
                        live.pending_start.take()
                    }
                    None => None,
                };
                self.publish(SessionStatus::reconnect(self.state, "Connection lost"));
                if let Some(pending) = pending {
                    let _ = pending.send(Err(GamelinkError::ConnectivityLost));
                }
            }
            TransportEvent::Connectivity(connectivity) => {
                debug!(session = generation, ?connectivity, "connectivity changed");
            }
            TransportEvent::SideChannelOpen => {
                debug!(session = generation, "side-channel open");
            }
            TransportEvent::SideChannelClosed => {
                debug!(session = generation, "side-channel closed");
            }
        }
    }

    fn start_telemetry(&mut self) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        let collector = TelemetryCollector::new(self.config.diagnostic_every);
        live.telemetry = Some(tokio::spawn(collector.run(
            Arc::clone(&live.transport),
            Arc::clone(&live.side_channel),
            self.config.telemetry_interval(),
            Arc::clone(&self.stats_tx),
            live.cancel.child_token(),
        )));
    }

    fn publish(&self, status: SessionStatus) {
        self.state_tx.send_replace(self.state);
        self.status_tx.send_replace(status);
    }
}

// ── Negotiation task ─────────────────────────────────────────────

async fn negotiate(
    generation: u64,
    transport: Arc<dyn Transport>,
    host: Arc<dyn HostApi>,
    gather_timeout: std::time::Duration,
    steps: mpsc::UnboundedSender<(u64, Step)>,
    cancel: CancellationToken,
) {
    let report = |step: Step| {
        let _ = steps.send((generation, step));
    };

    let handshake = async {
        transport.create_offer().await?;
        report(Step::OfferCreated);

        if time::timeout(gather_timeout, transport.gathering_complete())
            .await
            .is_err()
        {
            warn!(
                session = generation,
                "{}; sending offer with the addresses gathered so far",
                GamelinkError::AddressGatheringTimeout(gather_timeout)
            );
        }

        let offer = transport.local_description().await?;
        report(Step::OfferSubmitted);

        let answer = host.post_offer(&offer).await?;
        if !answer.is_answer() {
            return Err(GamelinkError::NegotiationFailed(format!(
                "host replied with a description of type {:?}",
                answer.kind
            )));
        }
        transport.apply_answer(answer).await
    };

    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(session = generation, "negotiation cancelled");
        }
        result = handshake => report(Step::Completed(result)),
    }
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable front door to a running [`SessionController`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
    status: watch::Receiver<SessionStatus>,
    media: watch::Receiver<Option<MediaSink>>,
    stats: watch::Receiver<Option<StatsSnapshot>>,
    input: Arc<InputTransport>,
}

impl SessionHandle {
    /// Start a session. Resolves once the host's answer is applied.
    ///
    /// Fails with [`GamelinkError::AlreadyActive`] while a session is
    /// negotiating or connected, and with
    /// [`GamelinkError::NegotiationFailed`] when any handshake step
    /// fails (the session is then `Closed`).
    pub async fn start(&self) -> Result<(), GamelinkError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Start { reply }).await?;
        rx.await?
    }

    /// Release the session and move to `Closed`. Idempotent.
    pub async fn stop(&self) -> Result<(), GamelinkError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Stop { reply }).await?;
        rx.await?;
        Ok(())
    }

    /// `stop` followed by `start`, as one step.
    pub async fn restart(&self, reason: impl Into<String>) -> Result<(), GamelinkError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Restart {
                reason: reason.into(),
                reply,
            })
            .await?;
        rx.await?
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Live media of the current session, for the renderer.
    pub fn media_receiver(&self) -> watch::Receiver<Option<MediaSink>> {
        self.media.clone()
    }

    /// Latest telemetry snapshot of the current session.
    pub fn stats_receiver(&self) -> watch::Receiver<Option<StatsSnapshot>> {
        self.stats.clone()
    }

    /// The input transport bound to this session.
    pub fn input(&self) -> &Arc<InputTransport> {
        &self.input
    }
}
