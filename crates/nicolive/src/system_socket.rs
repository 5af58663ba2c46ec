//! Connection to the control ("relive") server of a live program.
//!
//! The system socket negotiates the watch session, keeps the seat alive and
//! owns the message socket of the current room. It is terminal once
//! terminated: a new live session needs a new instance.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::FeedConfig;
use crate::error::Result;
use crate::feed::{CommentFeed, CommentStream};
use crate::message_socket::MessageSocket;
use crate::net::{self, WsStream};
use crate::protocol::{RoomData, StartWatching, SystemEvent, SystemRequest};
use crate::statistics::{LiveStatistics, StatisticsTracker};
use crate::task::TaskGroup;

/// Outgoing frames queued per connection.
const OUTGOING_QUEUE_SIZE: usize = 16;

/// Lifecycle of a system socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Connecting,
    Handshaking,
    Active,
    Terminated,
}

/// Settings applied to both sockets of a session.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub user_agent: String,
    pub feed: FeedConfig,
}

enum Exit {
    Cancelled,
    Closed,
    Disconnected(Option<String>),
}

/// Handle to a system socket. Clones refer to the same session; equality is
/// identity.
#[derive(Clone)]
pub struct SystemSocket {
    inner: Arc<SystemInner>,
}

pub(crate) struct SystemInner {
    url: String,
    source: String,
    options: SocketOptions,
    token: CancellationToken,
    state: watch::Sender<SocketState>,
    stats: Arc<StatisticsTracker>,
    feed: Arc<CommentFeed>,
    message_socket: Mutex<Option<MessageSocket>>,
    keep_seat: Mutex<Option<CancellationToken>>,
    tasks: TaskGroup,
}

impl SystemSocket {
    /// Connect to the control server at `url` on a task owned by `tasks`.
    ///
    /// Comments relayed by this session carry `source`.
    pub fn spawn(
        url: impl Into<String>,
        source: impl Into<String>,
        options: SocketOptions,
        tasks: &TaskGroup,
    ) -> Self {
        let (state, _) = watch::channel(SocketState::Connecting);
        let inner = Arc::new(SystemInner {
            url: url.into(),
            source: source.into(),
            feed: Arc::new(CommentFeed::new(options.feed)),
            options,
            token: tasks.child_token(),
            state,
            stats: Arc::new(StatisticsTracker::new()),
            message_socket: Mutex::new(None),
            keep_seat: Mutex::new(None),
            tasks: tasks.clone(),
        });

        let task = inner.clone();
        tasks.spawn(async move { task.run().await });

        Self { inner }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> SocketState {
        *self.inner.state.borrow()
    }

    /// Whether the session has not terminated yet.
    pub fn is_active(&self) -> bool {
        self.state() != SocketState::Terminated
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<SocketState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session has terminated.
    pub async fn terminated(&self) {
        let mut rx = self.watch_state();
        let _ = rx.wait_for(|state| *state == SocketState::Terminated).await;
    }

    /// Subscribe to the decoded comments of this session.
    pub fn subscribe(&self) -> CommentStream {
        self.inner.feed.subscribe()
    }

    pub fn statistics(&self) -> LiveStatistics {
        self.inner.stats.snapshot()
    }

    /// The message socket of the current room, if any.
    pub fn message_socket(&self) -> Option<MessageSocket> {
        self.inner.message_socket.lock().clone()
    }

    /// Cancel the current message socket and install `socket` in its place.
    pub(crate) fn replace_message_socket(&self, socket: MessageSocket) {
        self.inner.replace_message_socket(socket);
    }

    /// Terminate the session. Idempotent.
    pub fn close(&self) {
        self.inner.terminate();
    }
}

impl PartialEq for SystemSocket {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SystemSocket {}

impl std::fmt::Debug for SystemSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemSocket")
            .field("url", &self.inner.url)
            .field("source", &self.inner.source)
            .field("state", &self.state())
            .finish()
    }
}

impl SystemInner {
    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn user_agent(&self) -> &str {
        &self.options.user_agent
    }

    pub(crate) fn feed(&self) -> &Arc<CommentFeed> {
        &self.feed
    }

    pub(crate) fn stats(&self) -> &Arc<StatisticsTracker> {
        &self.stats
    }

    fn set_state(&self, next: SocketState) {
        self.state.send_if_modified(|state| {
            if *state == SocketState::Terminated || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    fn replace_message_socket(&self, socket: MessageSocket) {
        let mut slot = self.message_socket.lock();
        // Already installed and running
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&socket)) {
            return;
        }
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        if self.token.is_cancelled() {
            socket.cancel();
            return;
        }
        socket.start(&self.tasks);
        *slot = Some(socket);
    }

    /// Clear the slot if `socket` is still the installed one.
    pub(crate) fn detach_message_socket(&self, socket: &MessageSocket) {
        let mut slot = self.message_socket.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(socket)) {
            *slot = None;
        }
    }

    fn terminate(&self) {
        self.token.cancel();
        if let Some(socket) = self.message_socket.lock().take() {
            socket.cancel();
        }
        if let Some(keep_seat) = self.keep_seat.lock().take() {
            keep_seat.cancel();
        }
        self.feed.close();
        self.set_state(SocketState::Terminated);
    }

    async fn run(self: Arc<Self>) {
        match self.connect_and_serve().await {
            Ok(Exit::Cancelled) => trace!(url = %self.url, "ws:cancelled"),
            Ok(Exit::Closed) => debug!(url = %self.url, "ws:close"),
            Ok(Exit::Disconnected(reason)) => {
                info!(source = %self.source, reason = ?reason, "ws:disconnect")
            }
            Err(e) => error!(url = %self.url, error = %e, "ws:error"),
        }
        self.terminate();
    }

    async fn connect_and_serve(self: &Arc<Self>) -> Result<Exit> {
        let mut stream = tokio::select! {
            _ = self.token.cancelled() => return Ok(Exit::Cancelled),
            connected = net::connect(&self.url, &self.options.user_agent) => connected?,
        };
        debug!(url = %self.url, "ws:connect");

        self.set_state(SocketState::Handshaking);
        stream
            .send(SystemRequest::StartWatching(StartWatching::default()).to_message()?)
            .await?;
        self.set_state(SocketState::Active);

        self.session(stream).await
    }

    async fn session(self: &Arc<Self>, stream: WsStream) -> Result<Exit> {
        let (mut sink, mut stream) = stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_QUEUE_SIZE);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    let _ = sink.close().await;
                    return Ok(Exit::Cancelled);
                }
                Some(message) = outgoing_rx.recv() => {
                    sink.send(message).await?;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let event = match SystemEvent::parse(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                warn!(error = %e, "ws: skipping malformed frame");
                                continue;
                            }
                        };
                        match self.handle_event(event, &outgoing_tx)? {
                            ControlFlow::Continue(Some(reply)) => sink.send(reply).await?,
                            ControlFlow::Continue(None) => {}
                            ControlFlow::Break(exit) => {
                                let _ = sink.close().await;
                                return Ok(exit);
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "ws: close frame received");
                        return Ok(Exit::Closed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(Exit::Closed),
                },
            }
        }
    }

    /// React to a control frame. `Continue(Some(reply))` is written to the
    /// socket before the next frame is read.
    fn handle_event(
        self: &Arc<Self>,
        event: SystemEvent,
        outgoing: &mpsc::Sender<Message>,
    ) -> Result<ControlFlow<Exit, Option<Message>>> {
        match event {
            SystemEvent::Ping => {
                trace!("ws: ping");
                return Ok(ControlFlow::Continue(Some(SystemRequest::Pong.to_message()?)));
            }
            SystemEvent::Seat(seat) => {
                debug!(keep_interval_sec = seat.keep_interval_sec, "ws: seat");
                self.restart_keep_seat(
                    Duration::from_secs(seat.keep_interval_sec.max(1)),
                    outgoing.clone(),
                )?;
            }
            SystemEvent::Room(room) => {
                debug!(uri = %room.message_server.uri, thread = %room.thread_id, "ws: room");
                self.open_room(&room);
            }
            SystemEvent::Statistics(data) => {
                // Reported about once a minute
                self.stats.record_report(&data);
            }
            SystemEvent::Disconnect(data) => {
                return Ok(ControlFlow::Break(Exit::Disconnected(data.reason)));
            }
            SystemEvent::Other(kind) => {
                trace!(kind = %kind, "ws: ignoring message");
            }
        }
        Ok(ControlFlow::Continue(None))
    }

    fn open_room(self: &Arc<Self>, room: &RoomData) {
        let socket = MessageSocket::new(room, self, self.token.child_token());
        self.replace_message_socket(socket);
    }

    /// Replace the keepalive task. Resets on every `seat` since the interval
    /// may change.
    fn restart_keep_seat(&self, interval: Duration, outgoing: mpsc::Sender<Message>) -> Result<()> {
        let keep_seat = SystemRequest::KeepSeat.to_message()?;
        let token = self.token.child_token();
        if let Some(previous) = self.keep_seat.lock().replace(token.clone()) {
            previous.cancel();
        }

        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if outgoing.send(keep_seat.clone()).await.is_err() {
                            break;
                        }
                        trace!("ws: keepSeat");
                    }
                }
            }
        });
        Ok(())
    }
}
