//! Connection to the chat message server of one room.

use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::comment::Comment;
use crate::error::Result;
use crate::feed::CommentFeed;
use crate::net::{self, WsStream};
use crate::protocol::{RoomData, ThreadFrame, thread_handshake_message};
use crate::statistics::StatisticsTracker;
use crate::system_socket::SystemInner;
use crate::task::TaskGroup;

/// Why the read loop stopped.
enum Exit {
    Cancelled,
    Closed,
}

/// Handle to a message socket. Clones refer to the same connection.
#[derive(Clone)]
pub struct MessageSocket {
    inner: Arc<MessageInner>,
}

struct MessageInner {
    uri: String,
    thread_id: String,
    source: String,
    user_agent: String,
    token: CancellationToken,
    feed: Arc<CommentFeed>,
    stats: Arc<StatisticsTracker>,
    parent: Weak<SystemInner>,
}

impl MessageSocket {
    /// Create an unstarted socket for `room`. `token` must be a child of the
    /// owning system socket's token.
    pub(crate) fn new(
        room: &RoomData,
        parent: &Arc<SystemInner>,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                uri: room.message_server.uri.clone(),
                thread_id: room.thread_id.clone(),
                source: parent.source().to_string(),
                user_agent: parent.user_agent().to_string(),
                token,
                feed: parent.feed().clone(),
                stats: parent.stats().clone(),
                parent: Arc::downgrade(parent),
            }),
        }
    }

    /// Spawn the connection task.
    pub(crate) fn start(&self, tasks: &TaskGroup) {
        let inner = self.inner.clone();
        tasks.spawn(async move { inner.run().await });
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    pub fn thread_id(&self) -> &str {
        &self.inner.thread_id
    }

    pub fn is_active(&self) -> bool {
        !self.inner.token.is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.token.cancel();
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MessageSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSocket")
            .field("uri", &self.inner.uri)
            .field("thread_id", &self.inner.thread_id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MessageInner {
    async fn run(self: Arc<Self>) {
        match self.connect_and_serve().await {
            Ok(Exit::Cancelled) => trace!(thread = %self.thread_id, "mws:cancelled"),
            Ok(Exit::Closed) => debug!(thread = %self.thread_id, "mws:close"),
            Err(e) => error!(thread = %self.thread_id, error = %e, "mws:error"),
        }

        self.token.cancel();
        if let Some(parent) = self.parent.upgrade() {
            parent.detach_message_socket(&MessageSocket { inner: self.clone() });
        }
    }

    async fn connect_and_serve(&self) -> Result<Exit> {
        let stream = tokio::select! {
            _ = self.token.cancelled() => return Ok(Exit::Cancelled),
            connected = net::connect(&self.uri, &self.user_agent) => connected?,
        };
        debug!(thread = %self.thread_id, uri = %self.uri, "mws:connect");
        self.session(stream).await
    }

    async fn session(&self, mut stream: WsStream) -> Result<Exit> {
        stream.send(thread_handshake_message(&self.thread_id)?).await?;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(Exit::Cancelled);
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_text(text).await,
                        Err(_) => debug!(len = data.len(), "mws: ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "mws: close frame received");
                        return Ok(Exit::Closed);
                    }
                    // Ping/Pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(Exit::Closed),
                },
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        let frame = match ThreadFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "mws: skipping malformed frame");
                return;
            }
        };

        let Some(chat) = frame.chat else {
            trace!(frame = text, "mws: non-chat frame");
            return;
        };

        let comment = Comment::from_chat(&self.source, &chat);
        trace!(no = comment.no, text = %comment.text, "mws: chat");
        self.stats.record_comment(&comment);

        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.feed.publish(comment) => {}
        }
    }
}
