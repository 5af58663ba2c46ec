//! Per-channel session management.
//!
//! A [`SessionManager`] resolves its channel to a live program, lazily opens
//! the system socket, and ties the socket's lifetime to the number of
//! subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Channel, FeedConfig};
use crate::discovery::{EmbeddedData, OFFICIAL_TAG, ProgramDirectory};
use crate::error::{NicoliveError, Result};
use crate::feed::CommentStream;
use crate::statistics::LiveStatistics;
use crate::system_socket::{SocketOptions, SystemSocket};
use crate::task::TaskGroup;

#[derive(Default)]
struct SessionState {
    socket: Option<SystemSocket>,
    subscribers: usize,
}

/// Session manager of one logical channel.
pub struct SessionManager {
    channel: Channel,
    directory: Arc<dyn ProgramDirectory>,
    options: SocketOptions,
    tasks: TaskGroup,
    /// Serializes discovery so concurrent callers never open two sockets
    acquire_lock: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(
        channel: Channel,
        directory: Arc<dyn ProgramDirectory>,
        options: SocketOptions,
        tasks: TaskGroup,
    ) -> Self {
        Self {
            channel,
            directory,
            options,
            tasks,
            acquire_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers
    }

    /// The live system socket, if one is open.
    pub fn current_socket(&self) -> Option<SystemSocket> {
        self.state
            .lock()
            .socket
            .as_ref()
            .filter(|socket| socket.is_active())
            .cloned()
    }

    /// Statistics of the live session, if any.
    pub fn statistics(&self) -> Option<LiveStatistics> {
        self.current_socket().map(|socket| socket.statistics())
    }

    /// Return the live system socket, discovering the channel's current
    /// program and connecting if necessary.
    ///
    /// `None` means the channel is unsupported right now: it has no tags or
    /// nothing matching is on air.
    pub async fn acquire_socket(&self) -> Option<SystemSocket> {
        if self.channel.tags.is_empty() {
            return None;
        }

        let _guard = self.acquire_lock.lock().await;
        if let Some(socket) = self.current_socket() {
            return Some(socket);
        }

        let data = self.discover().await?;
        let socket = SystemSocket::spawn(
            data.web_socket_url(),
            &self.channel.id,
            self.options.clone(),
            &self.tasks,
        );
        info!(channel = %self.channel.id, url = %socket.url(), "Opened live session");

        let previous = self.state.lock().socket.replace(socket.clone());
        if let Some(previous) = previous {
            previous.close();
        }
        Some(socket)
    }

    /// First embedded page descriptor across all tags.
    async fn discover(&self) -> Option<EmbeddedData> {
        for tag in &self.channel.tags {
            let programs = match self.directory.live_programs(tag).await {
                Ok(programs) => programs,
                Err(e) => {
                    warn!(channel = %self.channel.id, tag = %tag, error = %e, "Program search failed");
                    continue;
                }
            };

            for program in programs
                .iter()
                .filter(|program| !self.channel.official || program.has_tag(OFFICIAL_TAG))
            {
                match self.directory.embedded_data(&program.id).await {
                    Ok(data) => {
                        debug!(channel = %self.channel.id, tag = %tag, program = %program.id, "Program found");
                        return Some(data);
                    }
                    Err(e) => {
                        warn!(channel = %self.channel.id, program = %program.id, error = %e, "Embedded data lookup failed");
                    }
                }
            }
        }

        debug!(channel = %self.channel.id, "No live program found");
        None
    }

    pub fn add_subscriber(&self) -> usize {
        let mut state = self.state.lock();
        state.subscribers += 1;
        state.subscribers
    }

    /// Drop one subscriber; the last one tears the session down.
    pub fn remove_subscriber(&self) -> Result<usize> {
        let closing = {
            let mut state = self.state.lock();
            if state.subscribers == 0 {
                error!(channel = %self.channel.id, "remove_subscriber called with no subscribers");
                return Err(NicoliveError::SubscriberUnderflow(self.channel.id.clone()));
            }
            state.subscribers -= 1;
            if state.subscribers > 0 {
                return Ok(state.subscribers);
            }
            state.socket.take()
        };

        if let Some(socket) = closing {
            info!(channel = %self.channel.id, "Last subscriber left, closing live session");
            socket.close();
        }
        Ok(0)
    }

    /// Register a subscriber and attach it to the channel's comment feed.
    ///
    /// Returns `None` when the channel is unsupported right now; the
    /// registration is undone in that case.
    pub async fn subscribe(self: &Arc<Self>) -> Option<Subscription> {
        self.add_subscriber();
        match self.acquire_socket().await {
            Some(socket) => Some(Subscription {
                comments: socket.subscribe(),
                socket,
                session: self.clone(),
            }),
            None => {
                let _ = self.remove_subscriber();
                None
            }
        }
    }

    /// Close the live session regardless of subscribers.
    pub fn close(&self) {
        if let Some(socket) = self.state.lock().socket.take() {
            socket.close();
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("channel", &self.channel.id)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// A subscriber's attachment to a channel. Dropping it unsubscribes.
pub struct Subscription {
    comments: CommentStream,
    socket: SystemSocket,
    session: Arc<SessionManager>,
}

impl Subscription {
    pub fn comments(&mut self) -> &mut CommentStream {
        &mut self.comments
    }

    pub fn socket(&self) -> &SystemSocket {
        &self.socket
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.session.remove_subscriber();
    }
}

/// One session manager per configured channel, sharing a task group.
pub struct SessionRegistry {
    sessions: HashMap<String, Arc<SessionManager>>,
    tasks: TaskGroup,
}

impl SessionRegistry {
    pub fn new(
        channels: impl IntoIterator<Item = Channel>,
        directory: Arc<dyn ProgramDirectory>,
        user_agent: impl Into<String>,
        feed: FeedConfig,
    ) -> Self {
        let tasks = TaskGroup::new();
        let options = SocketOptions {
            user_agent: user_agent.into(),
            feed,
        };

        let sessions = channels
            .into_iter()
            .map(|channel| {
                let id = channel.id.clone();
                let session = SessionManager::new(
                    channel,
                    directory.clone(),
                    options.clone(),
                    tasks.clone(),
                );
                (id, Arc::new(session))
            })
            .collect();

        Self { sessions, tasks }
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<SessionManager>> {
        self.sessions.get(channel_id).cloned()
    }

    pub fn channel_ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.sessions.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn tasks(&self) -> &TaskGroup {
        &self.tasks
    }

    /// Close every session and wait for all tasks to finish.
    pub async fn shutdown(&self) {
        for session in self.sessions.values() {
            session.close();
        }
        self.tasks.shutdown().await;
    }
}
