//! Multi-consumer comment fan-out.
//!
//! The feed lives as long as its system socket. Closing it ends every
//! subscriber's stream, which is how subscribers learn that a session ended.

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::comment::Comment;
use crate::config::{FeedConfig, FeedPolicy};

enum FeedState {
    Broadcast(broadcast::Sender<Comment>),
    Queues(Vec<mpsc::Sender<Comment>>),
    Closed,
}

/// Fan-out of decoded comments to every current subscriber.
pub struct CommentFeed {
    config: FeedConfig,
    state: Mutex<FeedState>,
}

impl CommentFeed {
    pub fn new(config: FeedConfig) -> Self {
        let config = FeedConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        let state = match config.policy {
            FeedPolicy::DropOldest => FeedState::Broadcast(broadcast::channel(config.capacity).0),
            FeedPolicy::DropNewest | FeedPolicy::Block => FeedState::Queues(Vec::new()),
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn policy(&self) -> FeedPolicy {
        self.config.policy
    }

    /// Add a subscriber. Subscribing to a closed feed yields an ended stream.
    pub fn subscribe(&self) -> CommentStream {
        let mut state = self.state.lock();
        let inner = match &mut *state {
            FeedState::Broadcast(tx) => StreamInner::Broadcast(tx.subscribe()),
            FeedState::Queues(queues) => {
                let (tx, rx) = mpsc::channel(self.config.capacity);
                queues.push(tx);
                StreamInner::Queue(rx)
            }
            FeedState::Closed => StreamInner::Ended,
        };
        CommentStream { inner }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        match &mut *self.state.lock() {
            FeedState::Broadcast(tx) => tx.receiver_count(),
            FeedState::Queues(queues) => {
                queues.retain(|tx| !tx.is_closed());
                queues.len()
            }
            FeedState::Closed => 0,
        }
    }

    /// Publish a comment to every subscriber, applying the feed's policy.
    ///
    /// Only suspends under [`FeedPolicy::Block`].
    pub async fn publish(&self, comment: Comment) {
        let queues = {
            let mut state = self.state.lock();
            match &mut *state {
                FeedState::Broadcast(tx) => {
                    // No receivers is not an error
                    let _ = tx.send(comment);
                    return;
                }
                FeedState::Queues(queues) => {
                    queues.retain(|tx| !tx.is_closed());
                    queues.clone()
                }
                FeedState::Closed => return,
            }
        };

        match self.config.policy {
            FeedPolicy::Block => {
                for tx in &queues {
                    let _ = tx.send(comment.clone()).await;
                }
            }
            _ => {
                for tx in &queues {
                    if let Err(mpsc::error::TrySendError::Full(dropped)) =
                        tx.try_send(comment.clone())
                    {
                        warn!(no = dropped.no, "Subscriber full, dropping comment");
                    }
                }
            }
        }
    }

    /// Close the feed. Buffered comments are still delivered before streams end.
    pub fn close(&self) {
        *self.state.lock() = FeedState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), FeedState::Closed)
    }
}

enum StreamInner {
    Broadcast(broadcast::Receiver<Comment>),
    Queue(mpsc::Receiver<Comment>),
    Ended,
}

/// A subscriber's view of the feed.
pub struct CommentStream {
    inner: StreamInner,
}

impl CommentStream {
    /// Receive the next comment, or `None` once the session has ended.
    pub async fn recv(&mut self) -> Option<Comment> {
        match &mut self.inner {
            StreamInner::Broadcast(rx) => loop {
                match rx.recv().await {
                    Ok(comment) => return Some(comment),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged, skipping oldest comments");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            StreamInner::Queue(rx) => rx.recv().await,
            StreamInner::Ended => None,
        }
    }

    /// Adapt into a [`futures::Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Comment> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|comment| (comment, stream))
        })
    }
}
