//! Nicolive: live comment relay for niconico live broadcasts.
//!
//! This crate discovers the live program of a logical channel, keeps the
//! platform's two-socket watch session alive and exposes the decoded comments
//! as a multi-consumer feed.
//!
//! ## Session
//!
//! - [`SessionManager`] - Per-channel discovery and subscriber counting
//! - [`SessionRegistry`] - One session manager per configured channel
//! - [`Subscription`] - A subscriber's handle; unsubscribes on drop
//!
//! ## Sockets
//!
//! - [`SystemSocket`] - Control connection: handshake, seat keepalive, rooms
//! - [`MessageSocket`] - Chat connection of the current room
//!
//! ## Comments
//!
//! - [`Comment`] - Canonical DPlayer-compatible comment record
//! - [`CommentFeed`] / [`CommentStream`] - Fan-out with an explicit [`FeedPolicy`]
//! - [`StatisticsTracker`] - Viewer/point counters and comment velocity

pub mod comment;
pub mod config;
pub mod discovery;
pub mod error;
pub mod feed;
pub mod message_socket;
mod net;
pub mod protocol;
pub mod session;
pub mod statistics;
pub mod system_socket;
pub mod task;

pub use comment::{Comment, Position, parse_mail};
pub use config::{ApiConfig, Channel, FeedConfig, FeedPolicy, ReconnectConfig};
pub use discovery::{EmbeddedData, LiveProgram, NicoliveApi, OFFICIAL_TAG, ProgramDirectory};
pub use error::{NicoliveError, Result};
pub use feed::{CommentFeed, CommentStream};
pub use message_socket::MessageSocket;
pub use net::install_rustls_provider;
pub use session::{SessionManager, SessionRegistry, Subscription};
pub use statistics::{LiveStatistics, StatisticsTracker};
pub use system_socket::{SocketOptions, SocketState, SystemSocket};
pub use task::TaskGroup;
