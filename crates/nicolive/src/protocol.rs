//! Wire formats of the control ("relive") socket and the message socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::{NicoliveError, Result};

/// Thread protocol version expected by the message server.
const THREAD_VERSION: &str = "20061206";

/// Outgoing control socket messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SystemRequest {
    StartWatching(StartWatching),
    Pong,
    KeepSeat,
}

impl SystemRequest {
    /// Encode as a text frame.
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::text(serde_json::to_string(self)?))
    }
}

/// Payload of `startWatching`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartWatching {
    pub stream: StreamOptions,
    pub room: RoomOptions,
    pub reconnect: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOptions {
    pub quality: String,
    pub protocol: String,
    pub latency: String,
    pub chase_play: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            quality: "high".to_string(),
            protocol: "hls".to_string(),
            latency: "high".to_string(),
            chase_play: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomOptions {
    pub protocol: String,
    pub commentable: bool,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            protocol: "webSocket".to_string(),
            commentable: true,
        }
    }
}

/// Incoming control socket messages the session reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemEvent {
    Ping,
    Seat(SeatData),
    Room(RoomData),
    Statistics(StatisticsData),
    Disconnect(DisconnectData),
    /// Any other message type (`stream`, `schedule`, `serverTime`, ...)
    Other(String),
}

#[derive(Debug, Deserialize)]
struct RawSystemMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatData {
    pub keep_interval_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomData {
    pub message_server: MessageServer,
    pub thread_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageServer {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsData {
    #[serde(default)]
    pub viewers: Option<u64>,
    #[serde(default)]
    pub ad_points: Option<u64>,
    #[serde(default)]
    pub gift_points: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct DisconnectData {
    #[serde(default)]
    pub reason: Option<String>,
}

impl SystemEvent {
    /// Parse a control socket text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawSystemMessage = serde_json::from_str(text)?;
        let event = match raw.kind.as_str() {
            "ping" => Self::Ping,
            "seat" => Self::Seat(data_of(&raw)?),
            "room" => Self::Room(data_of(&raw)?),
            "statistics" => Self::Statistics(data_of(&raw)?),
            "disconnect" => {
                if raw.data.is_null() {
                    Self::Disconnect(DisconnectData::default())
                } else {
                    Self::Disconnect(data_of(&raw)?)
                }
            }
            _ => Self::Other(raw.kind),
        };
        Ok(event)
    }
}

fn data_of<T: serde::de::DeserializeOwned>(raw: &RawSystemMessage) -> Result<T> {
    T::deserialize(&raw.data).map_err(|e| {
        NicoliveError::protocol(format!("malformed `{}` message: {}", raw.kind, e))
    })
}

/// Outgoing message socket frames.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadRequest {
    Ping { content: String },
    Thread(ThreadJoin),
}

impl ThreadRequest {
    fn ping(content: &str) -> Self {
        Self::Ping {
            content: content.to_string(),
        }
    }
}

/// Thread-join request sent to the message server.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadJoin {
    pub thread: String,
    pub version: String,
    pub user_id: String,
    pub res_from: i64,
    pub with_global: u8,
    pub scores: u8,
    pub nicoru: u8,
}

impl ThreadJoin {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread: thread_id.into(),
            version: THREAD_VERSION.to_string(),
            user_id: "guest".to_string(),
            res_from: 0,
            with_global: 1,
            scores: 1,
            nicoru: 0,
        }
    }
}

/// Handshake frames for the message socket, in the order the server expects:
/// two pings, the thread join, two more pings.
pub fn thread_handshake(thread_id: &str) -> Vec<ThreadRequest> {
    vec![
        ThreadRequest::ping("rs:0"),
        ThreadRequest::ping("ps:0"),
        ThreadRequest::Thread(ThreadJoin::new(thread_id)),
        ThreadRequest::ping("pf:0"),
        ThreadRequest::ping("rf:0"),
    ]
}

/// Encode the message socket handshake as a single text frame.
pub fn thread_handshake_message(thread_id: &str) -> Result<Message> {
    Ok(Message::text(serde_json::to_string(&thread_handshake(
        thread_id,
    ))?))
}

/// Incoming message socket frame. Only chat payloads are consumed.
#[derive(Debug, Clone, Deserialize)]
pub struct ThreadFrame {
    #[serde(default)]
    pub chat: Option<Chat>,
}

impl ThreadFrame {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A raw chat entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chat {
    pub no: u64,
    /// Epoch seconds
    pub date: i64,
    /// Sub-second part of the post time
    #[serde(default)]
    pub date_usec: Option<u32>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub mail: Option<String>,
}

impl Chat {
    /// Post time in fractional epoch seconds.
    pub fn time(&self) -> f64 {
        self.date as f64 + f64::from(self.date_usec.unwrap_or(0)) / 1_000_000.0
    }
}
