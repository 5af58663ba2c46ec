//! Local stand-ins for the platform: a scripted WebSocket server and an
//! in-memory program directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use nicolive::discovery::{EmbeddedData, LiveProgram, ProgramDirectory};
use nicolive::{NicoliveError, Result};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Await `future`, failing the test if it takes longer than [`TIMEOUT`].
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out")
}

/// A WebSocket server that accepts a single client.
///
/// Text frames from the client are queued for the test; the queue ends
/// when the client disconnects.
pub struct MockServer {
    url: String,
    received: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<Message>,
}

/// Route library logs through the test harness; `RUST_LOG` selects levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl MockServer {
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let url = format!("ws://{}", listener.local_addr().expect("local addr"));
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = accept_async(tcp).await else {
                return;
            };
            let (mut sink, mut stream) = ws.split();

            loop {
                tokio::select! {
                    message = outgoing_rx.recv() => match message {
                        Some(message) => {
                            if sink.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            let _ = received_tx.send(text.to_string());
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                }
            }
        });

        Self {
            url,
            received,
            outgoing,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next text frame from the client, or `None` once it disconnected.
    pub async fn recv(&mut self) -> Option<String> {
        within(self.received.recv()).await
    }

    pub async fn recv_json(&mut self) -> Value {
        let text = self.recv().await.expect("client disconnected");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Wait for the client to disconnect, skipping remaining frames.
    pub async fn closed(&mut self) {
        while self.recv().await.is_some() {}
    }

    pub fn send(&self, value: Value) {
        self.outgoing
            .send(Message::text(value.to_string()))
            .expect("mock server stopped");
    }

    /// Complete the control handshake: read `startWatching`.
    pub async fn expect_start_watching(&mut self) {
        let message = self.recv_json().await;
        assert_eq!(message["type"], "startWatching");
    }

    /// Send a `ping` and wait for the `pong`, which proves every frame sent
    /// before it was handled.
    pub async fn sync(&mut self) {
        self.send(json!({ "type": "ping" }));
        loop {
            let message = self.recv_json().await;
            if message["type"] == "pong" {
                return;
            }
        }
    }
}

pub fn room(uri: &str, thread_id: &str) -> Value {
    json!({
        "type": "room",
        "data": {
            "name": "アリーナ",
            "messageServer": { "uri": uri, "type": "niwavided" },
            "threadId": thread_id,
            "isFirst": true
        }
    })
}

pub fn chat(no: u64, date: i64, content: &str, mail: &str) -> Value {
    json!({
        "chat": {
            "thread": "M.1",
            "no": no,
            "vpos": 0,
            "date": date,
            "date_usec": 0,
            "mail": mail,
            "user_id": format!("user{no}"),
            "content": content
        }
    })
}

pub fn embedded_data(web_socket_url: &str) -> EmbeddedData {
    serde_json::from_value(json!({
        "site": { "relive": { "webSocketUrl": web_socket_url } },
        "program": { "nicoliveProgramId": "lv1", "title": "test" }
    }))
    .expect("valid embedded data")
}

pub fn program(id: &str, tags: &[&str]) -> LiveProgram {
    serde_json::from_value(json!({
        "id": id,
        "tags": tags.iter().map(|text| json!({ "text": text })).collect::<Vec<_>>()
    }))
    .expect("valid program")
}

/// In-memory [`ProgramDirectory`] that counts its lookups.
#[derive(Default)]
pub struct FakeDirectory {
    programs: Mutex<HashMap<String, Vec<LiveProgram>>>,
    failing_tags: Mutex<Vec<String>>,
    socket_url: Mutex<String>,
    searches: AtomicUsize,
    lookups: Mutex<Vec<String>>,
}

impl FakeDirectory {
    pub fn new(socket_url: &str) -> Self {
        let directory = Self::default();
        directory.set_socket_url(socket_url);
        directory
    }

    pub fn with_programs(self, tag: &str, programs: Vec<LiveProgram>) -> Self {
        self.programs
            .lock()
            .unwrap()
            .insert(tag.to_string(), programs);
        self
    }

    pub fn with_failing_tag(self, tag: &str) -> Self {
        self.failing_tags.lock().unwrap().push(tag.to_string());
        self
    }

    pub fn set_socket_url(&self, url: &str) {
        *self.socket_url.lock().unwrap() = url.to_string();
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Program ids whose page descriptor was requested, in order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgramDirectory for FakeDirectory {
    async fn live_programs(&self, tag: &str) -> Result<Vec<LiveProgram>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.failing_tags.lock().unwrap().iter().any(|t| t == tag) {
            return Err(NicoliveError::discovery("search unavailable"));
        }
        Ok(self
            .programs
            .lock()
            .unwrap()
            .get(tag)
            .cloned()
            .unwrap_or_default())
    }

    async fn embedded_data(&self, program_id: &str) -> Result<EmbeddedData> {
        self.lookups.lock().unwrap().push(program_id.to_string());
        Ok(embedded_data(&self.socket_url.lock().unwrap()))
    }
}
