#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

use campus_connect::api::{ApiError, CollegeApi};
use campus_connect::config::{ClientConfig, ReconnectPolicy};
use campus_connect::models::{AttendanceRecord, Registration, Thread, ThreadMessage};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 5,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        randomization: 0.0,
        connect_timeout: Duration::from_secs(2),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ResolveUsn(String),
    RecordAttendance(String, AttendanceRecord),
    Register(Registration),
    ListThreads,
    GetThread(String),
    PostMessage { thread_id: String, sender_id: String, body: String },
    CloseThread(String),
}

/// In-memory backend that records every call made against it.
#[derive(Default)]
pub struct FakeApi {
    pub users: HashMap<String, String>,
    pub rejected_emails: HashMap<String, String>,
    pub threads: HashMap<String, Thread>,
    calls: Mutex<Vec<Call>>,
    next_message: AtomicUsize,
}

impl FakeApi {
    pub fn with_user(mut self, usn: &str, user_id: &str) -> Self {
        self.users.insert(usn.to_string(), user_id.to_string());
        self
    }

    pub fn rejecting(mut self, email: &str, message: &str) -> Self {
        self.rejected_emails.insert(email.to_string(), message.to_string());
        self
    }

    pub fn with_thread(mut self, thread: Thread) -> Self {
        self.threads.insert(thread.id.clone(), thread);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Rejected {
        status: 404,
        message: format!("{what} not found"),
    }
}

#[async_trait]
impl CollegeApi for FakeApi {
    async fn resolve_usn(&self, usn: &str) -> Result<Option<String>, ApiError> {
        self.record(Call::ResolveUsn(usn.to_string()));
        Ok(self.users.get(usn).cloned())
    }

    async fn record_attendance(
        &self,
        user_id: &str,
        record: &AttendanceRecord,
    ) -> Result<(), ApiError> {
        self.record(Call::RecordAttendance(user_id.to_string(), record.clone()));
        Ok(())
    }

    async fn register_user(&self, registration: &Registration) -> Result<(), ApiError> {
        self.record(Call::Register(registration.clone()));
        let email = match registration {
            Registration::Student(s) => &s.email,
            Registration::Faculty(f) => &f.email,
            Registration::Admin(a) => &a.email,
        };
        match self.rejected_emails.get(email) {
            Some(message) => Err(ApiError::Rejected {
                status: 409,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        self.record(Call::ListThreads);
        Ok(self.threads.values().cloned().collect())
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError> {
        self.record(Call::GetThread(thread_id.to_string()));
        self.threads
            .get(thread_id)
            .cloned()
            .ok_or_else(|| not_found("Thread"))
    }

    async fn post_message(
        &self,
        thread_id: &str,
        sender_id: &str,
        body: &str,
    ) -> Result<ThreadMessage, ApiError> {
        self.record(Call::PostMessage {
            thread_id: thread_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
        });
        let n = self.next_message.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ThreadMessage {
            id: format!("sent-{n}"),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            created_at: Some(Utc::now()),
        })
    }

    async fn close_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        self.record(Call::CloseThread(thread_id.to_string()));
        if self.threads.contains_key(thread_id) {
            Ok(())
        } else {
            Err(not_found("Thread"))
        }
    }
}

pub fn thread(id: &str, status: &str, messages: Value) -> Thread {
    serde_json::from_value(json!({
        "_id": id,
        "title": "Attendance shortfall",
        "topic": "attendance",
        "status": status,
        "createdAt": "2024-03-01T10:00:00Z",
        "participants": [
            { "_id": "u1", "name": "Asha" },
            { "_id": "u2", "name": "Ravi" }
        ],
        "author": { "_id": "u1", "name": "Asha" },
        "messages": messages
    }))
    .unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Connected { conn: usize, uri: String },
    Frame { conn: usize, event: String, data: Value },
    Closed { conn: usize },
}

/// Local WebSocket gateway speaking the `{event, data}` frame format.
///
/// Every connection and inbound frame is reported in order through
/// [`Gateway::next_event`]. With `echo` set, a `sendMessage` frame is
/// returned to its sender as `receiveMessage`, the way the real gateway
/// fans a message out to the whole room.
pub struct Gateway {
    addr: std::net::SocketAddr,
    events: mpsc::UnboundedReceiver<GatewayEvent>,
    peers: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>>,
}

impl Gateway {
    pub async fn start(echo: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (events_tx, events) = mpsc::unbounded_channel();
        let peers: Arc<Mutex<Vec<mpsc::UnboundedSender<Message>>>> = Arc::default();

        let accept_peers = Arc::clone(&peers);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let mut uri = String::new();
                let capture = |request: &Request,
                               response: Response|
                 -> Result<Response, ErrorResponse> {
                    uri = request.uri().to_string();
                    Ok(response)
                };
                let Ok(ws) = accept_hdr_async(stream, capture).await else {
                    continue;
                };

                let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<Message>();
                let conn = {
                    let mut peers = accept_peers.lock().unwrap();
                    peers.push(peer_tx.clone());
                    peers.len() - 1
                };
                let _ = events_tx.send(GatewayEvent::Connected { conn, uri });

                let (mut ws_tx, mut ws_rx) = ws.split();
                tokio::spawn(async move {
                    while let Some(message) = peer_rx.recv().await {
                        let closing = matches!(message, Message::Close(_));
                        if ws_tx.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                });

                let events_tx = events_tx.clone();
                tokio::spawn(async move {
                    while let Some(Ok(message)) = ws_rx.next().await {
                        let Message::Text(text) = message else {
                            if matches!(message, Message::Close(_)) {
                                break;
                            }
                            continue;
                        };
                        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                        let event = frame["event"].as_str().unwrap_or_default().to_string();
                        let data = frame["data"].clone();

                        if echo && event == "sendMessage" {
                            let mut message = data.clone();
                            message.as_object_mut().unwrap().remove("roomId");
                            let reply = json!({ "event": "receiveMessage", "data": message });
                            let _ = peer_tx.send(Message::text(reply.to_string()));
                        }
                        let _ = events_tx.send(GatewayEvent::Frame { conn, event, data });
                    }
                    let _ = events_tx.send(GatewayEvent::Closed { conn });
                });
            }
        });

        Gateway {
            addr,
            events,
            peers,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::default()
            .with_socket_url(format!("http://{}/socket", self.addr))
            .with_reconnect(fast_policy())
    }

    pub fn url(&self, user_id: &str) -> Url {
        self.config().socket_url(user_id).unwrap()
    }

    pub async fn next_event(&mut self) -> GatewayEvent {
        timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for the gateway")
            .expect("gateway stopped")
    }

    /// Next frame, skipping nothing: panics if the next event is not a frame.
    pub async fn next_frame(&mut self) -> (usize, String, Value) {
        match self.next_event().await {
            GatewayEvent::Frame { conn, event, data } => (conn, event, data),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    pub async fn assert_quiet(&mut self, period: Duration) {
        if let Ok(Some(event)) = timeout(period, self.events.recv()).await {
            panic!("unexpected gateway event {event:?}");
        }
    }

    pub fn push(&self, conn: usize, event: &str, data: Value) {
        let frame = json!({ "event": event, "data": data });
        self.peers.lock().unwrap()[conn]
            .send(Message::text(frame.to_string()))
            .unwrap();
    }

    /// Close every open connection from the gateway side.
    pub fn drop_connections(&self) {
        for peer in self.peers.lock().unwrap().iter() {
            let _ = peer.send(Message::Close(None));
        }
    }
}
