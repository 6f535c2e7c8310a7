use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::ThreadMessage;

/// Frames this client sends, as `{ "event": ..., "data": ... }`.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "join_room")]
    JoinRoom(String),
    #[serde(rename = "leave_room")]
    LeaveRoom(String),
    #[serde(rename = "sendMessage")]
    SendMessage(OutboundMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom(_) => "join_room",
            ClientEvent::LeaveRoom(_) => "leave_room",
            ClientEvent::SendMessage(_) => "sendMessage",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub message: ThreadMessage,
    pub room_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    ReceiveMessage(ThreadMessage),
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerEvent {
    pub fn parse(frame: &str) -> Result<ServerEvent, serde_json::Error> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        match envelope.event.as_str() {
            "receiveMessage" => serde_json::from_value(envelope.data).map(ServerEvent::ReceiveMessage),
            _ => Ok(ServerEvent::Other(envelope.event)),
        }
    }
}
