//! Realtime thread messaging over the chat gateway.

mod messages;
mod room;
mod session;
mod transport;

use thiserror::Error;

pub use messages::{ClientEvent, OutboundMessage, ServerEvent};
pub use room::RoomMembership;
pub use session::{SocketSession, Subscription};
pub use transport::{Connection, Connector, FrameSink, FrameStream, WsConnector};

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Connection timed out")]
    Timeout,
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Malformed frame: {0}")]
    Frame(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnection attempts ran out. Terminal for the session.
    Error,
}
