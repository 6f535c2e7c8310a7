use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use log::debug;
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use super::SocketError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = SocketError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, SocketError>> + Send>>;

pub struct Connection {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Connection, SocketError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Connection, SocketError> {
        let (ws, response) = connect_async(url.as_str()).await?;
        debug!("WebSocket handshake with {} returned {}", url, response.status());

        let (sink, stream) = ws.split();

        let sink = sink
            .with(|frame: String| future::ready(Ok::<_, tungstenite::Error>(Message::text(frame))))
            .sink_map_err(SocketError::from);

        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                // pings are answered by tungstenite, close ends the stream
                Ok(_) => None,
                Err(e) => Some(Err(SocketError::from(e))),
            })
        });

        Ok(Connection {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
