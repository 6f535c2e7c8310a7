use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use reqwest::Url;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

use super::messages::{ClientEvent, OutboundMessage, ServerEvent};
use super::room::RoomMembership;
use super::transport::{Connection, Connector, FrameSink, WsConnector};
use super::{ConnectionStatus, SocketError};
use crate::config::{ClientConfig, ConfigError, ReconnectPolicy};
use crate::models::ThreadMessage;

const INBOUND_CAPACITY: usize = 256;

enum Command {
    Join(String),
    Leave(String),
    Emit(ClientEvent),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to one user's realtime connection.
///
/// The connection itself is owned by a driver task; the handle only queues
/// commands for it. Transport failures never surface as errors here, they
/// are logged by the driver and show up in [`SocketSession::status`].
pub struct SocketSession {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    inbound: broadcast::Sender<ThreadMessage>,
    driver: JoinHandle<()>,
}

impl SocketSession {
    /// Connect to the configured gateway as `user_id`.
    pub fn connect(config: &ClientConfig, user_id: &str) -> Result<Self, ConfigError> {
        let url = config.socket_url(user_id)?;
        Ok(Self::spawn(url, config.reconnect.clone(), Arc::new(WsConnector)))
    }

    pub fn spawn(url: Url, policy: ReconnectPolicy, connector: Arc<dyn Connector>) -> Self {
        let id = Uuid::new_v4().to_string();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        info!("[{}] Opening realtime session to {}", id, url);

        let driver = Driver {
            id: id.clone(),
            url,
            policy,
            connector,
            commands: commands_rx,
            status: status_tx,
            inbound: inbound.clone(),
            rooms: RoomMembership::default(),
            failures: 0,
        };

        SocketSession {
            id,
            commands: commands_tx,
            status: status_rx,
            inbound,
            driver: tokio::spawn(driver.run()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Join the room for `room_id`. `None`, empty ids and the room already
    /// joined are ignored.
    pub fn join_room(&self, room_id: Option<&str>) {
        if let Some(room) = room_id.filter(|r| !r.is_empty()) {
            self.command(Command::Join(room.to_string()));
        }
    }

    pub fn leave_room(&self, room_id: Option<&str>) {
        if let Some(room) = room_id.filter(|r| !r.is_empty()) {
            self.command(Command::Leave(room.to_string()));
        }
    }

    /// Fan `message` out to `room_id`. Not acknowledged; dropped while the
    /// session is offline.
    pub fn send_message(&self, message: &ThreadMessage, room_id: &str) {
        self.command(Command::Emit(ClientEvent::SendMessage(OutboundMessage {
            message: message.clone(),
            room_id: room_id.to_string(),
        })));
    }

    /// Inbound messages from now on. Dropping the handle unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inbound.subscribe(),
        }
    }

    /// Leave the current room, close the connection and wait for the
    /// driver to finish.
    pub async fn disconnect(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.driver.await {
            warn!("[{}] Session driver ended abnormally: {}", self.id, e);
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("[{}] Session driver is gone, command dropped", self.id);
        }
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<ThreadMessage>,
}

impl Subscription {
    /// Next message in arrival order, `None` once the session is gone.
    pub async fn recv(&mut self) -> Option<ThreadMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber fell behind, {} messages skipped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Why the driver stopped trying to (re)connect.
struct Stop(Option<oneshot::Sender<()>>);

enum Exit {
    Shutdown(Option<oneshot::Sender<()>>),
    /// `heard` is set once the gateway sent anything on this connection.
    Dropped { heard: bool },
}

struct Driver {
    id: String,
    url: Url,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ConnectionStatus>,
    inbound: broadcast::Sender<ThreadMessage>,
    rooms: RoomMembership,
    failures: u32,
}

impl Driver {
    async fn run(mut self) {
        let Stop(ack) = loop {
            let mut connection = match self.establish().await {
                Ok(connection) => connection,
                Err(stop) => break stop,
            };

            let opened = Instant::now();
            match self.pump(&mut connection).await {
                Exit::Shutdown(ack) => {
                    self.close(connection).await;
                    break Stop(ack);
                }
                Exit::Dropped { heard } => {
                    self.rooms.on_disconnected();
                    self.status.send_replace(ConnectionStatus::Connecting);
                    // a connection that never settled keeps counting against the budget
                    if heard || opened.elapsed() >= self.policy.initial_delay {
                        self.failures = 0;
                    }
                    warn!("[{}] Connection lost, reconnecting", self.id);
                    if let Err(stop) = self.fail().await {
                        break stop;
                    }
                }
            }
        };

        if *self.status.borrow() != ConnectionStatus::Error {
            self.status.send_replace(ConnectionStatus::Disconnected);
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    async fn establish(&mut self) -> Result<Connection, Stop> {
        loop {
            if self.failures > 0 {
                let delay = self.policy.delay_for(self.failures);
                debug!(
                    "[{}] Reconnection attempt {} in {:?}",
                    self.id, self.failures, delay
                );

                let pause = sleep(delay);
                tokio::pin!(pause);
                loop {
                    tokio::select! {
                        () = &mut pause => break,
                        command = self.commands.recv() => self.handle_offline(command)?,
                    }
                }
            }

            self.status.send_replace(ConnectionStatus::Connecting);

            let connector = Arc::clone(&self.connector);
            let url = self.url.clone();
            let attempt = timeout(self.policy.connect_timeout, connector.connect(&url));
            tokio::pin!(attempt);

            let result = loop {
                tokio::select! {
                    result = &mut attempt => break result,
                    command = self.commands.recv() => self.handle_offline(command)?,
                }
            };

            match result {
                Ok(Ok(connection)) => return Ok(connection),
                Ok(Err(e)) => warn!("[{}] connect_error: {}", self.id, e),
                Err(_) => warn!("[{}] connect_error: {}", self.id, SocketError::Timeout),
            }
            self.fail().await?;
        }
    }

    /// Count one failed or unsettled connection. Past the budget the
    /// session turns to `Error` and only serves commands until shutdown.
    async fn fail(&mut self) -> Result<(), Stop> {
        self.failures += 1;
        if self.failures > self.policy.max_attempts {
            error!(
                "[{}] Giving up after {} failed connection attempts",
                self.id, self.failures
            );
            self.status.send_replace(ConnectionStatus::Error);
            return Err(self.idle().await);
        }
        Ok(())
    }

    /// Serve commands without a connection until told to stop.
    async fn idle(&mut self) -> Stop {
        loop {
            let command = self.commands.recv().await;
            if let Err(stop) = self.handle_offline(command) {
                return stop;
            }
        }
    }

    fn handle_offline(&mut self, command: Option<Command>) -> Result<(), Stop> {
        match command {
            None => return Err(Stop(None)),
            Some(Command::Shutdown(ack)) => return Err(Stop(Some(ack))),
            Some(Command::Join(room)) => {
                self.rooms.join(&room, false);
            }
            Some(Command::Leave(room)) => {
                self.rooms.leave(&room, false);
            }
            Some(Command::Emit(event)) => {
                warn!("[{}] Not connected, dropping {}", self.id, event.name());
            }
        }
        Ok(())
    }

    async fn pump(&mut self, connection: &mut Connection) -> Exit {
        self.status.send_replace(ConnectionStatus::Connected);
        info!("[{}] Socket connected", self.id);

        for event in self.rooms.on_connected() {
            if let Err(e) = self.emit(&mut connection.sink, &event).await {
                warn!("[{}] Failed to rejoin room: {}", self.id, e);
                return Exit::Dropped { heard: false };
            }
        }

        let mut heard = false;
        loop {
            tokio::select! {
                frame = connection.stream.next() => match frame {
                    Some(Ok(text)) => {
                        heard = true;
                        self.dispatch(&text);
                    }
                    Some(Err(e)) => {
                        warn!("[{}] Transport error: {}", self.id, e);
                        return Exit::Dropped { heard };
                    }
                    None => {
                        warn!("[{}] Connection closed by gateway", self.id);
                        return Exit::Dropped { heard };
                    }
                },
                command = self.commands.recv() => {
                    let events = match command {
                        None => return Exit::Shutdown(None),
                        Some(Command::Shutdown(ack)) => return Exit::Shutdown(Some(ack)),
                        Some(Command::Join(room)) => self.rooms.join(&room, true),
                        Some(Command::Leave(room)) => self.rooms.leave(&room, true),
                        Some(Command::Emit(event)) => vec![event],
                    };
                    for event in events {
                        if let Err(e) = self.emit(&mut connection.sink, &event).await {
                            warn!("[{}] Failed to send {}: {}", self.id, event.name(), e);
                            return Exit::Dropped { heard };
                        }
                    }
                }
            }
        }
    }

    async fn close(&mut self, mut connection: Connection) {
        for event in self.rooms.on_shutdown() {
            if let Err(e) = self.emit(&mut connection.sink, &event).await {
                warn!("[{}] Failed to leave room: {}", self.id, e);
                break;
            }
        }
        if let Err(e) = connection.sink.close().await {
            debug!("[{}] Error while closing: {}", self.id, e);
        }
        info!("[{}] Socket disconnected", self.id);
    }

    async fn emit(&self, sink: &mut FrameSink, event: &ClientEvent) -> Result<(), SocketError> {
        let frame = serde_json::to_string(event)?;
        debug!("[{}] -> {}", self.id, event.name());
        sink.send(frame).await
    }

    fn dispatch(&self, frame: &str) {
        match ServerEvent::parse(frame) {
            Ok(ServerEvent::ReceiveMessage(message)) => {
                debug!("[{}] <- receiveMessage {}", self.id, message.id);
                // no subscribers is fine, the view may not be listening yet
                let _ = self.inbound.send(message);
            }
            Ok(ServerEvent::Other(event)) => debug!("[{}] Ignoring event {}", self.id, event),
            Err(e) => warn!("[{}] {}", self.id, SocketError::Frame(e)),
        }
    }
}
