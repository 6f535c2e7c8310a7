//! A mounted thread: REST history plus live updates for one thread.

mod message_log;

use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::api::{ApiError, CollegeApi};
use crate::config::{ClientConfig, ConfigError};
use crate::models::{Thread, ThreadMessage, ThreadStatus};
use crate::realtime::{ConnectionStatus, SocketSession};

pub use message_log::MessageLog;

const INCOMING_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum ThreadError {
    #[error("Thread {0} is closed")]
    Closed(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Owns the socket session for as long as the thread is on screen.
///
/// Mounting joins the thread's room and loads its history; unmounting
/// leaves the room and closes the connection. Messages reach the log from
/// the history fetch, from our own sends and from the socket, and the log
/// keeps one copy of each.
pub struct ThreadView {
    user_id: String,
    thread: Thread,
    api: Arc<dyn CollegeApi>,
    session: SocketSession,
    log: Arc<RwLock<MessageLog>>,
    incoming: mpsc::Receiver<ThreadMessage>,
    listener: JoinHandle<()>,
}

impl ThreadView {
    /// Connect to the configured gateway as `user_id` and mount `thread_id`.
    pub async fn open(
        config: &ClientConfig,
        api: Arc<dyn CollegeApi>,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Self, ThreadError> {
        let session = SocketSession::connect(config, user_id)?;
        Self::mount(api, session, user_id, thread_id).await
    }

    pub async fn mount(
        api: Arc<dyn CollegeApi>,
        session: SocketSession,
        user_id: &str,
        thread_id: &str,
    ) -> Result<Self, ThreadError> {
        let mut subscription = session.subscribe();
        session.join_room(Some(thread_id));

        let log = Arc::new(RwLock::new(MessageLog::new()));
        let (incoming_tx, incoming) = mpsc::channel(INCOMING_CAPACITY);

        let listener = {
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                while let Some(message) = subscription.recv().await {
                    if log.write().await.merge(message.clone()) {
                        // the log has it either way; a reader that falls behind misses notifications
                        if incoming_tx.try_send(message).is_err() {
                            debug!("Incoming queue full or closed, notification dropped");
                        }
                    } else {
                        debug!("Dropping duplicate message {}", message.id);
                    }
                }
            })
        };

        let mut thread = match api.get_thread(thread_id).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!("Error loading thread {}: {}", thread_id, e);
                listener.abort();
                session.leave_room(Some(thread_id));
                session.disconnect().await;
                return Err(e.into());
            }
        };

        let history = std::mem::take(&mut thread.messages);
        let added = log.write().await.merge_all(history);
        info!("Thread {} mounted with {} messages", thread_id, added);

        Ok(ThreadView {
            user_id: user_id.to_string(),
            thread,
            api,
            session,
            log,
            incoming,
            listener,
        })
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.session.status()
    }

    pub async fn messages(&self) -> Vec<ThreadMessage> {
        self.log.read().await.messages().to_vec()
    }

    /// Next message that arrived over the socket and was not already in the
    /// log. While the queue is full new notifications are dropped;
    /// [`ThreadView::messages`] still has every message.
    pub async fn next_incoming(&mut self) -> Option<ThreadMessage> {
        self.incoming.recv().await
    }

    /// Persist `body` as a new message, then fan it out to the room.
    pub async fn send(&self, body: &str) -> Result<ThreadMessage, ThreadError> {
        if self.thread.is_closed() {
            return Err(ThreadError::Closed(self.thread.id.clone()));
        }

        let message = self
            .api
            .post_message(&self.thread.id, &self.user_id, body)
            .await?;
        self.log.write().await.merge(message.clone());
        self.session.send_message(&message, &self.thread.id);
        Ok(message)
    }

    pub async fn close(&mut self) -> Result<(), ThreadError> {
        self.api.close_thread(&self.thread.id).await?;
        self.thread.status = ThreadStatus::Closed;
        info!("Thread {} marked closed", self.thread.id);
        Ok(())
    }

    pub async fn unmount(self) {
        self.listener.abort();
        self.session.leave_room(Some(&self.thread.id));
        self.session.disconnect().await;
        debug!("Thread {} unmounted", self.thread.id);
    }
}
