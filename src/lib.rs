//! Client library for the college information system: bulk imports over the
//! REST API and realtime thread messaging over the chat gateway.

pub mod api;
pub mod config;
pub mod import;
pub mod models;
pub mod realtime;
pub mod thread;

pub use api::{ApiError, CollegeApi, HttpApi};
pub use config::{ClientConfig, ConfigError, ReconnectPolicy};
pub use import::{ImportError, ImportOutcome, ImportRow, RowError, RowImporter};
pub use realtime::{ConnectionStatus, SocketSession, Subscription};
pub use thread::{MessageLog, ThreadError, ThreadView};
