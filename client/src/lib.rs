pub mod bridge;
pub mod client;
pub mod config;
pub mod game;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod outcome;
pub mod session;
pub mod transport;
pub mod wager;

pub use client::Client;
pub use config::{Config, Settings};
pub use transport::{Credential, WsConnector};
use session::SessionState;
use thiserror::Error;
use wager::Rejection;

/// Failure to reach an actor through its mailbox.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxError {
    #[error("mailbox closed")]
    Closed,
    #[error("response canceled")]
    Canceled,
    #[error("shutting down")]
    ShuttingDown,
}

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected http, https, ws or wss)")]
    InvalidScheme(String),
    #[error("invalid token")]
    InvalidToken,
    #[error("dial timeout")]
    DialTimeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("session not ready ({0:?})")]
    NotReady(SessionState),
    #[error("wager rejected: {0}")]
    Rejected(#[from] Rejection),
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
