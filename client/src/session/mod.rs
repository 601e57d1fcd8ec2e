//! Connection lifecycle: credentials, connect, initial data, liveness,
//! reconnection, and teardown.
//!
//! [Machine] holds every transition and deadline and performs no I/O. The
//! [Actor] owns the transport and feeds the machine inputs as they arrive.

mod actor;
mod heartbeat;
mod ingress;
mod machine;

pub use actor::{Actor, CredentialSource};
pub use ingress::{Mailbox, Message};
pub use machine::{Action, Machine};

use plinko_types::{GameInit, RoundResult};
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingCredential,
    Connecting,
    AwaitingInitialData,
    Ready,
    /// Connected, but `missed` consecutive liveness pings went unanswered.
    Degraded {
        missed: u32,
    },
    Disconnected,
    Closed,
}

impl SessionState {
    /// Wager submissions are only accepted in these states.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded { .. })
    }
}

/// Which half of the host credential the session is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CredentialStage {
    Token,
    Endpoint,
}

impl fmt::Display for CredentialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => f.write_str("session token"),
            Self::Endpoint => f.write_str("connection address"),
        }
    }
}

/// Unrecoverable session failures. Each is reported exactly once.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Fatal {
    #[error("Could not sign in: timed out waiting for the {0}.")]
    CredentialTimeout(CredentialStage),
    #[error("Could not connect to the game server: {0}")]
    ConnectFailed(String),
    #[error("The game server did not send the game data in time.")]
    InitTimeout,
    #[error("Connection lost: the game server stopped responding.")]
    HeartbeatLost { missed: u32 },
    #[error("You were away too long. Please reload the game.")]
    AwayTooLong,
    #[error("The game was in the background too long. Please reload the game.")]
    BackgroundTimeout,
    #[error("Received invalid data from the game server: {0}")]
    Malformed(String),
}

/// Dismissible notices that leave the session usable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Advisory {
    InitTimeout,
    ServerError(String),
    Alert(String),
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitTimeout => f.write_str("Game data is late. Continuing with the last known settings."),
            Self::ServerError(message) if message.is_empty() => {
                f.write_str("The game server reported an error.")
            }
            Self::ServerError(message) | Self::Alert(message) => f.write_str(message),
        }
    }
}

/// What the session reports to the game.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    AuthenticationRequired,
    /// Game configuration and balance; `initial` is false on refreshes after a reconnect.
    Configuration { init: GameInit, initial: bool },
    Result(RoundResult),
    LivenessDegraded { missed: u32 },
    Reconnecting,
    AdvisoryCleared,
    Advisory(Advisory),
    Fatal(Fatal),
    ForcedLogout,
}
