//! The wager side of the client: admits wagers, turns confirmed results into
//! drops, and settles them as drops complete.

mod actor;
mod autoplay;
mod ingress;

pub use actor::Actor;
pub use autoplay::AutoplayStop;
pub use ingress::{Mailbox, Message};

use crate::wager::{Settlement, WagerState};
use plinko_types::GameConfiguration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

/// Notifications for the presentation layer.
#[derive(Debug)]
pub enum Signal {
    AuthenticationRequired,
    Configured(GameConfiguration),
    Balance(f64),
    /// Animate a drop towards `slot` and call [Completion::complete] when it lands.
    Drop(Ball),
    Settled(Settlement),
    Win { amount: f64, multiplier: f64 },
    Advisory(String),
    Reconnecting,
    AdvisoryCleared,
    Fatal(String),
    ForcedLogout,
    AutoplayStopped(AutoplayStop),
}

/// One drop: where to aim it and how to report its landing.
#[derive(Debug)]
pub struct Ball {
    pub rows: u8,
    pub slot: usize,
    pub multiplier: f64,
    pub completion: Completion,
}

/// Reports where a drop physically landed. Dropping it unused settles the
/// drop at its target slot.
#[derive(Debug)]
pub struct Completion {
    sender: oneshot::Sender<usize>,
}

impl Completion {
    pub(crate) fn new() -> (Self, oneshot::Receiver<usize>) {
        let (sender, receiver) = oneshot::channel();
        (Self { sender }, receiver)
    }

    pub fn complete(self, slot: usize) {
        if self.sender.send(slot).is_err() {
            debug!(slot, "completion after game closed");
        }
    }
}

/// Outputs of the game actor.
pub struct Presentation {
    pub signals: mpsc::UnboundedReceiver<Signal>,
    pub state: watch::Receiver<WagerState>,
}
