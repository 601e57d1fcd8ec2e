use super::SessionState;
use crate::{Error, MailboxError, Result};
use plinko_types::BetRequest;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

pub enum Message {
    Request {
        bet: BetRequest,
        response: oneshot::Sender<Result<()>>,
    },
    Focus(bool),
    State {
        response: oneshot::Sender<SessionState>,
    },
}

#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
    stopped: CancellationToken,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>, stopped: CancellationToken) -> Self {
        Self { sender, stopped }
    }

    async fn send(&self, message: Message) -> Result<()> {
        tokio::select! {
            result = self.sender.send(message) => {
                result.map_err(|_| MailboxError::Closed)?;
                Ok(())
            },
            _ = self.stopped.cancelled() => {
                Err(MailboxError::ShuttingDown.into())
            },
        }
    }

    async fn wait<T>(&self, receiver: oneshot::Receiver<T>) -> Result<T> {
        tokio::select! {
            result = receiver => {
                result.map_err(|_| Error::from(MailboxError::Canceled))
            },
            _ = self.stopped.cancelled() => {
                Err(MailboxError::ShuttingDown.into())
            },
        }
    }

    /// Submit a wager. Resolves once the frame is handed to the transport.
    pub async fn request(&self, bet: BetRequest) -> Result<()> {
        let (response, receiver) = oneshot::channel();
        self.send(Message::Request { bet, response }).await?;
        self.wait(receiver).await?
    }

    pub async fn set_focus(&self, focused: bool) -> Result<()> {
        self.send(Message::Focus(focused)).await
    }

    pub async fn state(&self) -> Result<SessionState> {
        let (response, receiver) = oneshot::channel();
        self.send(Message::State { response }).await?;
        self.wait(receiver).await
    }

    /// Ask the session to close. Idempotent.
    pub fn close(&self) {
        self.stopped.cancel();
    }

    pub fn is_closing(&self) -> bool {
        self.stopped.is_cancelled()
    }
}
