use super::AutoplayStop;
use crate::{wager::Rejection, Error, MailboxError, Result};
use tokio::sync::{mpsc, oneshot};

pub enum Message {
    PlaceWager {
        response: oneshot::Sender<std::result::Result<(), Rejection>>,
    },
    /// A wager placed by the autoplay run started as `generation`.
    AutoplayWager {
        generation: u64,
        response: oneshot::Sender<std::result::Result<(), Rejection>>,
    },
    SelectBet {
        index: usize,
        response: oneshot::Sender<std::result::Result<(), Rejection>>,
    },
    SelectRisk {
        index: usize,
        response: oneshot::Sender<std::result::Result<(), Rejection>>,
    },
    SelectRows {
        index: usize,
        response: oneshot::Sender<std::result::Result<(), Rejection>>,
    },
    Focus(bool),
    StartAutoplay {
        rounds: Option<u32>,
    },
    StopAutoplay,
    AutoplayFinished {
        generation: u64,
        stop: AutoplayStop,
    },
    Close,
}

#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    async fn send(&self, message: Message) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| MailboxError::Closed.into())
    }

    async fn ask(
        &self,
        message: impl FnOnce(oneshot::Sender<std::result::Result<(), Rejection>>) -> Message,
    ) -> Result<()> {
        let (response, receiver) = oneshot::channel();
        self.send(message(response)).await?;
        receiver
            .await
            .map_err(|_| Error::from(MailboxError::Canceled))?
            .map_err(Error::from)
    }

    pub async fn place_wager(&self) -> Result<()> {
        self.ask(|response| Message::PlaceWager { response }).await
    }

    pub async fn select_bet(&self, index: usize) -> Result<()> {
        self.ask(|response| Message::SelectBet { index, response })
            .await
    }

    pub async fn select_risk(&self, index: usize) -> Result<()> {
        self.ask(|response| Message::SelectRisk { index, response })
            .await
    }

    pub async fn select_rows(&self, index: usize) -> Result<()> {
        self.ask(|response| Message::SelectRows { index, response })
            .await
    }

    pub async fn set_focus(&self, focused: bool) -> Result<()> {
        self.send(Message::Focus(focused)).await
    }

    /// Play `rounds` wagers back to back, or until stopped when `None`.
    pub async fn start_autoplay(&self, rounds: Option<u32>) -> Result<()> {
        self.send(Message::StartAutoplay { rounds }).await
    }

    pub async fn stop_autoplay(&self) -> Result<()> {
        self.send(Message::StopAutoplay).await
    }

    pub(super) async fn autoplay_wager(&self, generation: u64) -> Result<()> {
        self.ask(|response| Message::AutoplayWager {
            generation,
            response,
        })
        .await
    }

    pub(super) async fn autoplay_finished(&self, generation: u64, stop: AutoplayStop) -> Result<()> {
        self.send(Message::AutoplayFinished { generation, stop })
            .await
    }

    /// Close the game and its session.
    pub async fn close(&self) -> Result<()> {
        self.send(Message::Close).await
    }
}
