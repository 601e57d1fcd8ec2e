use crate::{
    bridge::HostBridge,
    config::Settings,
    game::{self, Presentation, Signal},
    session::{self, CredentialSource},
    transport::{Connector, Credential, WsConnector},
    wager::WagerState,
    Result,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::debug;

/// A running session and game pair.
pub struct Client {
    game: game::Mailbox,
    session: session::Mailbox,
    presentation: Presentation,
    session_handle: JoinHandle<()>,
    game_handle: JoinHandle<()>,
}

impl Client {
    /// Connect over WebSocket with a known credential.
    #[allow(clippy::result_large_err)]
    pub fn connect(settings: &Settings, credential: Credential) -> Result<Self> {
        // Fail on a bad address before spawning anything
        credential.endpoint()?;
        let connector = WsConnector::new(settings.session.dial_timeout);
        Ok(Self::with_connector(
            settings,
            connector,
            CredentialSource::Fixed(credential),
        ))
    }

    /// Connect over WebSocket with a credential supplied by the host page.
    pub fn embedded(settings: &Settings, bridge: HostBridge) -> Self {
        let connector = WsConnector::new(settings.session.dial_timeout);
        Self::with_connector(settings, connector, CredentialSource::Host(bridge))
    }

    pub fn with_connector<C: Connector>(
        settings: &Settings,
        connector: C,
        source: CredentialSource,
    ) -> Self {
        let (session_actor, session, events) =
            session::Actor::new(settings.session.clone(), connector, source);
        let (game_actor, game, presentation) = game::Actor::new(
            settings.wager.clone(),
            settings.autoplay.clone(),
            settings.session.mailbox_size,
            session.clone(),
            events,
        );
        let session_handle = session_actor.start();
        let game_handle = game_actor.start();
        Self {
            game,
            session,
            presentation,
            session_handle,
            game_handle,
        }
    }

    pub fn game(&self) -> &game::Mailbox {
        &self.game
    }

    pub fn session(&self) -> &session::Mailbox {
        &self.session
    }

    /// Next signal for the presentation layer; `None` once the game closed.
    pub async fn next_signal(&mut self) -> Option<Signal> {
        self.presentation.signals.recv().await
    }

    pub fn state(&self) -> WagerState {
        self.presentation.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<WagerState> {
        self.presentation.state.clone()
    }

    pub async fn place_wager(&self) -> Result<()> {
        self.game.place_wager().await
    }

    /// Close the session. Idempotent.
    pub fn close(&self) {
        self.session.close();
    }

    /// Close and wait for both actors to exit.
    pub async fn shutdown(self) {
        self.close();
        if let Err(e) = self.session_handle.await {
            debug!(error = %e, "session task failed");
        }
        if let Err(e) = self.game_handle.await {
            debug!(error = %e, "game task failed");
        }
    }
}
