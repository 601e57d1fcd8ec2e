use super::{
    autoplay::{self, AutoplayStop},
    ingress::{Mailbox, Message},
    Ball, Completion, Presentation, Signal,
};
use crate::{
    config::{AutoplayConfig, WagerConfig},
    session::{self, SessionEvent},
    wager::{Rejection, WagerCoordinator, WagerState},
};
use futures::{future::BoxFuture, stream::FuturesUnordered, StreamExt};
use plinko_types::RoundResult;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolves to (target slot, reported slot) once a drop lands or its
/// [Completion] is dropped.
type Landing = BoxFuture<'static, (usize, Option<usize>)>;

struct Autoplay {
    generation: u64,
    cancel: CancellationToken,
}

pub struct Actor {
    coordinator: WagerCoordinator,
    autoplay_config: AutoplayConfig,
    session: session::Mailbox,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    inbound: Mailbox,
    mailbox: mpsc::Receiver<Message>,
    signals: mpsc::UnboundedSender<Signal>,
    state: watch::Sender<WagerState>,
    landings: FuturesUnordered<Landing>,
    autoplay: Option<Autoplay>,
    generation: u64,
}

impl Actor {
    pub fn new(
        wager: WagerConfig,
        autoplay: AutoplayConfig,
        mailbox_size: usize,
        session: session::Mailbox,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> (Self, Mailbox, Presentation) {
        Self::with_coordinator(
            WagerCoordinator::new(wager),
            autoplay,
            mailbox_size,
            session,
            events,
        )
    }

    pub fn with_coordinator(
        coordinator: WagerCoordinator,
        autoplay: AutoplayConfig,
        mailbox_size: usize,
        session: session::Mailbox,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> (Self, Mailbox, Presentation) {
        // Create mailbox
        let (sender, mailbox) = mpsc::channel(mailbox_size);
        let inbound = Mailbox::new(sender);

        // Create outputs
        let (signals, signals_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(coordinator.state().clone());

        (
            Self {
                coordinator,
                autoplay_config: autoplay,
                session,
                events,
                inbound: inbound.clone(),
                mailbox,
                signals,
                state,
                landings: FuturesUnordered::new(),
                autoplay: None,
                generation: 0,
            },
            inbound,
            Presentation {
                signals: signals_rx,
                state: state_rx,
            },
        )
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_session_event(event),
                    None => {
                        info!("session ended");
                        break;
                    }
                },
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if !self.handle(message).await {
                        self.session.close();
                        break;
                    }
                },
                Some((target, landed)) = self.landings.next() => self.on_landing(target, landed),
            }
            self.publish();
        }

        self.stop_autoplay();
        self.coordinator.reset();
        self.publish();
        info!("game closed");
    }

    /// Returns false when the game should close.
    async fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::PlaceWager { response } => {
                let result = self.place_wager().await;
                let _ = response.send(result);
            }
            Message::AutoplayWager {
                generation,
                response,
            } => {
                let result = if self.autoplay_current(generation) {
                    self.place_wager().await
                } else {
                    debug!(generation, "ignoring wager from a stopped autoplay");
                    Err(Rejection::AutoplayStopped)
                };
                let _ = response.send(result);
            }
            Message::SelectBet { index, response } => {
                let result = self.coordinator.select_bet(index);
                let _ = response.send(result);
            }
            Message::SelectRisk { index, response } => {
                let result = self.coordinator.select_risk(index);
                let _ = response.send(result);
            }
            Message::SelectRows { index, response } => {
                let result = self.coordinator.select_rows(index);
                if let Err(rejection) = &result {
                    self.signal(Signal::Advisory(rejection.to_string()));
                }
                let _ = response.send(result);
            }
            Message::Focus(focused) => {
                if let Err(e) = self.session.set_focus(focused).await {
                    debug!(error = %e, "focus change not delivered");
                }
            }
            Message::StartAutoplay { rounds } => self.start_autoplay(rounds),
            Message::StopAutoplay => self.stop_autoplay(),
            Message::AutoplayFinished { generation, stop } => {
                if self.autoplay_current(generation) {
                    self.autoplay = None;
                    info!(?stop, "autoplay finished");
                    self.signal(Signal::AutoplayStopped(stop));
                }
            }
            Message::Close => return false,
        }
        true
    }

    async fn place_wager(&mut self) -> Result<(), Rejection> {
        let request = match self.coordinator.place_wager() {
            Ok(request) => request,
            Err(rejection) => {
                debug!(%rejection, "wager rejected");
                if matches!(
                    rejection,
                    Rejection::InsufficientBalance { .. } | Rejection::NotConfigured
                ) {
                    self.signal(Signal::Advisory(rejection.to_string()));
                }
                return Err(rejection);
            }
        };
        self.signal(Signal::Balance(self.coordinator.state().balance));

        match self.session.request(request).await {
            Ok(()) => {
                self.coordinator.mark_sent();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "wager not sent");
                self.coordinator.abort_submission(&request);
                self.signal(Signal::Balance(self.coordinator.state().balance));
                let rejection = Rejection::SessionUnavailable;
                self.signal(Signal::Advisory(rejection.to_string()));
                Err(rejection)
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::AuthenticationRequired => self.signal(Signal::AuthenticationRequired),
            SessionEvent::Configuration { init, initial } => {
                let balance = init.balance;
                let config = init.config.clone();
                self.coordinator.configure(init);
                debug!(initial, "configuration received");
                self.signal(Signal::Configured(config));
                self.signal(Signal::Balance(balance));
            }
            SessionEvent::Result(result) => self.on_result(result),
            SessionEvent::LivenessDegraded { .. } | SessionEvent::Reconnecting => {
                self.signal(Signal::Reconnecting)
            }
            SessionEvent::AdvisoryCleared => self.signal(Signal::AdvisoryCleared),
            SessionEvent::Advisory(advisory) => self.signal(Signal::Advisory(advisory.to_string())),
            SessionEvent::Fatal(fatal) => {
                self.stop_autoplay();
                self.signal(Signal::Fatal(fatal.to_string()));
                // A fatal session never recovers; closing releases the host
                self.session.close();
            }
            SessionEvent::ForcedLogout => {
                self.stop_autoplay();
                self.signal(Signal::ForcedLogout);
            }
        }
    }

    fn on_result(&mut self, result: RoundResult) {
        let target = self.coordinator.on_result_confirmed(&result);
        let (completion, landed) = Completion::new();
        let slot = target.slot;
        self.landings
            .push(Box::pin(async move { (slot, landed.await.ok()) }));
        self.signal(Signal::Drop(Ball {
            rows: target.rows,
            slot,
            multiplier: result.multiplier,
            completion,
        }));
    }

    fn on_landing(&mut self, target: usize, landed: Option<usize>) {
        let slot = landed.unwrap_or_else(|| {
            warn!(target, "drop released without completing, settling at its target");
            target
        });
        let Some(settlement) = self.coordinator.on_physical_completion(slot) else {
            return;
        };
        self.signal(Signal::Balance(settlement.balance));
        if settlement.is_win() {
            self.signal(Signal::Win {
                amount: settlement.win_amount,
                multiplier: settlement.multiplier,
            });
        }
        self.signal(Signal::Settled(settlement));
    }

    fn start_autoplay(&mut self, rounds: Option<u32>) {
        if self.autoplay.is_some() {
            debug!("autoplay already running");
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let mailbox = self.inbound.clone();
        let state = self.state.subscribe();
        let delay = self.autoplay_config.delay;
        let token = cancel.clone();
        tokio::spawn(async move {
            let stop =
                autoplay::run(mailbox.clone(), generation, state, rounds, delay, token).await;
            if mailbox.autoplay_finished(generation, stop).await.is_err() {
                debug!(?stop, "autoplay finished after game closed");
            }
        });
        self.autoplay = Some(Autoplay { generation, cancel });
    }

    fn autoplay_current(&self, generation: u64) -> bool {
        self.autoplay.as_ref().is_some_and(|autoplay| {
            autoplay.generation == generation && !autoplay.cancel.is_cancelled()
        })
    }

    fn stop_autoplay(&mut self) {
        let Some(autoplay) = self.autoplay.take() else {
            return;
        };
        autoplay.cancel.cancel();
        info!("autoplay stopped");
        self.signal(Signal::AutoplayStopped(AutoplayStop::Cancelled));
    }

    fn publish(&self) {
        let next = self.coordinator.state();
        self.state.send_if_modified(|current| {
            if current == next {
                return false;
            }
            *current = next.clone();
            true
        });
    }

    fn signal(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            debug!("signal receiver dropped");
        }
    }
}
