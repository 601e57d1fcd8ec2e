use super::{
    ingress::{Mailbox, Message},
    Action, Machine, SessionEvent,
};
use crate::{
    bridge::{HostBridge, HostCredential},
    config::SessionConfig,
    transport::{Connection, Connector, Credential, Inbound},
    Error, Result,
};
use futures::future::BoxFuture;
use plinko_types::Frame;
use std::future::{pending, Future};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the session gets its credential from.
pub enum CredentialSource {
    Fixed(Credential),
    Host(HostBridge),
}

/// Owns the transport and drives the [Machine].
pub struct Actor<C: Connector> {
    machine: Machine,
    connector: C,
    host: Option<HostBridge>,
    mailbox: mpsc::Receiver<Message>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stopped: CancellationToken,
    connection: Option<Connection>,
    connecting: Option<BoxFuture<'static, Result<Connection>>>,
}

impl<C: Connector> Actor<C> {
    pub fn new(
        config: SessionConfig,
        connector: C,
        source: CredentialSource,
    ) -> (Self, Mailbox, mpsc::UnboundedReceiver<SessionEvent>) {
        // Create mailbox
        let (sender, mailbox) = mpsc::channel(config.mailbox_size);
        let stopped = CancellationToken::new();
        let inbound = Mailbox::new(sender, stopped.clone());

        // Create event stream
        let (events, receiver) = mpsc::unbounded_channel();

        let (machine, host) = match source {
            CredentialSource::Fixed(credential) => {
                (Machine::with_credential(config, credential), None)
            }
            CredentialSource::Host(bridge) => (Machine::hosted(config), Some(bridge)),
        };

        (
            Self {
                machine,
                connector,
                host,
                mailbox,
                events,
                stopped,
                connection: None,
                connecting: None,
            },
            inbound,
            receiver,
        )
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let actions = self.machine.start(Instant::now());
        self.execute(actions).await;

        while !self.machine.is_closed() {
            let deadline = self.machine.next_deadline();
            let credentials = self.host.as_mut().and_then(|host| host.credentials.as_mut());
            let actions = tokio::select! {
                biased;

                _ = self.stopped.cancelled() => self.machine.close(),
                message = self.mailbox.recv() => match message {
                    Some(message) => self.handle(message).await,
                    None => {
                        debug!("all session handles dropped");
                        self.machine.close()
                    }
                },
                result = dial(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(connection) => {
                            self.connection = Some(connection);
                            self.machine.on_connected(Instant::now())
                        }
                        Err(e) => self.machine.on_connect_failed(e.to_string(), Instant::now()),
                    }
                },
                inbound = receive(&mut self.connection) => match inbound {
                    Some(Inbound::Frame(frame)) => self.machine.on_frame(frame, Instant::now()),
                    Some(Inbound::Error(reason)) => self.machine.on_transport_error(reason),
                    Some(Inbound::Malformed(reason)) => self.machine.on_malformed(reason),
                    None => {
                        self.connection = None;
                        self.machine.on_disconnected(Instant::now())
                    }
                },
                credential = next_credential(credentials) => match credential {
                    Some(credential) => self.machine.on_credential(credential, Instant::now()),
                    None => {
                        warn!("host credential channel closed");
                        if let Some(host) = self.host.as_mut() {
                            host.credentials = None;
                        }
                        Vec::new()
                    }
                },
                _ = sleep_or_pending(deadline) => self.machine.on_deadline(Instant::now()),
            };
            self.execute(actions).await;
        }

        self.stopped.cancel();
        info!("session closed");
    }

    async fn handle(&mut self, message: Message) -> Vec<Action> {
        match message {
            Message::Request { bet, response } => {
                let result = match self.machine.request(bet) {
                    Ok(frame) => self.send(frame).await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
                Vec::new()
            }
            Message::Focus(focused) => self.machine.on_focus(focused, Instant::now()),
            Message::State { response } => {
                let _ = response.send(self.machine.state());
                Vec::new()
            }
        }
    }

    /// The returned future owns its sender so no borrow of the actor is held
    /// across the await.
    fn send(&self, frame: Frame) -> impl Future<Output = Result<()>> + Send + 'static {
        let sender = self.connection.as_ref().map(Connection::sender);
        async move {
            match sender {
                Some(sender) => sender
                    .send(frame)
                    .await
                    .map_err(|_| Error::ConnectionClosed),
                None => Err(Error::ConnectionClosed),
            }
        }
    }

    async fn execute(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Connect(credential) => {
                    self.connecting = Some(self.connector.connect(credential));
                }
                Action::AbortConnect => {
                    if self.connecting.take().is_some() {
                        debug!("connection attempt abandoned");
                    }
                }
                Action::Disconnect => {
                    if self.connection.take().is_some() {
                        debug!("transport dropped");
                    }
                }
                Action::Send(frame) => {
                    let event = frame.event.clone();
                    if let Err(e) = self.send(frame).await {
                        debug!(%event, error = %e, "failed to send frame");
                    }
                }
                Action::Emit(event) => {
                    if self.events.send(event).is_err() {
                        debug!("session event receiver dropped");
                    }
                }
                Action::Host(message) => {
                    if let Some(host) = &self.host {
                        if let Err(e) = host.lifecycle.try_send(message) {
                            warn!(error = %e, "failed to notify host");
                        }
                    }
                }
            }
        }
    }
}

async fn dial(connecting: &mut Option<BoxFuture<'static, Result<Connection>>>) -> Result<Connection> {
    match connecting {
        Some(future) => future.await,
        None => pending().await,
    }
}

async fn receive(connection: &mut Option<Connection>) -> Option<Inbound> {
    match connection {
        Some(connection) => connection.recv().await,
        None => pending().await,
    }
}

async fn next_credential(
    credentials: Option<&mut mpsc::Receiver<HostCredential>>,
) -> Option<HostCredential> {
    match credentials {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}

async fn sleep_or_pending(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bridge::HostMessage,
        mocks::{memory, MemoryServer, Peer},
        session::{Fatal, SessionState},
    };
    use plinko_types::{
        BetRequest, ClientEvent, GameConfiguration, GameInit, PayoutTable, RowOption, ServerEvent,
    };
    use std::time::Duration;

    fn init() -> GameInit {
        GameInit {
            config: GameConfiguration {
                bets: vec![1.0],
                risks: vec!["low".to_string()],
                rows: vec![RowOption {
                    rows: 8,
                    tables: vec![PayoutTable {
                        multipliers: vec![5.6, 2.1, 1.1, 1.0, 0.5],
                        probabilities: vec![],
                    }],
                }],
            },
            balance: 100.0,
        }
    }

    fn credential() -> Credential {
        Credential::new("token", "http://localhost:8080", "plinko")
    }

    async fn connected(
        server: &mut MemoryServer,
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Peer {
        let peer = server.accept().await.unwrap();
        peer.send(ServerEvent::GameInit(init())).await.unwrap();
        match events.recv().await.unwrap() {
            SessionEvent::Configuration { initial, .. } => assert!(initial),
            other => panic!("unexpected event: {other:?}"),
        }
        peer
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_reaches_server() {
        let (connector, mut server) = memory();
        let (actor, mailbox, mut events) = Actor::new(
            SessionConfig::default(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let handle = actor.start();
        let mut peer = connected(&mut server, &mut events).await;
        assert_eq!(peer.credential, credential());
        assert_eq!(mailbox.state().await.unwrap(), SessionState::Ready);

        let bet = BetRequest {
            bet_index: 0,
            risk_index: 0,
            row_index: 0,
        };
        mailbox.request(bet).await.unwrap();
        let received = loop {
            match peer.recv_event().await {
                Some(ClientEvent::Ping) => continue,
                other => break other,
            }
        };
        assert_eq!(received, Some(ClientEvent::Request(bet)));

        mailbox.close();
        handle.await.unwrap();
        assert!(peer.recv().await.is_none());
        assert!(mailbox.is_closing());
        assert!(mailbox.state().await.is_err());
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_on_worker_threads() {
        let (connector, mut server) = memory();
        let (actor, mailbox, mut events) = Actor::new(
            SessionConfig::default(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let run = actor.run();
        assert_send(&run);
        let handle = tokio::spawn(run);
        let mut peer = connected(&mut server, &mut events).await;

        // Requests may arrive from any worker
        let bet = BetRequest {
            bet_index: 0,
            risk_index: 0,
            row_index: 0,
        };
        let senders: Vec<_> = (0..4)
            .map(|_| {
                let mailbox = mailbox.clone();
                tokio::spawn(async move { mailbox.request(bet).await })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap().unwrap();
        }
        let mut received = 0;
        while received < 4 {
            match peer.recv_event().await {
                Some(ClientEvent::Request(request)) => {
                    assert_eq!(request, bet);
                    received += 1;
                }
                Some(ClientEvent::Ping) => {}
                None => panic!("connection closed"),
            }
        }

        mailbox.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_and_reconnect() {
        let (connector, mut server) = memory();
        let config = SessionConfig::default();
        let (actor, mailbox, mut events) = Actor::new(
            config.clone(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let handle = actor.start();
        let mut peer = connected(&mut server, &mut events).await;

        // Pings start after one interval
        assert_eq!(peer.recv_event().await, Some(ClientEvent::Ping));
        peer.send(ServerEvent::Pong).await.unwrap();

        // Drop the transport and expect a new connection
        drop(peer);
        assert_eq!(events.recv().await, Some(SessionEvent::Reconnecting));
        let peer = server.accept().await.unwrap();
        peer.send(ServerEvent::GameInit(init())).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Configuration { initial: false, .. })
        ));
        assert_eq!(events.recv().await, Some(SessionEvent::AdvisoryCleared));

        mailbox.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_reconnects_back_off() {
        let (connector, mut server) = memory();
        let config = SessionConfig::default();
        let (actor, mailbox, mut events) = Actor::new(
            config.clone(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let handle = actor.start();
        let peer = connected(&mut server, &mut events).await;

        // Two attempts are refused before one gets through
        server.refuse_next(2);
        let start = Instant::now();
        drop(peer);
        assert_eq!(events.recv().await, Some(SessionEvent::Reconnecting));
        let peer = server.accept().await.unwrap();
        let backoff = config.reconnect_initial_backoff;
        assert!(Instant::now() - start >= backoff + backoff * 2 + backoff * 4);
        assert!(server.try_accept().is_none());

        peer.send(ServerEvent::GameInit(init())).await.unwrap();
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Configuration { initial: false, .. })
        ));
        assert_eq!(events.recv().await, Some(SessionEvent::AdvisoryCleared));
        assert_eq!(mailbox.state().await.unwrap(), SessionState::Ready);

        mailbox.close();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_heartbeats_are_fatal() {
        let (connector, mut server) = memory();
        let (actor, mailbox, mut events) = Actor::new(
            SessionConfig::default(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let handle = actor.start();
        let _peer = connected(&mut server, &mut events).await;

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::LivenessDegraded { missed: 2 })
        );
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Fatal(Fatal::HeartbeatLost { missed: 5 }))
        );
        assert_eq!(mailbox.state().await.unwrap(), SessionState::Disconnected);
        assert!(mailbox
            .request(BetRequest {
                bet_index: 0,
                risk_index: 0,
                row_index: 0,
            })
            .await
            .is_err());

        mailbox.close();
        handle.await.unwrap();
        assert!(events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_fatal() {
        let (connector, server) = memory();
        server.hang_next(1);
        let (actor, _mailbox, mut events) = Actor::new(
            SessionConfig::default(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let handle = actor.start();
        assert!(matches!(
            events.recv().await,
            Some(SessionEvent::Fatal(Fatal::ConnectFailed(_)))
        ));
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_credentials_and_lifecycle() {
        let (connector, mut server) = memory();
        let (bridge, mut endpoint) = HostBridge::channel(8);
        let (actor, mailbox, mut events) = Actor::new(
            SessionConfig::default(),
            connector,
            CredentialSource::Host(bridge),
        );
        let handle = actor.start();

        assert_eq!(events.recv().await, Some(SessionEvent::AuthenticationRequired));
        assert_eq!(endpoint.next().await, Some(HostMessage::AuthToken));

        endpoint
            .push(HostCredential {
                token: Some("token".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        endpoint
            .push_json(r#"{"connectionURI":"http://localhost:8080","namespace":"plinko"}"#)
            .await
            .unwrap();

        let peer = connected(&mut server, &mut events).await;
        assert_eq!(peer.credential, credential());
        assert_eq!(endpoint.next().await, Some(HostMessage::OnEnter));

        // Another device takes over the account
        peer.send(ServerEvent::AnotherDevice).await.unwrap();
        assert_eq!(events.recv().await, Some(SessionEvent::ForcedLogout));
        assert_eq!(endpoint.next().await, Some(HostMessage::OnExit));
        handle.await.unwrap();
        assert!(mailbox.is_closing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_timeout_closes() {
        let (connector, mut server) = memory();
        let config = SessionConfig::default();
        let (actor, mailbox, mut events) = Actor::new(
            config.clone(),
            connector,
            CredentialSource::Fixed(credential()),
        );
        let handle = actor.start();
        let mut peer = connected(&mut server, &mut events).await;

        // Answer every ping so only the background timer can fire
        let responder = tokio::spawn(async move {
            while let Some(event) = peer.recv_event().await {
                if event == ClientEvent::Ping && peer.send(ServerEvent::Pong).await.is_err() {
                    break;
                }
            }
        });

        let start = Instant::now();
        mailbox.set_focus(false).await.unwrap();
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Fatal(Fatal::BackgroundTimeout))
        );
        assert!(Instant::now() - start >= config.background_timeout);
        handle.await.unwrap();
        responder.await.unwrap();
    }
}
