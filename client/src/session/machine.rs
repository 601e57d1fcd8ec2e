use super::{
    heartbeat::Heartbeat, Advisory, CredentialStage, Fatal, SessionEvent, SessionState,
};
use crate::{
    bridge::{HostCredential, HostMessage},
    config::SessionConfig,
    transport::Credential,
    Error, Result,
};
use plinko_types::{compact_len, BetRequest, ClientEvent, Frame, GameInit, ServerEvent};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Side effects requested by the [Machine], executed in order by the owner.
#[derive(Debug, PartialEq)]
pub enum Action {
    /// Start dialing. At most one attempt is live at a time.
    Connect(Credential),
    /// Abandon the live attempt, if any.
    AbortConnect,
    /// Drop the live connection, if any.
    Disconnect,
    Send(Frame),
    Emit(SessionEvent),
    Host(HostMessage),
}

#[derive(Debug, Default)]
struct Deadlines {
    credential: Option<Instant>,
    connect: Option<Instant>,
    init: Option<Instant>,
    heartbeat: Option<Instant>,
    reconnect: Option<Instant>,
    grace: Option<Instant>,
    background: Option<Instant>,
}

impl Deadlines {
    fn next(&self) -> Option<Instant> {
        [
            self.credential,
            self.connect,
            self.init,
            self.heartbeat,
            self.reconnect,
            self.grace,
            self.background,
        ]
        .into_iter()
        .flatten()
        .min()
    }
}

fn due(deadline: &mut Option<Instant>, now: Instant) -> bool {
    match deadline {
        Some(at) if *at <= now => {
            *deadline = None;
            true
        }
        _ => false,
    }
}

/// Session state machine.
///
/// Every input takes the current time and returns the [Action]s to perform.
/// Timers are plain deadlines: the owner sleeps until [Machine::next_deadline]
/// and then calls [Machine::on_deadline].
pub struct Machine {
    config: SessionConfig,
    state: SessionState,
    credential: Option<Credential>,
    pending: HostCredential,
    stage: CredentialStage,
    heartbeat: Heartbeat,
    deadlines: Deadlines,
    backoff: Duration,
    connects: u64,
    configured: bool,
    reconnecting: bool,
    failed: bool,
}

impl Machine {
    fn new(config: SessionConfig, credential: Option<Credential>) -> Self {
        let backoff = config.reconnect_initial_backoff;
        Self {
            config,
            state: SessionState::Idle,
            credential,
            pending: HostCredential::default(),
            stage: CredentialStage::Token,
            heartbeat: Heartbeat::default(),
            deadlines: Deadlines::default(),
            backoff,
            connects: 0,
            configured: false,
            reconnecting: false,
            failed: false,
        }
    }

    /// A session whose credential is known up front.
    pub fn with_credential(config: SessionConfig, credential: Credential) -> Self {
        Self::new(config, Some(credential))
    }

    /// A session that obtains its credential from the host.
    pub fn hosted(config: SessionConfig) -> Self {
        Self::new(config, None)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Closed, or failed and waiting for the owner to close it.
    pub fn is_terminal(&self) -> bool {
        self.failed || self.is_closed()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.next()
    }

    /// Number of connections established so far.
    pub fn connects(&self) -> u64 {
        self.connects
    }

    pub fn start(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Idle {
            return Vec::new();
        }
        if let Some(credential) = self.credential.clone() {
            return self.connect(credential, now);
        }

        info!("waiting for host credential");
        self.state = SessionState::AwaitingCredential;
        self.stage = CredentialStage::Token;
        self.deadlines.credential = Some(now + self.config.credential_timeout);
        vec![
            Action::Emit(SessionEvent::AuthenticationRequired),
            Action::Host(HostMessage::AuthToken),
        ]
    }

    pub fn on_credential(&mut self, update: HostCredential, now: Instant) -> Vec<Action> {
        if self.state != SessionState::AwaitingCredential {
            debug!("ignoring credential outside of authentication");
            return Vec::new();
        }
        self.pending.merge(update);

        if self.stage == CredentialStage::Token {
            if self.pending.token.is_none() {
                return Vec::new();
            }
            debug!("token received, waiting for connection address");
            self.stage = CredentialStage::Endpoint;
            self.deadlines.credential = Some(now + self.config.credential_timeout);
        }

        let (Some(token), Some(uri)) = (
            self.pending.token.clone(),
            self.pending.connection_uri.clone(),
        ) else {
            return Vec::new();
        };
        let namespace = self.pending.namespace.clone().unwrap_or_default();
        let credential = Credential::new(token, uri, namespace);
        self.credential = Some(credential.clone());
        self.deadlines.credential = None;
        self.connect(credential, now)
    }

    fn connect(&mut self, credential: Credential, now: Instant) -> Vec<Action> {
        info!(uri = %credential.uri, namespace = %credential.namespace, "connecting");
        self.state = SessionState::Connecting;
        self.deadlines.connect = Some(now + self.config.connect_timeout);
        vec![Action::Connect(credential)]
    }

    pub fn on_connected(&mut self, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Connecting {
            warn!(state = ?self.state, "dropping connection established after the attempt was abandoned");
            return vec![Action::Disconnect];
        }
        self.connects += 1;
        self.state = SessionState::AwaitingInitialData;
        self.deadlines.connect = None;
        self.deadlines.init = Some(now + self.config.init_timeout);
        info!(connects = self.connects, "connected, waiting for game data");
        Vec::new()
    }

    pub fn on_connect_failed(&mut self, reason: String, now: Instant) -> Vec<Action> {
        if self.state != SessionState::Connecting {
            return Vec::new();
        }
        self.deadlines.connect = None;
        self.connect_failed(reason, now)
    }

    fn connect_failed(&mut self, reason: String, now: Instant) -> Vec<Action> {
        if !self.reconnecting {
            return self.fail(Fatal::ConnectFailed(reason));
        }
        warn!(%reason, backoff = ?self.backoff, "reconnect attempt failed");
        self.state = SessionState::Disconnected;
        self.schedule_reconnect(now);
        Vec::new()
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        self.deadlines.reconnect = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(self.config.reconnect_max_backoff);
    }

    pub fn on_frame(&mut self, frame: Frame, now: Instant) -> Vec<Action> {
        if self.is_terminal() {
            return Vec::new();
        }
        let name = frame.event.clone();
        let event = match ServerEvent::decode(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(event = %name, "ignoring unhandled event");
                return Vec::new();
            }
            Err(e) => {
                error!(event = %name, error = %e, "malformed payload");
                return self.fail(Fatal::Malformed(e.to_string()));
            }
        };

        match event {
            ServerEvent::GameInit(init) => self.on_game_init(init, now),
            ServerEvent::Result(result) => {
                debug!(
                    index = result.index,
                    multiplier = result.multiplier,
                    "result received"
                );
                vec![Action::Emit(SessionEvent::Result(result))]
            }
            ServerEvent::Pong => self.on_pong(now),
            ServerEvent::InternalError(message) => {
                warn!(%message, "server reported an error");
                vec![Action::Emit(SessionEvent::Advisory(Advisory::ServerError(
                    message,
                )))]
            }
            ServerEvent::Alert(message) => {
                info!(%message, "server alert");
                vec![Action::Emit(SessionEvent::Advisory(Advisory::Alert(message)))]
            }
            ServerEvent::AnotherDevice => {
                warn!("session opened on another device");
                let mut actions = vec![Action::Emit(SessionEvent::ForcedLogout)];
                actions.extend(self.close());
                actions
            }
        }
    }

    fn on_game_init(&mut self, init: GameInit, now: Instant) -> Vec<Action> {
        if let Err(e) = init.config.validate() {
            error!(error = %e, "invalid game configuration");
            return self.fail(Fatal::Malformed(e.to_string()));
        }
        for (rows, risk, len) in init.config.short_tables() {
            warn!(
                rows,
                risk,
                len,
                expected = compact_len(rows),
                "payout table length mismatch"
            );
        }

        let initial = !self.configured;
        let recovered = self.reconnecting;
        self.configured = true;
        self.reconnecting = false;
        self.backoff = self.config.reconnect_initial_backoff;
        self.deadlines.init = None;
        self.deadlines.grace = None;
        self.deadlines.reconnect = None;
        if self.state == SessionState::AwaitingInitialData {
            self.enter_ready(now);
        }
        info!(initial, balance = init.balance, "game data received");

        let mut actions = vec![Action::Emit(SessionEvent::Configuration { init, initial })];
        if initial {
            actions.push(Action::Host(HostMessage::OnEnter));
        }
        if recovered {
            actions.push(Action::Emit(SessionEvent::AdvisoryCleared));
        }
        actions
    }

    fn enter_ready(&mut self, now: Instant) {
        self.state = SessionState::Ready;
        self.heartbeat.reset();
        self.deadlines.heartbeat = Some(now + self.config.heartbeat_interval);
    }

    fn on_pong(&mut self, now: Instant) -> Vec<Action> {
        if !self.state.accepts_requests() {
            debug!(state = ?self.state, "ignoring pong");
            return Vec::new();
        }
        self.heartbeat.acknowledge(now);
        if let SessionState::Degraded { missed } = self.state {
            info!(missed, "liveness recovered");
            self.state = SessionState::Ready;
            return vec![Action::Emit(SessionEvent::AdvisoryCleared)];
        }
        Vec::new()
    }

    fn on_heartbeat(&mut self, now: Instant) -> Vec<Action> {
        if !self.state.accepts_requests() {
            return Vec::new();
        }
        let missed = self.heartbeat.ping(now);
        if missed >= self.config.max_missed_heartbeats {
            return self.fail(Fatal::HeartbeatLost { missed });
        }

        let mut actions = Vec::new();
        if missed >= self.config.degraded_after_missed {
            if self.state == SessionState::Ready {
                warn!(missed, "liveness degraded");
                actions.push(Action::Emit(SessionEvent::LivenessDegraded { missed }));
            }
            self.state = SessionState::Degraded { missed };
        }
        self.deadlines.heartbeat = Some(now + self.config.heartbeat_interval);
        actions.push(Action::Send(ClientEvent::Ping.into_frame()));
        actions
    }

    pub fn on_transport_error(&mut self, reason: String) -> Vec<Action> {
        warn!(%reason, "transport error");
        Vec::new()
    }

    pub fn on_malformed(&mut self, reason: String) -> Vec<Action> {
        if self.is_terminal() {
            return Vec::new();
        }
        error!(%reason, "malformed message");
        self.fail(Fatal::Malformed(reason))
    }

    pub fn on_disconnected(&mut self, now: Instant) -> Vec<Action> {
        if self.is_terminal() {
            debug!("ignoring disconnect after teardown");
            return Vec::new();
        }
        if !matches!(
            self.state,
            SessionState::AwaitingInitialData | SessionState::Ready | SessionState::Degraded { .. }
        ) {
            return Vec::new();
        }

        warn!(state = ?self.state, "transport disconnected");
        self.state = SessionState::Disconnected;
        self.heartbeat.reset();
        self.deadlines.heartbeat = None;
        self.deadlines.init = None;
        if self.deadlines.grace.is_none() {
            self.deadlines.grace = Some(now + self.config.disconnect_grace);
        }
        self.schedule_reconnect(now);

        let mut actions = vec![Action::Disconnect];
        if !self.reconnecting {
            self.reconnecting = true;
            actions.push(Action::Emit(SessionEvent::Reconnecting));
        }
        actions
    }

    pub fn on_focus(&mut self, focused: bool, now: Instant) -> Vec<Action> {
        if self.is_terminal() {
            return Vec::new();
        }
        if focused {
            if self.deadlines.background.take().is_some() {
                info!("focus regained");
            }
        } else if self.deadlines.background.is_none() {
            info!("focus lost");
            self.deadlines.background = Some(now + self.config.background_timeout);
        }
        Vec::new()
    }

    pub fn on_deadline(&mut self, now: Instant) -> Vec<Action> {
        if due(&mut self.deadlines.background, now) {
            return self.fail_and_close(Fatal::BackgroundTimeout);
        }
        if due(&mut self.deadlines.grace, now) {
            return self.fail_and_close(Fatal::AwayTooLong);
        }
        if due(&mut self.deadlines.credential, now) {
            return self.fail(Fatal::CredentialTimeout(self.stage));
        }

        let mut actions = Vec::new();
        if due(&mut self.deadlines.connect, now) {
            actions.push(Action::AbortConnect);
            actions.extend(self.connect_failed("connection attempt timed out".to_string(), now));
        }
        if due(&mut self.deadlines.init, now) {
            actions.extend(self.on_init_timeout(now));
        }
        if due(&mut self.deadlines.reconnect, now) && self.state == SessionState::Disconnected {
            if let Some(credential) = self.credential.clone() {
                actions.extend(self.connect(credential, now));
            }
        }
        if due(&mut self.deadlines.heartbeat, now) {
            actions.extend(self.on_heartbeat(now));
        }
        actions
    }

    fn on_init_timeout(&mut self, now: Instant) -> Vec<Action> {
        if !self.configured {
            return self.fail(Fatal::InitTimeout);
        }
        warn!("game data not received after reconnect, continuing with previous configuration");
        let recovered = self.reconnecting;
        self.reconnecting = false;
        self.backoff = self.config.reconnect_initial_backoff;
        self.deadlines.grace = None;
        self.deadlines.reconnect = None;
        self.enter_ready(now);

        let mut actions = vec![Action::Emit(SessionEvent::Advisory(Advisory::InitTimeout))];
        if recovered {
            actions.push(Action::Emit(SessionEvent::AdvisoryCleared));
        }
        actions
    }

    /// Frame for a wager submission, if the session can carry one.
    pub fn request(&self, bet: BetRequest) -> Result<Frame> {
        if self.failed || !self.state.accepts_requests() {
            return Err(Error::NotReady(self.state));
        }
        Ok(ClientEvent::Request(bet).into_frame())
    }

    fn fail(&mut self, fatal: Fatal) -> Vec<Action> {
        if self.is_terminal() {
            return Vec::new();
        }
        error!(%fatal, "session failed");
        self.failed = true;
        self.reconnecting = false;
        self.state = SessionState::Disconnected;
        self.deadlines = Deadlines::default();
        let message = fatal.to_string();
        vec![
            Action::AbortConnect,
            Action::Disconnect,
            Action::Emit(SessionEvent::Fatal(fatal)),
            Action::Host(HostMessage::Error { message }),
        ]
    }

    fn fail_and_close(&mut self, fatal: Fatal) -> Vec<Action> {
        let mut actions = self.fail(fatal);
        actions.extend(self.close());
        actions
    }

    /// Tear everything down. Safe to call any number of times.
    pub fn close(&mut self) -> Vec<Action> {
        if self.is_closed() {
            return Vec::new();
        }
        info!(state = ?self.state, "closing session");
        self.state = SessionState::Closed;
        self.deadlines = Deadlines::default();
        vec![
            Action::AbortConnect,
            Action::Disconnect,
            Action::Host(HostMessage::OnExit),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinko_types::{
        GameConfiguration, PayoutTable, RoundResult, RowOption, EVENT_PING, EVENT_REQUEST,
    };

    fn init(balance: f64) -> GameInit {
        GameInit {
            config: GameConfiguration {
                bets: vec![1.0, 2.0],
                risks: vec!["low".to_string()],
                rows: vec![RowOption {
                    rows: 8,
                    tables: vec![PayoutTable {
                        multipliers: vec![5.6, 2.1, 1.1, 1.0, 0.5],
                        probabilities: vec![],
                    }],
                }],
            },
            balance,
        }
    }

    fn credential() -> Credential {
        Credential::new("token", "http://localhost:8080", "plinko")
    }

    fn emitted(actions: &[Action]) -> Vec<&SessionEvent> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Emit(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    fn fatals(actions: &[Action]) -> Vec<Fatal> {
        emitted(actions)
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Fatal(fatal) => Some(fatal.clone()),
                _ => None,
            })
            .collect()
    }

    fn pings(actions: &[Action]) -> usize {
        actions
            .iter()
            .filter(|action| matches!(action, Action::Send(frame) if frame.event == EVENT_PING))
            .count()
    }

    /// A machine that reached Ready at the returned instant.
    fn ready() -> (Machine, Instant) {
        let now = Instant::now();
        let mut machine = Machine::with_credential(SessionConfig::default(), credential());
        let actions = machine.start(now);
        assert_eq!(actions, vec![Action::Connect(credential())]);
        assert!(machine.on_connected(now).is_empty());
        let actions = machine.on_frame(ServerEvent::GameInit(init(100.0)).into_frame(), now);
        assert!(matches!(
            emitted(&actions)[..],
            [SessionEvent::Configuration { initial: true, .. }]
        ));
        assert!(actions.contains(&Action::Host(HostMessage::OnEnter)));
        assert_eq!(machine.state(), SessionState::Ready);
        (machine, now)
    }

    #[test]
    fn test_heartbeat_degrades_and_recovers() {
        let (mut machine, start) = ready();
        let interval = SessionConfig::default().heartbeat_interval;

        // First ping goes out one interval after Ready
        assert_eq!(machine.next_deadline(), Some(start + interval));
        let mut now = start + interval;
        assert_eq!(pings(&machine.on_deadline(now)), 1);
        assert_eq!(machine.state(), SessionState::Ready);

        now += interval;
        machine.on_deadline(now);
        now += interval;
        let actions = machine.on_deadline(now);
        assert_eq!(
            emitted(&actions),
            vec![&SessionEvent::LivenessDegraded { missed: 2 }]
        );
        assert_eq!(machine.state(), SessionState::Degraded { missed: 2 });

        let actions = machine.on_frame(ServerEvent::Pong.into_frame(), now);
        assert_eq!(emitted(&actions), vec![&SessionEvent::AdvisoryCleared]);
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_heartbeat_loss_is_fatal_once() {
        let (mut machine, start) = ready();
        let interval = SessionConfig::default().heartbeat_interval;

        let mut reported = Vec::new();
        let mut degraded = 0;
        for step in 1..=10 {
            let actions = machine.on_deadline(start + interval * step);
            reported.extend(fatals(&actions));
            degraded += emitted(&actions)
                .iter()
                .filter(|event| matches!(event, SessionEvent::LivenessDegraded { .. }))
                .count();
        }
        assert_eq!(reported, vec![Fatal::HeartbeatLost { missed: 5 }]);
        assert_eq!(degraded, 1);
        assert_eq!(machine.state(), SessionState::Disconnected);
        assert_eq!(machine.next_deadline(), None);
        assert!(matches!(
            machine.request(BetRequest {
                bet_index: 0,
                risk_index: 0,
                row_index: 0,
            }),
            Err(Error::NotReady(SessionState::Disconnected))
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (mut machine, now) = ready();
        let actions = machine.close();
        assert_eq!(
            actions,
            vec![
                Action::AbortConnect,
                Action::Disconnect,
                Action::Host(HostMessage::OnExit)
            ]
        );
        assert!(machine.close().is_empty());
        assert!(machine.close().is_empty());
        assert_eq!(machine.state(), SessionState::Closed);

        // Late inputs are ignored
        assert!(machine.on_disconnected(now).is_empty());
        assert!(machine
            .on_frame(ServerEvent::Pong.into_frame(), now)
            .is_empty());
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_initial_data_timeout_is_fatal_on_first_connect() {
        let now = Instant::now();
        let mut machine = Machine::with_credential(SessionConfig::default(), credential());
        machine.start(now);
        machine.on_connected(now);

        let deadline = now + SessionConfig::default().init_timeout;
        assert_eq!(machine.next_deadline(), Some(deadline));
        let actions = machine.on_deadline(deadline);
        assert_eq!(fatals(&actions), vec![Fatal::InitTimeout]);
        assert!(actions.contains(&Action::Host(HostMessage::Error {
            message: Fatal::InitTimeout.to_string()
        })));
    }

    #[test]
    fn test_reconnect_refreshes_configuration() {
        let (mut machine, start) = ready();
        let config = SessionConfig::default();

        let actions = machine.on_disconnected(start);
        assert_eq!(machine.state(), SessionState::Disconnected);
        assert_eq!(emitted(&actions), vec![&SessionEvent::Reconnecting]);
        assert!(actions.contains(&Action::Disconnect));

        // Reconnect after the initial backoff
        let now = start + config.reconnect_initial_backoff;
        let actions = machine.on_deadline(now);
        assert_eq!(actions, vec![Action::Connect(credential())]);
        machine.on_connected(now);
        assert_eq!(machine.connects(), 2);

        let actions = machine.on_frame(ServerEvent::GameInit(init(80.0)).into_frame(), now);
        assert!(matches!(
            emitted(&actions)[..],
            [
                SessionEvent::Configuration { initial: false, .. },
                SessionEvent::AdvisoryCleared
            ]
        ));
        assert!(!actions.contains(&Action::Host(HostMessage::OnEnter)));
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_reconnect_init_timeout_is_advisory() {
        let (mut machine, start) = ready();
        let config = SessionConfig::default();

        machine.on_disconnected(start);
        let now = start + config.reconnect_initial_backoff;
        machine.on_deadline(now);
        machine.on_connected(now);

        let actions = machine.on_deadline(now + config.init_timeout);
        assert!(fatals(&actions).is_empty());
        assert_eq!(
            emitted(&actions),
            vec![
                &SessionEvent::Advisory(Advisory::InitTimeout),
                &SessionEvent::AdvisoryCleared
            ]
        );
        assert_eq!(machine.state(), SessionState::Ready);
    }

    #[test]
    fn test_failed_reconnects_back_off_until_grace_expires() {
        let (mut machine, start) = ready();
        let config = SessionConfig::default();
        machine.on_disconnected(start);

        let mut now = start;
        let mut attempts = 0;
        let mut last_gap = Duration::ZERO;
        loop {
            let Some(deadline) = machine.next_deadline() else {
                break;
            };
            now = deadline;
            let actions = machine.on_deadline(now);
            if actions.iter().any(|a| matches!(a, Action::Connect(_))) {
                attempts += 1;
                let before = now;
                machine.on_connect_failed("refused".to_string(), now);
                if let Some(next) = machine.next_deadline() {
                    last_gap = next - before;
                }
            }
            if !fatals(&actions).is_empty() {
                assert_eq!(fatals(&actions), vec![Fatal::AwayTooLong]);
                assert!(actions.contains(&Action::Host(HostMessage::OnExit)));
                break;
            }
        }
        assert!(attempts > 3);
        assert!(last_gap <= config.reconnect_max_backoff);
        assert_eq!(now, start + config.disconnect_grace);
        assert_eq!(machine.state(), SessionState::Closed);
    }

    #[test]
    fn test_background_timer() {
        let (mut machine, start) = ready();
        let config = SessionConfig::default();

        // Regaining focus cancels the timer
        machine.on_focus(false, start);
        machine.on_focus(true, start + Duration::from_secs(30));
        machine.on_focus(false, start + Duration::from_secs(40));

        // Keep liveness healthy in the meantime
        let mut now = start;
        let expiry = start + Duration::from_secs(40) + config.background_timeout;
        let mut reported = Vec::new();
        while let Some(deadline) = machine.next_deadline() {
            now = deadline;
            let actions = machine.on_deadline(now);
            reported.extend(fatals(&actions));
            machine.on_frame(ServerEvent::Pong.into_frame(), now);
        }
        assert_eq!(reported, vec![Fatal::BackgroundTimeout]);
        assert_eq!(now, expiry);
        assert!(machine.is_closed());
    }

    #[test]
    fn test_hosted_credential_flow() {
        let now = Instant::now();
        let mut machine = Machine::hosted(SessionConfig::default());
        let actions = machine.start(now);
        assert_eq!(
            actions,
            vec![
                Action::Emit(SessionEvent::AuthenticationRequired),
                Action::Host(HostMessage::AuthToken)
            ]
        );

        // Endpoint without a token does not complete the credential
        let actions = machine.on_credential(
            HostCredential {
                connection_uri: Some("http://localhost:8080".to_string()),
                ..Default::default()
            },
            now,
        );
        assert!(actions.is_empty());
        assert_eq!(machine.state(), SessionState::AwaitingCredential);

        let actions = machine.on_credential(
            HostCredential {
                token: Some("token".to_string()),
                namespace: Some("plinko".to_string()),
                ..Default::default()
            },
            now,
        );
        assert_eq!(actions, vec![Action::Connect(credential())]);

        // Credentials after authentication are stale
        assert!(machine
            .on_credential(
                HostCredential {
                    token: Some("other".to_string()),
                    ..Default::default()
                },
                now
            )
            .is_empty());
    }

    #[test]
    fn test_credential_timeout_names_stage() {
        let config = SessionConfig::default();
        let now = Instant::now();
        let mut machine = Machine::hosted(config.clone());
        machine.start(now);

        let later = now + Duration::from_secs(5);
        machine.on_credential(
            HostCredential {
                token: Some("token".to_string()),
                ..Default::default()
            },
            later,
        );
        // Token arrival restarts the timer for the endpoint
        assert_eq!(machine.next_deadline(), Some(later + config.credential_timeout));
        let actions = machine.on_deadline(later + config.credential_timeout);
        assert_eq!(
            fatals(&actions),
            vec![Fatal::CredentialTimeout(CredentialStage::Endpoint)]
        );
    }

    #[test]
    fn test_initial_connect_failure_is_fatal() {
        let now = Instant::now();
        let mut machine = Machine::with_credential(SessionConfig::default(), credential());
        machine.start(now);
        let actions = machine.on_connect_failed("refused".to_string(), now);
        assert_eq!(
            fatals(&actions),
            vec![Fatal::ConnectFailed("refused".to_string())]
        );
        // The owner still closes exactly once
        assert_eq!(machine.close().len(), 3);
        assert!(machine.close().is_empty());
    }

    #[test]
    fn test_another_device_forces_logout() {
        let (mut machine, now) = ready();
        let actions = machine.on_frame(ServerEvent::AnotherDevice.into_frame(), now);
        assert_eq!(emitted(&actions), vec![&SessionEvent::ForcedLogout]);
        assert!(actions.contains(&Action::Host(HostMessage::OnExit)));
        assert!(machine.is_closed());
    }

    #[test]
    fn test_malformed_payload_is_fatal() {
        let (mut machine, now) = ready();
        let frame = Frame::new("result", serde_json::json!({ "winAmount": "lots" }));
        let actions = machine.on_frame(frame, now);
        assert_eq!(fatals(&actions).len(), 1);
        assert!(machine.is_terminal());
    }

    #[test]
    fn test_results_notices_and_requests() {
        let (mut machine, now) = ready();
        let result = RoundResult {
            win_amount: 2.1,
            multiplier: 2.1,
            index: 3,
            risk_index: 0,
            row_index: 0,
            balance: 101.1,
        };
        let actions = machine.on_frame(ServerEvent::Result(result.clone()).into_frame(), now);
        assert_eq!(emitted(&actions), vec![&SessionEvent::Result(result)]);

        let actions = machine.on_frame(
            ServerEvent::InternalError("busy".to_string()).into_frame(),
            now,
        );
        assert_eq!(
            emitted(&actions),
            vec![&SessionEvent::Advisory(Advisory::ServerError(
                "busy".to_string()
            ))]
        );

        // Unknown events are ignored
        assert!(machine
            .on_frame(Frame::bare("leaderboard"), now)
            .is_empty());

        let frame = machine
            .request(BetRequest {
                bet_index: 1,
                risk_index: 0,
                row_index: 0,
            })
            .unwrap();
        assert_eq!(frame.event, EVENT_REQUEST);
    }
}
