use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State as AxumState,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use plinko_types::{
    BetRequest, ClientEvent, Frame, GameConfiguration, GameInit, RoundResult, ServerEvent,
};
use rand::distributions::{Distribution, WeightedIndex};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub mod paytable;

/// Path segment the session socket is served under.
pub const NAMESPACE: &str = "plinko";

/// Balance credited to an account the first time it connects.
pub const STARTING_BALANCE: f64 = 1000.0;

#[derive(Debug, Error, PartialEq)]
pub enum PlayError {
    #[error("unknown account")]
    UnknownAccount,
    #[error("invalid {what} index {index}")]
    InvalidSelection { what: &'static str, index: usize },
    #[error("insufficient balance: {balance:.2} < {bet:.2}")]
    InsufficientBalance { balance: f64, bet: f64 },
    #[error("payout table for rows {rows} has no usable probabilities")]
    InvalidTable { rows: u8 },
}

/// Broadcast to every open session.
#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    /// Drop every socket without a goodbye.
    Disconnect,
    /// `token` opened a newer session; older ones must log out.
    Superseded { token: String, generation: u64 },
    Alert(String),
}

struct Account {
    balance: f64,
    generation: u64,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
}

pub struct Simulator {
    namespace: String,
    starting_balance: f64,
    config: GameConfiguration,
    state: RwLock<State>,
    pong: AtomicBool,
    control_tx: broadcast::Sender<Control>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(NAMESPACE, STARTING_BALANCE)
    }
}

impl Simulator {
    pub fn new(namespace: impl Into<String>, starting_balance: f64) -> Self {
        let (control_tx, _) = broadcast::channel(1024);
        Self {
            namespace: namespace.into(),
            starting_balance,
            config: paytable::default_configuration(),
            state: RwLock::new(State::default()),
            pong: AtomicBool::new(true),
            control_tx,
        }
    }

    pub fn with_configuration(mut self, config: GameConfiguration) -> Self {
        self.config = config;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn configuration(&self) -> &GameConfiguration {
        &self.config
    }

    /// Register a new session for `token`, returning its initial data and
    /// generation. Any older session for the same token is superseded.
    pub fn open(&self, token: &str) -> (GameInit, u64) {
        let (balance, generation) = {
            let mut state = match self.state.write() {
                Ok(state) => state,
                Err(e) => e.into_inner(),
            };
            let account = state
                .accounts
                .entry(token.to_string())
                .or_insert_with(|| Account {
                    balance: self.starting_balance,
                    generation: 0,
                });
            account.generation += 1;
            (account.balance, account.generation)
        }; // Release lock before broadcasting

        if generation > 1 {
            self.broadcast(Control::Superseded {
                token: token.to_string(),
                generation,
            });
        }
        (
            GameInit {
                config: self.config.clone(),
                balance,
            },
            generation,
        )
    }

    /// Settle one wager against the account's balance.
    pub fn play(&self, token: &str, request: BetRequest) -> Result<RoundResult, PlayError> {
        let bet = *self
            .config
            .bets
            .get(request.bet_index)
            .ok_or(PlayError::InvalidSelection {
                what: "bet",
                index: request.bet_index,
            })?;
        let option = self
            .config
            .rows
            .get(request.row_index)
            .ok_or(PlayError::InvalidSelection {
                what: "rows",
                index: request.row_index,
            })?;
        let table = option
            .table(request.risk_index)
            .ok_or(PlayError::InvalidSelection {
                what: "risk",
                index: request.risk_index,
            })?;
        let weights = WeightedIndex::new(&table.probabilities)
            .map_err(|_| PlayError::InvalidTable { rows: option.rows })?;

        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(e) => e.into_inner(),
        };
        let account = state
            .accounts
            .get_mut(token)
            .ok_or(PlayError::UnknownAccount)?;
        if account.balance < bet {
            return Err(PlayError::InsufficientBalance {
                balance: account.balance,
                bet,
            });
        }

        // Positions run from the outer pair inward; the wire index counts from the center
        let position = weights.sample(&mut rand::thread_rng());
        let multiplier = table.multipliers.get(position).copied().unwrap_or(1.0);
        let index = table.probabilities.len() - 1 - position;
        let win_amount = round_cents(bet * multiplier);
        account.balance = round_cents(account.balance - bet + win_amount);

        Ok(RoundResult {
            win_amount,
            multiplier,
            index,
            risk_index: request.risk_index,
            row_index: request.row_index,
            balance: account.balance,
        })
    }

    pub fn balance(&self, token: &str) -> Option<f64> {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(e) => e.into_inner(),
        };
        state.accounts.get(token).map(|account| account.balance)
    }

    /// Override the balance of an account, creating it if needed.
    pub fn set_balance(&self, token: &str, balance: f64) {
        let mut state = match self.state.write() {
            Ok(state) => state,
            Err(e) => e.into_inner(),
        };
        state
            .accounts
            .entry(token.to_string())
            .or_insert(Account {
                balance,
                generation: 0,
            })
            .balance = balance;
    }

    /// Whether liveness pings are answered.
    pub fn set_pong(&self, enabled: bool) {
        self.pong.store(enabled, Ordering::Relaxed);
    }

    pub fn pong_enabled(&self) -> bool {
        self.pong.load(Ordering::Relaxed)
    }

    pub fn disconnect_all(&self) {
        self.broadcast(Control::Disconnect);
    }

    pub fn send_alert(&self, message: impl Into<String>) {
        self.broadcast(Control::Alert(message.into()));
    }

    pub fn control_subscriber(&self) -> broadcast::Receiver<Control> {
        self.control_tx.subscribe()
    }

    fn broadcast(&self, control: Control) {
        if let Err(e) = self.control_tx.send(control) {
            tracing::debug!("No sessions to notify: {}", e);
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION]);

        Router::new()
            .route("/:namespace", get(session_ws))
            .layer(cors)
            .with_state(self.simulator.clone())
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

async fn session_ws(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Path(namespace): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if namespace != simulator.namespace() {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(token) = bearer(&headers) else {
        tracing::warn!("Rejected session without a bearer token");
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| handle_session_ws(socket, simulator, token))
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: ServerEvent) -> bool {
    let frame = event.into_frame();
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode {} frame: {}", frame.event, e);
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}

async fn handle_session_ws(socket: WebSocket, simulator: Arc<Simulator>, token: String) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before opening so a competing open is never missed
    let mut control = simulator.control_subscriber();
    let (init, generation) = simulator.open(&token);
    tracing::info!(generation, "Session WebSocket connected");
    if !send_event(&mut sender, ServerEvent::GameInit(init)).await {
        return;
    }

    loop {
        tokio::select! {
            message = receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match serde_json::from_str::<Frame>(&text) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!("Ignoring malformed frame: {}", e);
                                continue;
                            }
                        };
                        let reply = match ClientEvent::decode(frame) {
                            Ok(Some(ClientEvent::Ping)) => {
                                simulator.pong_enabled().then_some(ServerEvent::Pong)
                            }
                            Ok(Some(ClientEvent::Request(request))) => {
                                match simulator.play(&token, request) {
                                    Ok(result) => Some(ServerEvent::Result(result)),
                                    Err(e) => {
                                        tracing::warn!("Wager failed: {}", e);
                                        Some(ServerEvent::InternalError(e.to_string()))
                                    }
                                }
                            }
                            Ok(None) => None,
                            Err(e) => {
                                tracing::warn!("Ignoring undecodable event: {}", e);
                                None
                            }
                        };
                        if let Some(reply) = reply {
                            if !send_event(&mut sender, reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Client closed session WebSocket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {:?}", e);
                        break;
                    }
                }
            }

            control = control.recv() => {
                match control {
                    Ok(Control::Disconnect) => {
                        tracing::info!("Dropping session WebSocket");
                        break;
                    }
                    Ok(Control::Superseded { token: other, generation: newer })
                        if other == token && newer > generation =>
                    {
                        tracing::info!(generation, newer, "Session superseded");
                        send_event(&mut sender, ServerEvent::AnotherDevice).await;
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                    Ok(Control::Superseded { .. }) => {}
                    Ok(Control::Alert(message)) => {
                        if !send_event(&mut sender, ServerEvent::Alert(message)).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Session lagged behind, skipped {} controls", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Session WebSocket handler exiting");
}
