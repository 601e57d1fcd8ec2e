//! Admission, in-flight accounting and settlement of wagers.
//!
//! A wager moves through three steps: admitted locally (balance debited
//! optimistically), confirmed by the authority (result queued with its
//! authoritative balance), and settled when its physical drop completes.

mod selection;

use crate::{
    config::WagerConfig,
    outcome::{choose_slot, OutcomeMapper},
};
use plinko_types::{BetRequest, GameConfiguration, GameInit, RoundResult};
use rand::{rngs::StdRng, SeedableRng};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info, warn};

const MULTIPLIER_TOLERANCE: f64 = 1e-6;

/// Snapshot published to observers after every change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WagerState {
    pub bet_index: usize,
    pub risk_index: usize,
    pub row_index: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
    /// A submission was sent and its result has not arrived.
    pub awaiting_confirmation: bool,
    /// A submission was admitted and has not been confirmed or rolled back.
    pub request_outstanding: bool,
    pub balance: f64,
    pub bet_amount: Option<f64>,
    pub configured: bool,
}

impl WagerState {
    /// True when a new wager would pass the admission checks, balance aside.
    pub fn admission_open(&self) -> bool {
        self.configured && !self.request_outstanding && self.in_flight < self.max_in_flight
    }

    pub fn can_afford(&self) -> bool {
        self.bet_amount.is_some_and(|bet| self.balance >= bet)
    }
}

/// A confirmed result waiting for its drop to complete.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingResult {
    pub win_amount: f64,
    pub multiplier: f64,
    pub balance: f64,
    pub rows: u8,
    pub slot: usize,
}

/// Where a confirmed result should physically land.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub rows: u8,
    pub slot: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settlement {
    pub balance: f64,
    pub win_amount: f64,
    pub multiplier: f64,
    /// Slot reported by the completed drop.
    pub slot: usize,
    /// Slot the settled result was aimed at.
    pub target: usize,
}

impl Settlement {
    pub fn is_win(&self) -> bool {
        self.multiplier > 1.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    pub slot: usize,
    pub multiplier: f64,
    pub win_amount: f64,
}

/// Why a wager or selection change was refused. None of these are fatal.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Rejection {
    #[error("The game is not ready yet.")]
    NotConfigured,
    #[error("Too many balls in play ({in_flight} of {limit}).")]
    AdmissionFull { in_flight: usize, limit: usize },
    #[error("Waiting for the previous bet to be confirmed.")]
    SubmissionOutstanding,
    #[error("Insufficient balance.")]
    InsufficientBalance { balance: f64, bet: f64 },
    #[error("Rows cannot change while balls are in play.")]
    WagersInFlight,
    #[error("Unknown {what} option {index}.")]
    InvalidSelection { what: &'static str, index: usize },
    #[error("The connection is not available. Your bet was not placed.")]
    SessionUnavailable,
    #[error("Autoplay was stopped.")]
    AutoplayStopped,
}

pub struct WagerCoordinator {
    config: WagerConfig,
    game: Option<GameConfiguration>,
    state: WagerState,
    pending: VecDeque<PendingResult>,
    history: VecDeque<HistoryEntry>,
    mapper: OutcomeMapper,
    rng: StdRng,
}

impl WagerCoordinator {
    pub fn new(config: WagerConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng(config: WagerConfig, rng: StdRng) -> Self {
        let state = WagerState {
            max_in_flight: config.max_in_flight,
            ..Default::default()
        };
        Self {
            config,
            game: None,
            state,
            pending: VecDeque::new(),
            history: VecDeque::new(),
            mapper: OutcomeMapper::new(),
            rng,
        }
    }

    pub fn state(&self) -> &WagerState {
        &self.state
    }

    pub fn game(&self) -> Option<&GameConfiguration> {
        self.game.as_ref()
    }

    /// Confirmed results not yet settled, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingResult> {
        self.pending.iter()
    }

    /// Settled outcomes, newest first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn mapper(&self) -> &OutcomeMapper {
        &self.mapper
    }

    /// Apply a fresh configuration from the authority.
    pub fn configure(&mut self, init: GameInit) {
        let GameInit { config, balance } = init;
        if self.state.request_outstanding {
            // Lost with the previous connection. The new balance is authoritative either way.
            warn!("dropping unconfirmed submission");
            self.state.in_flight = self.state.in_flight.saturating_sub(1);
            self.state.request_outstanding = false;
            self.state.awaiting_confirmation = false;
        }
        self.mapper.clear();
        self.state.balance = balance;
        self.state.configured = true;
        self.game = Some(config);
        self.clamp_selection();
        info!(
            balance,
            in_flight = self.state.in_flight,
            "configuration applied"
        );
    }

    /// Admit a wager for the current selection and debit the balance.
    pub fn place_wager(&mut self) -> Result<BetRequest, Rejection> {
        let Some(game) = &self.game else {
            return Err(Rejection::NotConfigured);
        };
        if self.state.in_flight >= self.config.max_in_flight {
            return Err(Rejection::AdmissionFull {
                in_flight: self.state.in_flight,
                limit: self.config.max_in_flight,
            });
        }
        if self.state.request_outstanding {
            return Err(Rejection::SubmissionOutstanding);
        }
        let bet = game.bet(self.state.bet_index).ok_or(Rejection::InvalidSelection {
            what: "bet",
            index: self.state.bet_index,
        })?;
        if self.state.balance < bet {
            return Err(Rejection::InsufficientBalance {
                balance: self.state.balance,
                bet,
            });
        }

        self.state.balance -= bet;
        self.state.in_flight += 1;
        self.state.request_outstanding = true;
        debug!(bet, in_flight = self.state.in_flight, "wager admitted");
        Ok(BetRequest {
            bet_index: self.state.bet_index,
            risk_index: self.state.risk_index,
            row_index: self.state.row_index,
        })
    }

    /// The admitted wager was handed to the transport.
    pub fn mark_sent(&mut self) {
        self.state.awaiting_confirmation = true;
    }

    /// Undo an admitted wager that never reached the authority.
    pub fn abort_submission(&mut self, request: &BetRequest) {
        let refund = self
            .game
            .as_ref()
            .and_then(|game| game.bet(request.bet_index))
            .unwrap_or_default();
        self.state.balance += refund;
        self.state.in_flight = self.state.in_flight.saturating_sub(1);
        self.state.request_outstanding = false;
        self.state.awaiting_confirmation = false;
        warn!(refund, "wager submission rolled back");
    }

    /// Queue an authoritative result and pick where its drop should land.
    pub fn on_result_confirmed(&mut self, result: &RoundResult) -> Target {
        if !self.state.request_outstanding {
            warn!(index = result.index, "result without an outstanding submission");
            self.state.in_flight += 1;
        }
        self.state.request_outstanding = false;
        self.state.awaiting_confirmation = false;

        let target = self.resolve(result);
        self.pending.push_back(PendingResult {
            win_amount: result.win_amount,
            multiplier: result.multiplier,
            balance: result.balance,
            rows: target.rows,
            slot: target.slot,
        });
        debug!(
            slot = target.slot,
            multiplier = result.multiplier,
            pending = self.pending.len(),
            "result queued"
        );
        target
    }

    fn resolve(&mut self, result: &RoundResult) -> Target {
        let Some(option) = self
            .game
            .as_ref()
            .and_then(|game| game.row(result.row_index))
        else {
            warn!(row_index = result.row_index, "result for unknown row option");
            return Target { rows: 0, slot: 0 };
        };
        let rows = option.rows;
        let Some(table) = option.table(result.risk_index) else {
            warn!(risk_index = result.risk_index, "result for unknown risk level");
            return Target { rows, slot: 0 };
        };

        let mapping = self.mapper.mapping(rows, result.risk_index, &table.multipliers);
        match mapping.compact_multiplier(result.index) {
            Some(expected) if (expected - result.multiplier).abs() > MULTIPLIER_TOLERANCE => {
                warn!(
                    expected,
                    reported = result.multiplier,
                    index = result.index,
                    "reported multiplier differs from payout table"
                );
            }
            _ => {}
        }
        let candidates = mapping.resolve_slots(result.index);
        Target {
            rows,
            slot: choose_slot(&candidates, &mut self.rng),
        }
    }

    /// Settle the oldest confirmed result. Results settle in confirmation
    /// order regardless of which drop completed.
    pub fn on_physical_completion(&mut self, slot: usize) -> Option<Settlement> {
        let Some(result) = self.pending.pop_front() else {
            warn!(slot, "completion without a pending result");
            return None;
        };
        if result.slot != slot {
            debug!(
                target = result.slot,
                slot, "completion differs from the oldest pending target"
            );
        }
        self.state.in_flight = self.state.in_flight.saturating_sub(1);
        self.state.balance = result.balance;

        self.history.push_front(HistoryEntry {
            slot,
            multiplier: result.multiplier,
            win_amount: result.win_amount,
        });
        self.history.truncate(self.config.history_depth);

        Some(Settlement {
            balance: result.balance,
            win_amount: result.win_amount,
            multiplier: result.multiplier,
            slot,
            target: result.slot,
        })
    }

    /// Drop all per-configuration state.
    pub fn reset(&mut self) {
        self.mapper.clear();
        self.pending.clear();
        self.state.in_flight = 0;
        self.state.request_outstanding = false;
        self.state.awaiting_confirmation = false;
    }
}

#[cfg(test)]
mod tests;
