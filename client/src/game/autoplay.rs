use super::Mailbox;
use crate::{wager::Rejection, wager::WagerState, Error};
use std::time::Duration;
use tokio::{sync::watch, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoplayStop {
    Completed { rounds: u32 },
    InsufficientBalance,
    SessionUnavailable,
    Cancelled,
    GameClosed,
}

/// Place wagers through `mailbox` until `rounds` are played, the balance
/// runs out, or `cancel` fires.
///
/// Each round waits for admission to open (the previous submission
/// confirmed and a free in-flight slot) and then for `delay`.
pub(super) async fn run(
    mailbox: Mailbox,
    generation: u64,
    mut state: watch::Receiver<WagerState>,
    rounds: Option<u32>,
    delay: Duration,
    cancel: CancellationToken,
) -> AutoplayStop {
    info!(?rounds, "autoplay started");
    let mut played = 0u32;
    loop {
        if rounds.is_some_and(|limit| played >= limit) {
            return AutoplayStop::Completed { rounds: played };
        }
        if let Some(stop) = admission(&mut state, &cancel).await {
            return stop;
        }
        let affordable = state.borrow().can_afford();
        if !affordable {
            warn!(played, "autoplay out of balance");
            return AutoplayStop::InsufficientBalance;
        }

        if cancel.is_cancelled() {
            return AutoplayStop::Cancelled;
        }
        match mailbox.autoplay_wager(generation).await {
            Ok(()) => {
                played += 1;
                debug!(played, "autoplay round placed");
            }
            Err(Error::Rejected(Rejection::InsufficientBalance { .. })) => {
                return AutoplayStop::InsufficientBalance;
            }
            Err(Error::Rejected(Rejection::SessionUnavailable)) => {
                return AutoplayStop::SessionUnavailable;
            }
            Err(Error::Rejected(Rejection::AutoplayStopped)) => return AutoplayStop::Cancelled,
            Err(Error::Rejected(rejection)) => {
                debug!(%rejection, "autoplay round rejected, retrying");
            }
            Err(_) => return AutoplayStop::GameClosed,
        }

        tokio::select! {
            _ = cancel.cancelled() => return AutoplayStop::Cancelled,
            _ = sleep(delay) => {},
        }
    }
}

async fn admission(
    state: &mut watch::Receiver<WagerState>,
    cancel: &CancellationToken,
) -> Option<AutoplayStop> {
    loop {
        if cancel.is_cancelled() {
            return Some(AutoplayStop::Cancelled);
        }
        let open = state.borrow_and_update().admission_open();
        if open {
            return None;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Some(AutoplayStop::Cancelled),
            changed = state.changed() => {
                if changed.is_err() {
                    return Some(AutoplayStop::GameClosed);
                }
            },
        }
    }
}
