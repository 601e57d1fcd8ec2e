use super::{Rejection, WagerCoordinator};
use tracing::debug;

impl WagerCoordinator {
    pub fn select_bet(&mut self, index: usize) -> Result<(), Rejection> {
        let amount = self
            .game
            .as_ref()
            .ok_or(Rejection::NotConfigured)?
            .bet(index)
            .ok_or(Rejection::InvalidSelection { what: "bet", index })?;
        self.state.bet_index = index;
        self.state.bet_amount = Some(amount);
        debug!(index, amount, "bet selected");
        Ok(())
    }

    pub fn select_risk(&mut self, index: usize) -> Result<(), Rejection> {
        let game = self.game.as_ref().ok_or(Rejection::NotConfigured)?;
        if index >= game.risks.len() {
            return Err(Rejection::InvalidSelection {
                what: "risk",
                index,
            });
        }
        self.state.risk_index = index;
        debug!(index, "risk selected");
        Ok(())
    }

    /// Row count changes the board, so it is refused while drops are in play.
    pub fn select_rows(&mut self, index: usize) -> Result<(), Rejection> {
        let game = self.game.as_ref().ok_or(Rejection::NotConfigured)?;
        if index >= game.rows.len() {
            return Err(Rejection::InvalidSelection { what: "rows", index });
        }
        if index != self.state.row_index
            && (self.state.in_flight > 0 || self.state.request_outstanding)
        {
            return Err(Rejection::WagersInFlight);
        }
        self.state.row_index = index;
        debug!(index, rows = game.rows[index].rows, "rows selected");
        Ok(())
    }

    /// Keep the selection inside a (possibly smaller) new configuration.
    pub(super) fn clamp_selection(&mut self) {
        let Some(game) = &self.game else {
            return;
        };
        let clamp = |index: usize, len: usize| index.min(len.saturating_sub(1));
        self.state.bet_index = clamp(self.state.bet_index, game.bets.len());
        self.state.risk_index = clamp(self.state.risk_index, game.risks.len());
        self.state.row_index = clamp(self.state.row_index, game.rows.len());
        self.state.bet_amount = game.bet(self.state.bet_index);
    }
}
