use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of entries in a compact (half) table for a board with `rows` rows.
///
/// A board with `rows` rows has `rows + 1` slots, mirrored about the center,
/// so the compact table holds `ceil((rows + 1) / 2)` entries.
pub const fn compact_len(rows: u8) -> usize {
    (rows as usize + 2) / 2
}

/// Compact index of `slot` on a board with `slots` slots: its distance from
/// the center slot (odd counts) or from the nearer of the center pair (even counts).
pub fn compact_index(slots: usize, slot: usize) -> usize {
    if slots % 2 == 1 {
        slot.abs_diff(slots / 2)
    } else {
        let left = slots / 2 - 1;
        let right = slots / 2;
        if slot <= left {
            left - slot
        } else {
            slot - right
        }
    }
}

/// Compact payout and probability tables for one (rows, risk) pair.
///
/// Entries run from the outermost slot pair (index 0) to the center.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PayoutTable {
    pub multipliers: Vec<f64>,
    #[serde(default)]
    pub probabilities: Vec<f64>,
}

/// One selectable row count and its tables, ordered like
/// [GameConfiguration::risks].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowOption {
    pub rows: u8,
    pub tables: Vec<PayoutTable>,
}

impl RowOption {
    pub fn table(&self, risk_index: usize) -> Option<&PayoutTable> {
        self.tables.get(risk_index)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameConfiguration {
    pub bets: Vec<f64>,
    pub risks: Vec<String>,
    pub rows: Vec<RowOption>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("configuration has no bet amounts")]
    NoBets,
    #[error("configuration has no risk levels")]
    NoRisks,
    #[error("configuration has no row options")]
    NoRows,
    #[error("bet amount {index} is not a positive number ({value})")]
    InvalidBet { index: usize, value: f64 },
    #[error("row option {rows} has {got} tables (expected {expected}, one per risk level)")]
    TableCount {
        rows: u8,
        expected: usize,
        got: usize,
    },
}

impl GameConfiguration {
    /// Check the structural invariants a session cannot work without.
    ///
    /// Compact tables of the wrong length are not rejected here: the outcome
    /// mapper substitutes a neutral multiplier for missing entries. Use
    /// [GameConfiguration::short_tables] to report them.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.bets.is_empty() {
            return Err(ConfigurationError::NoBets);
        }
        if self.risks.is_empty() {
            return Err(ConfigurationError::NoRisks);
        }
        if self.rows.is_empty() {
            return Err(ConfigurationError::NoRows);
        }
        if let Some((index, value)) = self
            .bets
            .iter()
            .enumerate()
            .find(|(_, bet)| !(bet.is_finite() && **bet > 0.0))
        {
            return Err(ConfigurationError::InvalidBet {
                index,
                value: *value,
            });
        }
        for option in &self.rows {
            if option.tables.len() != self.risks.len() {
                return Err(ConfigurationError::TableCount {
                    rows: option.rows,
                    expected: self.risks.len(),
                    got: option.tables.len(),
                });
            }
        }
        Ok(())
    }

    /// (rows, risk index, actual length) of every compact table whose length
    /// differs from [compact_len].
    pub fn short_tables(&self) -> Vec<(u8, usize, usize)> {
        let mut out = Vec::new();
        for option in &self.rows {
            let expected = compact_len(option.rows);
            for (risk, table) in option.tables.iter().enumerate() {
                if table.multipliers.len() != expected {
                    out.push((option.rows, risk, table.multipliers.len()));
                }
            }
        }
        out
    }

    pub fn bet(&self, index: usize) -> Option<f64> {
        self.bets.get(index).copied()
    }

    pub fn row(&self, index: usize) -> Option<&RowOption> {
        self.rows.get(index)
    }

    /// Compact multipliers for the selected row option and risk level.
    pub fn table(&self, row_index: usize, risk_index: usize) -> Option<&PayoutTable> {
        self.rows.get(row_index)?.table(risk_index)
    }
}

/// Payload of `game:init`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameInit {
    #[serde(flatten)]
    pub config: GameConfiguration,
    pub balance: f64,
}
