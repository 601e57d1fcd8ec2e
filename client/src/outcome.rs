//! Mapping between compact (half-board) payout indices and physical slots.
//!
//! A board with `rows` rows has `rows + 1` slots mirrored about the center.
//! The authority reports outcomes as a compact index: the distance from the
//! center slot (odd slot counts) or from the center pair (even slot counts).

use plinko_types::compact_index;
use rand::Rng;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, warn};

/// Multiplier used for any slot the payout table does not cover.
pub const NEUTRAL_MULTIPLIER: f64 = 1.0;

/// Full-board view of one (rows, risk) payout table.
#[derive(Clone, Debug, PartialEq)]
pub struct OutcomeMapping {
    rows: u8,
    risk: usize,
    /// Center-first; always exactly as long as the largest compact index + 1.
    compact: Vec<f64>,
    full_multipliers: Vec<f64>,
    slot_to_compact: Vec<usize>,
}

impl OutcomeMapping {
    /// Build from an authority table, which lists multipliers from the outer
    /// slot pair inward.
    pub fn build(rows: u8, risk: usize, table: &[f64]) -> Self {
        let slots = rows as usize + 1;
        let slot_to_compact: Vec<usize> = (0..slots)
            .map(|slot| compact_index(slots, slot))
            .collect();
        let needed = slot_to_compact.iter().max().map_or(0, |max| max + 1);

        let mut compact: Vec<f64> = table.iter().rev().copied().collect();
        if compact.len() < needed {
            warn!(
                rows,
                risk,
                len = table.len(),
                needed,
                "payout table too short, using neutral multiplier for missing slots"
            );
            compact.resize(needed, NEUTRAL_MULTIPLIER);
        } else if compact.len() > needed {
            warn!(
                rows,
                risk,
                len = table.len(),
                needed,
                "payout table too long, ignoring extra entries"
            );
            compact.truncate(needed);
        }

        let full_multipliers = slot_to_compact.iter().map(|&index| compact[index]).collect();
        Self {
            rows,
            risk,
            compact,
            full_multipliers,
            slot_to_compact,
        }
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn risk(&self) -> usize {
        self.risk
    }

    pub fn slots(&self) -> usize {
        self.slot_to_compact.len()
    }

    pub fn full_multipliers(&self) -> &[f64] {
        &self.full_multipliers
    }

    pub fn slot_to_compact(&self) -> &[usize] {
        &self.slot_to_compact
    }

    /// Multiplier of compact index `index` (0 is the center).
    pub fn compact_multiplier(&self, index: usize) -> Option<f64> {
        self.compact.get(index).copied()
    }

    pub fn multiplier(&self, slot: usize) -> Option<f64> {
        self.full_multipliers.get(slot).copied()
    }

    /// Slots that pay out compact index `index`, in ascending order.
    ///
    /// Falls back to slot 0 when nothing matches.
    pub fn resolve_slots(&self, index: usize) -> Vec<usize> {
        let slots: Vec<usize> = self
            .slot_to_compact
            .iter()
            .enumerate()
            .filter(|(_, &candidate)| candidate == index)
            .map(|(slot, _)| slot)
            .collect();
        if slots.is_empty() {
            warn!(
                rows = self.rows,
                risk = self.risk,
                index,
                "no slot for reported outcome, falling back to slot 0"
            );
            return vec![0];
        }
        slots
    }
}

/// Pick the physical target among equivalent slots.
pub fn choose_slot<R: Rng + ?Sized>(candidates: &[usize], rng: &mut R) -> usize {
    match candidates {
        [] => {
            warn!("no candidate slots, falling back to slot 0");
            0
        }
        [only] => *only,
        [left, right] => {
            if rng.gen_bool(0.5) {
                *left
            } else {
                *right
            }
        }
        many => {
            warn!(count = many.len(), "more than two candidate slots");
            many[rng.gen_range(0..many.len())]
        }
    }
}

/// Cache of mappings keyed by (rows, risk index).
///
/// Cleared whenever the configuration that produced the tables changes.
#[derive(Debug, Default)]
pub struct OutcomeMapper {
    cache: HashMap<(u8, usize), Arc<OutcomeMapping>>,
    builds: u64,
}

impl OutcomeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mapping(&mut self, rows: u8, risk: usize, table: &[f64]) -> Arc<OutcomeMapping> {
        if let Some(mapping) = self.cache.get(&(rows, risk)) {
            return mapping.clone();
        }
        let mapping = Arc::new(OutcomeMapping::build(rows, risk, table));
        self.builds += 1;
        debug!(rows, risk, slots = mapping.slots(), "built outcome mapping");
        self.cache.insert((rows, risk), mapping.clone());
        mapping
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Mappings built since creation (cache misses).
    pub fn builds(&self) -> u64 {
        self.builds
    }
}
