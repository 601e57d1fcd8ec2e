//! Default payout tables.
//!
//! Tables are compact: one entry per mirrored slot pair, listed from the
//! outermost pair to the center.

use plinko_types::{compact_index, compact_len, GameConfiguration, PayoutTable, RowOption};

pub const RISKS: [&str; 3] = ["low", "medium", "high"];

pub const BETS: [f64; 10] = [0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0];

/// (rows, [low, medium, high]) multipliers.
const MULTIPLIERS: [(u8, [&[f64]; 3]); 9] = [
    (
        8,
        [
            &[5.6, 2.1, 1.1, 1.0, 0.5],
            &[13.0, 3.0, 1.3, 0.7, 0.4],
            &[29.0, 4.0, 1.5, 0.3, 0.2],
        ],
    ),
    (
        9,
        [
            &[5.6, 2.0, 1.6, 1.0, 0.7],
            &[18.0, 4.0, 1.7, 0.9, 0.5],
            &[43.0, 7.0, 2.0, 0.6, 0.2],
        ],
    ),
    (
        10,
        [
            &[8.9, 3.0, 1.4, 1.1, 1.0, 0.5],
            &[22.0, 5.0, 2.0, 1.4, 0.6, 0.4],
            &[76.0, 10.0, 3.0, 0.9, 0.3, 0.2],
        ],
    ),
    (
        11,
        [
            &[8.4, 3.0, 1.9, 1.3, 1.0, 0.7],
            &[24.0, 6.0, 3.0, 1.8, 0.7, 0.5],
            &[120.0, 14.0, 5.2, 1.4, 0.4, 0.2],
        ],
    ),
    (
        12,
        [
            &[10.0, 3.0, 1.6, 1.4, 1.1, 1.0, 0.5],
            &[33.0, 11.0, 4.0, 2.0, 1.1, 0.6, 0.3],
            &[170.0, 24.0, 8.1, 2.0, 0.7, 0.2, 0.2],
        ],
    ),
    (
        13,
        [
            &[8.1, 4.0, 3.0, 1.9, 1.2, 0.9, 0.7],
            &[43.0, 13.0, 6.0, 3.0, 1.3, 0.7, 0.4],
            &[260.0, 37.0, 11.0, 4.0, 1.0, 0.2, 0.2],
        ],
    ),
    (
        14,
        [
            &[7.1, 4.0, 1.9, 1.4, 1.3, 1.1, 1.0, 0.5],
            &[58.0, 15.0, 7.0, 4.0, 1.9, 1.0, 0.5, 0.2],
            &[420.0, 56.0, 18.0, 5.0, 1.9, 0.3, 0.2, 0.2],
        ],
    ),
    (
        15,
        [
            &[15.0, 8.0, 3.0, 2.0, 1.5, 1.1, 1.0, 0.7],
            &[88.0, 18.0, 11.0, 5.0, 3.0, 1.3, 0.5, 0.3],
            &[620.0, 83.0, 27.0, 8.0, 3.0, 0.5, 0.2, 0.2],
        ],
    ),
    (
        16,
        [
            &[16.0, 9.0, 2.0, 1.4, 1.4, 1.2, 1.1, 1.0, 0.5],
            &[110.0, 41.0, 10.0, 5.0, 3.0, 1.5, 1.0, 0.5, 0.3],
            &[1000.0, 130.0, 26.0, 9.0, 4.0, 2.0, 0.2, 0.2, 0.2],
        ],
    ),
];

/// Probability of each compact entry, outermost pair first, for a fair board.
pub fn probabilities(rows: u8) -> Vec<f64> {
    let slots = rows as usize + 1;
    let len = compact_len(rows);
    let mut out = vec![0.0; len];

    // Binomial(rows, 1/2) over slots
    let mut weight = 1.0f64;
    let total = 2f64.powi(rows as i32);
    for slot in 0..slots {
        if slot > 0 {
            weight = weight * (slots - slot) as f64 / slot as f64;
        }
        let distance = compact_index(slots, slot);
        out[len - 1 - distance] += weight / total;
    }
    out
}

pub fn default_configuration() -> GameConfiguration {
    GameConfiguration {
        bets: BETS.to_vec(),
        risks: RISKS.iter().map(|risk| risk.to_string()).collect(),
        rows: MULTIPLIERS
            .iter()
            .map(|(rows, tables)| RowOption {
                rows: *rows,
                tables: tables
                    .iter()
                    .map(|multipliers| PayoutTable {
                        multipliers: multipliers.to_vec(),
                        probabilities: probabilities(*rows),
                    })
                    .collect(),
            })
            .collect(),
    }
}
