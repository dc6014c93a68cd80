//! Multiplier and risk math
//!
//! Each safe pick pays the inverse of the odds the player faced when picking,
//! discounted by the house edge, compounding across picks.

use crate::games::types::Multiplier;

/// Multiplier after one more safe reveal.
///
/// `revealed_count` is the number of cells revealed before this pick.
pub fn next_multiplier(
    previous: Multiplier,
    board_size: usize,
    revealed_count: usize,
    hazard_count: usize,
    house_edge: f64,
) -> Multiplier {
    let cells_remaining = board_size.saturating_sub(revealed_count);
    let safe_remaining = cells_remaining.saturating_sub(hazard_count);
    if safe_remaining == 0 {
        return previous;
    }

    let probability = safe_remaining as f64 / cells_remaining as f64;
    let next = previous.as_f64() * (1.0 / probability) * house_edge;
    let hundredths = (next * 100.0).round();

    // f64 -> u64 casts saturate
    Multiplier::from_hundredths(hundredths as u64).max(previous)
}

/// Chance the next pick is a hazard
pub fn risk(board_size: usize, revealed_count: usize, hazards_remaining: usize) -> f64 {
    let cells_remaining = board_size.saturating_sub(revealed_count);
    if cells_remaining == 0 {
        return 0.0;
    }
    hazards_remaining as f64 / cells_remaining as f64
}
