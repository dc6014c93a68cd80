//! Board generation
//!
//! A board holds `hazard_count` hazards, exactly one bonus trigger and safe
//! cells for the remainder, uniformly permuted from a 32-byte seed.

use crate::errors::{EngineResult, GameError};
use crate::games::types::CellType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Check `hazard_count` lies in `[1, board_size - 2]`
pub fn validate_layout(board_size: usize, hazard_count: usize) -> EngineResult<()> {
    if board_size < 3 {
        return Err(GameError::invalid(format!(
            "board size {} is too small",
            board_size
        )));
    }

    if hazard_count == 0 || hazard_count > board_size - 2 {
        return Err(GameError::invalid(format!(
            "hazard count must be between 1 and {}, got {}",
            board_size - 2,
            hazard_count
        )));
    }

    Ok(())
}

/// Generate a shuffled board, deterministic for a given seed
pub fn generate(board_size: usize, hazard_count: usize, seed: &[u8; 32]) -> EngineResult<Vec<CellType>> {
    validate_layout(board_size, hazard_count)?;

    let mut board = Vec::with_capacity(board_size);
    board.extend(std::iter::repeat(CellType::Hazard).take(hazard_count));
    board.push(CellType::BonusTrigger);
    board.resize(board_size, CellType::Safe);

    // Fisher-Yates
    let mut rng = StdRng::from_seed(*seed);
    for j in (1..board.len()).rev() {
        let r = rng.gen_range(0..=j);
        board.swap(j, r);
    }

    Ok(board)
}
