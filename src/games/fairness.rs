//! Board seed commitments
//!
//! The SHA-256 of a round's seed is published when the round starts. Once the
//! round is resolved the seed is disclosed and anyone can re-derive the board.

use crate::errors::{EngineResult, GameError};
use crate::games::board;
use crate::games::types::CellType;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the seed
pub fn seed_commitment(seed: &[u8; 32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hex::encode(hasher.finalize())
}

/// Check a disclosed seed against its commitment and rebuild the board
pub fn verify_board(
    seed_hex: &str,
    commitment: &str,
    board_size: usize,
    hazard_count: usize,
) -> EngineResult<Vec<CellType>> {
    let bytes = hex::decode(seed_hex)
        .map_err(|e| GameError::invalid(format!("Invalid seed hex: {}", e)))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| GameError::invalid("Seed must be 32 bytes"))?;

    if !seed_commitment(&seed).eq_ignore_ascii_case(commitment) {
        return Err(GameError::invalid("Seed does not match commitment"));
    }

    board::generate(board_size, hazard_count, &seed)
}
