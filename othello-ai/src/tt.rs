//! Transposition table used for move ordering.
//!
//! Only the best move found for a position is kept. Scores are not reused,
//! so a stale or colliding entry can cost speed but never change a result.

use std::collections::HashMap;

use othello_core::{Board, Player, Pos};
use xxhash_rust::xxh64::xxh64;

/// Default number of positions kept before the table is flushed.
pub const DEFAULT_CAPACITY: usize = 1 << 20;

/// Hash of a position and the side to move.
pub fn position_key(board: &Board, player: Player) -> u64 {
    let mut bytes = [0u8; 17];
    bytes[..8].copy_from_slice(&board.discs(Player::Black).to_le_bytes());
    bytes[8..16].copy_from_slice(&board.discs(Player::White).to_le_bytes());
    bytes[16] = player.index() as u8;
    xxh64(&bytes, 0)
}

/// Position hash -> best move.
pub struct TranspositionTable {
    entries: HashMap<u64, Pos>,
    capacity: usize,
}

impl TranspositionTable {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    #[inline]
    pub fn probe(&self, key: u64) -> Option<Pos> {
        self.entries.get(&key).copied()
    }

    /// Record the best move for `key`. Flushes everything once full.
    pub fn store(&mut self, key: u64, best: Pos) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            self.entries.clear();
        }
        self.entries.insert(key, best);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TranspositionTable {
    fn default() -> Self {
        Self::new()
    }
}
