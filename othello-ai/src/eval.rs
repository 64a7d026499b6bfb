//! Static position evaluation.
//!
//! Score is from the point of view of the side to move; higher is better.
//! Three terms are combined:
//!
//! - square weights (corners high, squares next to corners negative)
//! - mobility: difference in legal move counts
//! - disc difference, scaled up as the board fills

use othello_core::{Board, Player, Pos};

/// Score magnitude for a decided game; always dominates the heuristic.
pub const WIN_SCORE: i32 = 100_000;

/// Per-square weights, row-major.
#[rustfmt::skip]
pub const SQUARE_WEIGHTS: [i32; 64] = [
    100, -20,  10,   5,   5,  10, -20, 100,
    -20, -50,  -2,  -2,  -2,  -2, -50, -20,
     10,  -2,  -1,  -1,  -1,  -1,  -2,  10,
      5,  -2,  -1,  -1,  -1,  -1,  -2,   5,
      5,  -2,  -1,  -1,  -1,  -1,  -2,   5,
     10,  -2,  -1,  -1,  -1,  -1,  -2,  10,
    -20, -50,  -2,  -2,  -2,  -2, -50, -20,
    100, -20,  10,   5,   5,  10, -20, 100,
];

const MOBILITY_WEIGHT: i32 = 8;

fn weighted_sum(mask: u64) -> i32 {
    Pos::iter_mask(mask).map(|p| SQUARE_WEIGHTS[p.0 as usize]).sum()
}

/// Heuristic value of a non-terminal position for `player`.
pub fn evaluate(board: &Board, player: Player) -> i32 {
    let (own, opp) = board.split(player);

    let positional = weighted_sum(own) - weighted_sum(opp);

    let own_mobility = board.move_mask(player).count_ones() as i32;
    let opp_mobility = board.move_mask(player.opponent()).count_ones() as i32;
    let mobility = MOBILITY_WEIGHT * (own_mobility - opp_mobility);

    let disc_diff = own.count_ones() as i32 - opp.count_ones() as i32;
    let filled = 64 - board.empties() as i32;
    let discs = disc_diff * filled / 4;

    positional + mobility + discs
}

/// Exact value of a finished game for `player`: win/loss dominates, the
/// margin breaks ties between wins.
pub fn terminal_score(board: &Board, player: Player) -> i32 {
    let diff = board.count(player) as i32 - board.count(player.opponent()) as i32;
    match diff.signum() {
        1 => WIN_SCORE + diff,
        -1 => -WIN_SCORE + diff,
        _ => 0,
    }
}
