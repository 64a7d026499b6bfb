//! Othello game logic with bit-based board representation.
//!
//! # Board Encoding (2 × 64-bit)
//!
//! ```text
//! black: u64   one bit per square occupied by a black disc
//! white: u64   one bit per square occupied by a white disc
//!
//! Square indices (row-major order, bit 0 = upper-left):
//!   (0,0)=0   (0,1)=1  ...  (0,7)=7
//!   (1,0)=8   (1,1)=9  ...  (1,7)=15
//!   ...
//!   (7,0)=56  (7,1)=57 ...  (7,7)=63
//! ```
//!
//! The two masks never overlap. A move is identified by the square it is
//! played on, so [`Pos`] doubles as the move type.
//!
//! # Starting position
//!
//! ```text
//!   . . . . . . . .
//!   . . . . . . . .
//!   . . . . . . . .
//!   . . . W B . . .      White (3,3)  Black (3,4)
//!   . . . B W . . .      Black (4,3)  White (4,4)
//!   . . . . . . . .
//!   . . . . . . . .
//!   . . . . . . . .
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod engine;
pub mod error;
pub mod rating;

pub use engine::{EndReason, GameEngine, GameState, MoveResult, Phase, Turn};
pub use error::GameError;
pub use rating::{GameScore, RatingChange, RatingEvent, RatingRecord, RatingService};

/// Board side length.
pub const BOARD_SIZE: u8 = 8;

/// Number of squares on the board.
pub const NUM_SQUARES: usize = 64;

/// Player identifier. Black always moves first.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    Black,
    White,
}

impl Player {
    /// Get the opponent player.
    #[inline]
    pub fn opponent(self) -> Player {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }

    /// Index for per-player arrays (Black = 0, White = 1).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            Player::Black => 0,
            Player::White => 1,
        }
    }

    /// Both players in move order.
    pub fn all() -> impl Iterator<Item = Player> {
        [Player::Black, Player::White].into_iter()
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Player::Black => f.write_str("black"),
            Player::White => f.write_str("white"),
        }
    }
}

/// Final result of a game.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Black,
    White,
    Draw,
}

impl Winner {
    /// The winning player, or None for a draw.
    pub fn player(self) -> Option<Player> {
        match self {
            Winner::Black => Some(Player::Black),
            Winner::White => Some(Player::White),
            Winner::Draw => None,
        }
    }
}

impl From<Player> for Winner {
    fn from(player: Player) -> Winner {
        match player {
            Player::Black => Winner::Black,
            Player::White => Winner::White,
        }
    }
}

/// Position on the 8x8 board (0-63), row-major.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, PartialOrd, Ord)]
pub struct Pos(pub u8);

impl Pos {
    /// Create a position from row and column (0-7 each).
    #[inline]
    pub fn from_row_col(row: u8, col: u8) -> Pos {
        debug_assert!(row < BOARD_SIZE && col < BOARD_SIZE);
        Pos(row * BOARD_SIZE + col)
    }

    /// Checked constructor for untrusted coordinates.
    pub fn try_from_row_col(row: u8, col: u8) -> Option<Pos> {
        if row < BOARD_SIZE && col < BOARD_SIZE {
            Some(Pos(row * BOARD_SIZE + col))
        } else {
            None
        }
    }

    /// Get the row (0-7).
    #[inline]
    pub fn row(self) -> u8 {
        self.0 / BOARD_SIZE
    }

    /// Get the column (0-7).
    #[inline]
    pub fn col(self) -> u8 {
        self.0 % BOARD_SIZE
    }

    /// Single-bit mask for this square.
    #[inline]
    pub fn bit(self) -> u64 {
        1u64 << self.0
    }

    /// Check if this is a valid position (0-63).
    #[inline]
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < NUM_SQUARES
    }

    /// Iterate over all 64 positions.
    pub fn all() -> impl Iterator<Item = Pos> {
        (0..NUM_SQUARES as u8).map(Pos)
    }

    /// Iterate over the squares set in `mask`, lowest index first.
    pub fn iter_mask(mask: u64) -> impl Iterator<Item = Pos> {
        let mut rest = mask;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let idx = rest.trailing_zeros() as u8;
            rest &= rest - 1;
            Some(Pos(idx))
        })
    }
}

/// Algebraic notation: column letter then 1-based row, e.g. (2,3) = "d3".
impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.col()) as char, self.row() + 1)
    }
}

// ============================================================================
// DIRECTIONS - shift-based neighbour stepping on bitboards
// ============================================================================

/// Column 0 cleared: guards against wrap-around when stepping east.
const NOT_A_FILE: u64 = 0xFEFE_FEFE_FEFE_FEFE;
/// Column 7 cleared: guards against wrap-around when stepping west.
const NOT_H_FILE: u64 = 0x7F7F_7F7F_7F7F_7F7F;

/// The eight compass directions in scan order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
}

impl Direction {
    /// Fixed scan order used everywhere flips are computed.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Move every set bit one step in this direction, dropping bits that
    /// would leave the board.
    #[inline]
    pub fn shift(self, bits: u64) -> u64 {
        match self {
            Direction::North => bits >> 8,
            Direction::NorthEast => (bits >> 7) & NOT_A_FILE,
            Direction::East => (bits << 1) & NOT_A_FILE,
            Direction::SouthEast => (bits << 9) & NOT_A_FILE,
            Direction::South => bits << 8,
            Direction::SouthWest => (bits << 7) & NOT_H_FILE,
            Direction::West => (bits >> 1) & NOT_H_FILE,
            Direction::NorthWest => (bits >> 9) & NOT_H_FILE,
        }
    }
}

// ============================================================================
// MOVE LIST - Zero-allocation legal move container
// ============================================================================

/// Upper bound on legal moves in any position (one per square).
pub const MAX_MOVES: usize = 64;

/// A fixed-size move list that avoids heap allocation.
/// Moves are kept in generation order (ascending square index).
#[derive(Clone, Copy)]
pub struct MoveList {
    moves: [Pos; MAX_MOVES],
    len: u8,
}

impl MoveList {
    /// Create an empty move list.
    #[inline]
    pub const fn new() -> MoveList {
        MoveList {
            moves: [Pos(0); MAX_MOVES],
            len: 0,
        }
    }

    /// Build a list from a move mask.
    pub fn from_mask(mask: u64) -> MoveList {
        let mut list = MoveList::new();
        for pos in Pos::iter_mask(mask) {
            list.push(pos);
        }
        list
    }

    /// Add a move to the list.
    #[inline]
    pub fn push(&mut self, pos: Pos) {
        debug_assert!((self.len as usize) < MAX_MOVES);
        self.moves[self.len as usize] = pos;
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Option<Pos> {
        self.as_slice().get(idx).copied()
    }

    pub fn contains(&self, pos: Pos) -> bool {
        self.as_slice().contains(&pos)
    }

    #[inline]
    pub fn as_slice(&self) -> &[Pos] {
        &self.moves[..self.len as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = Pos> + '_ {
        self.as_slice().iter().copied()
    }

    /// Bit mask of all moves in the list.
    pub fn mask(&self) -> u64 {
        self.iter().fold(0, |acc, pos| acc | pos.bit())
    }
}

impl Default for MoveList {
    fn default() -> Self {
        MoveList::new()
    }
}

impl PartialEq for MoveList {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for MoveList {}

impl fmt::Debug for MoveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

// ============================================================================
// BOARD
// ============================================================================

/// Othello board: two disjoint occupancy masks.
///
/// The board is a value type. [`Board::apply_move`] returns a new board and
/// leaves `self` untouched.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Board {
    black: u64,
    white: u64,
}

impl Board {
    /// Starting mask for Black: (3,4) and (4,3).
    pub const BLACK_START: u64 = (1 << 28) | (1 << 35);
    /// Starting mask for White: (3,3) and (4,4).
    pub const WHITE_START: u64 = (1 << 27) | (1 << 36);

    /// Create the standard starting board.
    pub fn new() -> Board {
        Board {
            black: Self::BLACK_START,
            white: Self::WHITE_START,
        }
    }

    /// Create a board with no discs at all.
    pub const fn empty() -> Board {
        Board { black: 0, white: 0 }
    }

    /// Create a board from raw masks. Returns None if the masks overlap.
    pub fn from_masks(black: u64, white: u64) -> Option<Board> {
        if black & white != 0 {
            None
        } else {
            Some(Board { black, white })
        }
    }

    /// Mask of discs owned by `player`.
    #[inline]
    pub fn discs(&self, player: Player) -> u64 {
        match player {
            Player::Black => self.black,
            Player::White => self.white,
        }
    }

    /// `(own, opponent)` masks from `player`'s perspective.
    #[inline]
    pub fn split(&self, player: Player) -> (u64, u64) {
        match player {
            Player::Black => (self.black, self.white),
            Player::White => (self.white, self.black),
        }
    }

    /// Mask of all occupied squares.
    #[inline]
    pub fn occupied(&self) -> u64 {
        self.black | self.white
    }

    /// Mask of all empty squares.
    #[inline]
    pub fn empty_mask(&self) -> u64 {
        !self.occupied()
    }

    /// Owner of the disc on a square, if any.
    pub fn cell(&self, pos: Pos) -> Option<Player> {
        let bit = pos.bit();
        if self.black & bit != 0 {
            Some(Player::Black)
        } else if self.white & bit != 0 {
            Some(Player::White)
        } else {
            None
        }
    }

    /// Check if a square is empty.
    #[inline]
    pub fn is_empty(&self, pos: Pos) -> bool {
        self.occupied() & pos.bit() == 0
    }

    /// Number of discs owned by `player`.
    #[inline]
    pub fn count(&self, player: Player) -> u8 {
        self.discs(player).count_ones() as u8
    }

    /// Total number of discs on the board.
    #[inline]
    pub fn disc_count(&self) -> u8 {
        self.occupied().count_ones() as u8
    }

    /// Number of empty squares.
    #[inline]
    pub fn empties(&self) -> u8 {
        self.occupied().count_zeros() as u8
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.occupied() == u64::MAX
    }

    /// Compute the discs `player` would flip by playing `pos`.
    ///
    /// Walks outward in each direction collecting opponent discs; a run only
    /// counts when it is non-empty and capped by one of the player's own
    /// discs. Returns 0 for an occupied square or an illegal move.
    pub fn flips(&self, player: Player, pos: Pos) -> u64 {
        if !pos.is_valid() || !self.is_empty(pos) {
            return 0;
        }
        let (own, opp) = self.split(player);
        let mut flipped = 0u64;

        for dir in Direction::ALL {
            let mut run = 0u64;
            let mut cursor = dir.shift(pos.bit());
            while cursor & opp != 0 {
                run |= cursor;
                cursor = dir.shift(cursor);
            }
            if run != 0 && cursor & own != 0 {
                flipped |= run;
            }
        }

        flipped
    }

    /// Check whether `player` may play `pos`.
    #[inline]
    pub fn is_legal(&self, player: Player, pos: Pos) -> bool {
        self.flips(player, pos) != 0
    }

    /// Mask of every legal move for `player`.
    ///
    /// Uses directional flood fills instead of per-square walks; the result
    /// is identical to testing [`Board::is_legal`] on every empty square.
    pub fn move_mask(&self, player: Player) -> u64 {
        let (own, opp) = self.split(player);
        let empty = self.empty_mask();
        let mut moves = 0u64;

        for dir in Direction::ALL {
            let mut run = dir.shift(own) & opp;
            // A run of opponent discs is at most six long.
            for _ in 0..5 {
                run |= dir.shift(run) & opp;
            }
            moves |= dir.shift(run) & empty;
        }

        moves
    }

    /// Legal moves for `player` in generation order.
    pub fn legal_moves(&self, player: Player) -> MoveList {
        MoveList::from_mask(self.move_mask(player))
    }

    /// Check whether `player` has at least one legal move.
    #[inline]
    pub fn has_moves(&self, player: Player) -> bool {
        self.move_mask(player) != 0
    }

    /// Play `pos` for `player`, returning the new board and the flipped mask.
    ///
    /// Fails with [`GameError::InvalidMove`] if the square is off-board,
    /// occupied, or captures nothing. `self` is never modified.
    pub fn apply_move(&self, player: Player, pos: Pos) -> Result<(Board, u64), GameError> {
        let flipped = self.flips(player, pos);
        if flipped == 0 {
            return Err(GameError::InvalidMove(pos));
        }
        let (own, opp) = self.split(player);
        let own = own | pos.bit() | flipped;
        let opp = opp & !flipped;
        let next = match player {
            Player::Black => Board { black: own, white: opp },
            Player::White => Board { black: opp, white: own },
        };
        Ok((next, flipped))
    }

    /// Winner by disc majority; a tie is a draw.
    pub fn winner(&self) -> Winner {
        let black = self.count(Player::Black);
        let white = self.count(Player::White);
        if black > white {
            Winner::Black
        } else if white > black {
            Winner::White
        } else {
            Winner::Draw
        }
    }

    /// Rows of cells, top to bottom.
    pub fn rows(&self) -> [[Option<Player>; 8]; 8] {
        let mut rows = [[None; 8]; 8];
        for pos in Pos::all() {
            rows[pos.row() as usize][pos.col() as usize] = self.cell(pos);
        }
        rows
    }
}

impl Default for Board {
    fn default() -> Self {
        Board::new()
    }
}

/// Eight lines of `B`, `W` and `.` separated by spaces.
impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.rows() {
            let line: Vec<&str> = row
                .iter()
                .map(|cell| match cell {
                    Some(Player::Black) => "B",
                    Some(Player::White) => "W",
                    None => ".",
                })
                .collect();
            writeln!(f, "{}", line.join(" "))?;
        }
        Ok(())
    }
}

/// Error parsing a board diagram.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseBoardError {
    #[error("expected 64 cells, found {0}")]
    WrongCellCount(usize),
    #[error("unexpected character {0:?}")]
    BadCell(char),
}

/// Parses the [`fmt::Display`] format. Whitespace is ignored, so compact
/// 8-character rows work too.
impl FromStr for Board {
    type Err = ParseBoardError;

    fn from_str(s: &str) -> Result<Board, ParseBoardError> {
        let mut board = Board::empty();
        let mut idx = 0usize;
        for ch in s.chars().filter(|c| !c.is_whitespace()) {
            if idx >= NUM_SQUARES {
                return Err(ParseBoardError::WrongCellCount(idx + 1));
            }
            let bit = 1u64 << idx;
            match ch {
                'B' | 'b' | 'X' | 'x' => board.black |= bit,
                'W' | 'w' | 'O' | 'o' => board.white |= bit,
                '.' | '-' => {}
                other => return Err(ParseBoardError::BadCell(other)),
            }
            idx += 1;
        }
        if idx != NUM_SQUARES {
            return Err(ParseBoardError::WrongCellCount(idx));
        }
        Ok(board)
    }
}
