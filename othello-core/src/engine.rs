//! Turn state machine over [`Board`].
//!
//! The engine owns the board, the side to move and the full history. Passes
//! are applied automatically after each move and recorded in the history,
//! but they are never counted as moves.

use serde::{Deserialize, Serialize};

use crate::{Board, GameError, MoveList, Player, Pos, Winner};

/// Engine phase. A pass is a transition, not a phase.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Ongoing,
    GameOver,
}

/// Why a finished game ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "player")]
pub enum EndReason {
    /// Neither side can move (includes a full board).
    BoardExhausted,
    /// The given player resigned.
    Resignation(Player),
    /// Both players agreed to a draw.
    Agreement,
    /// The given player ran out of time.
    Timeout(Player),
}

/// One history entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Turn {
    /// A played move with enough information to undo it.
    Move {
        player: Player,
        pos: Pos,
        flipped: u64,
        prior: Board,
    },
    /// `player` had no legal move and the turn went back to the opponent.
    Pass { player: Player },
}

/// Result of a successful [`GameEngine::make_move`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MoveResult {
    pub pos: Pos,
    pub flipped: u64,
    /// Set when the opponent had to pass as a consequence of this move.
    pub passed: Option<Player>,
    pub game_over: bool,
}

/// Immutable snapshot of the game.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GameState {
    pub board: Board,
    pub current_player: Player,
    pub legal_moves: MoveList,
    pub phase: Phase,
    pub winner: Option<Winner>,
    pub end_reason: Option<EndReason>,
    /// Played moves per player, indexed by [`Player::index`].
    pub move_counts: [u32; 2],
}

impl GameState {
    #[inline]
    pub fn is_game_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    /// Total moves played, passes excluded.
    #[inline]
    pub fn moves_played(&self) -> u32 {
        self.move_counts[0] + self.move_counts[1]
    }

    #[inline]
    pub fn move_count(&self, player: Player) -> u32 {
        self.move_counts[player.index()]
    }
}

/// Othello turn engine.
#[derive(Clone, Debug)]
pub struct GameEngine {
    board: Board,
    current: Player,
    legal: MoveList,
    history: Vec<Turn>,
    end: Option<(Winner, EndReason)>,
    move_counts: [u32; 2],
}

impl GameEngine {
    /// Start a game from the standard opening position, Black to move.
    pub fn new() -> GameEngine {
        GameEngine::from_board(Board::new(), Player::Black)
    }

    /// Start from an arbitrary position. Pass and terminal rules apply
    /// immediately, so the side to move may change.
    pub fn from_board(board: Board, to_move: Player) -> GameEngine {
        let mut engine = GameEngine {
            board,
            current: to_move,
            legal: MoveList::new(),
            history: Vec::new(),
            end: None,
            move_counts: [0, 0],
        };
        engine.settle();
        engine
    }

    #[inline]
    pub fn board(&self) -> &Board {
        &self.board
    }

    #[inline]
    pub fn current_player(&self) -> Player {
        self.current
    }

    #[inline]
    pub fn legal_moves(&self) -> &MoveList {
        &self.legal
    }

    #[inline]
    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    #[inline]
    pub fn is_game_over(&self) -> bool {
        self.end.is_some()
    }

    pub fn winner(&self) -> Option<Winner> {
        self.end.map(|(winner, _)| winner)
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.end.map(|(_, reason)| reason)
    }

    /// Total moves played, passes excluded.
    pub fn moves_played(&self) -> u32 {
        self.move_counts[0] + self.move_counts[1]
    }

    pub fn move_count(&self, player: Player) -> u32 {
        self.move_counts[player.index()]
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> GameState {
        GameState {
            board: self.board,
            current_player: self.current,
            legal_moves: self.legal,
            phase: if self.end.is_some() {
                Phase::GameOver
            } else {
                Phase::Ongoing
            },
            winner: self.winner(),
            end_reason: self.end_reason(),
            move_counts: self.move_counts,
        }
    }

    /// Play `pos` for `player`.
    ///
    /// On error nothing changes. On success the move is recorded, any forced
    /// pass is applied, and the game ends if neither side can move.
    pub fn make_move(&mut self, player: Player, pos: Pos) -> Result<MoveResult, GameError> {
        if self.end.is_some() {
            return Err(GameError::GameOver);
        }
        if player != self.current {
            return Err(GameError::OutOfTurn(player));
        }
        let (next, flipped) = self.board.apply_move(player, pos)?;

        self.history.push(Turn::Move {
            player,
            pos,
            flipped,
            prior: self.board,
        });
        self.board = next;
        self.move_counts[player.index()] += 1;
        self.current = player.opponent();
        let passed = self.settle();

        Ok(MoveResult {
            pos,
            flipped,
            passed,
            game_over: self.end.is_some(),
        })
    }

    /// Recompute legal moves for the side to move, applying a forced pass or
    /// ending the game. Returns the player who passed, if any.
    fn settle(&mut self) -> Option<Player> {
        let legal = self.board.legal_moves(self.current);
        if !legal.is_empty() {
            self.legal = legal;
            return None;
        }

        let other = self.current.opponent();
        let other_legal = self.board.legal_moves(other);
        if !other_legal.is_empty() {
            let passed = self.current;
            self.history.push(Turn::Pass { player: passed });
            self.current = other;
            self.legal = other_legal;
            return Some(passed);
        }

        self.legal = MoveList::new();
        self.end = Some((self.board.winner(), EndReason::BoardExhausted));
        None
    }

    /// Take back the most recent played move together with any passes it
    /// caused. The mover of the undone move is to move again.
    ///
    /// A game that ended on the board resumes; resignations, agreed draws and
    /// timeouts are final.
    pub fn undo_last_move(&mut self) -> Result<Turn, GameError> {
        if let Some((_, reason)) = self.end {
            if reason != EndReason::BoardExhausted {
                return Err(GameError::GameOver);
            }
        }

        let (idx, turn) = self
            .history
            .iter()
            .enumerate()
            .rev()
            .find(|(_, turn)| matches!(turn, Turn::Move { .. }))
            .map(|(idx, turn)| (idx, *turn))
            .ok_or(GameError::NothingToUndo)?;

        let Turn::Move { player, prior, .. } = turn else {
            return Err(GameError::NothingToUndo);
        };

        self.history.truncate(idx);
        self.board = prior;
        self.current = player;
        self.move_counts[player.index()] -= 1;
        self.end = None;
        self.legal = self.board.legal_moves(player);
        Ok(turn)
    }

    /// `player` resigns; the opponent wins.
    pub fn resign(&mut self, player: Player) -> Result<Winner, GameError> {
        self.finish(Winner::from(player.opponent()), EndReason::Resignation(player))
    }

    /// End the game as a draw by mutual agreement.
    pub fn agree_draw(&mut self) -> Result<Winner, GameError> {
        self.finish(Winner::Draw, EndReason::Agreement)
    }

    /// `player` ran out of time; the opponent wins.
    pub fn forfeit_on_time(&mut self, player: Player) -> Result<Winner, GameError> {
        self.finish(Winner::from(player.opponent()), EndReason::Timeout(player))
    }

    fn finish(&mut self, winner: Winner, reason: EndReason) -> Result<Winner, GameError> {
        if self.end.is_some() {
            return Err(GameError::GameOver);
        }
        self.legal = MoveList::new();
        self.end = Some((winner, reason));
        Ok(winner)
    }
}

impl Default for GameEngine {
    fn default() -> Self {
        GameEngine::new()
    }
}
