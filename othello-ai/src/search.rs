//! Iterative-deepening alpha-beta search.
//!
//! Negamax formulation: every score is from the point of view of the side to
//! move at that node. Each iteration searches the root moves in generation
//! order and only replaces the current best on a strictly better score, so
//! ties always go to the first generated move.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use othello_core::{Board, GameState, MoveList, Player, Pos};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::difficulty::Difficulty;
use crate::eval::{evaluate, terminal_score};
use crate::stats::SearchStats;
use crate::tt::{position_key, TranspositionTable};

const INF: i32 = i32::MAX / 2;

/// How often (in nodes) the clock and cancel flag are checked.
const CLOCK_CHECK_INTERVAL: u64 = 1024;

/// Search limits shared by every difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Node budget per move.
    pub max_nodes: u64,
    /// Wall-clock budget per move, in milliseconds.
    pub max_millis: u64,
    /// Hard switches to an exact solve at or below this many empties.
    pub endgame_empties: u8,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_nodes: 2_000_000,
            max_millis: 1_500,
            endgame_empties: 12,
        }
    }
}

impl SearchConfig {
    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_millis)
    }
}

/// Outcome of one search.
#[derive(Debug, Clone)]
pub struct SearchReport {
    /// Move to play; None only when there is no legal move.
    pub best_move: Option<Pos>,
    /// Score of the best move at the completed depth.
    pub score: i32,
    /// Root moves with their scores at the completed depth, generation order.
    pub root_scores: Vec<(Pos, i32)>,
    pub stats: SearchStats,
}

/// Raised inside the tree when the budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OutOfBudget;

type Scored = Result<i32, OutOfBudget>;

/// Adversarial search engine.
pub struct SearchEngine {
    config: SearchConfig,
    table: TranspositionTable,
    cancel: Option<Arc<AtomicBool>>,
    stats: SearchStats,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            table: TranspositionTable::new(),
            cancel: None,
            stats: SearchStats::default(),
        }
    }

    /// Abort searches as soon as `flag` becomes true. The best move of the
    /// deepest completed iteration is still returned.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Pick a move for the side to move in `state`.
    ///
    /// Returns None only when the game is over or no legal move exists, which
    /// the caller treats as a pass.
    pub fn best_move<R: Rng + ?Sized>(
        &mut self,
        state: &GameState,
        difficulty: Difficulty,
        rng: &mut R,
    ) -> Option<Pos> {
        self.search(state, difficulty, rng).best_move
    }

    /// Full search returning statistics along with the move.
    #[instrument(skip(self, state, rng), fields(player = ?state.current_player, empties = state.board.empties()))]
    pub fn search<R: Rng + ?Sized>(
        &mut self,
        state: &GameState,
        difficulty: Difficulty,
        rng: &mut R,
    ) -> SearchReport {
        self.stats = SearchStats::new();
        let moves = state.legal_moves;

        if state.is_game_over() || moves.is_empty() {
            self.stats.finish();
            return SearchReport {
                best_move: None,
                score: 0,
                root_scores: Vec::new(),
                stats: self.stats.clone(),
            };
        }

        let board = state.board;
        let player = state.current_player;
        let target = self.target_depth(&board, difficulty);
        let exact_root = difficulty.samples();

        let mut completed: Option<Vec<(Pos, i32)>> = None;
        for depth in 1..=target {
            match self.search_root(&board, player, &moves, depth, exact_root) {
                Ok(scores) => {
                    completed = Some(scores);
                    self.stats.completed_depth = depth;
                    if depth >= board.empties() {
                        self.stats.exact = true;
                        break;
                    }
                }
                Err(OutOfBudget) => {
                    self.stats.budget_exhausted = true;
                    break;
                }
            }
        }
        self.stats.finish();

        let report = match completed {
            Some(root_scores) => {
                let (best_move, score) = if exact_root {
                    sample_weak_move(&root_scores, difficulty.candidates(), rng)
                } else {
                    first_best(&root_scores)
                };
                SearchReport {
                    best_move: Some(best_move),
                    score,
                    root_scores,
                    stats: self.stats.clone(),
                }
            }
            // Not even one ply fit in the budget.
            None => SearchReport {
                best_move: moves.get(0),
                score: 0,
                root_scores: Vec::new(),
                stats: self.stats.clone(),
            },
        };

        debug!(
            difficulty = ?difficulty,
            best = ?report.best_move.map(|p| p.to_string()),
            score = report.score,
            "search finished: {}",
            report.stats
        );
        report
    }

    /// Nominal depth for this difficulty, capped by the squares left.
    fn target_depth(&self, board: &Board, difficulty: Difficulty) -> u8 {
        let empties = board.empties();
        let depth = if difficulty.solves_endgame() && empties <= self.config.endgame_empties {
            empties
        } else {
            difficulty.depth()
        };
        depth.clamp(1, empties.max(1))
    }

    /// Search every root move to `depth`.
    ///
    /// With `exact` each move gets a full window so its score is exact; the
    /// weak-play sampler needs the real ranking. Otherwise moves after the
    /// first are searched against the running best.
    fn search_root(
        &mut self,
        board: &Board,
        player: Player,
        moves: &MoveList,
        depth: u8,
        exact: bool,
    ) -> Result<Vec<(Pos, i32)>, OutOfBudget> {
        let mut scores = Vec::with_capacity(moves.len());
        let mut alpha = -INF;
        let mut best: Option<Pos> = None;

        for mv in moves.iter() {
            let Ok((child, _)) = board.apply_move(player, mv) else {
                continue;
            };
            let window_alpha = if exact { -INF } else { alpha };
            let score = -self.negamax(&child, player.opponent(), depth - 1, -INF, -window_alpha)?;
            if score > alpha {
                alpha = score;
                best = Some(mv);
            }
            scores.push((mv, score));
        }

        if let Some(best) = best {
            self.table.store(position_key(board, player), best);
        }
        Ok(scores)
    }

    fn negamax(
        &mut self,
        board: &Board,
        player: Player,
        depth: u8,
        mut alpha: i32,
        beta: i32,
    ) -> Scored {
        self.tick()?;

        let move_mask = board.move_mask(player);
        if move_mask == 0 {
            let opponent = player.opponent();
            if !board.has_moves(opponent) {
                self.stats.terminal_positions += 1;
                return Ok(terminal_score(board, player));
            }
            // Forced pass: same depth, opponent to move.
            self.stats.passes += 1;
            return Ok(-self.negamax(board, opponent, depth, -beta, -alpha)?);
        }

        if depth == 0 {
            self.stats.leaf_evals += 1;
            return Ok(evaluate(board, player));
        }

        let key = position_key(board, player);
        let moves = self.ordered_moves(key, move_mask);

        let mut best_score = -INF;
        let mut best_move = None;
        for mv in moves.iter() {
            let Ok((child, _)) = board.apply_move(player, mv) else {
                continue;
            };
            let score = -self.negamax(&child, player.opponent(), depth - 1, -beta, -alpha)?;
            if score > best_score {
                best_score = score;
                best_move = Some(mv);
            }
            if score > alpha {
                alpha = score;
            }
            if alpha >= beta {
                self.stats.beta_cutoffs += 1;
                break;
            }
        }

        if let Some(best) = best_move {
            self.table.store(key, best);
        }
        Ok(best_score)
    }

    /// Generation order with the remembered best move first.
    fn ordered_moves(&mut self, key: u64, move_mask: u64) -> MoveList {
        match self.table.probe(key) {
            Some(hint) if move_mask & hint.bit() != 0 => {
                self.stats.tt_hits += 1;
                let mut ordered = MoveList::new();
                ordered.push(hint);
                for pos in Pos::iter_mask(move_mask & !hint.bit()) {
                    ordered.push(pos);
                }
                ordered
            }
            _ => MoveList::from_mask(move_mask),
        }
    }

    /// Count a node and check the budget.
    #[inline]
    fn tick(&mut self) -> Result<(), OutOfBudget> {
        self.stats.nodes += 1;
        if self.stats.nodes > self.config.max_nodes {
            return Err(OutOfBudget);
        }
        if self.stats.nodes % CLOCK_CHECK_INTERVAL == 0 {
            if self.stats.running_time() >= self.config.max_time() {
                return Err(OutOfBudget);
            }
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(OutOfBudget);
                }
            }
        }
        Ok(())
    }
}

impl Default for SearchEngine {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

/// Highest score; the earliest generated move wins ties.
fn first_best(scores: &[(Pos, i32)]) -> (Pos, i32) {
    let mut best = scores[0];
    for &(mv, score) in &scores[1..] {
        if score > best.1 {
            best = (mv, score);
        }
    }
    best
}

/// Pick among the top `candidates` moves, weighting weaker ones more.
///
/// Rank `r` (0 = best) gets weight `r + 1`, so with four candidates the best
/// move is chosen 10% of the time and the fourth 40%.
fn sample_weak_move<R: Rng + ?Sized>(
    scores: &[(Pos, i32)],
    candidates: usize,
    rng: &mut R,
) -> (Pos, i32) {
    let mut ranked: Vec<(Pos, i32)> = scores.to_vec();
    // Stable: equal scores keep generation order.
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(candidates.max(1));

    let total: usize = (1..=ranked.len()).sum();
    let mut pick = rng.random_range(0..total);
    for (rank, &entry) in ranked.iter().enumerate() {
        let weight = rank + 1;
        if pick < weight {
            return entry;
        }
        pick -= weight;
    }
    ranked[ranked.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use othello_core::GameEngine;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pos(row: u8, col: u8) -> Pos {
        Pos::from_row_col(row, col)
    }

    #[test]
    fn test_first_best_prefers_earliest_on_tie() {
        let scores = vec![(pos(2, 3), 5), (pos(3, 2), 7), (pos(4, 5), 7)];
        assert_eq!(first_best(&scores), (pos(3, 2), 7));
    }

    #[test]
    fn test_sample_weak_move_stays_in_top_candidates() {
        let scores = vec![
            (pos(0, 0), 50),
            (pos(0, 1), 40),
            (pos(0, 2), 30),
            (pos(0, 3), 20),
            (pos(0, 4), 10),
            (pos(0, 5), 0),
        ];
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = [0usize; 6];
        for _ in 0..2000 {
            let (mv, _) = sample_weak_move(&scores, 4, &mut rng);
            seen[mv.col() as usize] += 1;
        }
        assert_eq!(seen[4], 0);
        assert_eq!(seen[5], 0);
        // weaker candidates are favoured
        assert!(seen[3] > seen[0]);
    }

    #[test]
    fn test_sample_weak_move_single_candidate() {
        let scores = vec![(pos(5, 5), 1)];
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(sample_weak_move(&scores, 4, &mut rng), (pos(5, 5), 1));
    }

    #[test]
    fn test_no_move_when_game_over() {
        let board = Board::from_masks(u64::MAX, 0).unwrap();
        let state = GameEngine::from_board(board, Player::White).state();
        let mut engine = SearchEngine::default();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(engine.best_move(&state, Difficulty::Hard, &mut rng), None);
    }

    #[test]
    fn test_takes_winning_corner() {
        // Black's (0,0) wipes out every white disc.
        let board: Board = "
            . W W W W W W B
            . . . . . . . .
            . . . . . . . .
            . . . . . . . .
            . . . . . . . .
            . . . . . . . .
            . . . . . . . .
            . . . . . . . .
        "
        .parse()
        .unwrap();
        let state = GameEngine::from_board(board, Player::Black).state();
        let mut engine = SearchEngine::default();
        let mut rng = StdRng::seed_from_u64(0);
        for difficulty in [Difficulty::Medium, Difficulty::Hard] {
            assert_eq!(
                engine.best_move(&state, difficulty, &mut rng),
                Some(pos(0, 0))
            );
        }
    }

    #[test]
    fn test_tiny_budget_still_returns_legal_move() {
        let config = SearchConfig {
            max_nodes: 1,
            ..SearchConfig::default()
        };
        let mut engine = SearchEngine::new(config);
        let state = GameEngine::new().state();
        let mut rng = StdRng::seed_from_u64(0);
        let report = engine.search(&state, Difficulty::Hard, &mut rng);
        assert!(report.stats.budget_exhausted);
        assert_eq!(report.stats.completed_depth, 0);
        assert_eq!(report.best_move, state.legal_moves.get(0));
    }

    #[test]
    fn test_budget_keeps_deepest_completed_iteration() {
        let config = SearchConfig {
            max_nodes: 500,
            ..SearchConfig::default()
        };
        let mut engine = SearchEngine::new(config);
        let state = GameEngine::new().state();
        let mut rng = StdRng::seed_from_u64(0);
        let report = engine.search(&state, Difficulty::Hard, &mut rng);
        assert!(report.stats.budget_exhausted);
        assert!(report.stats.completed_depth >= 1);
        assert!(report.stats.completed_depth < Difficulty::Hard.depth());
        assert_eq!(report.root_scores.len(), state.legal_moves.len());
        assert!(state.legal_moves.contains(report.best_move.unwrap()));
    }

    #[test]
    fn test_cancel_flag_stops_search() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut engine = SearchEngine::new(SearchConfig {
            max_nodes: u64::MAX,
            max_millis: 60_000,
            endgame_empties: 0,
        })
        .with_cancel_flag(flag);
        let state = GameEngine::new().state();
        let mut rng = StdRng::seed_from_u64(0);
        let report = engine.search(&state, Difficulty::Hard, &mut rng);
        assert!(state.legal_moves.contains(report.best_move.unwrap()));
        assert!(report.stats.nodes <= CLOCK_CHECK_INTERVAL * 64);
    }

    #[test]
    fn test_medium_is_deterministic() {
        let state = GameEngine::new().state();
        let mut first = None;
        for seed in 0..4 {
            let mut engine = SearchEngine::default();
            let mut rng = StdRng::seed_from_u64(seed);
            let mv = engine.best_move(&state, Difficulty::Medium, &mut rng);
            match first {
                None => first = Some(mv),
                Some(prev) => assert_eq!(prev, mv),
            }
        }
    }

    #[test]
    fn test_exact_endgame_solve() {
        // Two empties: Hard must search to the end and report exact.
        let board: Board = "
            B B B B B B B B
            B B B B B B B B
            B B B B B B B B
            B B B B B B B B
            W W W W W W W W
            W W W W W W W W
            W W W W W W W W
            W W W W W W . .
        "
        .parse()
        .unwrap();
        let state = GameEngine::from_board(board, Player::Black).state();
        let mut engine = SearchEngine::default();
        let mut rng = StdRng::seed_from_u64(0);
        let report = engine.search(&state, Difficulty::Hard, &mut rng);
        assert!(report.best_move.is_some());
        assert!(report.stats.exact);
        assert_eq!(report.stats.completed_depth, 2);
    }
}
