//! Othello AI: iterative-deepening alpha-beta search with difficulty levels.
//!
//! ```no_run
//! use othello_ai::{Difficulty, SearchEngine};
//! use othello_core::GameEngine;
//!
//! let game = GameEngine::new();
//! let mut engine = SearchEngine::default();
//! let mv = engine.best_move(&game.state(), Difficulty::Medium, &mut rand::rng());
//! assert!(mv.is_some());
//! ```

pub mod difficulty;
pub mod eval;
pub mod search;
pub mod stats;
pub mod tt;

pub use difficulty::Difficulty;
pub use search::{SearchConfig, SearchEngine, SearchReport};
pub use stats::SearchStats;
