use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// AI strength.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Nominal search depth in plies.
    pub fn depth(self) -> u8 {
        match self {
            Difficulty::Easy => 2,
            Difficulty::Medium => 4,
            Difficulty::Hard => 6,
        }
    }

    /// Whether the move is sampled among the top candidates instead of
    /// always taking the best one.
    pub fn samples(self) -> bool {
        matches!(self, Difficulty::Easy)
    }

    /// Number of top-ranked moves the sampler chooses from.
    pub fn candidates(self) -> usize {
        match self {
            Difficulty::Easy => 4,
            Difficulty::Medium | Difficulty::Hard => 1,
        }
    }

    /// Whether the end of the game is searched exhaustively.
    pub fn solves_endgame(self) -> bool {
        matches!(self, Difficulty::Hard)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Easy => f.write_str("easy"),
            Difficulty::Medium => f.write_str("medium"),
            Difficulty::Hard => f.write_str("hard"),
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Difficulty, String> {
        match s.to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty: {}", other)),
        }
    }
}
