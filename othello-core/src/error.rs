use crate::{Player, Pos};

/// Errors raised by the rules engine. None of them change game state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Occupied square, off-board square, or no flip chain in any direction.
    #[error("invalid move at {0}")]
    InvalidMove(Pos),

    #[error("it is not {0}'s turn")]
    OutOfTurn(Player),

    #[error("nothing to undo")]
    NothingToUndo,

    #[error("the game is already over")]
    GameOver,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_error_display() {
        assert_eq!(
            GameError::InvalidMove(Pos::from_row_col(2, 3)).to_string(),
            "invalid move at d3"
        );
        assert_eq!(
            GameError::OutOfTurn(Player::White).to_string(),
            "it is not white's turn"
        );
        assert_eq!(GameError::NothingToUndo.to_string(), "nothing to undo");
    }
}
