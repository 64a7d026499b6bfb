use std::path::PathBuf;

use othello_core::GameError;

/// Errors raised by session and registry operations. All of them leave the
/// session unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("room {0} not found")]
    RoomNotFound(String),

    #[error("room {0} is full")]
    RoomFull(String),

    #[error("not in a room")]
    NotInRoom,

    #[error("you are not seated in this game")]
    NotSeated,

    #[error("game is not in progress")]
    NotActive,

    #[error("game is paused while a player reconnects")]
    Paused,

    #[error("there is no pending draw offer")]
    NoDrawOffer,

    #[error("undo is only available against the computer")]
    UndoUnavailable,

    #[error("already in a room")]
    AlreadyInRoom,

    #[error("{0}")]
    Game(#[from] GameError),
}

/// Errors from the result/rating store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use othello_core::Pos;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::RoomNotFound("ABC234".to_string());
        assert_eq!(err.to_string(), "room ABC234 not found");
    }

    #[test]
    fn test_game_error_passes_through() {
        let err: SessionError = GameError::InvalidMove(Pos::from_row_col(0, 0)).into();
        assert_eq!(err.to_string(), "invalid move at a1");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("grace_secs must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: grace_secs must be > 0"
        );
    }
}
