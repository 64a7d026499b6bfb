//! Websocket wire format.
//!
//! Every frame is one JSON object tagged by `"type"`. Field names are
//! camelCase; board coordinates are `[row, col]` pairs.

use othello_ai::Difficulty;
use othello_core::{GameState, Player, Pos, Winner};
use serde::{Deserialize, Serialize};

/// Intents sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Friend room, or a game against the computer when `difficulty` is set.
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        player_name: String,
        #[serde(default)]
        difficulty: Option<Difficulty>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, player_name: String },
    #[serde(rename_all = "camelCase")]
    QueueRanked { player_name: String },
    LeaveQueue,
    Move { row: i32, col: i32 },
    Undo,
    Resign,
    DrawOffer,
    DrawResponse { accept: bool },
    Chat { message: String },
    #[serde(rename_all = "camelCase")]
    Rejoin { room_id: String },
    LeaveRoom,
    Rematch,
    Ping,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    BoardExhausted,
    Resignation,
    Agreement,
    Timeout,
    Disconnect,
    Abandon,
}

/// Result of a session from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
    Abandoned,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Draw => "draw",
            Outcome::Abandoned => "abandoned",
        }
    }
}

/// Board snapshot as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateView {
    pub board: [[Option<Player>; 8]; 8],
    pub current_player: Player,
    pub valid_moves: Vec<[u8; 2]>,
    pub is_game_over: bool,
    pub winner: Option<Winner>,
    pub last_move: Option<[u8; 2]>,
    pub flipped: Vec<[u8; 2]>,
    pub black_count: u8,
    pub white_count: u8,
}

fn coords(pos: Pos) -> [u8; 2] {
    [pos.row(), pos.col()]
}

impl StateView {
    /// `last` is the most recent move and its flip mask, when there is one.
    pub fn new(state: &GameState, last: Option<(Pos, u64)>) -> StateView {
        StateView {
            board: state.board.rows(),
            current_player: state.current_player,
            valid_moves: state.legal_moves.iter().map(coords).collect(),
            is_game_over: state.is_game_over(),
            winner: state.winner,
            last_move: last.map(|(pos, _)| coords(pos)),
            flipped: last
                .map(|(_, mask)| Pos::iter_mask(mask).map(coords).collect())
                .unwrap_or_default(),
            black_count: state.board.count(Player::Black),
            white_count: state.board.count(Player::White),
        }
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_id: String },
    Queued,
    #[serde(rename_all = "camelCase")]
    GameReady {
        room_id: String,
        color: Player,
        opponent_name: String,
        opponent_rating: Option<i32>,
        state: StateView,
    },
    #[serde(rename_all = "camelCase")]
    RoomNotFound { room_id: String },
    #[serde(rename_all = "camelCase")]
    RoomFull { room_id: String },
    StateUpdate(StateView),
    MoveRejected { reason: String },
    #[serde(rename_all = "camelCase")]
    OpponentDisconnected { grace_secs: u64 },
    OpponentReconnected,
    DrawOffered,
    DrawDeclined,
    Chat { from: String, message: String },
    #[serde(rename_all = "camelCase")]
    GameOver {
        winner: Option<Winner>,
        reason: FinishReason,
        outcome: Outcome,
        elo_change: i32,
        new_elo: Option<i32>,
    },
    RematchRequested,
    Error { message: String },
    Pong,
}
