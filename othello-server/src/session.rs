//! One live game between two seats.
//!
//! `MatchSession` is plain synchronous state. Every operation runs under the
//! session's lock and returns the [`Followup`] work the caller has to start
//! after releasing it: timers, an AI search, result persistence, or room
//! cleanup. Timers and searches carry the epoch they were issued at and are
//! ignored once the session has moved on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use othello_ai::Difficulty;
use othello_core::{
    EndReason, GameEngine, GameScore, GameState, Player, Pos, RatingEvent, RatingRecord,
    RatingService, Turn, Winner,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

use crate::error::SessionError;
use crate::protocol::{FinishReason, Outcome, ServerMessage, StateView};

/// Connection identifier, unique for the lifetime of the process.
pub type ConnId = u64;

/// Outbound half of one client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnId,
    pub tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn send(&self, msg: ServerMessage) {
        // A closed receiver just means the socket is going away.
        let _ = self.tx.send(msg);
    }
}

/// Player identity as supplied by the upstream auth layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
}

/// What kind of game a session hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Friend,
    Ranked,
    Ai(Difficulty),
}

impl GameMode {
    pub fn label(self) -> String {
        match self {
            GameMode::Friend => "friend".to_string(),
            GameMode::Ranked => "ranked".to_string(),
            GameMode::Ai(difficulty) => format!("ai-{}", difficulty),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitingForOpponent,
    Active,
    /// A human seat lost its connection and the grace window is running.
    Paused,
    Completed,
    Abandoned,
}

impl SessionState {
    pub fn is_over(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Abandoned)
    }
}

/// Per-session timing and rating knobs.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub grace: Duration,
    pub turn_timeout: Option<Duration>,
    pub chat_max_len: usize,
    pub rating: RatingService,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            grace: Duration::from_secs(30),
            turn_timeout: Some(Duration::from_secs(120)),
            chat_max_len: 280,
            rating: RatingService::default(),
        }
    }
}

/// A human about to take a seat: who they are, their rating at session
/// start, and where to send their messages.
#[derive(Debug, Clone)]
pub struct Participant {
    pub identity: Identity,
    pub rating: RatingRecord,
    pub conn: Connection,
}

/// Seat assignment for a new session.
#[derive(Debug, Clone)]
pub enum SeatInit {
    Human(Participant),
    Ai(Difficulty),
}

/// Seat assignment for a rematch; ratings are re-read before it starts.
#[derive(Debug, Clone)]
pub enum RematchSeat {
    Human { identity: Identity, conn: Connection },
    Ai(Difficulty),
}

#[derive(Debug)]
struct HumanSeat {
    identity: Identity,
    rating: RatingRecord,
    conn: Option<Connection>,
    wants_rematch: bool,
}

#[derive(Debug)]
enum Seat {
    Empty,
    Human(HumanSeat),
    Ai(Difficulty),
}

impl Seat {
    fn from_init(init: SeatInit) -> Seat {
        match init {
            SeatInit::Human(p) => Seat::Human(HumanSeat {
                identity: p.identity,
                rating: p.rating,
                conn: Some(p.conn),
                wants_rematch: false,
            }),
            SeatInit::Ai(difficulty) => Seat::Ai(difficulty),
        }
    }

    fn human(&self) -> Option<&HumanSeat> {
        match self {
            Seat::Human(h) => Some(h),
            _ => None,
        }
    }

    fn human_mut(&mut self) -> Option<&mut HumanSeat> {
        match self {
            Seat::Human(h) => Some(h),
            _ => None,
        }
    }
}

/// Result row emitted for each human participant when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameResultRecord {
    pub mode: String,
    pub outcome: Outcome,
    pub elo_change: i32,
    pub new_elo: i32,
    /// Seconds from game start to the end.
    pub duration: u64,
    pub move_count: u32,
}

/// Everything the persistence layer needs about one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerResult {
    pub player_id: String,
    pub record: GameResultRecord,
    /// Updated rating record; only ranked games change it.
    pub rating: Option<RatingRecord>,
}

/// Work to start once the session lock is released.
#[derive(Debug)]
pub enum Followup {
    /// Call [`MatchSession::grace_expired`] after `after`.
    Grace {
        seat: Player,
        epoch: u64,
        after: Duration,
    },
    /// Call [`MatchSession::turn_expired`] after `after`.
    TurnDeadline { epoch: u64, after: Duration },
    /// Search `state` and hand the move to [`MatchSession::apply_search`].
    Search {
        epoch: u64,
        state: GameState,
        difficulty: Difficulty,
        cancel: Arc<AtomicBool>,
    },
    /// Persist the results.
    Finished(Vec<PlayerResult>),
    /// Start a new session with these seats.
    Rematch {
        mode: GameMode,
        seats: [RematchSeat; 2],
    },
    /// Drop the room.
    Close,
}

/// How a session is being closed.
#[derive(Debug, Clone, Copy)]
enum Ending {
    /// The engine reached a final state.
    Played,
    /// `leaver` never came back.
    Left { leaver: Player, kind: LeaveKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaveKind {
    Abandon,
    Disconnect,
}

/// At most one move by each side counts as an abandoned game.
fn is_early(engine: &GameEngine) -> bool {
    engine.move_count(Player::Black) <= 1 && engine.move_count(Player::White) <= 1
}

fn finish_reason(reason: EndReason) -> FinishReason {
    match reason {
        EndReason::BoardExhausted => FinishReason::BoardExhausted,
        EndReason::Resignation(_) => FinishReason::Resignation,
        EndReason::Agreement => FinishReason::Agreement,
        EndReason::Timeout(_) => FinishReason::Timeout,
    }
}

pub struct MatchSession {
    code: String,
    mode: GameMode,
    seats: [Seat; 2],
    engine: GameEngine,
    state: SessionState,
    settings: SessionSettings,
    /// Bumped on every transition; stale timers and searches compare it.
    epoch: u64,
    grace_epochs: [u64; 2],
    search_cancel: Option<Arc<AtomicBool>>,
    last_move: Option<(Pos, u64)>,
    draw_offer: Option<Player>,
    started_at: Option<Instant>,
}

impl MatchSession {
    /// Friend room waiting for a second player; the host plays Black.
    pub fn waiting(code: String, host: Participant, settings: SessionSettings) -> MatchSession {
        MatchSession {
            code,
            mode: GameMode::Friend,
            seats: [Seat::from_init(SeatInit::Human(host)), Seat::Empty],
            engine: GameEngine::new(),
            state: SessionState::WaitingForOpponent,
            settings,
            epoch: 0,
            grace_epochs: [0; 2],
            search_cancel: None,
            last_move: None,
            draw_offer: None,
            started_at: None,
        }
    }

    /// Session with both seats filled, started immediately.
    pub fn started(
        code: String,
        mode: GameMode,
        black: SeatInit,
        white: SeatInit,
        settings: SessionSettings,
    ) -> (MatchSession, Vec<Followup>) {
        let mut session = MatchSession {
            code,
            mode,
            seats: [Seat::from_init(black), Seat::from_init(white)],
            engine: GameEngine::new(),
            state: SessionState::WaitingForOpponent,
            settings,
            epoch: 0,
            grace_epochs: [0; 2],
            search_cancel: None,
            last_move: None,
            draw_offer: None,
            started_at: None,
        };
        let followups = session.start();
        (session, followups)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn game(&self) -> GameState {
        self.engine.state()
    }

    /// Color seated on `conn`, if any.
    pub fn seat_of(&self, conn: ConnId) -> Option<Player> {
        Player::all().find(|&p| {
            self.seats[p.index()]
                .human()
                .and_then(|h| h.conn.as_ref())
                .is_some_and(|c| c.id == conn)
        })
    }

    /// Whether any human seat still has a live connection.
    pub fn has_connections(&self) -> bool {
        self.seats
            .iter()
            .any(|s| s.human().is_some_and(|h| h.conn.is_some()))
    }

    /// Second player takes the White seat and the game starts.
    #[instrument(skip(self, guest), fields(room = %self.code, player = %guest.identity.id))]
    pub fn join(&mut self, guest: Participant) -> Result<Vec<Followup>, SessionError> {
        let is_host = self.seats[0]
            .human()
            .is_some_and(|h| h.identity.id == guest.identity.id);
        if self.state != SessionState::WaitingForOpponent
            || !matches!(self.seats[1], Seat::Empty)
            || is_host
        {
            return Err(SessionError::RoomFull(self.code.clone()));
        }
        self.seats[1] = Seat::from_init(SeatInit::Human(guest));
        Ok(self.start())
    }

    fn start(&mut self) -> Vec<Followup> {
        self.state = SessionState::Active;
        self.started_at = Some(Instant::now());
        info!(room = %self.code, mode = %self.mode.label(), "game started");
        for color in Player::all() {
            self.send_game_ready(color);
        }
        self.schedule_turn()
    }

    fn send_game_ready(&self, color: Player) {
        let Some(conn) = self.conn(color) else {
            return;
        };
        let (opponent_name, opponent_rating) = match &self.seats[color.opponent().index()] {
            Seat::Human(h) => (h.identity.display_name.clone(), Some(h.rating.elo_rating)),
            Seat::Ai(difficulty) => (format!("Computer ({})", difficulty), None),
            Seat::Empty => (String::new(), None),
        };
        conn.send(ServerMessage::GameReady {
            room_id: self.code.clone(),
            color,
            opponent_name,
            opponent_rating,
            state: self.view(),
        });
    }

    fn conn(&self, color: Player) -> Option<&Connection> {
        self.seats[color.index()].human().and_then(|h| h.conn.as_ref())
    }

    fn send_to(&self, color: Player, msg: ServerMessage) {
        if let Some(conn) = self.conn(color) {
            conn.send(msg);
        }
    }

    fn broadcast(&self, msg: ServerMessage) {
        for color in Player::all() {
            self.send_to(color, msg.clone());
        }
    }

    fn view(&self) -> StateView {
        StateView::new(&self.engine.state(), self.last_move)
    }

    fn broadcast_state(&self) {
        self.broadcast(ServerMessage::StateUpdate(self.view()));
    }

    /// Invalidate every outstanding timer and search.
    fn bump_epoch(&mut self) {
        self.epoch += 1;
        if let Some(flag) = self.search_cancel.take() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    /// Work for whoever is to move now.
    fn schedule_turn(&mut self) -> Vec<Followup> {
        if self.state != SessionState::Active || self.engine.is_game_over() {
            return Vec::new();
        }
        match &self.seats[self.engine.current_player().index()] {
            Seat::Ai(difficulty) => {
                let cancel = Arc::new(AtomicBool::new(false));
                self.search_cancel = Some(cancel.clone());
                vec![Followup::Search {
                    epoch: self.epoch,
                    state: self.engine.state(),
                    difficulty: *difficulty,
                    cancel,
                }]
            }
            Seat::Human(_) => match self.settings.turn_timeout {
                Some(after) => vec![Followup::TurnDeadline {
                    epoch: self.epoch,
                    after,
                }],
                None => Vec::new(),
            },
            Seat::Empty => Vec::new(),
        }
    }

    fn seated(&self, conn: ConnId) -> Result<Player, SessionError> {
        self.seat_of(conn).ok_or(SessionError::NotSeated)
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Paused => Err(SessionError::Paused),
            _ => Err(SessionError::NotActive),
        }
    }

    /// Human move from `conn`.
    #[instrument(skip(self), fields(room = %self.code))]
    pub fn play(&mut self, conn: ConnId, pos: Pos) -> Result<Vec<Followup>, SessionError> {
        let color = self.seated(conn)?;
        self.ensure_active()?;
        self.apply_move(color, pos)
    }

    /// Result of an AI search issued at `epoch`. Stale results are dropped.
    #[instrument(skip(self), fields(room = %self.code))]
    pub fn apply_search(&mut self, epoch: u64, mv: Option<Pos>) -> Vec<Followup> {
        if epoch != self.epoch || self.state != SessionState::Active {
            debug!(epoch, current = self.epoch, "discarding stale search result");
            return Vec::new();
        }
        let color = self.engine.current_player();
        if !matches!(self.seats[color.index()], Seat::Ai(_)) {
            return Vec::new();
        }
        let Some(pos) = mv else {
            return Vec::new();
        };
        self.search_cancel = None;
        match self.apply_move(color, pos) {
            Ok(followups) => followups,
            Err(e) => {
                debug!(error = %e, "search produced a rejected move");
                Vec::new()
            }
        }
    }

    fn apply_move(&mut self, color: Player, pos: Pos) -> Result<Vec<Followup>, SessionError> {
        let result = self.engine.make_move(color, pos)?;
        self.bump_epoch();
        self.draw_offer = None;
        self.last_move = Some((result.pos, result.flipped));
        self.broadcast_state();
        if result.game_over {
            return Ok(self.finish(Ending::Played));
        }
        Ok(self.schedule_turn())
    }

    /// Take back the human's last move in a game against the computer.
    pub fn undo(&mut self, conn: ConnId) -> Result<Vec<Followup>, SessionError> {
        let color = self.seated(conn)?;
        if !matches!(self.mode, GameMode::Ai(_)) {
            return Err(SessionError::UndoUnavailable);
        }
        self.ensure_active()?;
        if self.engine.move_count(color) == 0 {
            return Err(SessionError::Game(othello_core::GameError::NothingToUndo));
        }
        // Unwind through the computer's reply to the human's own move.
        loop {
            let turn = self.engine.undo_last_move()?;
            if matches!(turn, Turn::Move { player, .. } if player == color)
                && self.engine.current_player() == color
            {
                break;
            }
        }
        self.bump_epoch();
        self.draw_offer = None;
        self.last_move = None;
        self.broadcast_state();
        Ok(self.schedule_turn())
    }

    #[instrument(skip(self), fields(room = %self.code))]
    pub fn resign(&mut self, conn: ConnId) -> Result<Vec<Followup>, SessionError> {
        let color = self.seated(conn)?;
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(SessionError::NotActive);
        }
        self.engine.resign(color)?;
        Ok(self.finish(Ending::Played))
    }

    pub fn offer_draw(&mut self, conn: ConnId) -> Result<(), SessionError> {
        let color = self.seated(conn)?;
        self.ensure_active()?;
        match &self.seats[color.opponent().index()] {
            // The computer plays on.
            Seat::Ai(_) => self.send_to(color, ServerMessage::DrawDeclined),
            _ => {
                self.draw_offer = Some(color);
                self.send_to(color.opponent(), ServerMessage::DrawOffered);
            }
        }
        Ok(())
    }

    pub fn respond_draw(
        &mut self,
        conn: ConnId,
        accept: bool,
    ) -> Result<Vec<Followup>, SessionError> {
        let color = self.seated(conn)?;
        self.ensure_active()?;
        if self.draw_offer != Some(color.opponent()) {
            return Err(SessionError::NoDrawOffer);
        }
        self.draw_offer = None;
        if accept {
            self.engine.agree_draw()?;
            Ok(self.finish(Ending::Played))
        } else {
            self.send_to(color.opponent(), ServerMessage::DrawDeclined);
            Ok(Vec::new())
        }
    }

    /// Relay a chat line to the other seat. Blank lines are dropped.
    pub fn chat(&self, conn: ConnId, message: &str) -> Result<(), SessionError> {
        let color = self.seated(conn)?;
        let text: String = message
            .trim()
            .chars()
            .take(self.settings.chat_max_len)
            .collect();
        if text.is_empty() {
            return Ok(());
        }
        let from = self.seats[color.index()]
            .human()
            .map(|h| h.identity.display_name.clone())
            .unwrap_or_default();
        self.send_to(color.opponent(), ServerMessage::Chat { from, message: text });
        Ok(())
    }

    /// The socket behind `conn` closed.
    #[instrument(skip(self), fields(room = %self.code))]
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<Followup> {
        let Some(color) = self.seat_of(conn) else {
            return Vec::new();
        };
        if let Some(h) = self.seats[color.index()].human_mut() {
            h.conn = None;
        }
        match self.state {
            SessionState::WaitingForOpponent => {
                info!("host left before anyone joined");
                self.state = SessionState::Abandoned;
                self.bump_epoch();
                vec![Followup::Close]
            }
            SessionState::Active | SessionState::Paused => {
                self.state = SessionState::Paused;
                self.bump_epoch();
                self.grace_epochs[color.index()] += 1;
                let grace = self.settings.grace;
                info!(seat = %color, grace_secs = grace.as_secs(), "player disconnected");
                self.send_to(
                    color.opponent(),
                    ServerMessage::OpponentDisconnected {
                        grace_secs: grace.as_secs(),
                    },
                );
                vec![Followup::Grace {
                    seat: color,
                    epoch: self.grace_epochs[color.index()],
                    after: grace,
                }]
            }
            SessionState::Completed | SessionState::Abandoned => {
                if self.has_connections() {
                    Vec::new()
                } else {
                    vec![Followup::Close]
                }
            }
        }
    }

    /// Bind a new connection to the seat held by `identity`.
    #[instrument(skip(self, identity, conn), fields(room = %self.code, player = %identity.id))]
    pub fn rejoin(
        &mut self,
        identity: &Identity,
        conn: Connection,
    ) -> Result<Vec<Followup>, SessionError> {
        let color = Player::all()
            .find(|&p| {
                self.seats[p.index()]
                    .human()
                    .is_some_and(|h| h.identity.id == identity.id)
            })
            .ok_or(SessionError::NotSeated)?;
        if self.state == SessionState::Abandoned {
            return Err(SessionError::NotActive);
        }
        if let Some(h) = self.seats[color.index()].human_mut() {
            h.conn = Some(conn);
        }
        self.grace_epochs[color.index()] += 1;
        self.send_game_ready(color);

        let mut followups = Vec::new();
        if self.state == SessionState::Paused && self.all_humans_connected() {
            info!(seat = %color, "player reconnected, resuming");
            self.state = SessionState::Active;
            self.bump_epoch();
            self.send_to(color.opponent(), ServerMessage::OpponentReconnected);
            followups = self.schedule_turn();
        } else if self.state == SessionState::Paused {
            self.send_to(color.opponent(), ServerMessage::OpponentReconnected);
        }
        if self.draw_offer == Some(color.opponent()) {
            self.send_to(color, ServerMessage::DrawOffered);
        }
        Ok(followups)
    }

    fn all_humans_connected(&self) -> bool {
        self.seats.iter().all(|s| match s {
            Seat::Human(h) => h.conn.is_some(),
            _ => true,
        })
    }

    /// Grace timer for `seat` fired.
    #[instrument(skip(self), fields(room = %self.code))]
    pub fn grace_expired(&mut self, seat: Player, epoch: u64) -> Vec<Followup> {
        let still_gone = self.seats[seat.index()]
            .human()
            .is_some_and(|h| h.conn.is_none());
        if self.state != SessionState::Paused
            || self.grace_epochs[seat.index()] != epoch
            || !still_gone
        {
            return Vec::new();
        }
        let kind = if is_early(&self.engine) {
            LeaveKind::Abandon
        } else {
            LeaveKind::Disconnect
        };
        info!(seat = %seat, ?kind, "grace window expired");
        let mut followups = self.finish(Ending::Left { leaver: seat, kind });
        if !self.has_connections() {
            followups.push(Followup::Close);
        }
        followups
    }

    /// Turn deadline issued at `epoch` fired; the side to move forfeits.
    #[instrument(skip(self), fields(room = %self.code))]
    pub fn turn_expired(&mut self, epoch: u64) -> Vec<Followup> {
        if epoch != self.epoch || self.state != SessionState::Active {
            return Vec::new();
        }
        let color = self.engine.current_player();
        if !matches!(self.seats[color.index()], Seat::Human(_)) {
            return Vec::new();
        }
        if self.engine.forfeit_on_time(color).is_err() {
            return Vec::new();
        }
        info!(seat = %color, "turn deadline expired");
        self.finish(Ending::Played)
    }

    /// Explicit exit from the room.
    ///
    /// Cancels a room nobody joined, abandons an early game, resigns a later
    /// one, and detaches from a finished one.
    #[instrument(skip(self), fields(room = %self.code))]
    pub fn leave(&mut self, conn: ConnId) -> Result<Vec<Followup>, SessionError> {
        let color = self.seated(conn)?;
        let mut followups = match self.state {
            SessionState::WaitingForOpponent => {
                self.state = SessionState::Abandoned;
                self.bump_epoch();
                Vec::new()
            }
            SessionState::Active | SessionState::Paused => {
                if is_early(&self.engine) {
                    self.finish(Ending::Left {
                        leaver: color,
                        kind: LeaveKind::Abandon,
                    })
                } else {
                    self.engine.resign(color)?;
                    self.finish(Ending::Played)
                }
            }
            SessionState::Completed | SessionState::Abandoned => Vec::new(),
        };
        if let Some(h) = self.seats[color.index()].human_mut() {
            h.conn = None;
            h.wants_rematch = false;
        }
        if !self.has_connections() || self.state == SessionState::Abandoned {
            followups.push(Followup::Close);
        }
        Ok(followups)
    }

    /// Ask for a rematch with colors swapped. Starts once every human
    /// seat has asked.
    pub fn request_rematch(&mut self, conn: ConnId) -> Result<Vec<Followup>, SessionError> {
        let color = self.seated(conn)?;
        if self.state != SessionState::Completed {
            return Err(SessionError::NotActive);
        }
        if let Some(h) = self.seats[color.index()].human_mut() {
            h.wants_rematch = true;
        }
        let ready = self.seats.iter().all(|s| match s {
            Seat::Human(h) => h.wants_rematch && h.conn.is_some(),
            Seat::Ai(_) => true,
            Seat::Empty => false,
        });
        if !ready {
            self.send_to(color.opponent(), ServerMessage::RematchRequested);
            return Ok(Vec::new());
        }

        let seat = |s: &Seat| match s {
            Seat::Human(h) => h.conn.clone().map(|conn| RematchSeat::Human {
                identity: h.identity.clone(),
                conn,
            }),
            Seat::Ai(d) => Some(RematchSeat::Ai(*d)),
            Seat::Empty => None,
        };
        let (Some(black), Some(white)) = (seat(&self.seats[0]), seat(&self.seats[1])) else {
            return Err(SessionError::NotSeated);
        };
        info!(room = %self.code, "rematch agreed");
        for s in self.seats.iter_mut() {
            if let Some(h) = s.human_mut() {
                h.conn = None;
            }
        }
        Ok(vec![
            Followup::Rematch {
                mode: self.mode,
                seats: [white, black],
            },
            Followup::Close,
        ])
    }

    fn duration(&self) -> u64 {
        self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    fn finish(&mut self, ending: Ending) -> Vec<Followup> {
        self.bump_epoch();
        self.draw_offer = None;
        let (winner, reason) = match ending {
            Ending::Played => {
                self.state = SessionState::Completed;
                let winner = self.engine.winner();
                let reason = self
                    .engine
                    .end_reason()
                    .map(finish_reason)
                    .unwrap_or(FinishReason::BoardExhausted);
                (winner, reason)
            }
            Ending::Left { leaver, kind } => {
                self.state = SessionState::Abandoned;
                match kind {
                    LeaveKind::Abandon => (None, FinishReason::Abandon),
                    LeaveKind::Disconnect => (
                        Some(Winner::from(leaver.opponent())),
                        FinishReason::Disconnect,
                    ),
                }
            }
        };
        info!(room = %self.code, ?winner, ?reason, "game over");

        let ranked = self.mode == GameMode::Ranked;
        let move_count = self.engine.moves_played();
        let duration = self.duration();
        let mut results = Vec::new();

        for color in Player::all() {
            let Some(seat) = self.seats[color.index()].human() else {
                continue;
            };
            let opponent_rating = self.seats[color.opponent().index()]
                .human()
                .map(|h| h.rating.elo_rating);

            let (outcome, event) = match ending {
                Ending::Played => {
                    let score = match winner {
                        Some(Winner::Draw) | None => GameScore::Draw,
                        Some(w) if w.player() == Some(color) => GameScore::Win,
                        Some(_) => GameScore::Loss,
                    };
                    let outcome = match score {
                        GameScore::Win => Outcome::Win,
                        GameScore::Draw => Outcome::Draw,
                        GameScore::Loss => Outcome::Loss,
                    };
                    let event = opponent_rating.map(|opponent_rating| RatingEvent::Completed {
                        score,
                        opponent_rating,
                    });
                    (outcome, event)
                }
                Ending::Left { leaver, kind } => match (kind, leaver == color) {
                    (LeaveKind::Abandon, true) => (Outcome::Abandoned, Some(RatingEvent::Abandon)),
                    (LeaveKind::Abandon, false) => (Outcome::Abandoned, None),
                    (LeaveKind::Disconnect, true) => (Outcome::Loss, Some(RatingEvent::Disconnect)),
                    (LeaveKind::Disconnect, false) => {
                        (Outcome::Win, Some(RatingEvent::OpponentForfeit))
                    }
                },
            };

            let change = match event {
                Some(event) if ranked => Some(self.settings.rating.apply(&seat.rating, event)),
                _ => None,
            };
            let elo_change = change.map_or(0, |c| c.delta);
            let new_elo = change.map_or(seat.rating.elo_rating, |c| c.record.elo_rating);

            if let Some(conn) = &seat.conn {
                conn.send(ServerMessage::GameOver {
                    winner,
                    reason,
                    outcome,
                    elo_change,
                    new_elo: ranked.then_some(new_elo),
                });
            }
            results.push(PlayerResult {
                player_id: seat.identity.id.clone(),
                record: GameResultRecord {
                    mode: self.mode.label(),
                    outcome,
                    elo_change,
                    new_elo,
                    duration,
                    move_count,
                },
                rating: change.map(|c| c.record),
            });
        }

        for color in Player::all() {
            if let Some(h) = self.seats[color.index()].human_mut() {
                if let Some(change) = results
                    .iter()
                    .find(|r| r.player_id == h.identity.id)
                    .and_then(|r| r.rating)
                {
                    h.rating = change;
                }
            }
        }

        vec![Followup::Finished(results)]
    }
}
