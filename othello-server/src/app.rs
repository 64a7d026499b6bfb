//! Shared server state and the glue between client intents, sessions and
//! the async runtime.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use othello_ai::{Difficulty, SearchEngine};
use othello_core::{Pos, RatingRecord, RatingService};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{lock, normalize_code, QueueEntry, RoomRegistry, SharedSession};
use crate::session::{
    ConnId, Connection, Followup, GameMode, Identity, MatchSession, Participant, RematchSeat,
    SeatInit, SessionSettings,
};
use crate::store::Store;

/// State shared by every connection.
pub struct AppState {
    pub config: ServerConfig,
    pub registry: RoomRegistry,
    pub store: Arc<dyn Store>,
    pub rating: RatingService,
    next_conn: AtomicU64,
    connections: AtomicUsize,
}

pub type SharedState = Arc<AppState>;

/// One connected client.
#[derive(Debug, Clone)]
pub struct Client {
    pub identity: Identity,
    pub conn: Connection,
}

impl Client {
    fn send(&self, msg: ServerMessage) {
        self.conn.send(msg);
    }

    fn error(&self, err: SessionError) {
        self.send(ServerMessage::Error {
            message: err.to_string(),
        });
    }
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<dyn Store>) -> SharedState {
        Arc::new(AppState {
            config,
            registry: RoomRegistry::new(),
            store,
            rating: RatingService::default(),
            next_conn: AtomicU64::new(1),
            connections: AtomicUsize::new(0),
        })
    }

    pub fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            grace: self.config.grace(),
            turn_timeout: self.config.turn_timeout(),
            chat_max_len: self.config.chat_max_len,
            rating: self.rating,
        }
    }

    /// Rating snapshot for `player_id`; defaults when unknown or unreadable.
    pub fn rating_snapshot(&self, player_id: &str) -> RatingRecord {
        match self.store.rating(player_id) {
            Ok(Some(record)) => record,
            Ok(None) => RatingRecord::with_rating(self.config.default_rating),
            Err(e) => {
                warn!(player = %player_id, error = %e, "rating lookup failed, using default");
                RatingRecord::with_rating(self.config.default_rating)
            }
        }
    }

    fn participant(&self, client: &Client) -> Participant {
        Participant {
            identity: client.identity.clone(),
            rating: self.rating_snapshot(&client.identity.id),
            conn: client.conn.clone(),
        }
    }
}

/// Start the work a session asked for. Must run inside a tokio runtime.
pub fn dispatch(state: &SharedState, code: &str, followups: Vec<Followup>) {
    for followup in followups {
        match followup {
            Followup::Grace { seat, epoch, after } => {
                let state = state.clone();
                let code = code.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let Some(session) = state.registry.get(&code) else {
                        return;
                    };
                    let next = lock(&session).grace_expired(seat, epoch);
                    dispatch(&state, &code, next);
                });
            }
            Followup::TurnDeadline { epoch, after } => {
                let state = state.clone();
                let code = code.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let Some(session) = state.registry.get(&code) else {
                        return;
                    };
                    let next = lock(&session).turn_expired(epoch);
                    dispatch(&state, &code, next);
                });
            }
            Followup::Search {
                epoch,
                state: snapshot,
                difficulty,
                cancel,
            } => {
                let state = state.clone();
                let code = code.to_string();
                let config = state.config.search;
                tokio::spawn(async move {
                    let searched = tokio::task::spawn_blocking(move || {
                        let mut engine = SearchEngine::new(config).with_cancel_flag(cancel);
                        engine.best_move(&snapshot, difficulty, &mut rand::rng())
                    })
                    .await;
                    let mv = match searched {
                        Ok(mv) => mv,
                        Err(e) => {
                            warn!(room = %code, error = %e, "search task failed");
                            return;
                        }
                    };
                    let Some(session) = state.registry.get(&code) else {
                        return;
                    };
                    let next = lock(&session).apply_search(epoch, mv);
                    dispatch(&state, &code, next);
                });
            }
            Followup::Finished(results) => {
                for result in &results {
                    if let Err(e) = state.store.save_result(result) {
                        warn!(room = %code, player = %result.player_id, error = %e, "failed to save result");
                    }
                }
            }
            Followup::Rematch { mode, seats } => start_rematch(state, mode, seats),
            Followup::Close => state.registry.remove(code),
        }
    }
}

fn start_rematch(state: &SharedState, mode: GameMode, seats: [RematchSeat; 2]) {
    let [black, white] = seats.map(|seat| match seat {
        RematchSeat::Human { identity, conn } => SeatInit::Human(Participant {
            rating: state.rating_snapshot(&identity.id),
            identity,
            conn,
        }),
        RematchSeat::Ai(difficulty) => SeatInit::Ai(difficulty),
    });
    start_session(state, mode, black, white);
}

/// Create a started session, bind its human connections, and kick it off.
fn start_session(state: &SharedState, mode: GameMode, black: SeatInit, white: SeatInit) -> String {
    let humans: Vec<(ConnId, String)> = [&black, &white]
        .into_iter()
        .filter_map(|s| match s {
            SeatInit::Human(p) => Some((p.conn.id, p.identity.id.clone())),
            SeatInit::Ai(_) => None,
        })
        .collect();
    let settings = state.settings();
    // Bind before the session announces itself so a fast first move finds it.
    let (code, _session, followups) = state.registry.create(|code| {
        for (conn, player_id) in &humans {
            state.registry.bind(*conn, &code);
            state.registry.seat(player_id, &code);
        }
        MatchSession::started(code, mode, black, white, settings)
    });
    dispatch(state, &code, followups);
    code
}

fn start_ranked(state: &SharedState, pairs: Vec<(QueueEntry, QueueEntry)>) {
    for (a, b) in pairs {
        info!(
            black = %a.participant.identity.id,
            white = %b.participant.identity.id,
            gap = (a.participant.rating.elo_rating - b.participant.rating.elo_rating).abs(),
            "ranked pairing"
        );
        start_session(
            state,
            GameMode::Ranked,
            SeatInit::Human(a.participant),
            SeatInit::Human(b.participant),
        );
    }
}

/// Run one matchmaking sweep.
pub fn sweep_queue(state: &SharedState) {
    let pairs = state
        .registry
        .sweep(Instant::now(), &state.config.matchmaking);
    start_ranked(state, pairs);
}

/// Background task pairing ranked players whose bands widened.
pub fn spawn_matchmaker(state: SharedState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.sweep_interval());
        loop {
            interval.tick().await;
            sweep_queue(&state);
        }
    })
}

/// Session the client is currently bound to.
fn current_session(state: &SharedState, client: &Client) -> Result<(String, SharedSession), SessionError> {
    let code = state
        .registry
        .room_of(client.conn.id)
        .ok_or(SessionError::NotInRoom)?;
    let session = state
        .registry
        .get(&code)
        .ok_or_else(|| SessionError::RoomNotFound(code.clone()))?;
    Ok((code, session))
}

/// Room the player still holds a seat in, on any connection.
fn live_seat(state: &SharedState, identity: &Identity) -> Option<String> {
    let code = state.registry.seated_room(&identity.id)?;
    let session = state.registry.get(&code)?;
    let live = !lock(&session).state().is_over();
    live.then_some(code)
}

/// Clear the way for a new room: not queued, no live seat anywhere, and this
/// connection detached from any finished room.
fn release_finished_room(state: &SharedState, client: &Client) -> Result<(), SessionError> {
    if state.registry.is_queued(&client.identity) {
        return Err(SessionError::AlreadyInRoom);
    }
    release_bound_room(state, client)?;
    if live_seat(state, &client.identity).is_some() {
        return Err(SessionError::AlreadyInRoom);
    }
    Ok(())
}

/// Detach the connection from its room if that room is finished; refuse if
/// it is still live.
fn release_bound_room(state: &SharedState, client: &Client) -> Result<(), SessionError> {
    let Ok((code, session)) = current_session(state, client) else {
        state.registry.unbind(client.conn.id);
        return Ok(());
    };
    let followups = {
        let mut session = lock(&session);
        if !session.state().is_over() {
            return Err(SessionError::AlreadyInRoom);
        }
        session.leave(client.conn.id).unwrap_or_default()
    };
    state.registry.unbind(client.conn.id);
    dispatch(state, &code, followups);
    Ok(())
}

/// Run `op` against the client's session and dispatch what it returns.
fn with_session<F>(state: &SharedState, client: &Client, op: F) -> Result<(), SessionError>
where
    F: FnOnce(&mut MatchSession) -> Result<Vec<Followup>, SessionError>,
{
    let (code, session) = current_session(state, client)?;
    let followups = op(&mut lock(&session))?;
    dispatch(state, &code, followups);
    Ok(())
}

fn rename(client: &mut Client, player_name: &str) {
    let name = player_name.trim();
    if !name.is_empty() {
        client.identity.display_name = name.chars().take(32).collect();
    }
}

/// Handle one client intent.
pub fn handle_message(state: &SharedState, client: &mut Client, msg: ClientMessage) {
    debug!(player = %client.identity.id, ?msg, "client message");
    let outcome = match msg {
        ClientMessage::CreateRoom {
            player_name,
            difficulty,
        } => {
            rename(client, &player_name);
            create_room(state, client, difficulty)
        }
        ClientMessage::JoinRoom {
            room_id,
            player_name,
        } => {
            rename(client, &player_name);
            join_room(state, client, &room_id)
        }
        ClientMessage::QueueRanked { player_name } => {
            rename(client, &player_name);
            queue_ranked(state, client)
        }
        ClientMessage::LeaveQueue => {
            state.registry.dequeue(client.conn.id);
            Ok(())
        }
        ClientMessage::Move { row, col } => {
            let pos = u8::try_from(row)
                .ok()
                .zip(u8::try_from(col).ok())
                .and_then(|(r, c)| Pos::try_from_row_col(r, c));
            let reason = match pos {
                Some(pos) => with_session(state, client, |s| s.play(client.conn.id, pos))
                    .err()
                    .map(|e| e.to_string()),
                None => Some(format!("({}, {}) is off the board", row, col)),
            };
            if let Some(reason) = reason {
                client.send(ServerMessage::MoveRejected { reason });
            }
            Ok(())
        }
        ClientMessage::Undo => with_session(state, client, |s| s.undo(client.conn.id)),
        ClientMessage::Resign => with_session(state, client, |s| s.resign(client.conn.id)),
        ClientMessage::DrawOffer => with_session(state, client, |s| {
            s.offer_draw(client.conn.id).map(|()| Vec::new())
        }),
        ClientMessage::DrawResponse { accept } => with_session(state, client, |s| {
            s.respond_draw(client.conn.id, accept)
        }),
        ClientMessage::Chat { message } => with_session(state, client, |s| {
            s.chat(client.conn.id, &message).map(|()| Vec::new())
        }),
        ClientMessage::Rejoin { room_id } => rejoin(state, client, &room_id),
        ClientMessage::LeaveRoom => {
            let result = with_session(state, client, |s| s.leave(client.conn.id));
            state.registry.unbind(client.conn.id);
            result
        }
        ClientMessage::Rematch => {
            with_session(state, client, |s| s.request_rematch(client.conn.id))
        }
        ClientMessage::Ping => {
            client.send(ServerMessage::Pong);
            Ok(())
        }
    };
    if let Err(e) = outcome {
        client.error(e);
    }
}

fn create_room(
    state: &SharedState,
    client: &Client,
    difficulty: Option<Difficulty>,
) -> Result<(), SessionError> {
    release_finished_room(state, client)?;
    let participant = state.participant(client);
    match difficulty {
        Some(difficulty) => {
            let mode = GameMode::Ai(difficulty);
            let settings = state.settings();
            let (code, _session, followups) = state.registry.create(|code| {
                state.registry.bind(client.conn.id, &code);
                state.registry.seat(&client.identity.id, &code);
                client.send(ServerMessage::RoomCreated {
                    room_id: code.clone(),
                });
                MatchSession::started(
                    code,
                    mode,
                    SeatInit::Human(participant),
                    SeatInit::Ai(difficulty),
                    settings,
                )
            });
            dispatch(state, &code, followups);
        }
        None => {
            let settings = state.settings();
            let (code, _session, ()) = state
                .registry
                .create(|code| (MatchSession::waiting(code, participant, settings), ()));
            state.registry.bind(client.conn.id, &code);
            state.registry.seat(&client.identity.id, &code);
            client.send(ServerMessage::RoomCreated { room_id: code });
        }
    }
    Ok(())
}

fn join_room(state: &SharedState, client: &Client, room_id: &str) -> Result<(), SessionError> {
    release_finished_room(state, client)?;
    let code = normalize_code(room_id);
    let Some(session) = state.registry.get(&code) else {
        client.send(ServerMessage::RoomNotFound { room_id: code });
        return Ok(());
    };
    let participant = state.participant(client);
    state.registry.bind(client.conn.id, &code);
    let joined = lock(&session).join(participant);
    match joined {
        Ok(followups) => {
            state.registry.seat(&client.identity.id, &code);
            dispatch(state, &code, followups);
            Ok(())
        }
        Err(e) => {
            state.registry.unbind(client.conn.id);
            match e {
                SessionError::RoomFull(code) => {
                    client.send(ServerMessage::RoomFull { room_id: code });
                    Ok(())
                }
                e => Err(e),
            }
        }
    }
}

fn queue_ranked(state: &SharedState, client: &Client) -> Result<(), SessionError> {
    release_bound_room(state, client)?;
    if live_seat(state, &client.identity).is_some() {
        return Err(SessionError::AlreadyInRoom);
    }
    let participant = state.participant(client);
    client.send(ServerMessage::Queued);
    let pairs = state
        .registry
        .enqueue(participant, Instant::now(), &state.config.matchmaking);
    start_ranked(state, pairs);
    Ok(())
}

fn rejoin(state: &SharedState, client: &Client, room_id: &str) -> Result<(), SessionError> {
    let code = normalize_code(room_id);
    let already_bound = state.registry.room_of(client.conn.id).as_deref() == Some(code.as_str());
    if !already_bound {
        release_bound_room(state, client)?;
    }
    let Some(session) = state.registry.get(&code) else {
        client.send(ServerMessage::RoomNotFound { room_id: code });
        return Ok(());
    };
    state.registry.bind(client.conn.id, &code);
    let rejoined = lock(&session).rejoin(&client.identity, client.conn.clone());
    match rejoined {
        Ok(followups) => {
            dispatch(state, &code, followups);
            Ok(())
        }
        Err(e) => {
            if !already_bound {
                state.registry.unbind(client.conn.id);
            }
            Err(e)
        }
    }
}

/// Register a new connection.
pub fn connect(state: &SharedState, identity: Identity, conn: Connection) -> Client {
    let count = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    info!(player = %identity.id, conn = conn.id, connections = count, "client connected");
    Client { identity, conn }
}

/// The client's socket closed.
pub fn disconnect(state: &SharedState, client: &Client) {
    state.connections.fetch_sub(1, Ordering::Relaxed);
    state.registry.dequeue(client.conn.id);
    if let Some(code) = state.registry.unbind(client.conn.id) {
        if let Some(session) = state.registry.get(&code) {
            let followups = lock(&session).disconnect(client.conn.id);
            dispatch(state, &code, followups);
        }
    }
    info!(player = %client.identity.id, conn = client.conn.id, "client disconnected");
}
