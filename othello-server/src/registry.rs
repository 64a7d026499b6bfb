//! Live rooms, connection and player bindings, and the ranked queue.
//!
//! Each map has its own lock and none of them is held while a session is
//! locked, so registry calls never wait on game work.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use rand::Rng;
use tracing::{debug, info};

use crate::config::MatchmakingConfig;
use crate::session::{ConnId, Identity, MatchSession, Participant};

/// A session behind its own lock.
pub type SharedSession = Arc<Mutex<MatchSession>>;

/// Room code alphabet without look-alike characters (0/O, 1/I/L).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
pub const CODE_LEN: usize = 6;

/// Lock a mutex, recovering the data if a holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Random room code.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Codes are case-insensitive on input.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// A player waiting for a ranked opponent.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub participant: Participant,
    pub joined_at: Instant,
}

impl QueueEntry {
    fn elo(&self) -> i32 {
        self.participant.rating.elo_rating
    }
}

/// Ranked queue keyed by rating, then by join order.
#[derive(Debug, Default)]
pub struct RankedQueue {
    by_rating: BTreeMap<(i32, u64), QueueEntry>,
    players: HashMap<String, (i32, u64)>,
    conns: HashMap<ConnId, String>,
    next_seq: u64,
}

impl RankedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_rating.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rating.is_empty()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    /// Add `entry`. A player already queued keeps their place and gets the
    /// new connection.
    pub fn push(&mut self, entry: QueueEntry) {
        let id = entry.participant.identity.id.clone();
        let previous = self.take_player(&id);
        let (seq, entry) = match previous {
            Some((seq, old)) => (
                seq,
                QueueEntry {
                    participant: entry.participant,
                    joined_at: old.joined_at,
                },
            ),
            None => {
                self.next_seq += 1;
                (self.next_seq, entry)
            }
        };
        let key = (entry.elo(), seq);
        self.conns.insert(entry.participant.conn.id, id.clone());
        self.players.insert(id, key);
        self.by_rating.insert(key, entry);
    }

    /// Remove the entry bound to `conn`.
    pub fn remove_conn(&mut self, conn: ConnId) -> bool {
        match self.conns.get(&conn).cloned() {
            Some(id) => self.take_player(&id).is_some(),
            None => false,
        }
    }

    fn take_player(&mut self, player_id: &str) -> Option<(u64, QueueEntry)> {
        let key = self.players.remove(player_id)?;
        let entry = self.by_rating.remove(&key)?;
        self.conns.remove(&entry.participant.conn.id);
        Some((key.1, entry))
    }

    fn take(&mut self, key: (i32, u64)) -> Option<QueueEntry> {
        let entry = self.by_rating.remove(&key)?;
        self.players.remove(&entry.participant.identity.id);
        self.conns.remove(&entry.participant.conn.id);
        Some(entry)
    }

    /// Closest-rated neighbour of `key` within `band`; equal gaps go to the
    /// earlier joiner.
    fn closest(&self, key: (i32, u64), band: i64) -> Option<(i32, u64)> {
        // Earliest joiner at the nearest rating below.
        let below = self
            .by_rating
            .range(..key)
            .next_back()
            .and_then(|(&(elo, _), _)| self.by_rating.range((elo, 0)..).next())
            .map(|(&k, _)| k);
        let above = self
            .by_rating
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(&k, _)| k);

        [below, above]
            .into_iter()
            .flatten()
            .map(|k| ((i64::from(key.0) - i64::from(k.0)).abs(), k))
            .filter(|&(gap, _)| gap <= band)
            .min_by_key(|&(gap, (_, seq))| (gap, seq))
            .map(|(_, k)| k)
    }

    /// Pair everyone who can be paired at `now`.
    ///
    /// Oldest entries pick first. Each takes the closest-rated partner within
    /// its band (which widens with its wait); ties go to the earlier joiner.
    /// Pairs come back as (older, newer).
    pub fn pair(&mut self, now: Instant, config: &MatchmakingConfig) -> Vec<(QueueEntry, QueueEntry)> {
        let mut by_age: Vec<(i32, u64)> = self.by_rating.keys().copied().collect();
        by_age.sort_unstable_by_key(|&(_, seq)| seq);

        let mut out = Vec::new();
        for key in by_age {
            let Some(me) = self.by_rating.get(&key) else {
                continue;
            };
            let band = config.band_after(now.saturating_duration_since(me.joined_at)) as i64;
            let Some(partner) = self.closest(key, band) else {
                continue;
            };
            if let (Some(a), Some(b)) = (self.take(key), self.take(partner)) {
                out.push((a, b));
            }
        }
        out
    }
}

/// Owner of every live session.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, SharedSession>>,
    bindings: Mutex<HashMap<ConnId, String>>,
    /// Player id to the room they last took a seat in.
    seats: Mutex<HashMap<String, String>>,
    queue: Mutex<RankedQueue>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session built by `build` under a fresh code.
    ///
    /// `build` runs under the room map lock and must not block.
    pub fn create<F, T>(&self, build: F) -> (String, SharedSession, T)
    where
        F: FnOnce(String) -> (MatchSession, T),
    {
        let mut rng = rand::rng();
        let mut rooms = lock(&self.rooms);
        let code = loop {
            let code = generate_code(&mut rng);
            if !rooms.contains_key(&code) {
                break code;
            }
            debug!(room = %code, "room code collision");
        };
        let (session, extra) = build(code.clone());
        let session = Arc::new(Mutex::new(session));
        rooms.insert(code.clone(), session.clone());
        info!(room = %code, rooms = rooms.len(), "room created");
        (code, session, extra)
    }

    pub fn get(&self, code: &str) -> Option<SharedSession> {
        lock(&self.rooms).get(&normalize_code(code)).cloned()
    }

    /// Drop a room and every connection bound to it.
    pub fn remove(&self, code: &str) {
        if lock(&self.rooms).remove(code).is_some() {
            info!(room = %code, "room closed");
        }
        lock(&self.bindings).retain(|_, bound| bound != code);
        lock(&self.seats).retain(|_, seated| seated != code);
    }

    pub fn room_count(&self) -> usize {
        lock(&self.rooms).len()
    }

    pub fn bind(&self, conn: ConnId, code: &str) {
        lock(&self.bindings).insert(conn, code.to_string());
    }

    pub fn unbind(&self, conn: ConnId) -> Option<String> {
        lock(&self.bindings).remove(&conn)
    }

    /// Room code `conn` is playing in.
    pub fn room_of(&self, conn: ConnId) -> Option<String> {
        lock(&self.bindings).get(&conn).cloned()
    }

    /// Record that `player_id` holds a seat in `code`.
    pub fn seat(&self, player_id: &str, code: &str) {
        lock(&self.seats).insert(player_id.to_string(), code.to_string());
    }

    /// Room `player_id` last took a seat in, which may since have finished.
    pub fn seated_room(&self, player_id: &str) -> Option<String> {
        lock(&self.seats).get(player_id).cloned()
    }

    /// Queue a player and return any pairings this made possible.
    pub fn enqueue(
        &self,
        participant: Participant,
        now: Instant,
        config: &MatchmakingConfig,
    ) -> Vec<(QueueEntry, QueueEntry)> {
        let mut queue = lock(&self.queue);
        queue.push(QueueEntry {
            participant,
            joined_at: now,
        });
        queue.pair(now, config)
    }

    /// Periodic pairing pass.
    pub fn sweep(&self, now: Instant, config: &MatchmakingConfig) -> Vec<(QueueEntry, QueueEntry)> {
        lock(&self.queue).pair(now, config)
    }

    pub fn dequeue(&self, conn: ConnId) -> bool {
        lock(&self.queue).remove_conn(conn)
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Whether `identity` is already waiting in the ranked queue.
    pub fn is_queued(&self, identity: &Identity) -> bool {
        lock(&self.queue).contains(&identity.id)
    }
}
