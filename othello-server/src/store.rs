//! Ratings and game results.
//!
//! The server reads a rating snapshot when a session starts and writes one
//! result row per human participant when it ends. Profiles and history
//! queries live elsewhere.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use othello_core::RatingRecord;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::session::{GameResultRecord, PlayerResult};

/// Persistence collaborator.
pub trait Store: Send + Sync {
    /// Current rating record, or None for a player with no history.
    fn rating(&self, player_id: &str) -> Result<Option<RatingRecord>, StoreError>;

    /// Record one participant's result and, if present, their new rating.
    fn save_result(&self, result: &PlayerResult) -> Result<(), StoreError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS ratings (
        player_id TEXT PRIMARY KEY,
        elo_rating INTEGER NOT NULL,
        wins INTEGER NOT NULL,
        losses INTEGER NOT NULL,
        draws INTEGER NOT NULL,
        current_streak INTEGER NOT NULL,
        longest_streak INTEGER NOT NULL,
        abandons INTEGER NOT NULL,
        disconnects INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        player_id TEXT NOT NULL,
        mode TEXT NOT NULL,
        outcome TEXT NOT NULL,
        elo_change INTEGER NOT NULL,
        new_elo INTEGER NOT NULL,
        duration_secs INTEGER NOT NULL,
        move_count INTEGER NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE INDEX IF NOT EXISTS results_player ON results (player_id);
";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and create if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Results recorded for `player_id`, oldest first.
    pub fn results_for(&self, player_id: &str) -> Result<Vec<GameResultRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT mode, outcome, elo_change, new_elo, duration_secs, move_count
             FROM results WHERE player_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([player_id], |row| {
            let outcome: String = row.get(1)?;
            Ok((
                row.get::<_, String>(0)?,
                outcome,
                row.get::<_, i32>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, u32>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (mode, outcome, elo_change, new_elo, duration, move_count) = row?;
            let Ok(outcome) = serde_json::from_value(serde_json::Value::String(outcome)) else {
                continue;
            };
            out.push(GameResultRecord {
                mode,
                outcome,
                elo_change,
                new_elo,
                duration: duration.max(0) as u64,
                move_count,
            });
        }
        Ok(out)
    }
}

impl Store for SqliteStore {
    fn rating(&self, player_id: &str) -> Result<Option<RatingRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT elo_rating, wins, losses, draws, current_streak, longest_streak,
                        abandons, disconnects
                 FROM ratings WHERE player_id = ?1",
                [player_id],
                |row| {
                    Ok(RatingRecord {
                        elo_rating: row.get(0)?,
                        wins: row.get(1)?,
                        losses: row.get(2)?,
                        draws: row.get(3)?,
                        current_streak: row.get(4)?,
                        longest_streak: row.get(5)?,
                        abandons: row.get(6)?,
                        disconnects: row.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn save_result(&self, result: &PlayerResult) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let r = &result.record;
        tx.execute(
            "INSERT INTO results (player_id, mode, outcome, elo_change, new_elo, duration_secs, move_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                result.player_id,
                r.mode,
                r.outcome.as_str(),
                r.elo_change,
                r.new_elo,
                r.duration as i64,
                r.move_count,
            ],
        )?;
        if let Some(rating) = &result.rating {
            tx.execute(
                "INSERT INTO ratings (player_id, elo_rating, wins, losses, draws, current_streak,
                                      longest_streak, abandons, disconnects)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(player_id) DO UPDATE SET
                    elo_rating = excluded.elo_rating,
                    wins = excluded.wins,
                    losses = excluded.losses,
                    draws = excluded.draws,
                    current_streak = excluded.current_streak,
                    longest_streak = excluded.longest_streak,
                    abandons = excluded.abandons,
                    disconnects = excluded.disconnects",
                params![
                    result.player_id,
                    rating.elo_rating,
                    rating.wins,
                    rating.losses,
                    rating.draws,
                    rating.current_streak,
                    rating.longest_streak,
                    rating.abandons,
                    rating.disconnects,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    ratings: Mutex<HashMap<String, RatingRecord>>,
    results: Mutex<Vec<PlayerResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a rating.
    pub fn set_rating(&self, player_id: &str, record: RatingRecord) {
        if let Ok(mut ratings) = self.ratings.lock() {
            ratings.insert(player_id.to_string(), record);
        }
    }

    /// Every result saved so far.
    pub fn results(&self) -> Vec<PlayerResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Store for MemoryStore {
    fn rating(&self, player_id: &str) -> Result<Option<RatingRecord>, StoreError> {
        let ratings = self.ratings.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(ratings.get(player_id).copied())
    }

    fn save_result(&self, result: &PlayerResult) -> Result<(), StoreError> {
        if let Some(rating) = result.rating {
            self.ratings
                .lock()
                .map_err(|_| StoreError::Poisoned)?
                .insert(result.player_id.clone(), rating);
        }
        self.results
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(result.clone());
        Ok(())
    }
}
