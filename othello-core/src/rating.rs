//! Elo rating updates.
//!
//! The service only computes new records from a supplied snapshot; loading
//! and storing records is up to the caller.

use serde::{Deserialize, Serialize};

/// Rating-update scale constant.
pub const K_FACTOR: f64 = 32.0;

/// Rating assigned to players without history.
pub const DEFAULT_RATING: i32 = 1200;

/// A player's rating and counters.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingRecord {
    pub elo_rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub abandons: u32,
    pub disconnects: u32,
}

impl RatingRecord {
    /// Fresh record at the given rating.
    pub fn with_rating(elo_rating: i32) -> RatingRecord {
        RatingRecord {
            elo_rating,
            wins: 0,
            losses: 0,
            draws: 0,
            current_streak: 0,
            longest_streak: 0,
            abandons: 0,
            disconnects: 0,
        }
    }

    pub fn games_played(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    fn record_win(&mut self) {
        self.wins += 1;
        self.current_streak += 1;
        self.longest_streak = self.longest_streak.max(self.current_streak);
    }

    fn record_loss(&mut self) {
        self.losses += 1;
        self.current_streak = 0;
    }
}

impl Default for RatingRecord {
    fn default() -> Self {
        RatingRecord::with_rating(DEFAULT_RATING)
    }
}

/// Score of a finished game from one player's perspective.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameScore {
    Win,
    Draw,
    Loss,
}

impl GameScore {
    /// Actual score used by the Elo formula.
    pub fn actual(self) -> f64 {
        match self {
            GameScore::Win => 1.0,
            GameScore::Draw => 0.5,
            GameScore::Loss => 0.0,
        }
    }

    pub fn inverse(self) -> GameScore {
        match self {
            GameScore::Win => GameScore::Loss,
            GameScore::Draw => GameScore::Draw,
            GameScore::Loss => GameScore::Win,
        }
    }
}

/// What happened to the player, as far as ratings are concerned.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum RatingEvent {
    /// A game played to the end (board, resignation, agreement or timeout).
    Completed { score: GameScore, opponent_rating: i32 },
    /// The player lost the connection mid-game and never came back.
    ///
    /// Scored as a loss against an opponent of the player's own rating, so
    /// the penalty does not depend on who the opponent was.
    Disconnect,
    /// The player quit a game before it really started. No rating effect.
    Abandon,
    /// The opponent disconnected for good. Counts as a win with no rating
    /// change.
    OpponentForfeit,
}

/// New record plus the rating delta that produced it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RatingChange {
    pub delta: i32,
    pub record: RatingRecord,
}

/// Probability that `player` beats `opponent`.
pub fn expected_score(player: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - player) as f64 / 400.0))
}

/// Elo rating service.
#[derive(Clone, Copy, Debug)]
pub struct RatingService {
    k_factor: f64,
}

impl RatingService {
    pub fn new(k_factor: f64) -> RatingService {
        RatingService { k_factor }
    }

    /// `round(K × (actual − expected))`, rounding half away from zero so
    /// the two sides of a game always cancel.
    pub fn delta(&self, player: i32, opponent: i32, score: GameScore) -> i32 {
        (self.k_factor * (score.actual() - expected_score(player, opponent))).round() as i32
    }

    /// Apply `event` to `record`.
    pub fn apply(&self, record: &RatingRecord, event: RatingEvent) -> RatingChange {
        let mut next = *record;
        let delta = match event {
            RatingEvent::Completed {
                score,
                opponent_rating,
            } => {
                match score {
                    GameScore::Win => next.record_win(),
                    GameScore::Loss => next.record_loss(),
                    GameScore::Draw => next.draws += 1,
                }
                self.delta(record.elo_rating, opponent_rating, score)
            }
            RatingEvent::Disconnect => {
                next.record_loss();
                next.disconnects += 1;
                self.delta(record.elo_rating, record.elo_rating, GameScore::Loss)
            }
            RatingEvent::Abandon => {
                next.abandons += 1;
                0
            }
            RatingEvent::OpponentForfeit => {
                next.record_win();
                0
            }
        };
        next.elo_rating += delta;
        RatingChange {
            delta,
            record: next,
        }
    }
}

impl Default for RatingService {
    fn default() -> Self {
        RatingService::new(K_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_score_equal_ratings() {
        assert!((expected_score(1500, 1500) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_expected_score_400_gap() {
        let e = expected_score(1600, 1200);
        assert!((e - 10.0 / 11.0).abs() < 1e-12);
    }

    #[test]
    fn test_win_against_equal() {
        let service = RatingService::default();
        let change = service.apply(
            &RatingRecord::with_rating(1200),
            RatingEvent::Completed {
                score: GameScore::Win,
                opponent_rating: 1200,
            },
        );
        assert_eq!(change.delta, 16);
        assert_eq!(change.record.elo_rating, 1216);
        assert_eq!(change.record.wins, 1);
        assert_eq!(change.record.current_streak, 1);
        assert_eq!(change.record.longest_streak, 1);
    }

    #[test]
    fn test_completed_game_is_zero_sum() {
        let service = RatingService::default();
        let pairs = [(1200, 1200), (1500, 1230), (987, 1811), (2000, 1999), (1350, 1650)];
        for (a, b) in pairs {
            for score in [GameScore::Win, GameScore::Draw, GameScore::Loss] {
                let da = service.delta(a, b, score);
                let db = service.delta(b, a, score.inverse());
                assert_eq!(da + db, 0, "{} vs {} {:?}", a, b, score);
            }
        }
    }

    #[test]
    fn test_draw_between_equals_is_zero() {
        let service = RatingService::default();
        for rating in [800, 1200, 1733, 2400] {
            let change = service.apply(
                &RatingRecord::with_rating(rating),
                RatingEvent::Completed {
                    score: GameScore::Draw,
                    opponent_rating: rating,
                },
            );
            assert_eq!(change.delta, 0);
            assert_eq!(change.record.draws, 1);
        }
    }

    #[test]
    fn test_disconnect_at_1200() {
        let service = RatingService::default();
        let mut record = RatingRecord::with_rating(1200);
        record.current_streak = 4;
        record.longest_streak = 6;
        let change = service.apply(&record, RatingEvent::Disconnect);
        assert_eq!(change.delta, -16);
        assert_eq!(change.record.elo_rating, 1184);
        assert_eq!(change.record.losses, 1);
        assert_eq!(change.record.disconnects, 1);
        assert_eq!(change.record.current_streak, 0);
        assert_eq!(change.record.longest_streak, 6);
    }

    #[test]
    fn test_disconnect_never_positive() {
        let service = RatingService::default();
        for rating in [100, 1200, 1999, 3000] {
            let change = service.apply(&RatingRecord::with_rating(rating), RatingEvent::Disconnect);
            assert!(change.delta <= 0);
        }
    }

    #[test]
    fn test_abandon_leaves_rating_and_streak() {
        let service = RatingService::default();
        let mut record = RatingRecord::with_rating(1337);
        record.current_streak = 3;
        let change = service.apply(&record, RatingEvent::Abandon);
        assert_eq!(change.delta, 0);
        assert_eq!(change.record.elo_rating, 1337);
        assert_eq!(change.record.abandons, 1);
        assert_eq!(change.record.current_streak, 3);
        assert_eq!(change.record.games_played(), 0);
    }

    #[test]
    fn test_draw_keeps_streak() {
        let service = RatingService::default();
        let mut record = RatingRecord::with_rating(1200);
        record.current_streak = 2;
        let change = service.apply(
            &record,
            RatingEvent::Completed {
                score: GameScore::Draw,
                opponent_rating: 1300,
            },
        );
        assert_eq!(change.record.current_streak, 2);
        assert!(change.delta > 0);
    }

    #[test]
    fn test_loss_resets_streak() {
        let service = RatingService::default();
        let mut record = RatingRecord::with_rating(1200);
        record.current_streak = 5;
        record.longest_streak = 5;
        let change = service.apply(
            &record,
            RatingEvent::Completed {
                score: GameScore::Loss,
                opponent_rating: 1200,
            },
        );
        assert_eq!(change.record.current_streak, 0);
        assert_eq!(change.record.longest_streak, 5);
        assert_eq!(change.delta, -16);
    }

    #[test]
    fn test_opponent_forfeit_counts_win_without_delta() {
        let service = RatingService::default();
        let change = service.apply(&RatingRecord::with_rating(1400), RatingEvent::OpponentForfeit);
        assert_eq!(change.delta, 0);
        assert_eq!(change.record.wins, 1);
        assert_eq!(change.record.current_streak, 1);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let json = serde_json::to_value(RatingRecord::default()).unwrap();
        assert_eq!(json["eloRating"], 1200);
        assert_eq!(json["longestStreak"], 0);
    }
}
