use std::path::{Path, PathBuf};
use std::time::Duration;

use othello_ai::SearchConfig;
use othello_core::rating::DEFAULT_RATING;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "OTHELLO_CONFIG";

/// Config file used when the environment variable is unset.
pub const DEFAULT_CONFIG_PATH: &str = "othello.toml";

/// Ranked queue tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Rating gap accepted immediately.
    pub initial_band: u32,
    /// How much the accepted gap grows per second of waiting.
    pub band_growth_per_sec: u32,
    /// Upper bound on the accepted gap.
    pub max_band: u32,
    /// Interval of the background pairing sweep.
    pub sweep_millis: u64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        MatchmakingConfig {
            initial_band: 100,
            band_growth_per_sec: 10,
            max_band: 600,
            sweep_millis: 1_000,
        }
    }
}

impl MatchmakingConfig {
    /// Accepted rating gap after waiting `waited`.
    pub fn band_after(&self, waited: Duration) -> u32 {
        let growth = self
            .band_growth_per_sec
            .saturating_mul(waited.as_secs().min(u32::MAX as u64) as u32);
        self.initial_band.saturating_add(growth).min(self.max_band)
    }
}

/// Server configuration, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// SQLite file for ratings and results. Empty keeps everything in memory.
    pub database_path: String,
    /// Reconnect window after a connection drops.
    pub grace_secs: u64,
    /// Per-turn limit for human seats. 0 disables it.
    pub turn_timeout_secs: u64,
    pub chat_max_len: usize,
    pub default_rating: i32,
    pub search: SearchConfig,
    pub matchmaking: MatchmakingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:8000".to_string(),
            database_path: "data/othello.db".to_string(),
            grace_secs: 30,
            turn_timeout_secs: 120,
            chat_max_len: 280,
            default_rating: DEFAULT_RATING,
            search: SearchConfig::default(),
            matchmaking: MatchmakingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: ServerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Path from `OTHELLO_CONFIG`, or `othello.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Validation("bind_addr must not be empty".into()));
        }
        if self.grace_secs == 0 {
            return Err(ConfigError::Validation("grace_secs must be > 0".into()));
        }
        if self.chat_max_len == 0 {
            return Err(ConfigError::Validation("chat_max_len must be > 0".into()));
        }
        if self.default_rating <= 0 {
            return Err(ConfigError::Validation("default_rating must be > 0".into()));
        }
        if self.search.max_nodes == 0 {
            return Err(ConfigError::Validation("search.max_nodes must be > 0".into()));
        }
        if self.search.max_millis == 0 {
            return Err(ConfigError::Validation("search.max_millis must be > 0".into()));
        }
        if self.search.endgame_empties > 20 {
            return Err(ConfigError::Validation(
                "search.endgame_empties must be <= 20".into(),
            ));
        }
        if self.matchmaking.max_band < self.matchmaking.initial_band {
            return Err(ConfigError::Validation(
                "matchmaking.max_band must be >= matchmaking.initial_band".into(),
            ));
        }
        if self.matchmaking.sweep_millis == 0 {
            return Err(ConfigError::Validation(
                "matchmaking.sweep_millis must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    /// None when turn deadlines are disabled.
    pub fn turn_timeout(&self) -> Option<Duration> {
        (self.turn_timeout_secs > 0).then(|| Duration::from_secs(self.turn_timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.matchmaking.sweep_millis)
    }
}
