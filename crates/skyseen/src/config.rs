//! Configuration management for skyseen.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;

use chrono::NaiveDate;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "skyseen";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "seen.db";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SKYSEEN_`, sections split on `__`)
/// 2. TOML config file at `~/.config/skyseen/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seen store configuration.
    pub storage: StorageConfig,
    /// Firehose stream configuration.
    pub stream: StreamConfig,
    /// Session reconstruction configuration.
    pub session: SessionConfig,
    /// Evaluation configuration.
    pub evaluation: EvaluationConfig,
}

/// Seen store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/skyseen/seen.db`
    pub database_path: Option<PathBuf>,
    /// Number of simulation runs to retain.
    /// Set to 0 for unlimited.
    pub max_runs: usize,
}

/// Firehose stream configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Records per batch file written by the reorder stage.
    pub batch_size: usize,
    /// Exclusive end date; records at or after midnight UTC of this day are ignored.
    pub end_date: Option<NaiveDate>,
    /// Drop byte-identical raw lines during reordering.
    pub dedup: bool,
    /// Capacity of the channel between the batch reader and the simulator.
    pub channel_capacity: usize,
}

/// Session reconstruction configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle gap after which a user's next record starts a new session.
    pub idle_threshold_secs: u64,
    /// Posts shown per feed refresh.
    pub refresh_size: usize,
    /// Most recent posts taken from each timeline when building a feed.
    pub max_posts_per_user: usize,
    /// Refreshes a user is assumed to scroll through in one session.
    pub refreshes_per_session: usize,
}

/// Evaluation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Minimum engagements for a session to be scored.
    pub min_interactions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            max_runs: 10,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000_000,
            end_date: None,
            dedup: true,
            channel_capacity: 1024,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 30 * 60,
            refresh_size: 20,
            max_posts_per_user: 60,
            refreshes_per_session: 5,
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_interactions: 1,
        }
    }
}

impl SessionConfig {
    /// Upper bound on the posts a reconstructed feed can hold.
    #[must_use]
    pub fn max_posts_per_session(&self) -> usize {
        self.refresh_size * self.refreshes_per_session
    }

    /// Idle threshold in milliseconds, the unit record timestamps use.
    #[must_use]
    pub fn idle_threshold_ms(&self) -> i64 {
        i64::try_from(self.idle_threshold_secs.saturating_mul(1000)).unwrap_or(i64::MAX)
    }
}

impl Config {
    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("SKYSEEN_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("stream.batch_size", self.stream.batch_size),
            ("stream.channel_capacity", self.stream.channel_capacity),
            ("session.refresh_size", self.session.refresh_size),
            ("session.max_posts_per_user", self.session.max_posts_per_user),
            (
                "session.refreshes_per_session",
                self.session.refreshes_per_session,
            ),
            ("evaluation.min_interactions", self.evaluation.min_interactions),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(Error::ConfigValidation {
                    message: format!("{name} must be greater than 0"),
                });
            }
        }

        if self.session.idle_threshold_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "session.idle_threshold_secs must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the exclusive stream end as Unix milliseconds, if configured.
    #[must_use]
    pub fn end_ms(&self) -> Option<i64> {
        self.stream.end_date.map(date_to_ms)
    }
}

/// Midnight UTC of `date` as Unix milliseconds.
#[must_use]
pub fn date_to_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map_or(0, |dt| dt.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_session_config() {
        let session = SessionConfig::default();

        assert_eq!(session.idle_threshold_secs, 1800);
        assert_eq!(session.refresh_size, 20);
        assert_eq!(session.max_posts_per_user, 60);
        assert_eq!(session.max_posts_per_session(), 100);
        assert_eq!(session.idle_threshold_ms(), 1_800_000);
    }

    #[test]
    fn test_default_stream_config() {
        let stream = StreamConfig::default();

        assert_eq!(stream.batch_size, 1_000_000);
        assert!(stream.end_date.is_none());
        assert!(stream.dedup);
        assert_eq!(stream.channel_capacity, 1024);
    }

    #[test]
    fn test_default_storage_config() {
        let storage = StorageConfig::default();

        assert!(storage.database_path.is_none());
        assert_eq!(storage.max_runs, 10);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_refresh_size() {
        let mut config = Config::default();
        config.session.refresh_size = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("session.refresh_size"));
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = Config::default();
        config.stream.batch_size = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("stream.batch_size"));
    }

    #[test]
    fn test_validate_zero_idle_threshold() {
        let mut config = Config::default();
        config.session.idle_threshold_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("idle_threshold_secs"));
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("seen.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/seen.sqlite"));

        assert_eq!(config.database_path(), PathBuf::from("/custom/seen.sqlite"));
    }

    #[test]
    fn test_end_ms() {
        let mut config = Config::default();
        assert!(config.end_ms().is_none());

        config.stream.end_date = NaiveDate::from_ymd_opt(2023, 2, 1);
        assert_eq!(config.end_ms(), Some(1_675_209_600_000));
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("skyseen"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml"))).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[session]\nrefresh_size = 10\n\n[stream]\nend_date = \"2023-05-01\"\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.session.refresh_size, 10);
        assert_eq!(config.session.max_posts_per_session(), 50);
        assert_eq!(config.stream.end_date, NaiveDate::from_ymd_opt(2023, 5, 1));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[evaluation]\nmin_interactions = 0\n").unwrap();

        assert!(Config::load_from(Some(path)).is_err());
    }

    #[test]
    fn test_session_config_deserialize() {
        let json = r#"{"idle_threshold_secs": 600}"#;
        let session: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(session.idle_threshold_secs, 600);
        assert_eq!(session.refresh_size, 20);
    }
}
