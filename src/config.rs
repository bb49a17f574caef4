//! Runtime configuration.
//!
//! Loaded from `leadloop.toml` next to the executable; falls back to
//! defaults plus environment overrides. Every field has a serde default so
//! partial files stay valid.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite store for contacts, messages and scripts.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Inbound polling
    #[serde(default = "default_receive_window_secs")]
    pub receive_window_secs: u64,

    // Send retries (fixed delay, no backoff)
    #[serde(default = "default_send_attempts")]
    pub send_attempts: u32,
    #[serde(default = "default_send_retry_delay_secs")]
    pub send_retry_delay_secs: u64,

    // Follow-up windows
    #[serde(default = "default_follow_up_idle_days")]
    pub follow_up_idle_days: i64,
    #[serde(default = "default_follow_up_grace_hours")]
    pub follow_up_grace_hours: i64,

    // Humanized pacing (uniform ranges, milliseconds)
    #[serde(default = "default_reply_delay_min_ms")]
    pub reply_delay_min_ms: u64,
    #[serde(default = "default_reply_delay_max_ms")]
    pub reply_delay_max_ms: u64,

    // Loop pacing (seconds)
    #[serde(default = "default_contact_pause_secs")]
    pub contact_pause_secs: u64,
    #[serde(default = "default_post_reply_pause_secs")]
    pub post_reply_pause_secs: u64,
    #[serde(default = "default_cycle_pause_secs")]
    pub cycle_pause_secs: u64,
    #[serde(default = "default_error_pause_secs")]
    pub error_pause_secs: u64,
}

fn default_database_path() -> String {
    dirs::data_local_dir()
        .map(|dir| {
            dir.join("leadloop")
                .join("leadloop.db")
                .to_string_lossy()
                .into_owned()
        })
        .unwrap_or_else(|| "leadloop.db".to_string())
}

fn default_receive_window_secs() -> u64 {
    120
}

fn default_send_attempts() -> u32 {
    3
}

fn default_send_retry_delay_secs() -> u64 {
    7
}

fn default_follow_up_idle_days() -> i64 {
    2
}

fn default_follow_up_grace_hours() -> i64 {
    48
}

fn default_reply_delay_min_ms() -> u64 {
    2_000
}

fn default_reply_delay_max_ms() -> u64 {
    4_000
}

fn default_contact_pause_secs() -> u64 {
    7
}

fn default_post_reply_pause_secs() -> u64 {
    15
}

fn default_cycle_pause_secs() -> u64 {
    10
}

fn default_error_pause_secs() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            receive_window_secs: default_receive_window_secs(),
            send_attempts: default_send_attempts(),
            send_retry_delay_secs: default_send_retry_delay_secs(),
            follow_up_idle_days: default_follow_up_idle_days(),
            follow_up_grace_hours: default_follow_up_grace_hours(),
            reply_delay_min_ms: default_reply_delay_min_ms(),
            reply_delay_max_ms: default_reply_delay_max_ms(),
            contact_pause_secs: default_contact_pause_secs(),
            post_reply_pause_secs: default_post_reply_pause_secs(),
            cycle_pause_secs: default_cycle_pause_secs(),
            error_pause_secs: default_error_pause_secs(),
        }
    }
}

impl EngineConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path to the config file (next to the executable).
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("leadloop.toml")
    }

    /// Load config from leadloop.toml, falling back to defaults + env vars.
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<EngineConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Defaults with environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = env::var("LEADLOOP_DATABASE") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }
        config
    }

    pub fn receive_window(&self) -> Duration {
        Duration::from_secs(self.receive_window_secs)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_secs(self.send_retry_delay_secs)
    }

    pub fn follow_up_idle(&self) -> ChronoDuration {
        ChronoDuration::days(self.follow_up_idle_days)
    }

    pub fn follow_up_grace(&self) -> ChronoDuration {
        ChronoDuration::hours(self.follow_up_grace_hours)
    }

    /// Uniform reply-delay range; tolerates a min/max swap in the file.
    pub fn reply_delay_range(&self) -> (u64, u64) {
        let lo = self.reply_delay_min_ms.min(self.reply_delay_max_ms);
        let hi = self.reply_delay_min_ms.max(self.reply_delay_max_ms);
        (lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_windows() {
        let config = EngineConfig::default();
        assert_eq!(config.follow_up_idle_days, 2);
        assert_eq!(config.follow_up_grace_hours, 48);
        assert_eq!(config.send_attempts, 3);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str("receive_window_secs = 30").unwrap();
        assert_eq!(config.receive_window_secs, 30);
        assert_eq!(config.cycle_pause_secs, 10);
    }

    #[test]
    fn test_reply_delay_range_normalizes() {
        let config = EngineConfig {
            reply_delay_min_ms: 5_000,
            reply_delay_max_ms: 1_000,
            ..EngineConfig::default()
        };
        assert_eq!(config.reply_delay_range(), (1_000, 5_000));
    }
}
