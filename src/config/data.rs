//! Process-global configuration: proxy settings, default scheduling knobs,
//! the offline flag, and directory resolution.
//!
//! The node tree itself (folders, feeds, search folders, node sources) is
//! not part of this struct — it lives in the `NodeArena` persisted via
//! `crate::opml` and `crate::store`, matching spec §4.8's "feed list root"
//! being a distinct component from process configuration.

use std::{env, fs, path::PathBuf};

use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::request::ProxyConfig;
use crate::scheduler::SchedulerConfig;

/// Application-wide configuration, persisted as `config.json` in the config
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Work offline: the scheduler tick becomes a no-op and manual refreshes
    /// are refused (spec §6 `SetOnline`).
    #[serde(default)]
    pub offline: bool,

    /// Scheduler defaults (update interval, backoff cap, failure cap).
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Default per-feed cache limit (item count), used when a feed node
    /// does not override `FeedPayload::cache_limit`.
    #[serde(default = "default_cache_limit")]
    pub default_cache_limit: u32,

    /// Process-wide HTTP proxy, honored unless a subscription sets
    /// `dont_use_proxy`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

const fn default_cache_limit() -> u32 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offline: false,
            scheduler: SchedulerConfig::default(),
            default_cache_limit: default_cache_limit(),
            proxy: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// Uses `~/.config/feedcore` on all platforms for consistency, falling
    /// back to `%USERPROFILE%` on Windows if `HOME` is not set.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        if let Ok(home) = env::var("HOME") {
            return Some(PathBuf::from(home).join(".config").join("feedcore"));
        }
        if let Ok(userprofile) = env::var("USERPROFILE") {
            return Some(PathBuf::from(userprofile).join(".config").join("feedcore"));
        }
        None
    }

    /// Returns the configuration file path.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.json"))
    }

    /// Returns the data directory path (item store database, feed list).
    #[must_use]
    pub fn data_dir() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("data"))
    }

    /// Returns the path to the persisted feed list (spec §4.8).
    #[must_use]
    pub fn feedlist_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("feedlist.opml"))
    }

    /// Returns the path to the item store database.
    #[must_use]
    pub fn store_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("liferea.db"))
    }

    /// Loads configuration from disk, creating and persisting a default if
    /// none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read, parsed, or
    /// (when absent) created.
    pub fn load() -> Result<Self> {
        let path = Self::config_path().ok_or_else(|| color_eyre::eyre::eyre!("could not determine config directory"))?;

        if path.exists() {
            let content = fs::read_to_string(&path)?;
            let config: Self = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Saves configuration to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be written.
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir().ok_or_else(|| color_eyre::eyre::eyre!("could not determine config directory"))?;
        fs::create_dir_all(&dir)?;

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_scheduler_and_cache_limit() {
        let config = Config::default();
        assert!(!config.offline);
        assert_eq!(config.default_cache_limit, 1000);
        assert_eq!(config.scheduler.default_update_interval_minutes, 60);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let mut config = Config::default();
        config.offline = true;
        config.default_cache_limit = 500;
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.offline, true);
        assert_eq!(parsed.default_cache_limit, 500);
    }
}
