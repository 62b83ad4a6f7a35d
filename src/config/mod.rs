//! # Configuration Management Module
//!
//! All runtime settings for missionkeeper live in one TOML file, parsed into
//! the typed [`Config`] structure. Every section has defaults, so a partial
//! file (or `missionkeeper init`) is enough to get started.
//!
//! ## Configuration Structure
//!
//! - [`MissionsConfig`] - quotas, gating rules, reset policy, catalog path
//! - [`ScheduleConfig`] - playtime tick, expiration scan and map-change delay
//! - [`VipConfig`] - how VIP players are recognised
//! - [`StorageConfig`] - data directory for the mission database
//! - [`LoggingConfig`] - log level and optional log file
//! - [`WebhookConfig`] - optional completion webhook
//!
//! ## Usage
//!
//! ```rust,no_run
//! use missionkeeper::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Config::create_default("config.toml").await?;
//!     let config = Config::load("config.toml").await?;
//!     println!("Reset mode: {}", config.missions.reset_mode);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [missions]
//! amount_normal = 3
//! amount_vip = 5
//! minimum_players = 4
//! reset_mode = "daily"
//! catalog_path = "missions.json"
//!
//! [vip]
//! flags = ["@missions/vip"]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::missions::reset::ResetMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MissionsConfig {
    pub amount_normal: usize,
    pub amount_vip: usize,
    /// Active (non-spectator) players required before any progress counts.
    pub minimum_players: usize,
    pub allow_progress_during_warmup: bool,
    /// Log every routed event's property bag at info level.
    pub event_debug_logs: bool,
    pub reset_mode: ResetMode,
    /// Mission catalog file, relative to the working directory.
    pub catalog_path: String,
    /// Player command names; the first one is quoted in "new missions" notices.
    pub commands: Vec<String>,
}

impl Default for MissionsConfig {
    fn default() -> Self {
        Self {
            amount_normal: 3,
            amount_vip: 5,
            minimum_players: 4,
            allow_progress_during_warmup: false,
            event_debug_logs: false,
            reset_mode: ResetMode::Daily,
            catalog_path: "missions.json".to_string(),
            commands: vec!["missions".to_string(), "mission".to_string()],
        }
    }
}

impl MissionsConfig {
    pub fn primary_command(&self) -> &str {
        self.commands.first().map(String::as_str).unwrap_or("missions")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub playtime_tick_seconds: u64,
    pub expiration_check_seconds: u64,
    /// Delay between the host reporting a new map and missions being refreshed.
    pub map_change_delay_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            playtime_tick_seconds: 60,
            expiration_check_seconds: 60,
            map_change_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VipConfig {
    /// Any of these permission flags grants VIP.
    pub flags: Vec<String>,
    /// Case-insensitive substring of the player name that grants VIP.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_domain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

impl StorageConfig {
    /// Sled database directory.
    pub fn missions_db_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join("missions")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("missionkeeper.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub url: String,
    pub timeout_seconds: u64,
    /// Display name attached to posted messages.
    pub username: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false, // needs a url first
            url: String::new(),
            timeout_seconds: 5,
            username: "Missions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub missions: MissionsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub vip: VipConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Non-fatal problems worth a warning at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let m = &self.missions;
        if m.amount_normal > m.amount_vip {
            warnings.push(format!(
                "Normal mission amount ({}) is higher than VIP amount ({}). This may cause issues.",
                m.amount_normal, m.amount_vip
            ));
        }
        if m.amount_vip == 0 {
            warnings.push("VIP mission amount is 0; nobody will receive missions".to_string());
        }
        if m.commands.is_empty() {
            warnings.push("No mission commands configured; players cannot list missions".to_string());
        }
        if self.schedule.playtime_tick_seconds == 0 {
            warnings.push("playtime_tick_seconds is 0; using 1 second".to_string());
        }
        if self.schedule.expiration_check_seconds == 0 {
            warnings.push("expiration_check_seconds is 0; using 1 second".to_string());
        }
        if self.webhook.enabled && self.webhook.url.trim().is_empty() {
            warnings.push("Webhook enabled without a url; it will stay disabled".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.missions.amount_normal, 3);
        assert_eq!(config.missions.amount_vip, 5);
        assert_eq!(config.missions.minimum_players, 4);
        assert!(!config.missions.allow_progress_during_warmup);
        assert_eq!(config.missions.reset_mode, ResetMode::Daily);
        assert_eq!(config.missions.primary_command(), "missions");
        assert_eq!(config.schedule.playtime_tick_seconds, 60);
        assert_eq!(config.schedule.map_change_delay_ms, 100);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [missions]
            amount_normal = 2
            reset_mode = "per_map"

            [vip]
            flags = ["@missions/vip"]
            "#,
        )
        .unwrap();
        assert_eq!(config.missions.amount_normal, 2);
        assert_eq!(config.missions.amount_vip, 5);
        assert_eq!(config.missions.reset_mode, ResetMode::PerMap);
        assert_eq!(config.vip.flags, vec!["@missions/vip".to_string()]);
        assert_eq!(config.storage.data_dir, "./data");
    }

    #[test]
    fn test_validate_flags_inverted_quotas() {
        let mut config = Config::default();
        config.missions.amount_normal = 6;
        config.webhook.enabled = true;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("higher than VIP"));
    }

    #[test]
    fn test_missions_db_path() {
        let storage = StorageConfig {
            data_dir: "/srv/mk".to_string(),
        };
        assert_eq!(storage.missions_db_path(), PathBuf::from("/srv/mk/missions"));
    }

    #[tokio::test]
    async fn test_default_file_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.missions.commands, Config::default().missions.commands);
        assert_eq!(loaded.logging.file.as_deref(), Some("missionkeeper.log"));
    }
}
