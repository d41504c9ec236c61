//! # Configuration management
//!
//! TOML configuration for the daemon: which rooms this process owns, where
//! the store lives, hub and session tunables, logging, and the static
//! dealer/player token table. Loaded at startup; a missing file is
//! generated with defaults so a fresh checkout runs out of the box.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7138"
//! rooms = ["R1"]
//!
//! [storage]
//! data_dir = "./data"
//!
//! [[auth.tokens]]
//! token = "dev-dealer"
//! subject = "dealer-1"
//! role = "DEALER"
//! ```
//!
//! Precedence: CLI args > config file > built-in defaults.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::hub::Role;
use crate::session::AuthSubject;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Rooms this process exclusively owns. Room partitioning across
    /// processes is a deployment concern; two processes must never share a
    /// room.
    #[serde(default = "default_rooms")]
    pub rooms: Vec<String>,
}

fn default_bind() -> String {
    "127.0.0.1:7138".to_string()
}

fn default_rooms() -> Vec<String> {
    vec!["R1".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Hot-tier TTL for the live-round slot. The contract requires ≥ 24 h.
    #[serde(default = "default_current_ttl_hours")]
    pub current_ttl_hours: i64,
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: i64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_current_ttl_hours() -> i64 {
    24
}

fn default_history_retention_days() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
    /// Subscriptions are closed after this age; clients reconnect.
    #[serde(default = "default_max_stream_age_secs")]
    pub max_stream_age_secs: u64,
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    #[serde(default = "default_dispatch_deadline_secs")]
    pub dispatch_deadline_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_watchdog_secs() -> u64 {
    30
}

fn default_max_stream_age_secs() -> u64 {
    600
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_dispatch_deadline_secs() -> u64 {
    10
}

impl Default for HubConfig {
    fn default() -> Self {
        HubConfig {
            heartbeat_secs: default_heartbeat_secs(),
            watchdog_secs: default_watchdog_secs(),
            max_stream_age_secs: default_max_stream_age_secs(),
            subscriber_buffer: default_subscriber_buffer(),
            dispatch_deadline_secs: default_dispatch_deadline_secs(),
        }
    }
}

impl HubConfig {
    pub fn to_hub_settings(&self) -> crate::hub::HubConfig {
        crate::hub::HubConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            watchdog_window: Duration::from_secs(self.watchdog_secs),
            max_stream_age: Duration::from_secs(self.max_stream_age_secs),
            subscriber_buffer: self.subscriber_buffer,
            dispatch_deadline: Duration::from_secs(self.dispatch_deadline_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_read_deadline_secs")]
    pub read_deadline_secs: u64,
    #[serde(default = "default_write_deadline_secs")]
    pub write_deadline_secs: u64,
}

fn default_read_deadline_secs() -> u64 {
    60
}

fn default_write_deadline_secs() -> u64 {
    10
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            read_deadline_secs: default_read_deadline_secs(),
            write_deadline_secs: default_write_deadline_secs(),
        }
    }
}

impl SessionConfig {
    pub fn to_session_settings(&self) -> crate::session::SessionConfig {
        crate::session::SessionConfig {
            read_deadline: Duration::from_secs(self.read_deadline_secs),
            write_deadline: Duration::from_secs(self.write_deadline_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; stderr is always written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One static token entry. Real deployments swap the validator for their
/// token service; this table keeps development and tests self-contained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub subject: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl AuthConfig {
    pub fn token_table(&self) -> HashMap<String, AuthSubject> {
        self.tokens
            .iter()
            .map(|t| {
                (
                    t.token.clone(),
                    AuthSubject {
                        subject_id: t.subject.clone(),
                        role: t.role,
                    },
                )
            })
            .collect()
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                bind: default_bind(),
                rooms: default_rooms(),
            },
            storage: StorageConfig {
                data_dir: default_data_dir(),
                current_ttl_hours: default_current_ttl_hours(),
                history_retention_days: default_history_retention_days(),
            },
            hub: HubConfig::default(),
            session: SessionConfig::default(),
            logging: LoggingConfig::default(),
            auth: AuthConfig {
                tokens: vec![TokenEntry {
                    token: "dev-dealer".to_string(),
                    subject: "dealer-1".to_string(),
                    role: Role::Dealer,
                }],
            },
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("cannot read config {path}: {e}"))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| anyhow!("invalid config {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file.
    pub async fn create_default(path: &str) -> Result<Self> {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config)?;
        fs::write(path, serialized).await?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.rooms.is_empty() {
            return Err(anyhow!("server.rooms must name at least one room"));
        }
        let mut seen = std::collections::HashSet::new();
        for room in &self.server.rooms {
            if room.is_empty() {
                return Err(anyhow!("room names must be non-empty"));
            }
            if !seen.insert(room) {
                return Err(anyhow!("duplicate room {room}"));
            }
        }
        if self.storage.current_ttl_hours < 24 {
            return Err(anyhow!(
                "storage.current_ttl_hours must be >= 24 (got {})",
                self.storage.current_ttl_hours
            ));
        }
        if self.storage.history_retention_days < 30 {
            return Err(anyhow!(
                "storage.history_retention_days must be >= 30 (got {})",
                self.storage.history_retention_days
            ));
        }
        if self.hub.heartbeat_secs == 0 || self.hub.watchdog_secs <= self.hub.heartbeat_secs {
            return Err(anyhow!(
                "hub.watchdog_secs must exceed hub.heartbeat_secs"
            ));
        }
        if self.hub.subscriber_buffer == 0 {
            return Err(anyhow!("hub.subscriber_buffer must be positive"));
        }
        let mut tokens = std::collections::HashSet::new();
        for entry in &self.auth.tokens {
            if !tokens.insert(&entry.token) {
                return Err(anyhow!("duplicate auth token for subject {}", entry.subject));
            }
        }
        Ok(())
    }
}
