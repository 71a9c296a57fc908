//! Configuration — config entries and the daemon's YAML file.
//!
//! A `ConfigEntry` is one authenticated Zoom account: its immutable data
//! (name, optional explicit user id) and its editable options (which
//! presence statuses count as "connected"). Editing the options sends the
//! entry-scoped update signal so attached sensors re-render.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::adapters::zoom::DEFAULT_API_BASE;
use crate::dispatcher::{Dispatcher, SignalReceiver};

/// Statuses treated as "on" when an entry has no options of its own.
pub const DEFAULT_CONNECTED_STATUSES: &[&str] = &["Do_Not_Disturb"];

// ── Config Entry ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryData {
    pub name: String,
    /// Explicit Zoom user id. When absent the id comes from the profile.
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryOptions {
    pub connected_statuses: Vec<String>,
}

impl Default for EntryOptions {
    fn default() -> Self {
        Self {
            connected_statuses: DEFAULT_CONNECTED_STATUSES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

pub struct ConfigEntry {
    pub entry_id: String,
    pub data: EntryData,
    options: RwLock<Option<EntryOptions>>,
    dispatcher: Arc<Dispatcher>,
}

impl ConfigEntry {
    pub fn new(
        entry_id: &str,
        data: EntryData,
        options: Option<EntryOptions>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            entry_id: entry_id.to_string(),
            data,
            options: RwLock::new(options),
            dispatcher,
        }
    }

    pub fn has_options(&self) -> bool {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Current options; the defaults when none were ever set.
    pub fn options(&self) -> EntryOptions {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default()
    }

    pub fn is_connected_status(&self, status: &str) -> bool {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|o| o.connected_statuses.iter().any(|s| s == status))
            .unwrap_or_else(|| DEFAULT_CONNECTED_STATUSES.contains(&status))
    }

    /// Fires whenever this entry's options are updated.
    pub fn subscribe_updates(&self) -> SignalReceiver {
        self.dispatcher.connect(&self.entry_id)
    }

    /// Replace the options and notify everything rendering this entry.
    pub fn update_options(&self, options: EntryOptions) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = Some(options);
        self.dispatcher.send(&self.entry_id);
    }
}

// ── Daemon Config ───────────────────────────────────────────────────

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_poll_interval() -> u64 {
    30
}
fn default_coordinator_interval() -> u64 {
    300
}
fn default_parallel_updates() -> usize {
    5
}
fn default_request_timeout() -> u64 {
    10
}

/// One account in the YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    #[serde(default)]
    pub entry_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub connected_statuses: Option<Vec<String>>,
    /// Contact user ids to track alongside the account itself.
    #[serde(default)]
    pub contacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_coordinator_interval")]
    pub coordinator_interval_secs: u64,
    #[serde(default = "default_parallel_updates")]
    pub parallel_updates: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub state_db: Option<PathBuf>,
    #[serde(default)]
    pub entries: Vec<EntryConfig>,
}

impl DaemonConfig {
    /// Data directory: `~/.zoom-presence`.
    pub fn data_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Cannot determine home directory")?;
        Ok(home.join(".zoom-presence"))
    }

    /// Load from `ZOOM_PRESENCE_CONFIG` or `~/.zoom-presence/config.yaml`,
    /// then apply `ZOOM_ACCESS_TOKEN` if set.
    pub fn from_env() -> Result<Self> {
        let path = match std::env::var_os("ZOOM_PRESENCE_CONFIG") {
            Some(p) => PathBuf::from(p),
            None => Self::data_dir()?.join("config.yaml"),
        };
        let mut config = Self::load(&path)?;
        if let Ok(token) = std::env::var("ZOOM_ACCESS_TOKEN") {
            config.access_token = Some(token);
        }
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        if config.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if config.coordinator_interval_secs == 0 {
            anyhow::bail!("coordinator_interval_secs must be greater than zero");
        }
        if config.parallel_updates == 0 {
            anyhow::bail!("parallel_updates must be greater than zero");
        }
        Ok(config)
    }

    pub fn state_db_path(&self) -> Result<PathBuf> {
        match &self.state_db {
            Some(p) => Ok(p.clone()),
            None => Ok(Self::data_dir()?.join("state.db")),
        }
    }
}

impl EntryConfig {
    /// Build the live entry. Entries without an explicit `entry_id` get
    /// a fresh one.
    pub fn into_entry(self, dispatcher: Arc<Dispatcher>) -> (Arc<ConfigEntry>, Vec<String>) {
        let entry_id = self
            .entry_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let options = self
            .connected_statuses
            .map(|connected_statuses| EntryOptions { connected_statuses });
        let entry = ConfigEntry::new(
            &entry_id,
            EntryData {
                name: self.name,
                id: self.id,
            },
            options,
            dispatcher,
        );
        (Arc::new(entry), self.contacts)
    }
}
