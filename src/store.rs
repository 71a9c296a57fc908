//! Persisted sensor state — what gets restored after a restart.
//!
//! Every state write is recorded; at bootstrap a sensor that cannot reach
//! Zoom reads its last record back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const STATE_ON: &str = "on";
pub const STATE_OFF: &str = "off";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub entity_id: String,
    /// `"on"` or `"off"`.
    pub state: String,
    pub attributes: Option<BTreeMap<String, String>>,
    pub last_updated: DateTime<Utc>,
}

impl PersistedState {
    pub fn is_on(&self) -> bool {
        self.state == STATE_ON
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_last_state(&self, entity_id: &str) -> Result<Option<PersistedState>>;

    async fn save_state(&self, state: &PersistedState) -> Result<()>;
}

/// State store backed by SQLite.
pub struct SqliteStateStore {
    db: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open (or create) the state store at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let db = Connection::open(db_path).context("Failed to open state database")?;
        db.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> Result<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS entity_states (
                entity_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                attributes TEXT,
                last_updated TEXT NOT NULL
            );",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_last_state(&self, entity_id: &str) -> Result<Option<PersistedState>> {
        let db = self.conn();
        let row = db
            .query_row(
                "SELECT state, attributes, last_updated FROM entity_states WHERE entity_id = ?1",
                params![entity_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((state, attributes, last_updated)) = row else {
            return Ok(None);
        };

        let attributes = attributes
            .map(|a| serde_json::from_str::<BTreeMap<String, String>>(&a))
            .transpose()
            .with_context(|| format!("Corrupt attributes for '{}'", entity_id))?;
        let last_updated = DateTime::parse_from_rfc3339(&last_updated)
            .with_context(|| format!("Corrupt timestamp for '{}'", entity_id))?
            .with_timezone(&Utc);

        Ok(Some(PersistedState {
            entity_id: entity_id.to_string(),
            state,
            attributes,
            last_updated,
        }))
    }

    async fn save_state(&self, state: &PersistedState) -> Result<()> {
        let attributes = state
            .attributes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let db = self.conn();
        db.execute(
            "INSERT OR REPLACE INTO entity_states (entity_id, state, attributes, last_updated)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                state.entity_id,
                state.state,
                attributes,
                state.last_updated.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entity_id: &str, state: &str) -> PersistedState {
        let mut attributes = BTreeMap::new();
        attributes.insert("status".to_string(), "Do_Not_Disturb".to_string());
        PersistedState {
            entity_id: entity_id.to_string(),
            state: state.to_string(),
            attributes: Some(attributes),
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_missing_entity_is_none() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        assert!(store.get_last_state("zoom_me").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_state() {
        let store = SqliteStateStore::open_in_memory().unwrap();
        store.save_state(&record("zoom_me", STATE_ON)).await.unwrap();
        store.save_state(&record("zoom_me", STATE_OFF)).await.unwrap();

        let last = store.get_last_state("zoom_me").await.unwrap().unwrap();
        assert!(!last.is_on());
        assert_eq!(
            last.attributes.unwrap().get("status").map(String::as_str),
            Some("Do_Not_Disturb")
        );
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = SqliteStateStore::open(&path).unwrap();
            store.save_state(&record("zoom_me", STATE_ON)).await.unwrap();
        }
        let store = SqliteStateStore::open(&path).unwrap();
        assert!(store.get_last_state("zoom_me").await.unwrap().unwrap().is_on());
    }
}
