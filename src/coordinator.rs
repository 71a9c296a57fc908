//! Own-profile coordinator.
//!
//! Keeps the authenticated user's profile fresh on a slow interval and
//! tells listeners when it changed. The authenticated-user sensor reads
//! its identity from here until it has fetched a profile of its own.

use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, warn};

use crate::adapters::{Profile, ProfileFetcher};
use crate::error::FetchError;

pub struct ProfileCoordinator {
    entry_id: String,
    fetcher: Arc<dyn ProfileFetcher>,
    data: RwLock<Option<Profile>>,
    refreshed: broadcast::Sender<()>,
}

impl ProfileCoordinator {
    pub fn new(entry_id: &str, fetcher: Arc<dyn ProfileFetcher>) -> Self {
        let (refreshed, _) = broadcast::channel(16);
        Self {
            entry_id: entry_id.to_string(),
            fetcher,
            data: RwLock::new(None),
            refreshed,
        }
    }

    /// Last successfully fetched own profile.
    pub fn data(&self) -> Option<Profile> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notified after every successful refresh.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.refreshed.subscribe()
    }

    /// Fetch the own profile once. On failure the previous data is kept
    /// and listeners are not notified.
    pub async fn refresh(&self) -> Result<(), FetchError> {
        let profile = self.fetcher.fetch_own_profile().await?;
        debug!(entry_id = %self.entry_id, user_id = ?profile.id, "Own profile refreshed");
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = Some(profile);
        let _ = self.refreshed.send(());
        Ok(())
    }

    /// Refresh every `every`, first one period from now, until the handle
    /// is aborted. Callers do the first refresh themselves.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + every, every);
            loop {
                interval.tick().await;
                if let Err(e) = self.refresh().await {
                    warn!(entry_id = %self.entry_id, "Own profile refresh failed: {}", e);
                }
            }
        })
    }
}
