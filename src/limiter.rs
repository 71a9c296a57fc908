//! Global cap on in-flight Zoom fetches across all sensors.
//!
//! Fetches beyond the cap wait for a permit; they never fail because of it.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::FetchError;

pub const DEFAULT_PARALLEL_UPDATES: usize = 5;

#[derive(Clone)]
pub struct FetchLimiter {
    permits: Arc<Semaphore>,
}

impl FetchLimiter {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight)),
        }
    }

    /// Run `fetch` while holding one permit.
    pub async fn run<T, F>(&self, fetch: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchError::Transient("fetch limiter closed".into()))?;
        fetch.await
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for FetchLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_UPDATES)
    }
}
