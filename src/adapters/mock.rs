//! Scripted fetcher for tests: replays queued outcomes in order.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{Profile, ProfileFetcher};
use crate::error::FetchError;

#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    contacts: Mutex<VecDeque<Result<Profile, FetchError>>>,
    own: Mutex<VecDeque<Result<Profile, FetchError>>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, outcome: Result<Profile, FetchError>) -> &Self {
        self.contacts.lock().unwrap().push_back(outcome);
        self
    }

    pub(crate) fn push_own(&self, outcome: Result<Profile, FetchError>) -> &Self {
        self.own.lock().unwrap().push_back(outcome);
        self
    }

    /// Ids passed to `fetch_profile`, in call order.
    pub(crate) fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProfileFetcher for ScriptedFetcher {
    async fn fetch_profile(&self, id: &str) -> Result<Profile, FetchError> {
        self.requested.lock().unwrap().push(id.to_string());
        self.contacts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transient("no scripted response".into())))
    }

    async fn fetch_own_profile(&self) -> Result<Profile, FetchError> {
        self.own
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transient("no scripted response".into())))
    }
}

pub(crate) fn profile(id: &str, status: &str) -> Profile {
    Profile {
        id: Some(id.to_string()),
        first_name: Some("Ada".to_string()),
        last_name: Some("Lovelace".to_string()),
        email: Some("ada@example.com".to_string()),
        account_id: Some("acct-1".to_string()),
        presence_status: Some(status.to_string()),
        ..Default::default()
    }
}
