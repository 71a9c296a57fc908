//! Profile fetch capability — the sensor's only view of the Zoom API.
//!
//! The sensor and the coordinator call a `ProfileFetcher`; they never
//! see the HTTP client, the token, or the endpoint layout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::FetchError;

pub mod zoom;

#[cfg(test)]
pub(crate) mod mock;

// ── Core Types ──────────────────────────────────────────────────────

/// A Zoom user or contact profile.
///
/// Only the fields the sensor reads are typed; everything else the API
/// returns is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub presence_status: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Profile {
    /// Human-readable contact name: "first last", else email, else id.
    pub fn contact_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return full;
        }
        self.email
            .clone()
            .or_else(|| self.id.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

// ── Fetcher Trait ───────────────────────────────────────────────────

#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// Fetch a contact's profile, including its current presence status.
    async fn fetch_profile(&self, id: &str) -> Result<Profile, FetchError>;

    /// Fetch the authenticated user's own profile.
    async fn fetch_own_profile(&self) -> Result<Profile, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_deserializes_with_extra_fields() {
        let body = serde_json::json!({
            "id": "abc123",
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "presence_status": "Available",
            "sip_phone_number": "12345"
        });
        let profile: Profile = serde_json::from_value(body).unwrap();
        assert_eq!(profile.id.as_deref(), Some("abc123"));
        assert_eq!(profile.presence_status.as_deref(), Some("Available"));
        assert!(profile.account_id.is_none());
        assert_eq!(profile.extra["sip_phone_number"], "12345");
    }

    #[test]
    fn test_contact_name_fallbacks() {
        let mut p = Profile {
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            ..Default::default()
        };
        assert_eq!(p.contact_name(), "Ada Lovelace");

        p.first_name = None;
        p.last_name = None;
        p.email = Some("ada@example.com".into());
        assert_eq!(p.contact_name(), "ada@example.com");

        p.email = None;
        assert_eq!(p.contact_name(), "Unknown");
    }
}
