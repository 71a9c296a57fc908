//! Zoom REST adapter — implements `ProfileFetcher` over the v2 API.
//!
//! OAuth is handled elsewhere; this adapter only carries an already
//! issued bearer token. HTTP 401 maps to `Unauthorized`, every other
//! failure to `Transient`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use zeroize::Zeroizing;

use super::{Profile, ProfileFetcher};
use crate::error::FetchError;

pub const DEFAULT_API_BASE: &str = "https://api.zoom.us/v2";

pub struct ZoomApi {
    client: reqwest::Client,
    base_url: Url,
    token: Zeroizing<String>,
}

impl ZoomApi {
    pub fn new(base_url: &str, token: String, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Zoom API base URL '{}'", base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("Zoom API base URL '{}' cannot carry a path", base_url);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            token: Zeroizing::new(token),
        })
    }

    /// Base URL with `segments` appended, each percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn contact_url(&self, id: &str) -> Url {
        let mut url = self.endpoint(&["chat", "users", "me", "contacts", id]);
        url.query_pairs_mut()
            .append_pair("query_presence_status", "true");
        url
    }

    fn own_url(&self) -> Url {
        self.endpoint(&["users", "me"])
    }

    async fn get_profile(&self, url: Url) -> Result<Profile, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .bearer_auth(self.token.as_str())
            .send()
            .await?;

        let status = resp.status();
        if status == http::StatusCode::UNAUTHORIZED {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Unauthorized(truncate(&body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Transient(format!(
                "{} from {}: {}",
                status.as_u16(),
                url,
                truncate(&body)
            )));
        }

        resp.json::<Profile>()
            .await
            .map_err(|e| FetchError::Transient(format!("malformed profile: {}", e)))
    }
}

#[async_trait]
impl ProfileFetcher for ZoomApi {
    async fn fetch_profile(&self, id: &str) -> Result<Profile, FetchError> {
        self.get_profile(self.contact_url(id)).await
    }

    async fn fetch_own_profile(&self) -> Result<Profile, FetchError> {
        self.get_profile(self.own_url()).await
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(300).collect()
}
