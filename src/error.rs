//! Fault kinds surfaced by the profile fetch capability.
//!
//! The set is closed. The poller and the bootstrap match on it
//! exhaustively and never re-raise it to the caller.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Zoom refused the request (HTTP 401). Not retried on its own; the
    /// entity restores and waits for the next natural trigger.
    #[error("not authorized to query presence: {0}")]
    Unauthorized(String),

    /// Anything else: transport errors, timeouts, non-success statuses,
    /// malformed bodies. The next scheduled poll is the retry.
    #[error("zoom request failed: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.status() == Some(http::StatusCode::UNAUTHORIZED) {
            FetchError::Unauthorized(e.to_string())
        } else {
            FetchError::Transient(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_keeps_detail() {
        let e = FetchError::Transient("connection reset".into());
        assert_eq!(e.to_string(), "zoom request failed: connection reset");
    }
}
