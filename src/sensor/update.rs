//! The three ways a sensor's state moves: attach-time bootstrap, the
//! reachability poll, and webhook pushes.

use tracing::{debug, info, warn};

use super::PresenceSensor;
use crate::error::FetchError;
use crate::events::{ZoomEvent, CONNECTIVITY_EVENT, CONNECTIVITY_ID, CONNECTIVITY_STATUS};

impl PresenceSensor {
    // ── Bootstrap ──

    /// One authoritative fetch at attach, else the last recorded state.
    /// `available` is never touched here. Returns whether the state was
    /// written.
    pub async fn bootstrap(&self) -> bool {
        let Some(id) = self.id() else {
            debug!(sensor = %self.unique_id(), "Zoom user id unknown, restoring state");
            self.restore_state().await;
            return false;
        };

        let fetched = self
            .deps
            .limiter
            .run(self.deps.fetcher.fetch_profile(&id))
            .await;

        match fetched {
            Ok(profile) => {
                let status = profile.presence_status.clone();
                debug!(sensor = %self.unique_id(), status = ?status, "Initial Zoom status retrieved");
                self.state().profile = Some(profile);
                self.set_state(status);
                self.write_state();
                true
            }
            Err(FetchError::Unauthorized(detail)) => {
                debug!(
                    sensor = %self.unique_id(),
                    detail = %detail,
                    "Not authorized to query presence status, restoring state"
                );
                self.restore_state().await;
                false
            }
            Err(e) => {
                warn!(
                    sensor = %self.unique_id(),
                    "Initial Zoom status unavailable, restoring state: {}", e
                );
                self.restore_state().await;
                false
            }
        }
    }

    /// Load the last recorded on/off value. The raw status stays unknown.
    async fn restore_state(&self) {
        let entity_id = self.unique_id();
        match self.deps.store.get_last_state(&entity_id).await {
            Ok(Some(last)) => {
                debug!(sensor = %entity_id, state = %last.state, "Restored last state");
                self.state().restored_on = last.is_on();
            }
            Ok(None) => {}
            Err(e) => warn!(sensor = %entity_id, "Failed to read last state: {:#}", e),
        }
    }

    // ── Poll ──

    /// Reachability probe. Flips `available` on the edges only; on the
    /// first success after a failure it also catches up on the status.
    pub async fn poll(&self) {
        let Some(id) = self.id() else {
            return;
        };

        let fetched = self
            .deps
            .limiter
            .run(self.deps.fetcher.fetch_profile(&id))
            .await;

        match fetched {
            Ok(profile) => {
                let status = profile.presence_status.clone();
                let recovering = {
                    let mut state = self.state();
                    state.profile = Some(profile);
                    !state.available
                };
                if recovering {
                    info!(
                        sensor = %self.unique_id(),
                        "Zoom reachable again, re-reading status in case updates were missed"
                    );
                    self.set_state(status);
                    self.state().available = true;
                    self.write_state();
                }
            }
            Err(e) => {
                let was_available = std::mem::replace(&mut self.state().available, false);
                if was_available {
                    warn!(
                        sensor = %self.unique_id(),
                        "Zoom unreachable, status updates may be missed until it recovers: {}", e
                    );
                    self.write_state();
                }
            }
        }
    }

    // ── Push ──

    /// Apply a webhook event if it is a presence update for this user.
    /// Returns whether it was applied; a foreign event changes nothing.
    pub fn handle_event(&self, event: &ZoomEvent) -> bool {
        if event.ha_config_entry_id != self.entry.entry_id || event.event != CONNECTIVITY_EVENT {
            return false;
        }
        let Some(id) = self.id() else {
            return false;
        };
        let addressed_here = event
            .payload_str(CONNECTIVITY_ID)
            .is_some_and(|event_id| event_id.to_lowercase() == id.to_lowercase());
        if !addressed_here {
            return false;
        }

        self.set_state(event.payload_str(CONNECTIVITY_STATUS).map(str::to_string));
        self.write_state();
        true
    }
}
