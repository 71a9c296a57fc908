//! Presence sensor — a binary connectivity sensor for one Zoom user.
//!
//! Two sources feed the same raw status:
//!
//!   webhook push (EventBus) ──┐
//!                             ├─→ set_state ─→ is_on ─→ write_state
//!   catch-up poll (30s)  ─────┘
//!
//! Push is the normal path. The poll is a reachability probe: it only
//! re-applies the fetched status when it is the first success after a
//! failure. When neither source answers at startup, the last recorded
//! state is restored.

mod task;
mod update;

pub use task::SensorHandle;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::debug;

use crate::adapters::{Profile, ProfileFetcher};
use crate::config::ConfigEntry;
use crate::coordinator::ProfileCoordinator;
use crate::events::EventBus;
use crate::limiter::FetchLimiter;
use crate::store::{PersistedState, StateStore, STATE_OFF, STATE_ON};

pub const ICON_ON: &str = "mdi:video";
pub const ICON_OFF: &str = "mdi:video-off";
pub const DEVICE_CLASS: &str = "connectivity";
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(30);

const NOTIFY_CAPACITY: usize = 64;

/// Which user a sensor tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorKind {
    /// The account owner. Listens to webhook pushes.
    AuthenticatedUser,
    /// One of the owner's contacts. Poll only.
    Contact { id: String },
}

/// Collaborators handed to every sensor at construction.
#[derive(Clone)]
pub struct SensorDeps {
    pub fetcher: Arc<dyn ProfileFetcher>,
    pub store: Arc<dyn StateStore>,
    pub coordinator: Arc<ProfileCoordinator>,
    pub events: EventBus,
    pub limiter: FetchLimiter,
    pub scan_interval: Duration,
}

#[derive(Debug)]
struct SensorState {
    profile: Option<Profile>,
    zoom_event_state: Option<String>,
    /// Value read back from the store; stands until the first real status.
    restored_on: bool,
    available: bool,
}

/// Everything a renderer or recorder needs, captured at one write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorSnapshot {
    pub unique_id: String,
    pub name: String,
    pub state: String,
    pub is_on: bool,
    pub available: bool,
    pub assumed_state: bool,
    pub icon: String,
    pub device_class: String,
    pub attributes: Option<BTreeMap<String, String>>,
}

impl SensorSnapshot {
    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            entity_id: self.unique_id.clone(),
            state: self.state.clone(),
            attributes: self.attributes.clone(),
            last_updated: chrono::Utc::now(),
        }
    }
}

pub struct PresenceSensor {
    kind: SensorKind,
    entry: Arc<ConfigEntry>,
    deps: SensorDeps,
    state: Mutex<SensorState>,
    notify: broadcast::Sender<SensorSnapshot>,
}

impl PresenceSensor {
    pub fn new(kind: SensorKind, entry: Arc<ConfigEntry>, deps: SensorDeps) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            kind,
            entry,
            deps,
            state: Mutex::new(SensorState {
                profile: None,
                zoom_event_state: None,
                restored_on: false,
                available: true,
            }),
            notify,
        }
    }

    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> &SensorKind {
        &self.kind
    }

    // ── Status Mapper ──

    /// Record a raw Zoom status and re-derive the on/off state from it.
    pub fn set_state(&self, zoom_event_state: Option<String>) {
        let mut state = self.state();
        state.zoom_event_state = zoom_event_state;
        state.restored_on = false;
        debug!(
            entry_id = %self.entry.entry_id,
            zoom_state = ?state.zoom_event_state,
            is_on = state
                .zoom_event_state
                .as_deref()
                .is_some_and(|s| self.entry.is_connected_status(s)),
            "Zoom state set"
        );
    }

    pub fn zoom_event_state(&self) -> Option<String> {
        self.state().zoom_event_state.clone()
    }

    pub fn is_on(&self) -> bool {
        let state = self.state();
        match state.zoom_event_state.as_deref() {
            Some(status) => self.entry.is_connected_status(status),
            None => state.restored_on,
        }
    }

    pub fn available(&self) -> bool {
        self.state().available
    }

    // ── Identity & Profile ──

    /// Profile fields to display. The authenticated user falls back to
    /// the coordinator's copy until it has fetched its own.
    pub fn profile(&self) -> Option<Profile> {
        let own = self.state().profile.clone();
        match self.kind {
            SensorKind::AuthenticatedUser => own.or_else(|| self.deps.coordinator.data()),
            SensorKind::Contact { .. } => own,
        }
    }

    /// Zoom user id, if it can be resolved yet.
    pub fn id(&self) -> Option<String> {
        let explicit = match &self.kind {
            SensorKind::Contact { id } => Some(id.clone()),
            SensorKind::AuthenticatedUser => self.entry.data.id.clone(),
        };
        explicit
            .filter(|id| !id.is_empty())
            .or_else(|| self.profile().and_then(|p| p.id))
            .filter(|id| !id.is_empty())
    }

    pub fn first_name(&self) -> Option<String> {
        self.profile().and_then(|p| p.first_name)
    }

    pub fn last_name(&self) -> Option<String> {
        self.profile().and_then(|p| p.last_name)
    }

    pub fn email(&self) -> Option<String> {
        self.profile().and_then(|p| p.email)
    }

    pub fn account_id(&self) -> Option<String> {
        self.profile().and_then(|p| p.account_id)
    }

    // ── Derived Attributes ──

    pub fn name(&self) -> String {
        match &self.kind {
            SensorKind::AuthenticatedUser => format!("Zoom - {}", self.entry.data.name),
            SensorKind::Contact { id } => {
                let contact = self
                    .profile()
                    .map(|p| p.contact_name())
                    .unwrap_or_else(|| id.clone());
                format!("Zoom - {}'s Contact - {}", self.entry.data.name, contact)
            }
        }
    }

    pub fn unique_id(&self) -> String {
        let base = format!("zoom_{}", slugify(&self.entry.data.name));
        match &self.kind {
            SensorKind::AuthenticatedUser => base,
            SensorKind::Contact { id } => format!("{}_{}", base, id),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.is_on() {
            ICON_ON
        } else {
            ICON_OFF
        }
    }

    /// True while Zoom is unreachable: the shown state may be stale.
    pub fn assumed_state(&self) -> bool {
        !self.available()
    }

    pub fn device_class(&self) -> &'static str {
        DEVICE_CLASS
    }

    pub fn extra_state_attributes(&self) -> Option<BTreeMap<String, String>> {
        let mut data = BTreeMap::new();
        let fields = [
            ("id", self.id()),
            ("first_name", self.first_name()),
            ("last_name", self.last_name()),
            ("email", self.email()),
            ("account_id", self.account_id()),
            ("status", self.zoom_event_state()),
        ];
        for (key, value) in fields {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                data.insert(key.to_string(), value);
            }
        }
        (!data.is_empty()).then_some(data)
    }

    pub fn snapshot(&self) -> SensorSnapshot {
        let is_on = self.is_on();
        let available = self.available();
        SensorSnapshot {
            unique_id: self.unique_id(),
            name: self.name(),
            state: (if is_on { STATE_ON } else { STATE_OFF }).to_string(),
            is_on,
            available,
            assumed_state: !available,
            icon: (if is_on { ICON_ON } else { ICON_OFF }).to_string(),
            device_class: DEVICE_CLASS.to_string(),
            attributes: self.extra_state_attributes(),
        }
    }

    // ── Notification ──

    /// Receive a snapshot after every state write.
    pub fn subscribe(&self) -> broadcast::Receiver<SensorSnapshot> {
        self.notify.subscribe()
    }

    /// Publish the current state to every subscriber.
    pub fn write_state(&self) {
        let _ = self.notify.send(self.snapshot());
    }
}

/// Lowercase, ASCII alphanumerics kept, every other run collapsed to `_`.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}
