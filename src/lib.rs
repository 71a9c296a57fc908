//! Zoom presence as a binary connectivity sensor.
//!
//! A sensor per tracked user reconciles two sources of presence: webhook
//! pushes (fast, authoritative) and a 30 s profile poll (a reachability
//! probe that catches up after an outage). When Zoom cannot be reached at
//! startup the last recorded state is restored.

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod limiter;
pub mod platform;
pub mod sensor;
pub mod store;

pub use adapters::{Profile, ProfileFetcher};
pub use config::{ConfigEntry, DaemonConfig, EntryData, EntryOptions};
pub use error::FetchError;
pub use events::{EventBus, ZoomEvent};
pub use platform::{EntrySetup, Platform};
pub use sensor::{PresenceSensor, SensorHandle, SensorKind, SensorSnapshot};
pub use store::{PersistedState, SqliteStateStore, StateStore};
