//! Platform setup — turns a config entry into running sensors.
//!
//! For each entry: default options are filled in if it has none, the
//! own-profile coordinator gets its first refresh, then the
//! authenticated-user sensor and one sensor per contact are attached.
//! Every sensor write is recorded into the state store so the next start
//! can restore it.

use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::adapters::ProfileFetcher;
use crate::config::{ConfigEntry, EntryOptions};
use crate::coordinator::ProfileCoordinator;
use crate::events::EventBus;
use crate::limiter::FetchLimiter;
use crate::sensor::{PresenceSensor, SensorDeps, SensorHandle, SensorKind, SensorSnapshot};
use crate::store::StateStore;

pub struct Platform {
    fetcher: Arc<dyn ProfileFetcher>,
    store: Arc<dyn StateStore>,
    events: EventBus,
    limiter: FetchLimiter,
    scan_interval: Duration,
    coordinator_interval: Duration,
}

/// Everything running on behalf of one config entry.
pub struct EntrySetup {
    entry: Arc<ConfigEntry>,
    coordinator: Arc<ProfileCoordinator>,
    coordinator_task: JoinHandle<()>,
    sensors: Vec<SensorHandle>,
    recorders: Vec<Recorder>,
}

/// A running `record_states` task and the signal that makes it flush and
/// exit.
struct Recorder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Platform {
    pub fn new(
        fetcher: Arc<dyn ProfileFetcher>,
        store: Arc<dyn StateStore>,
        events: EventBus,
        limiter: FetchLimiter,
        scan_interval: Duration,
        coordinator_interval: Duration,
    ) -> Self {
        Self {
            fetcher,
            store,
            events,
            limiter,
            scan_interval,
            coordinator_interval,
        }
    }

    pub async fn setup_entry(&self, entry: Arc<ConfigEntry>, contacts: &[String]) -> EntrySetup {
        if !entry.has_options() {
            info!(entry_id = %entry.entry_id, "No options set, applying default connected statuses");
            entry.update_options(EntryOptions::default());
        }

        let coordinator = Arc::new(ProfileCoordinator::new(
            &entry.entry_id,
            Arc::clone(&self.fetcher),
        ));
        if let Err(e) = coordinator.refresh().await {
            warn!(entry_id = %entry.entry_id, "Initial own profile refresh failed: {}", e);
        }
        let coordinator_task = Arc::clone(&coordinator).spawn(self.coordinator_interval);

        let deps = SensorDeps {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            coordinator: Arc::clone(&coordinator),
            events: self.events.clone(),
            limiter: self.limiter.clone(),
            scan_interval: self.scan_interval,
        };

        let kinds = std::iter::once(SensorKind::AuthenticatedUser).chain(
            contacts
                .iter()
                .map(|id| SensorKind::Contact { id: id.clone() }),
        );

        let mut sensors = Vec::new();
        let mut recorders = Vec::new();
        for kind in kinds {
            let sensor = Arc::new(PresenceSensor::new(kind, Arc::clone(&entry), deps.clone()));
            // Subscribe before attach so the bootstrap write is recorded too.
            let (stop, stopped) = oneshot::channel();
            recorders.push(Recorder {
                stop,
                task: tokio::spawn(record_states(
                    Arc::clone(&self.store),
                    sensor.subscribe(),
                    stopped,
                )),
            });
            sensors.push(sensor.attach().await);
        }

        info!(
            entry_id = %entry.entry_id,
            name = %entry.data.name,
            sensors = sensors.len(),
            "Config entry set up"
        );

        EntrySetup {
            entry,
            coordinator,
            coordinator_task,
            sensors,
            recorders,
        }
    }
}

impl EntrySetup {
    pub fn entry(&self) -> &Arc<ConfigEntry> {
        &self.entry
    }

    pub fn coordinator(&self) -> &Arc<ProfileCoordinator> {
        &self.coordinator
    }

    pub fn sensors(&self) -> &[SensorHandle] {
        &self.sensors
    }

    /// Remove every sensor, stop the coordinator, then let each recorder
    /// save what its sensor already wrote before it exits.
    pub async fn unload(self) {
        for sensor in self.sensors {
            sensor.remove().await;
        }
        self.coordinator_task.abort();
        for recorder in self.recorders {
            let _ = recorder.stop.send(());
            if let Err(e) = recorder.task.await {
                warn!(entry_id = %self.entry.entry_id, "State recorder ended abnormally: {}", e);
            }
        }
        info!(entry_id = %self.entry.entry_id, "Config entry unloaded");
    }
}

/// Persist every snapshot a sensor writes. On `stop` the snapshots still
/// queued are saved before returning.
pub async fn record_states(
    store: Arc<dyn StateStore>,
    mut rx: broadcast::Receiver<SensorSnapshot>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Ok(snapshot) => save_snapshot(store.as_ref(), &snapshot).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "State recorder lagged behind sensor writes");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut stop => break,
        }
    }

    loop {
        match rx.try_recv() {
            Ok(snapshot) => save_snapshot(store.as_ref(), &snapshot).await,
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "State recorder lagged behind sensor writes");
            }
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => break,
        }
    }
}

async fn save_snapshot(store: &dyn StateStore, snapshot: &SensorSnapshot) {
    if let Err(e) = store.save_state(&snapshot.to_persisted()).await {
        error!(sensor = %snapshot.unique_id, "Failed to record state: {:#}", e);
    }
}
