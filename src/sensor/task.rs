//! Attach/remove lifecycle.
//!
//! `attach` subscribes to everything the sensor reacts to, runs the
//! bootstrap, then hands the subscriptions to one task. That task is the
//! only caller of the sensor's callbacks, so they never interleave.
//! Removing (or dropping) the handle ends the task and with it every
//! subscription and the poll timer.

use std::future::pending;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{PresenceSensor, SensorKind};
use crate::dispatcher::SignalReceiver;
use crate::events::ZoomEvent;

struct Subscriptions {
    options: Option<SignalReceiver>,
    refreshes: Option<broadcast::Receiver<()>>,
    events: Option<broadcast::Receiver<ZoomEvent>>,
}

/// Owns an attached sensor's task.
pub struct SensorHandle {
    sensor: Arc<PresenceSensor>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SensorHandle {
    pub fn sensor(&self) -> &Arc<PresenceSensor> {
        &self.sensor
    }

    /// Cancel every subscription and the timer, and wait for the task to
    /// finish its current callback.
    pub async fn remove(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(sensor = %self.sensor.unique_id(), "Sensor task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for SensorHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

impl PresenceSensor {
    /// Bootstrap the sensor and start reacting to option updates,
    /// coordinator refreshes, the poll timer and (authenticated user only)
    /// webhook events.
    pub async fn attach(self: Arc<Self>) -> SensorHandle {
        // Subscribe first: anything fired during bootstrap is still seen.
        let subscriptions = Subscriptions {
            options: Some(self.entry.subscribe_updates()),
            refreshes: Some(self.deps.coordinator.subscribe()),
            events: match self.kind {
                SensorKind::AuthenticatedUser => Some(self.deps.events.listen()),
                SensorKind::Contact { .. } => None,
            },
        };

        if !self.bootstrap().await {
            self.write_state();
        }

        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(Arc::clone(&self).run(subscriptions, rx));
        info!(sensor = %self.unique_id(), kind = ?self.kind, "Sensor attached");

        SensorHandle {
            sensor: self,
            shutdown: Some(tx),
            task: Some(task),
        }
    }

    async fn run(self: Arc<Self>, mut subs: Subscriptions, mut shutdown: oneshot::Receiver<()>) {
        let every = self.deps.scan_interval;
        let mut timer = time::interval_at(Instant::now() + every, every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = timer.tick() => self.poll().await,
                signal = next_signal(&mut subs.options) => match signal {
                    Some(()) => self.write_state(),
                    None => subs.options = None,
                },
                refresh = next_refresh(&mut subs.refreshes) => match refresh {
                    Some(()) => self.write_state(),
                    None => subs.refreshes = None,
                },
                event = next_event(&mut subs.events) => match event {
                    Some(event) => {
                        self.handle_event(&event);
                    }
                    None => subs.events = None,
                },
            }
        }

        debug!(sensor = %self.unique_id(), "Sensor removed");
    }
}

async fn next_signal(rx: &mut Option<SignalReceiver>) -> Option<()> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_refresh(rx: &mut Option<broadcast::Receiver<()>>) -> Option<()> {
    let Some(rx) = rx else {
        return pending().await;
    };
    match rx.recv().await {
        // A missed refresh still means "re-render".
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => Some(()),
        Err(broadcast::error::RecvError::Closed) => None,
    }
}

async fn next_event(rx: &mut Option<broadcast::Receiver<ZoomEvent>>) -> Option<ZoomEvent> {
    let Some(rx) = rx else {
        return pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event feed lagged, dropped Zoom events");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Fixture;
    use super::super::{PresenceSensor, SensorKind};
    use crate::adapters::mock::profile;
    use crate::config::EntryOptions;
    use crate::error::FetchError;
    use crate::events::ZoomEvent;
    use std::sync::Arc;
    use tokio::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_attach_renders_once_bootstrapped() {
        let fx = Fixture::new(Some("U1"), &["Available"]);
        fx.fetcher.push(Ok(profile("U1", "Available")));
        let sensor = Arc::new(fx.sensor(SensorKind::AuthenticatedUser));
        let mut rx = sensor.subscribe();

        let handle = Arc::clone(&sensor).attach().await;

        assert!(rx.try_recv().unwrap().is_on);
        assert!(rx.try_recv().is_err());
        handle.remove().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_renders_restored_state_once() {
        let fx = Fixture::new(None, &["Available"]);
        let sensor = Arc::new(fx.sensor(SensorKind::AuthenticatedUser));
        let mut rx = sensor.subscribe();

        let handle = Arc::clone(&sensor).attach().await;

        assert!(!rx.try_recv().unwrap().is_on);
        assert!(rx.try_recv().is_err());
        handle.remove().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drives_poll() {
        let fx = Fixture::new(Some("U1"), &["Available"]);
        fx.fetcher
            .push(Ok(profile("U1", "Available")))
            .push(Err(FetchError::Transient("timeout".into())));
        let handle = Arc::new(fx.sensor(SensorKind::AuthenticatedUser)).attach().await;
        let mut rx = handle.sensor().subscribe();

        let start = tokio::time::Instant::now();
        let snap = rx.recv().await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(!snap.available);
        assert!(snap.assumed_state);
        handle.remove().await;
    }

    #[tokio::test]
    async fn test_bus_event_reaches_authenticated_user() {
        let fx = Fixture::new(Some("U1"), &["Available"]);
        fx.fetcher.push(Ok(profile("U1", "Away")));
        let handle = Arc::new(fx.sensor(SensorKind::AuthenticatedUser)).attach().await;
        let mut rx = handle.sensor().subscribe();
        assert!(!handle.sensor().is_on());

        assert_eq!(fx.events.fire(ZoomEvent::presence("entry-1", "U1", "Available")), 1);

        let snap = rx.recv().await.unwrap();
        assert!(snap.is_on);
        assert_eq!(snap.attributes.unwrap()["status"], "Available");
        handle.remove().await;
    }

    #[tokio::test]
    async fn test_contact_does_not_listen_to_bus() {
        let fx = Fixture::new(None, &["Available"]);
        fx.fetcher.push(Ok(profile("C9", "Away")));
        let handle = Arc::new(fx.sensor(SensorKind::Contact { id: "C9".into() }))
            .attach()
            .await;

        assert_eq!(fx.events.fire(ZoomEvent::presence("entry-1", "C9", "Available")), 0);
        handle.remove().await;
    }

    #[tokio::test]
    async fn test_option_update_rerenders() {
        let fx = Fixture::new(Some("U1"), &["Available"]);
        fx.fetcher.push(Ok(profile("U1", "Away")));
        let handle = Arc::new(fx.sensor(SensorKind::AuthenticatedUser)).attach().await;
        let mut rx = handle.sensor().subscribe();

        fx.entry.update_options(EntryOptions {
            connected_statuses: vec!["Away".into()],
        });

        assert!(rx.recv().await.unwrap().is_on);
        handle.remove().await;
    }

    #[tokio::test]
    async fn test_coordinator_refresh_rerenders() {
        let fx = Fixture::new(None, &[]);
        let handle = Arc::new(fx.sensor(SensorKind::AuthenticatedUser)).attach().await;
        let mut rx = handle.sensor().subscribe();

        fx.fetcher.push_own(Ok(profile("me", "Available")));
        fx.coordinator.refresh().await.unwrap();

        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.attributes.unwrap()["id"], "me");
        handle.remove().await;
    }

    #[tokio::test]
    async fn test_remove_releases_every_subscription() {
        let fx = Fixture::new(Some("U1"), &[]);
        fx.fetcher.push(Ok(profile("U1", "Away")));
        let sensor: Arc<PresenceSensor> = Arc::new(fx.sensor(SensorKind::AuthenticatedUser));
        let handle = Arc::clone(&sensor).attach().await;

        handle.remove().await;

        assert_eq!(fx.events.fire(ZoomEvent::presence("entry-1", "U1", "Available")), 0);
        assert_eq!(sensor.zoom_event_state().as_deref(), Some("Away"));
        assert_eq!(Arc::strong_count(&sensor), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_aborts_task() {
        let fx = Fixture::new(Some("U1"), &[]);
        fx.fetcher.push(Ok(profile("U1", "Away")));
        let handle = Arc::new(fx.sensor(SensorKind::AuthenticatedUser)).attach().await;
        drop(handle);

        let mut listeners = usize::MAX;
        for _ in 0..20 {
            tokio::task::yield_now().await;
            listeners = fx.events.fire(ZoomEvent::presence("entry-1", "U1", "Away"));
            if listeners == 0 {
                break;
            }
        }
        assert_eq!(listeners, 0);
    }
}
