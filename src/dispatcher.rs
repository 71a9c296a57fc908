//! Named-signal dispatcher.
//!
//! A signal carries no data: it only tells its subscribers to re-read
//! whatever they render. Config entries use their `entry_id` as the
//! signal name when their options change.

use tokio::sync::broadcast;
use tracing::debug;

const DISPATCH_CAPACITY: usize = 64;

pub struct Dispatcher {
    tx: broadcast::Sender<String>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DISPATCH_CAPACITY);
        Self { tx }
    }

    /// Send `signal` to everyone connected to it.
    pub fn send(&self, signal: &str) {
        // No receivers is fine: nothing is rendering this signal yet.
        let _ = self.tx.send(signal.to_string());
    }

    /// Subscribe to one signal name.
    pub fn connect(&self, signal: &str) -> SignalReceiver {
        SignalReceiver {
            rx: self.tx.subscribe(),
            signal: signal.to_string(),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SignalReceiver {
    rx: broadcast::Receiver<String>,
    signal: String,
}

impl SignalReceiver {
    /// Wait for the next send of this receiver's signal. Returns `None`
    /// once the dispatcher has been dropped.
    pub async fn recv(&mut self) -> Option<()> {
        loop {
            match self.rx.recv().await {
                Ok(name) if name == self.signal => return Some(()),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Re-rendering is idempotent, so missed sends collapse into one.
                    debug!(signal = %self.signal, skipped, "Signal receiver lagged");
                    return Some(());
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_receiver_only_sees_its_signal() {
        let dispatcher = Dispatcher::new();
        let mut mine = dispatcher.connect("entry-1");

        dispatcher.send("entry-2");
        dispatcher.send("entry-1");

        assert_eq!(mine.recv().await, Some(()));
        let again = tokio::time::timeout(Duration::from_millis(20), mine.recv()).await;
        assert!(again.is_err(), "entry-2 must not wake an entry-1 receiver");
    }

    #[tokio::test]
    async fn test_receiver_ends_when_dispatcher_dropped() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.connect("entry-1");
        drop(dispatcher);
        assert_eq!(rx.recv().await, None);
    }
}
