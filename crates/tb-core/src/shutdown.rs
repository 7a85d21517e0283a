//! The single cancellation signal shared by the feed connection and the pump.
//!
//! Backed by a `watch` channel: every blocking point selects on
//! [`ShutdownSignal::wait`] instead of polling a flag.

use tokio::sync::watch;

/// Create a connected trigger / signal pair.
pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, ShutdownSignal { rx })
}

/// Raises the signal. Dropping the trigger also counts as raising it.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal { rx: self.tx.subscribe() }
    }
}

/// Observes the signal. Cheap to clone; each clone waits independently.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested (immediately if it already was).
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let (trigger, mut signal) = channel();
        assert!(!signal.is_triggered());
        let waiter = tokio::spawn(async move { signal.wait().await });
        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(trigger.is_triggered());
    }

    #[tokio::test]
    async fn late_subscriber_sees_earlier_trigger() {
        let (trigger, _signal) = channel();
        trigger.trigger();
        let mut late = trigger.subscribe();
        tokio::time::timeout(Duration::from_millis(100), late.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_trigger_releases_waiters() {
        let (trigger, mut signal) = channel();
        drop(trigger);
        tokio::time::timeout(Duration::from_millis(100), signal.wait()).await.unwrap();
    }
}
