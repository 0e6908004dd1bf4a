//! Shutdown signalling for engine tasks.
//!
//! The controller owns a `watch` channel; every worker and the maintenance
//! task hold a [`ShutdownSignal`] and `select!` on it at each suspension
//! point. A signal subscribed after shutdown was triggered observes it
//! immediately.

use tokio::sync::watch;

/// Coordinates shutdown across all engine tasks.
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Get a signal that resolves once shutdown is triggered.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger shutdown. Idempotent.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation token threaded through every suspension point.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is triggered, or the controller is dropped.
    pub async fn cancelled(&mut self) {
        // An error means the controller is gone, which also ends the engine.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn programmatic_shutdown_notifies_subscribers() {
        let controller = ShutdownController::new();
        let mut a = controller.subscribe();
        let mut b = controller.subscribe();
        controller.shutdown();
        a.cancelled().await;
        b.cancelled().await;
        assert!(a.is_shutdown());
    }

    #[tokio::test]
    async fn late_subscriber_sees_shutdown() {
        let controller = ShutdownController::new();
        controller.shutdown();
        let mut late = controller.subscribe();
        assert!(late.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), late.cancelled())
            .await
            .expect("already-triggered shutdown must resolve immediately");
    }

    #[tokio::test]
    async fn pending_until_triggered() {
        let controller = ShutdownController::new();
        let mut signal = controller.subscribe();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!controller.is_shutdown());
    }
}
