//! Cooperative shutdown signal.
//!
//! The supervisor hands a [`ShutdownListener`] to each worker. Workers race every pacing
//! sleep, read and cooldown against [`ShutdownListener::cancelled`], and still run their
//! cleanup (payload power-off, idle mode) before returning.

use tokio::sync::watch;

/// Sending half: trips the shutdown for every listener.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into each worker.
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a signal and its first listener.
    pub fn new() -> (Self, ShutdownListener) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, ShutdownListener { rx })
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Another listener for the same signal.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownListener {
    /// A listener that never fires.
    pub fn never() -> Self {
        // A closed channel that never saw `true` keeps `cancelled` pending
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is requested.
    ///
    /// If the signal is dropped without firing, this never resolves.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn listeners_observe_trigger() {
        let (signal, mut first) = ShutdownSignal::new();
        let mut second = signal.listener();
        assert!(!first.is_cancelled());

        signal.trigger();
        first.cancelled().await;
        second.cancelled().await;
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_signal_never_fires() {
        let (signal, mut listener) = ShutdownSignal::new();
        drop(signal);
        let result = tokio::time::timeout(Duration::from_millis(20), listener.cancelled()).await;
        assert!(result.is_err());
        assert!(!listener.is_cancelled());
    }

    #[tokio::test]
    async fn never_listener_stays_quiet() {
        let mut listener = ShutdownListener::never();
        let result = tokio::time::timeout(Duration::from_millis(20), listener.cancelled()).await;
        assert!(result.is_err());
    }
}
