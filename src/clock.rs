//! Injectable sleeping.
//!
//! The sampling loop paces reads and waits out restart cooldowns through a [`Sleeper`],
//! so tests can run whole sessions without waiting in real time.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Something that can wait for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Wait for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time, via `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records every requested sleep and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All requested sleeps, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        tokio::task::yield_now().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sleeper_does_not_wait() {
        let sleeper = RecordingSleeper::new();
        let start = std::time::Instant::now();
        sleeper.sleep(Duration::from_secs(30)).await;
        sleeper.sleep(Duration::from_millis(200)).await;

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(
            sleeper.sleeps(),
            vec![Duration::from_secs(30), Duration::from_millis(200)]
        );
    }
}
