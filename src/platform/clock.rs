use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Time source for every wait in the supervisor.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic instant used for deadlines.
    fn now(&self) -> Instant;

    /// Wall-clock time used for timestamps.
    fn wall_time(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by `tokio::time`, so paused test runtimes control it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall_time(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_follows_paused_time() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(90)).await;
        assert!(clock.now() - start >= Duration::from_secs(90));
    }
}
