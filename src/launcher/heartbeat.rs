use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

use crate::broker::Broker;
use crate::error::Result;

/// Liveness key a launcher keeps refreshed while it is polling.
///
/// The key expires after `ttl`, so a launcher that stops refreshing it is
/// seen as offline by the manager's next tick.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    key: String,
    ttl: Duration,
    interval: Duration,
    last_beat: Option<Instant>,
}

impl Heartbeat {
    pub fn new(key: impl Into<String>, ttl: Duration, interval: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
            interval,
            last_beat: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True when the key has never been set or the refresh interval elapsed.
    pub fn due(&self) -> bool {
        self.last_beat
            .map_or(true, |last| last.elapsed() >= self.interval)
    }

    /// Time left before the next refresh is due, or `None` before the first
    /// beat.
    pub fn until_due(&self) -> Option<Duration> {
        self.last_beat
            .map(|last| self.interval.saturating_sub(last.elapsed()))
    }

    pub async fn beat(&mut self, broker: &dyn Broker) -> Result<()> {
        broker
            .set_with_expiry(&self.key, &Utc::now().to_rfc3339(), self.ttl)
            .await?;
        self.last_beat = Some(Instant::now());
        tracing::trace!(key = %self.key, "Heartbeat refreshed");
        Ok(())
    }

    /// Remove the key so the manager requeues pending work on its next tick
    /// instead of waiting out the TTL.
    pub async fn clear(&mut self, broker: &dyn Broker) -> Result<()> {
        broker.delete(&self.key).await?;
        self.last_beat = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    #[tokio::test(start_paused = true)]
    async fn beat_sets_key_until_ttl() {
        let broker = InMemoryBroker::new();
        let mut hb = Heartbeat::new(
            "launcher:alive:w1",
            Duration::from_secs(30),
            Duration::from_secs(10),
        );
        assert!(hb.due());

        hb.beat(&broker).await.unwrap();
        assert!(!hb.due());
        assert!(broker.exists("launcher:alive:w1").await.unwrap());

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(hb.due());

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(!broker.exists("launcher:alive:w1").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn until_due_counts_down() {
        let broker = InMemoryBroker::new();
        let mut hb = Heartbeat::new("k", Duration::from_secs(30), Duration::from_secs(10));
        assert_eq!(hb.until_due(), None);

        hb.beat(&broker).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(hb.until_due(), Some(Duration::from_secs(6)));

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(hb.until_due(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn clear_removes_key() {
        let broker = InMemoryBroker::new();
        let mut hb = Heartbeat::new("k", Duration::from_secs(30), Duration::from_secs(10));
        hb.beat(&broker).await.unwrap();
        hb.clear(&broker).await.unwrap();
        assert!(!broker.exists("k").await.unwrap());
        assert!(hb.due());
    }
}
