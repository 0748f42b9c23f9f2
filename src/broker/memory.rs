use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::Broker;
use crate::error::{LaunchError, Result};

#[derive(Debug, Default)]
struct Store {
    lists: HashMap<String, VecDeque<String>>,
    keys: HashMap<String, (String, Instant)>,
    published: Vec<(String, String)>,
}

/// Process-local broker. Backs the test suite and single-host setups.
///
/// Key expiry follows `tokio::time`, so paused-clock tests can advance past a
/// heartbeat TTL without sleeping.
#[derive(Debug)]
pub struct InMemoryBroker {
    store: Mutex<Store>,
    pushed: Notify,
    available: AtomicBool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            pushed: Notify::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing (or regaining) the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Snapshot of a queue, head first.
    pub async fn contents(&self, queue: &str) -> Vec<String> {
        self.store
            .lock()
            .await
            .lists
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages published so far, oldest first.
    pub async fn published(&self, channel: &str) -> Vec<String> {
        self.store
            .lock()
            .await
            .published
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LaunchError::BrokerUnavailable(
                "in-memory broker marked unavailable".to_string(),
            ))
        }
    }

    async fn take(&self, queue: &str) -> Option<String> {
        let mut store = self.store.lock().await;
        store.lists.get_mut(queue).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        self.check_available()?;
        self.store
            .lock()
            .await
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_available()?;
            // Register before checking so a push between the check and the
            // wait is not missed.
            let pushed = self.pushed.notified();
            if let Some(payload) = self.take(queue).await {
                return Ok(Some(payload));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, pushed).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.take(queue).await)
    }

    async fn move_one(&self, from: &str, to: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut store = self.store.lock().await;
        let Some(payload) = store.lists.get_mut(from).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        store
            .lists
            .entry(to.to_string())
            .or_default()
            .push_back(payload.clone());
        drop(store);
        self.pushed.notify_waiters();
        Ok(Some(payload))
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        self.check_available()?;
        Ok(self
            .store
            .lock()
            .await
            .lists
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let mut store = self.store.lock().await;
        match store.keys.get(key) {
            Some((_, expires_at)) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                store.keys.remove(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_available()?;
        self.store
            .lock()
            .await
            .keys
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        let mut store = self.store.lock().await;
        store.keys.remove(key);
        store.lists.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        self.check_available()?;
        self.store
            .lock()
            .await
            .published
            .push((channel.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fifo_order() {
        let broker = InMemoryBroker::new();
        broker.push("q", "a".to_string()).await.unwrap();
        broker.push("q", "b".to_string()).await.unwrap();
        assert_eq!(broker.len("q").await.unwrap(), 2);
        assert_eq!(broker.try_pop("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.try_pop("q").await.unwrap().as_deref(), Some("b"));
        assert_eq!(broker.try_pop("q").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pop_times_out_when_empty() {
        let broker = InMemoryBroker::new();
        let got = broker.pop("q", Duration::from_secs(2)).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn pop_wakes_on_push() {
        let broker = Arc::new(InMemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.pop("q", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.push("q", "job".to_string()).await.unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.as_deref(), Some("job"));
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire() {
        let broker = InMemoryBroker::new();
        broker
            .set_with_expiry("hb", "alive", Duration::from_secs(10))
            .await
            .unwrap();
        assert!(broker.exists("hb").await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!broker.exists("hb").await.unwrap());
    }

    #[tokio::test]
    async fn move_one_keeps_order() {
        let broker = InMemoryBroker::new();
        broker.push("to", "x".to_string()).await.unwrap();
        broker.push("from", "a".to_string()).await.unwrap();
        broker.push("from", "b".to_string()).await.unwrap();

        assert_eq!(broker.move_one("from", "to").await.unwrap().as_deref(), Some("a"));
        assert_eq!(broker.move_one("from", "to").await.unwrap().as_deref(), Some("b"));
        assert_eq!(broker.move_one("from", "to").await.unwrap(), None);
        assert_eq!(broker.contents("to").await, vec!["x", "a", "b"]);
    }

    #[tokio::test]
    async fn unavailable_broker_errors() {
        let broker = InMemoryBroker::new();
        broker.set_available(false);
        let err = broker.push("q", "x".to_string()).await.unwrap_err();
        assert!(err.is_transient());
        broker.set_available(true);
        assert!(broker.push("q", "x".to_string()).await.is_ok());
    }
}
