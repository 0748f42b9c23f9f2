//! The shared list/key store every process coordinates through.
//!
//! The dispatcher, launchers and producers never share memory. They only
//! see the operations below:
//!
//! - **Lists**: `push` appends at the tail, `pop`/`try_pop` take from the
//!   head, so a single queue is FIFO.
//! - **Keys**: `set_with_expiry` and `exists` carry launcher heartbeats.
//! - **Channels**: `publish` is fire-and-forget notification for results.
//!
//! Every failure to reach the store surfaces as
//! [`LaunchError::BrokerUnavailable`](crate::error::LaunchError::BrokerUnavailable).

pub mod memory;
pub mod redis_broker;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::InMemoryBroker;
pub use redis_broker::RedisBroker;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a payload to the tail of `queue`.
    async fn push(&self, queue: &str, payload: String) -> Result<()>;

    /// Take the head of `queue`, waiting up to `timeout` for one to arrive.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    /// Take the head of `queue` without waiting.
    async fn try_pop(&self, queue: &str) -> Result<Option<String>>;

    /// Atomically move the head of `from` to the tail of `to`, returning the
    /// payload moved. Either both lists change or neither does.
    async fn move_one(&self, from: &str, to: &str) -> Result<Option<String>>;

    async fn len(&self, queue: &str) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
}

/// Pop everything currently on `queue`, in order.
pub async fn drain(broker: &dyn Broker, queue: &str) -> Result<Vec<String>> {
    let mut drained = Vec::new();
    while let Some(payload) = broker.try_pop(queue).await? {
        drained.push(payload);
    }
    Ok(drained)
}

/// Move every pending payload from `from` to the tail of `to`, unchanged.
/// Returns how many were moved.
///
/// Each payload moves in one broker operation, so a failure part-way leaves
/// the rest on `from` for the next attempt.
pub async fn transfer(broker: &dyn Broker, from: &str, to: &str) -> Result<usize> {
    let mut moved = 0;
    while broker.move_one(from, to).await?.is_some() {
        moved += 1;
    }
    Ok(moved)
}
