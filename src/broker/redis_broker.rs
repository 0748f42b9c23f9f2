use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};

use super::Broker;
use crate::error::{LaunchError, Result};

/// How often a blocking pop re-checks an empty list.
const POP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Redis-backed broker. Lists carry jobs, `SETEX` keys carry heartbeats.
/// Needs Redis 6.2 or later for `LMOVE`.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisBroker")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

fn unavailable(op: &str, e: redis::RedisError) -> LaunchError {
    LaunchError::BrokerUnavailable(format!("Redis {} failed: {}", op, e))
}

impl RedisBroker {
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!(url, "Connecting to broker");

        let client = redis::Client::open(url).map_err(|e| {
            LaunchError::Configuration(format!("invalid broker url {}: {}", url, e))
        })?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("connect", e))?;

        tracing::info!("Connected to broker");
        Ok(Self { conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| unavailable("RPUSH", e))
    }

    // Polls LPOP instead of issuing BLPOP so no single call outlives the
    // connection's response timeout.
    async fn pop(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(payload) = self.try_pop(queue).await? {
                return Ok(Some(payload));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("LPOP")
            .arg(queue)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| unavailable("LPOP", e))
    }

    async fn move_one(&self, from: &str, to: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("LMOVE")
            .arg(from)
            .arg(to)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|e| unavailable("LMOVE", e))
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(queue)
            .query_async::<usize>(&mut conn)
            .await
            .map_err(|e| unavailable("LLEN", e))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        redis::cmd("EXISTS")
            .arg(key)
            .query_async::<bool>(&mut conn)
            .await
            .map_err(|e| unavailable("EXISTS", e))
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| unavailable("SETEX", e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| unavailable("DEL", e))
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| unavailable("PUBLISH", e))
    }
}
