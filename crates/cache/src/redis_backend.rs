use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{Cmd, Value};
use tokio::sync::RwLock;

use crate::{Cache, CacheError, CacheResult};

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Redis-backed cache sharing one multiplexed, auto-reconnecting connection.
pub struct RedisCache {
    manager: RwLock<Option<ConnectionManager>>,
}

impl RedisCache {
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;

        tracing::info!(target: "libris-cache", "connected to redis");

        Ok(Self {
            manager: RwLock::new(Some(manager)),
        })
    }

    async fn connection(&self) -> CacheResult<ConnectionManager> {
        self.manager.read().await.clone().ok_or(CacheError::Closed)
    }

    async fn run(&self, cmd: &Cmd) -> CacheResult<Value> {
        let mut conn = self.connection().await?;
        Ok(conn.req_packed_command(cmd).await?)
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value = self.run(redis::cmd("GET").arg(key)).await?;
        Ok(redis::from_redis_value(&value)?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        // PX rejects zero
        let millis = ttl.as_millis().clamp(1, u64::MAX as u128) as u64;
        self.run(redis::cmd("SET").arg(key).arg(value).arg("PX").arg(millis))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.run(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<u64> {
        let value = self
            .run(redis::cmd("INCR").arg(key))
            .await
            .map_err(|err| match err {
                CacheError::Unavailable(message) if message.contains("not an integer") => {
                    CacheError::NotACounter {
                        key: key.to_string(),
                    }
                }
                other => other,
            })?;
        Ok(redis::from_redis_value(&value)?)
    }

    async fn set_counter(&self, key: &str, value: u64) -> CacheResult<()> {
        self.run(redis::cmd("SET").arg(key).arg(value)).await?;
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.run(&redis::cmd("FLUSHDB")).await?;
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        // Dropping the last manager handle shuts the connection down.
        if self.manager.write().await.take().is_some() {
            tracing::info!(target: "libris-cache", "redis connection closed");
        }
        Ok(())
    }
}
