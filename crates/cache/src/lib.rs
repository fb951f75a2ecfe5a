//! Key-value cache used in front of the durable book store.
//!
//! Backends store opaque bytes; typed access goes through [`CacheExt`], which
//! encodes values as JSON. A backend never interprets payloads except for
//! counters created by [`Cache::incr`], which are stored as decimal text so
//! they can also be read back with [`CacheExt::get_json`].

mod memory;
mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub use crate::memory::InMemoryCache;
pub use crate::redis_backend::RedisCache;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode cache payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode cache payload: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("value at `{key}` is not a counter")]
    NotACounter { key: String },

    #[error("cache is closed")]
    Closed,
}

impl CacheError {
    /// Payload problems, as opposed to the backend being unreachable.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, CacheError::Encode(_) | CacheError::Decode(_))
    }
}

/// Byte-level cache capability set.
///
/// `get` returns `Ok(None)` for a miss (absent or expired) and `Err` only
/// when the backend itself failed.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Short backend name used in logs.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomically increment the counter at `key`, creating it at zero first.
    /// Counters never expire.
    async fn incr(&self, key: &str) -> CacheResult<u64>;

    /// Overwrite the counter at `key`. Like [`Cache::incr`], it never expires.
    async fn set_counter(&self, key: &str, value: u64) -> CacheResult<()>;

    /// Drop every entry.
    async fn clear(&self) -> CacheResult<()>;

    /// Release the backend; later calls fail with [`CacheError::Closed`].
    async fn close(&self) -> CacheResult<()>;
}

/// JSON helpers layered on any [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    async fn get_json<T>(&self, key: &str) -> CacheResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(CacheError::Decode),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let bytes = serde_json::to_vec(value).map_err(CacheError::Encode)?;
        self.set(key, bytes, ttl).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Shelf {
        name: String,
        books: u32,
    }

    #[tokio::test]
    async fn json_helpers_work_through_trait_objects() {
        let cache: std::sync::Arc<dyn Cache> = std::sync::Arc::new(InMemoryCache::new());
        let shelf = Shelf {
            name: "classics".to_string(),
            books: 3,
        };

        cache
            .set_json("shelf", &shelf, Duration::from_secs(60))
            .await
            .unwrap();

        let loaded: Option<Shelf> = cache.get_json("shelf").await.unwrap();
        assert_eq!(loaded, Some(shelf));
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_decode_error() {
        let cache = InMemoryCache::new();
        cache
            .set("shelf", b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let result: CacheResult<Option<Shelf>> = cache.get_json("shelf").await;
        let err = result.unwrap_err();
        assert!(matches!(err, CacheError::Decode(_)));
        assert!(err.is_payload_error());
    }

    #[tokio::test]
    async fn counters_read_back_as_json_numbers() {
        let cache = InMemoryCache::new();
        cache.incr("version").await.unwrap();
        cache.incr("version").await.unwrap();

        let value: Option<u64> = cache.get_json("version").await.unwrap();
        assert_eq!(value, Some(2));
    }
}
