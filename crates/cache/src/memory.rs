use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{Cache, CacheError, CacheResult};

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local cache with per-entry expiry.
///
/// Expired entries are dropped lazily on access. Expiry follows the tokio
/// clock, so paused-time tests can advance past a TTL.
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
    closed: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Keys of all live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
        }

        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        self.ensure_open()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.ensure_open()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn incr(&self, key: &str) -> CacheResult<u64> {
        self.ensure_open()?;
        let now = Instant::now();

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: b"0".to_vec(),
            expires_at: None,
        });

        let current = if entry.is_expired(now) {
            0
        } else {
            std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.parse::<u64>().ok())
                .ok_or_else(|| CacheError::NotACounter {
                    key: key.to_string(),
                })?
        };

        let next = current + 1;
        entry.value = next.to_string().into_bytes();
        entry.expires_at = None;
        Ok(next)
    }

    async fn set_counter(&self, key: &str, value: u64) -> CacheResult<()> {
        self.ensure_open()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string().into_bytes(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.ensure_open()?;
        self.entries.clear();
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
        tracing::debug!(backend = self.backend(), "cache closed");
        Ok(())
    }
}
