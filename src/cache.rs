// src/cache.rs

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};
use tracing::{debug, warn};

/// Identity of a memoized call: which loader, with which arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoKey {
    pub function: String,
    pub args: String,
}

impl MemoKey {
    /// Key on the canonical JSON encoding of `args`.
    pub fn new<A: Serialize + ?Sized>(function: &str, args: &A) -> Self {
        let args = match serde_json::to_string(args) {
            Ok(s) => s,
            Err(e) => {
                warn!(function, "unserializable memo arguments: {}", e);
                format!("<unserializable:{}>", e)
            }
        };
        Self {
            function: function.to_string(),
            args,
        }
    }
}

/// Expiry policy owned by the host. `ttl = None` keeps entries for the life of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CachePolicy {
    pub ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn forever() -> Self {
        Self { ttl: None }
    }

    /// Expire entries `secs` seconds after they load. Negative or
    /// out-of-range values are rejected.
    pub fn ttl_secs(secs: i64) -> Result<Self> {
        if secs < 0 {
            bail!("cache ttl must not be negative, got {}s", secs);
        }
        let ttl = Duration::try_seconds(secs)
            .ok_or_else(|| anyhow!("cache ttl of {}s is out of range", secs))?;
        Ok(Self { ttl: Some(ttl) })
    }
}

#[derive(Debug)]
struct MemoEntry<V> {
    value: Arc<V>,
    loaded_at: DateTime<Utc>,
}

/// Thread-safe memo table mapping `(function, args)` to a loaded value.
///
/// Reads share a lock; a miss runs the loader outside any lock and inserts
/// under the write lock, so two racing misses both load and the last insert
/// wins. Failed loads are never stored.
#[derive(Debug)]
pub struct MemoStore<V> {
    map: RwLock<HashMap<MemoKey, MemoEntry<V>>>,
    policy: CachePolicy,
}

impl<V> MemoStore<V> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn is_fresh(&self, entry: &MemoEntry<V>, now: DateTime<Utc>) -> bool {
        match self.policy.ttl {
            Some(ttl) => now - entry.loaded_at < ttl,
            None => true,
        }
    }

    /// Cached value for `key` if present and not expired.
    pub fn get(&self, key: &MemoKey) -> Option<Arc<V>> {
        let map = self.map.read().unwrap_or_else(|e| e.into_inner());
        map.get(key)
            .filter(|entry| self.is_fresh(entry, Utc::now()))
            .map(|entry| Arc::clone(&entry.value))
    }

    /// Return the cached value, or run `loader` and remember a successful result.
    pub fn get_or_load<E, F>(&self, key: &MemoKey, loader: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        // 1) Fast-path under the read lock
        if let Some(hit) = self.get(key) {
            debug!(function = %key.function, "memo hit");
            return Ok(hit);
        }

        // 2) Load without holding any lock
        debug!(function = %key.function, args = %key.args, "memo miss");
        let value = Arc::new(loader()?);

        // 3) Insert; a concurrent loader may have raced us, last writer wins
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.insert(
            key.clone(),
            MemoEntry {
                value: Arc::clone(&value),
                loaded_at: Utc::now(),
            },
        );
        Ok(value)
    }

    pub fn invalidate(&self, key: &MemoKey) -> bool {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        map.clear();
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut map = self.map.write().unwrap_or_else(|e| e.into_inner());
        let before = map.len();
        map.retain(|_, entry| match self.policy.ttl {
            Some(ttl) => now - entry.loaded_at < ttl,
            None => true,
        });
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Default for MemoStore<V> {
    fn default() -> Self {
        Self::new(CachePolicy::forever())
    }
}
