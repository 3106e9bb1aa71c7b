//! TTL-bounded snapshot cache.
//!
//! One cache per aggregator kind holds the latest published snapshot as an
//! immutable `Arc`. Readers clone the `Arc` under a read lock and never see
//! a half-written snapshot; publishers swap it under the write lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::RwLock;
use tracing::debug;

/// A published view plus when it was generated.
#[derive(Debug)]
pub struct CacheSnapshot<T> {
    pub payload: Vec<T>,
    pub generated_at: DateTime<Utc>,
    built_at: Instant,
}

impl<T> CacheSnapshot<T> {
    pub fn new(payload: Vec<T>) -> Self {
        Self {
            payload,
            generated_at: Utc::now(),
            built_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }

    /// RFC 3339 generation stamp with microsecond precision.
    pub fn generated_at_rfc3339(&self) -> String {
        self.generated_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// Whether a read was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Caller overrides for a cached read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Always rebuild; the read reports MISS.
    pub refresh: bool,
    /// Rebuild if the snapshot is older than this, instead of the TTL.
    pub max_age: Option<Duration>,
}

impl ReadOptions {
    pub fn refresh() -> Self {
        Self {
            refresh: true,
            max_age: None,
        }
    }
}

/// Result of a cached read.
#[derive(Debug)]
pub struct CachedRead<T> {
    pub snapshot: Arc<CacheSnapshot<T>>,
    pub status: CacheStatus,
}

/// Latest snapshot of one aggregator kind.
pub struct ResponseCache<T> {
    name: &'static str,
    ttl: Duration,
    slot: RwLock<Option<Arc<CacheSnapshot<T>>>>,
}

impl<T> ResponseCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// The live snapshot regardless of age.
    pub async fn current(&self) -> Option<Arc<CacheSnapshot<T>>> {
        self.slot.read().await.clone()
    }

    /// The live snapshot if `options` allow serving it.
    pub async fn servable(&self, options: &ReadOptions) -> Option<Arc<CacheSnapshot<T>>> {
        if options.refresh {
            return None;
        }
        let snapshot = self.current().await?;
        let age = snapshot.age();
        let fresh = match options.max_age {
            Some(max_age) => age <= max_age,
            None => age < self.ttl,
        };
        if fresh {
            Some(snapshot)
        } else {
            debug!(cache = self.name, age_ms = age.as_millis() as u64, "cached snapshot stale");
            None
        }
    }

    /// Replace the live snapshot.
    pub async fn publish(&self, payload: Vec<T>) -> Arc<CacheSnapshot<T>> {
        let snapshot = Arc::new(CacheSnapshot::new(payload));
        *self.slot.write().await = Some(Arc::clone(&snapshot));
        debug!(
            cache = self.name,
            rows = snapshot.payload.len(),
            generated_at = %snapshot.generated_at_rfc3339(),
            "snapshot published"
        );
        snapshot
    }
}
