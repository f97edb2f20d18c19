//! In-process store.
//!
//! Expiry is checked lazily against the injected clock, so tests can expire
//! runs and tokens by advancing a `ManualClock`.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::clock::{Clock, SystemClock};
use super::{KvStore, StoreError};

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Option<u64>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at.map_or(true, |at| now_ms < at)
    }
}

#[derive(Debug, Clone, Copy)]
struct Member {
    score: f64,
    // Update sequence; higher wins ties
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, Expiring<String>>,
    zsets: HashMap<String, Expiring<HashMap<String, Member>>>,
    seq: u64,
}

impl Inner {
    fn live_zset(&self, key: &str, now_ms: u64) -> Option<&HashMap<String, Member>> {
        self.zsets
            .get(key)
            .filter(|entry| entry.is_live(now_ms))
            .map(|entry| &entry.value)
    }

    /// Members of a set, highest score first, most recent first on ties.
    fn ordered(&self, key: &str, now_ms: u64) -> Vec<(String, f64)> {
        let Some(set) = self.live_zset(key, now_ms) else {
            return Vec::new();
        };

        let mut members: Vec<(&String, &Member)> = set.iter().collect();
        members.sort_by(|(_, a), (_, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.seq.cmp(&a.seq))
        });
        members.into_iter().map(|(m, s)| (m.clone(), s.score)).collect()
    }
}

/// In-memory [`KvStore`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            clock,
        }
    }

    fn deadline(&self, ttl: Option<Duration>) -> Option<u64> {
        ttl.map(|ttl| self.clock.now_ms() + ttl.as_millis() as u64)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .strings
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = self.deadline(ttl);
        let mut inner = self.inner.write().await;
        inner.strings.insert(
            key.to_string(),
            Expiring { value: value.to_string(), expires_at },
        );
        Ok(())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let seq = inner.seq;

        let entry = inner
            .zsets
            .entry(key.to_string())
            .or_insert_with(|| Expiring { value: HashMap::new(), expires_at: None });
        if !entry.is_live(now) {
            *entry = Expiring { value: HashMap::new(), expires_at: None };
        }
        entry.value.insert(member.to_string(), Member { score, seq });
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        let now = self.clock.now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .live_zset(key, now)
            .and_then(|set| set.get(member))
            .map(|m| m.score))
    }

    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .ordered(key, now)
            .iter()
            .position(|(m, _)| m == member)
            .map(|idx| idx as u64))
    }

    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let now = self.clock.now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .ordered(key, now)
            .into_iter()
            .skip(start)
            .take(stop.saturating_sub(start) + 1)
            .collect())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        let now = self.clock.now_ms();
        let inner = self.inner.read().await;
        Ok(inner
            .ordered(key, now)
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let expires_at = self.deadline(Some(ttl));
        let mut inner = self.inner.write().await;

        if let Some(entry) = inner.strings.get_mut(key).filter(|e| e.is_live(now)) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        if let Some(entry) = inner.zsets.get_mut(key).filter(|e| e.is_live(now)) {
            entry.expires_at = expires_at;
            return Ok(true);
        }
        Ok(false)
    }
}
