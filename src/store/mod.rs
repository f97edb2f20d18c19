//! Key-Value Store
//!
//! The shared state (run records, best scores, ranked sets, proof tokens)
//! lives behind [`KvStore`]. There are no transactions; every caller treats
//! each command as independent and last-writer-wins.
//!
//! ## Implementations
//!
//! - [`MemoryStore`]: in-process maps, used for tests and single-node play
//! - [`RemoteStore`]: Redis REST service (Upstash-compatible)

pub mod keys;
pub mod memory;
pub mod remote;
pub mod runs;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;
pub use remote::RemoteStore;
pub use runs::RunStore;

/// Store failures. All of them degrade a feature rather than fail a request.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or not configured.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Stored value could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
    /// Backend answered with an error or an unexpected shape.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Shared store handle.
pub type SharedStore = Arc<dyn KvStore>;

/// Minimal Redis-like command set.
///
/// Ranked sets order members by score descending; equal scores put the most
/// recently updated member first.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a string value.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value, replacing any existing value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Insert or update a ranked-set member.
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<(), StoreError>;

    /// Score of a member.
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError>;

    /// 0-based position of a member, highest score first.
    async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError>;

    /// Members at positions `start..=stop`, highest score first.
    async fn zrevrange_with_scores(
        &self,
        key: &str,
        start: usize,
        stop: usize,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    /// Members with `min <= score <= max`, highest score first.
    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError>;

    /// Set the expiry of an existing key. Returns false if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// Store that refuses every command. Backs `STORE_BACKEND=disabled`, where
/// every stateful feature runs degraded.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledStore;

#[async_trait]
impl KvStore for DisabledStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(disabled())
    }

    async fn set(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        Err(disabled())
    }

    async fn zadd(&self, _key: &str, _score: f64, _member: &str) -> Result<(), StoreError> {
        Err(disabled())
    }

    async fn zscore(&self, _key: &str, _member: &str) -> Result<Option<f64>, StoreError> {
        Err(disabled())
    }

    async fn zrevrank(&self, _key: &str, _member: &str) -> Result<Option<u64>, StoreError> {
        Err(disabled())
    }

    async fn zrevrange_with_scores(
        &self,
        _key: &str,
        _start: usize,
        _stop: usize,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        Err(disabled())
    }

    async fn zrangebyscore(
        &self,
        _key: &str,
        _min: f64,
        _max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        Err(disabled())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(disabled())
    }
}

fn disabled() -> StoreError {
    StoreError::Unavailable("store disabled".into())
}
