//! Run Record Store
//!
//! One JSON record per run under `game:{runId}:state`. Every write replaces
//! the whole record and resets the expiry. An expired run reads as `None`,
//! exactly like one that never existed.

use std::time::Duration;

use tracing::debug;

use crate::game::run::RunRecord;
use super::{keys, SharedStore, StoreError};

/// Run record persistence.
#[derive(Clone)]
pub struct RunStore {
    store: SharedStore,
    ttl: Duration,
}

impl RunStore {
    /// Store with the default one-hour expiry.
    pub fn new(store: SharedStore) -> Self {
        Self::with_ttl(store, keys::RUN_TTL)
    }

    /// Store with a custom expiry.
    pub fn with_ttl(store: SharedStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Expiry applied on every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist a new record.
    pub async fn create(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.write(record).await
    }

    /// Load a record. Expired and unknown runs are both `None`.
    pub async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        match self.store.get(&keys::run_state(run_id)).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Replace a record and refresh its expiry.
    pub async fn replace(&self, record: &RunRecord) -> Result<(), StoreError> {
        self.write(record).await
    }

    async fn write(&self, record: &RunRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.store
            .set(&keys::run_state(&record.run_id), &json, Some(self.ttl))
            .await?;
        debug!(run_id = %record.run_id, round = record.round_number, "run record written");
        Ok(())
    }
}

impl std::fmt::Debug for RunStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStore").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::clock::ManualClock;
    use crate::game::catalog::test_support::item;
    use crate::game::run::Guess;
    use crate::store::{DisabledStore, MemoryStore};

    fn runs() -> (RunStore, ManualClock) {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        (RunStore::new(store), clock)
    }

    fn record() -> RunRecord {
        RunRecord::new("run-1", "s1", "alice", 0, &item("a", 1.0), &item("b", 2.0))
    }

    #[tokio::test]
    async fn test_create_get_replace() {
        let (runs, _) = runs();
        assert_eq!(runs.get("run-1").await.unwrap(), None);

        let mut run = record();
        runs.create(&run).await.unwrap();
        assert_eq!(runs.get("run-1").await.unwrap(), Some(run.clone()));

        run.apply_correct(Guess::Up, 1_000, "c");
        runs.replace(&run).await.unwrap();
        assert_eq!(runs.get("run-1").await.unwrap().unwrap().current_streak, 1);
    }

    #[tokio::test]
    async fn test_expiry_reads_as_absent() {
        let (runs, clock) = runs();
        runs.create(&record()).await.unwrap();

        clock.advance(Duration::from_secs(3_599));
        assert!(runs.get("run-1").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(runs.get("run-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_refreshes_expiry() {
        let (runs, clock) = runs();
        runs.create(&record()).await.unwrap();
        clock.advance(Duration::from_secs(3_000));
        runs.replace(&record()).await.unwrap();
        clock.advance(Duration::from_secs(3_000));
        assert!(runs.get("run-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store_propagates() {
        let runs = RunStore::new(Arc::new(DisabledStore));
        assert!(matches!(runs.get("run-1").await, Err(StoreError::Unavailable(_))));
    }
}
