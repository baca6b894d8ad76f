//! In-memory Store Repository
//!
//! Keeps records in a map and simulates a single pooled connection so dry
//! runs and tests observe the same pool events a real store would emit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{
    sample_ids, DataStoreConfig, RepositoryError, RepositoryFactory, StoreRecord,
    StoreRepository,
};
use crate::stats::{PoolEvent, PoolMonitor};

/// Map-backed repository
pub struct InMemoryRepository {
    records: RwLock<HashMap<String, StoreRecord>>,
    valid_ids: RwLock<Arc<Vec<String>>>,
    monitor: PoolMonitor,
    rng: Mutex<StdRng>,
    query_delay: Duration,
    fail_queries: AtomicBool,
    connected: AtomicBool,
    closed: AtomicBool,
    query_count: AtomicU64,
}

impl InMemoryRepository {
    pub fn new(monitor: PoolMonitor) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            valid_ids: RwLock::new(Arc::new(Vec::new())),
            monitor,
            rng: Mutex::new(StdRng::from_entropy()),
            query_delay: Duration::ZERO,
            fail_queries: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            query_count: AtomicU64::new(0),
        }
    }

    /// Seed the sampling RNG for reproducible reads
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    /// Simulated server time per read
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Make every read fail until switched off
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::Relaxed);
    }

    /// Stored records keyed by id
    pub fn snapshot(&self) -> HashMap<String, StoreRecord> {
        self.records.read().clone()
    }

    /// Simulated checkout; the guard returns the connection on drop
    fn checkout(&self) -> Result<Checkout<'_>, RepositoryError> {
        if self.closed.load(Ordering::Relaxed) {
            (self.monitor)(PoolEvent::GetFailed {
                reason: "pool closed".to_string(),
            });
            return Err(RepositoryError::Closed);
        }
        if !self.connected.swap(true, Ordering::Relaxed) {
            (self.monitor)(PoolEvent::ConnectionCreated);
        }
        (self.monitor)(PoolEvent::GetSucceeded);
        Ok(Checkout { monitor: &self.monitor })
    }

    async fn read(&self, ids: Vec<String>) -> Result<Vec<StoreRecord>, RepositoryError> {
        let _conn = self.checkout()?;
        if !self.query_delay.is_zero() {
            tokio::time::sleep(self.query_delay).await;
        }

        if self.fail_queries.load(Ordering::Relaxed) {
            return Err(RepositoryError::QueryFailed("injected failure".to_string()));
        }

        let records = self.records.read();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }
}

#[async_trait]
impl StoreRepository for InMemoryRepository {
    async fn insert(&self, records: &[StoreRecord]) -> Result<(), RepositoryError> {
        let _conn = self.checkout()?;
        let mut stored = self.records.write();
        for record in records {
            stored.insert(record.store_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let _conn = self.checkout()?;
        let count = self.records.read().len() as i64;
        Ok(count)
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        let _conn = self.checkout()?;
        self.records.write().clear();
        Ok(())
    }

    fn set_valid_ids(&self, ids: Vec<String>) {
        *self.valid_ids.write() = Arc::new(ids);
    }

    fn seed_sampler(&self, seed: u64) {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
    }

    async fn get_stores(
        &self,
        size: usize,
        _query_timeout_ms: u64,
        context_timeout_ms: u64,
    ) -> Result<Vec<StoreRecord>, RepositoryError> {
        let ids = {
            let valid_ids = self.valid_ids.read().clone();
            let mut rng = self.rng.lock();
            sample_ids(&valid_ids, size, &mut *rng)?
        };

        self.query_count.fetch_add(1, Ordering::Relaxed);

        tokio::time::timeout(Duration::from_millis(context_timeout_ms), self.read(ids))
            .await
            .map_err(|_| RepositoryError::Timeout {
                millis: context_timeout_ms,
            })?
    }

    fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::Relaxed) && self.connected.load(Ordering::Relaxed) {
            (self.monitor)(PoolEvent::ConnectionClosed);
        }
    }
}

struct Checkout<'a> {
    monitor: &'a PoolMonitor,
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        (self.monitor)(PoolEvent::ConnectionReturned);
    }
}

/// Hands out [`InMemoryRepository`] instances
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepositoryFactory {
    seed: Option<u64>,
    query_delay: Duration,
}

impl InMemoryRepositoryFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Build a repository without going through the trait object
    pub fn build(&self, monitor: PoolMonitor) -> InMemoryRepository {
        let repository = InMemoryRepository::new(monitor).with_query_delay(self.query_delay);
        match self.seed {
            Some(seed) => repository.with_seed(seed),
            None => repository,
        }
    }
}

#[async_trait]
impl RepositoryFactory for InMemoryRepositoryFactory {
    async fn connect(
        &self,
        config: &DataStoreConfig,
        monitor: PoolMonitor,
    ) -> Result<Arc<dyn StoreRepository>, RepositoryError> {
        tracing::info!(
            database = %config.db_name,
            table = %config.collection_name,
            "Using in-memory store"
        );
        Ok(Arc::new(self.build(monitor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::PoolStats;

    fn record(id: &str) -> StoreRecord {
        StoreRecord {
            store_id: id.to_string(),
            name: format!("name: {}", id),
            huge_value: "payload".to_string(),
        }
    }

    fn repository() -> (Arc<PoolStats>, InMemoryRepository) {
        let stats = Arc::new(PoolStats::new());
        let repository = InMemoryRepository::new(stats.monitor()).with_seed(42);
        (stats, repository)
    }

    #[tokio::test]
    async fn test_insert_count_clear() {
        let (_, repo) = repository();
        repo.insert(&[record("a"), record("b")]).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 2);

        repo.clear().await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_get_stores_without_valid_ids_fails_cleanly() {
        let (_, repo) = repository();
        let result = repo.get_stores(100, 100, 200).await;

        assert!(matches!(result, Err(RepositoryError::NoValidIds)));
        assert_eq!(repo.query_count(), 0);
    }

    #[tokio::test]
    async fn test_get_stores_samples_seeded_records() {
        let (stats, repo) = repository();
        repo.insert(&[record("a"), record("b")]).await.unwrap();
        repo.set_valid_ids(vec!["a".to_string(), "b".to_string()]);

        let stores = repo.get_stores(10, 100, 200).await.unwrap();
        assert_eq!(stores.len(), 10);
        assert_eq!(repo.query_count(), 1);

        let snap = stats.snapshot();
        assert_eq!(snap.created, 1);
        assert_eq!(snap.in_use, 0);
        assert_eq!(snap.gets_ok, snap.returned);
    }

    #[tokio::test]
    async fn test_seeded_sampler_repeats_reads() {
        let ids: Vec<String> = (0..50).map(|i| format!("id{}", i)).collect();
        let records: Vec<StoreRecord> = ids.iter().map(|id| record(id)).collect();

        let mut reads = Vec::new();
        for _ in 0..2 {
            let repo = InMemoryRepository::new(Arc::new(PoolStats::new()).monitor());
            repo.insert(&records).await.unwrap();
            repo.set_valid_ids(ids.clone());
            repo.seed_sampler(9);

            let stores = repo.get_stores(20, 100, 200).await.unwrap();
            reads.push(stores.into_iter().map(|s| s.store_id).collect::<Vec<_>>());
        }

        assert_eq!(reads[0], reads[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_query_hits_context_timeout() {
        let stats = Arc::new(PoolStats::new());
        let repo = InMemoryRepository::new(stats.monitor())
            .with_query_delay(Duration::from_millis(500));
        repo.set_valid_ids(vec!["a".to_string()]);

        let result = repo.get_stores(1, 100, 200).await;
        assert!(matches!(result, Err(RepositoryError::Timeout { millis: 200 })));

        let snap = stats.snapshot();
        assert_eq!(snap.in_use, 0);
        assert_eq!(snap.returned, 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (_, repo) = repository();
        repo.set_valid_ids(vec!["a".to_string()]);
        repo.set_fail_queries(true);

        assert!(matches!(
            repo.get_stores(1, 100, 200).await,
            Err(RepositoryError::QueryFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_repository_rejects_checkout() {
        let (stats, repo) = repository();
        repo.count().await.unwrap();
        repo.close().await;

        assert!(matches!(repo.count().await, Err(RepositoryError::Closed)));
        let snap = stats.snapshot();
        assert_eq!(snap.closed, 1);
        assert_eq!(snap.failures.get("pool closed"), Some(&1));
    }
}
