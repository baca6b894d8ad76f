//! PostgreSQL Store Repository
//!
//! sqlx-backed implementation of [`StoreRepository`]. Connection creation
//! comes from the sqlx `after_connect` hook, gets and returns from our own
//! checkout guard. sqlx drops idle and expired connections silently, so
//! closes are derived by comparing created connections with the pool size.

use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, PgConnection, PgPool, Postgres};

use super::{
    sample_ids, DataStoreConfig, RepositoryError, RepositoryFactory, StoreRecord,
    StoreRepository, TableName,
};
use crate::db;
use crate::stage::MAX_QUERY_TIMEOUT_MS;
use crate::stats::{PoolEvent, PoolMonitor};

/// Records per bulk insert statement
const INSERT_CHUNK: usize = 1000;

/// Repository over a PostgreSQL table
pub struct PgStoreRepository {
    pool: PgPool,
    table: TableName,
    monitor: PoolMonitor,
    ledger: Arc<ConnectionLedger>,
    query_count: AtomicU64,
    valid_ids: RwLock<Arc<Vec<String>>>,
    rng: Mutex<StdRng>,
}

impl PgStoreRepository {
    /// Build the pool, verify connectivity and bootstrap the schema
    pub async fn connect(
        config: &DataStoreConfig,
        monitor: PoolMonitor,
    ) -> Result<Self, RepositoryError> {
        let options = PgConnectOptions::from_str(&config.conn_string)?.database(&config.db_name);

        let ledger = Arc::new(ConnectionLedger::default());
        let on_created = monitor.clone();
        let created_ledger = Arc::clone(&ledger);
        let idle_timeout = (!config.idle_timeout.is_zero()).then_some(config.idle_timeout);

        let pool = PgPoolOptions::new()
            .min_connections(config.min_pool)
            .max_connections(config.max_pool)
            .idle_timeout(idle_timeout)
            .acquire_timeout(config.socket_timeout)
            .after_connect(move |_conn, _meta| {
                created_ledger.record_created();
                on_created(PoolEvent::ConnectionCreated);
                Box::pin(async { Ok(()) })
            })
            .connect_lazy_with(options);

        let repository = Self {
            pool,
            table: config.collection_name.clone(),
            monitor,
            ledger,
            query_count: AtomicU64::new(0),
            valid_ids: RwLock::new(Arc::new(Vec::new())),
            rng: Mutex::new(StdRng::from_entropy()),
        };

        let mut conn = repository.acquire().await?;
        db::verify_connection(&mut conn).await?;
        db::ensure_schema(&mut conn, &repository.table).await?;
        drop(conn);

        tracing::info!(
            database = %config.db_name,
            table = %repository.table,
            "Database connection done"
        );

        Ok(repository)
    }

    /// Check out a connection, reporting the outcome to the monitor
    async fn acquire(&self) -> Result<Checkout<'_>, RepositoryError> {
        match self.pool.acquire().await {
            Ok(conn) => {
                (self.monitor)(PoolEvent::GetSucceeded);
                Ok(Checkout {
                    conn,
                    monitor: &self.monitor,
                })
            }
            Err(e) => {
                (self.monitor)(PoolEvent::GetFailed {
                    reason: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Emit a closed event for every connection the pool dropped since the
    /// last call
    fn report_closed(&self) {
        let closed = self.ledger.claim_closed(|| self.pool.size());
        for _ in 0..closed {
            (self.monitor)(PoolEvent::ConnectionClosed);
        }
    }

    async fn fetch_by_ids(
        &self,
        ids: &[String],
        query_timeout_ms: u64,
    ) -> Result<Vec<StoreRecord>, RepositoryError> {
        let mut conn = self.acquire().await?;
        let mut tx = conn.begin().await?;

        // SET does not accept bind parameters
        let statement_timeout = query_timeout_ms.min(MAX_QUERY_TIMEOUT_MS);
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", statement_timeout))
            .execute(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT store_id, name, huge_value FROM {} WHERE store_id = ANY($1)",
            self.table.quoted()
        );
        let rows: Vec<(String, String, String)> = sqlx::query_as(&sql)
            .bind(ids)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(|(store_id, name, huge_value)| StoreRecord {
                store_id,
                name,
                huge_value,
            })
            .collect())
    }
}

#[async_trait]
impl StoreRepository for PgStoreRepository {
    async fn insert(&self, records: &[StoreRecord]) -> Result<(), RepositoryError> {
        let sql = format!(
            r#"
            INSERT INTO {} (store_id, name, huge_value)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[])
            "#,
            self.table.quoted()
        );

        let mut conn = self.acquire().await?;
        let mut tx = conn.begin().await?;

        for chunk in records.chunks(INSERT_CHUNK) {
            let store_ids: Vec<String> = chunk.iter().map(|r| r.store_id.clone()).collect();
            let names: Vec<String> = chunk.iter().map(|r| r.name.clone()).collect();
            let values: Vec<String> = chunk.iter().map(|r| r.huge_value.clone()).collect();

            sqlx::query(&sql)
                .bind(store_ids)
                .bind(names)
                .bind(values)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let mut conn = self.acquire().await?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", self.table.quoted()))
            .fetch_one(&mut *conn)
            .await?;

        Ok(count)
    }

    async fn clear(&self) -> Result<(), RepositoryError> {
        let mut conn = self.acquire().await?;
        sqlx::query(&format!("TRUNCATE TABLE {}", self.table.quoted()))
            .execute(&mut *conn)
            .await?;
        db::ensure_schema(&mut conn, &self.table).await?;

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
        query_timeout_ms: u64,
        context_timeout_ms: u64,
    ) -> Result<Vec<StoreRecord>, RepositoryError> {
        let ids = {
            let valid_ids = self.valid_ids.read().clone();
            let mut rng = self.rng.lock();
            sample_ids(&valid_ids, size, &mut *rng)?
        };

        self.query_count.fetch_add(1, Ordering::Relaxed);

        tokio::time::timeout(
            Duration::from_millis(context_timeout_ms),
            self.fetch_by_ids(&ids, query_timeout_ms),
        )
        .await
        .map_err(|_| RepositoryError::Timeout {
            millis: context_timeout_ms,
        })?
    }

    fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    fn sync_pool_events(&self) {
        self.report_closed();
    }

    /// Waits for checked-out connections to come back, closes them all and
    /// reports every close not seen yet
    async fn close(&self) {
        self.pool.close().await;
        self.report_closed();
    }
}

// =========================================================================
// Connection bookkeeping
// =========================================================================

/// A pooled connection; reports itself returned when dropped
struct Checkout<'a> {
    conn: PoolConnection<Postgres>,
    monitor: &'a PoolMonitor,
}

impl Deref for Checkout<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &self.conn
    }
}

impl DerefMut for Checkout<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        (self.monitor)(PoolEvent::ConnectionReturned);
    }
}

/// Created and reported-closed connection counts
#[derive(Debug, Default)]
struct ConnectionLedger {
    created: AtomicU64,
    closed: AtomicU64,
}

impl ConnectionLedger {
    fn record_created(&self) {
        self.created.fetch_add(1, Ordering::AcqRel);
    }

    /// Claim the closes not reported yet.
    ///
    /// `live` is read after the created count so a connection opened in
    /// between is never mistaken for a closed one.
    fn claim_closed(&self, live: impl Fn() -> u32) -> u64 {
        let mut closed = self.closed.load(Ordering::Acquire);
        loop {
            let created = self.created.load(Ordering::Acquire);
            let missing = created
                .saturating_sub(closed)
                .saturating_sub(u64::from(live()));
            if missing == 0 {
                return 0;
            }

            match self.closed.compare_exchange(
                closed,
                closed + missing,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return missing,
                Err(current) => closed = current,
            }
        }
    }
}

/// Connects [`PgStoreRepository`] instances
#[derive(Debug, Clone, Copy, Default)]
pub struct PgStoreRepositoryFactory;

#[async_trait]
impl RepositoryFactory for PgStoreRepositoryFactory {
    async fn connect(
        &self,
        config: &DataStoreConfig,
        monitor: PoolMonitor,
    ) -> Result<Arc<dyn StoreRepository>, RepositoryError> {
        let repository = PgStoreRepository::connect(config, monitor).await?;
        Ok(Arc::new(repository))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(created: u64) -> ConnectionLedger {
        let ledger = ConnectionLedger::default();
        for _ in 0..created {
            ledger.record_created();
        }
        ledger
    }

    #[test]
    fn test_ledger_reports_connections_dropped_by_the_pool() {
        let ledger = ledger(5);

        // All five still pooled
        assert_eq!(ledger.claim_closed(|| 5), 0);

        // Idle reaper dropped three
        assert_eq!(ledger.claim_closed(|| 2), 3);
        assert_eq!(ledger.claim_closed(|| 2), 0);

        // Pool closed
        assert_eq!(ledger.claim_closed(|| 0), 2);
        assert_eq!(ledger.claim_closed(|| 0), 0);
    }

    #[test]
    fn test_ledger_ignores_connections_still_opening() {
        let ledger = ledger(1);

        // A second connection counts towards the size before it is created
        assert_eq!(ledger.claim_closed(|| 2), 0);

        ledger.record_created();
        assert_eq!(ledger.claim_closed(|| 2), 0);
        assert_eq!(ledger.claim_closed(|| 1), 1);
    }
}
