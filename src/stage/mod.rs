//! Load Campaign Orchestration
//!
//! A [`Stage`] runs one campaign end to end:
//!
//! 1. Seeding: reset the store and insert the seed records
//! 2. Running: start producers and the initial workers, then add workers at
//!    every ramp step
//! 3. Cooling down: keep the full worker set busy for a fixed time
//! 4. Draining: stop producers and wait for the queue to empty
//! 5. Reporting: close the store and emit the final statistics
//!
//! Workers are never removed while a campaign runs.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::repository::{DataStoreConfig, RepositoryError, RepositoryFactory, StoreRepository};
use crate::stats::{CampaignStats, LatencySummary, PoolStats, PoolStatsSnapshot};

pub mod consumer;
pub mod id;
pub mod producer;
pub mod seed;

pub use consumer::{ReadSettings, Worker};
pub use producer::{EventToken, Producer, QUEUE_CAPACITY};

/// Interval between live statistics lines
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Pause between closing the store and computing final statistics
const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Largest query timeout a Postgres `statement_timeout` accepts
pub const MAX_QUERY_TIMEOUT_MS: u64 = i32::MAX as u64;

// =========================================================================
// Configuration
// =========================================================================

/// Load profile of a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Workers started with the producers
    pub workers_count: u32,

    /// Workers added at every ramp step
    pub workers_to_add: u32,

    /// Number of ramp steps
    pub increment_load: u32,

    /// Independent producers feeding the queue
    pub producers_count: u32,

    /// Target tokens per second, per producer
    pub msg_by_sec: u32,

    /// Seconds between ramp steps
    pub time_to_sleep_secs: u32,

    /// Cool-down after the last ramp step
    pub time_to_finish_secs: u32,

    /// Bound on a whole read call
    pub context_timeout_ms: u64,

    /// Server-side bound on a read query
    pub query_timeout_ms: u64,

    /// Seed for every random source in the campaign
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl CampaignConfig {
    /// Human-readable list of every zero-valued required field and
    /// out-of-range timeout
    pub fn validation_errors(&self) -> Vec<String> {
        let required = [
            (u64::from(self.workers_count), "Workers count is required"),
            (u64::from(self.workers_to_add), "Workers to add is required"),
            (u64::from(self.increment_load), "Increment load is required"),
            (u64::from(self.msg_by_sec), "Messages per second is required"),
            (u64::from(self.producers_count), "Producers' count is required"),
            (u64::from(self.time_to_sleep_secs), "Time to sleep is required"),
            (u64::from(self.time_to_finish_secs), "Time to finish is required"),
            (self.context_timeout_ms, "Context timeout is required"),
            (self.query_timeout_ms, "Query' timeout is required"),
        ];

        let mut errors: Vec<String> = required
            .iter()
            .filter(|(value, _)| *value == 0)
            .map(|(_, message)| message.to_string())
            .collect();

        if self.query_timeout_ms > MAX_QUERY_TIMEOUT_MS {
            errors.push(format!(
                "Query' timeout cannot exceed {} ms",
                MAX_QUERY_TIMEOUT_MS
            ));
        }

        errors
    }

    fn read_settings(&self) -> ReadSettings {
        ReadSettings {
            query_timeout_ms: self.query_timeout_ms,
            context_timeout_ms: self.context_timeout_ms,
        }
    }
}

// =========================================================================
// Phases, report, errors
// =========================================================================

/// Lifecycle phase of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignPhase {
    Seeding,
    Running,
    CoolingDown,
    Draining,
    Reporting,
}

impl fmt::Display for CampaignPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CampaignPhase::Seeding => write!(f, "seeding"),
            CampaignPhase::Running => write!(f, "running"),
            CampaignPhase::CoolingDown => write!(f, "cooling_down"),
            CampaignPhase::Draining => write!(f, "draining"),
            CampaignPhase::Reporting => write!(f, "reporting"),
        }
    }
}

/// Final outcome of a campaign
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub campaign_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Tokens put on the queue by all producers
    pub tokens_enqueued: u64,
    /// Reads finished by all workers, failed ones included
    pub reads_completed: u64,
    pub error_count: u64,
    pub query_count: u64,
    pub latency: LatencySummary,
    pub pool: PoolStatsSnapshot,
    /// Worker count after start and after every ramp step
    pub worker_counts: Vec<usize>,
}

/// Errors that end a campaign before it runs
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Invalid campaign configuration: {}", .0.join(", "))]
    InvalidConfig(Vec<String>),

    #[error("Failed to connect to the store: {0}")]
    Connect(#[source] RepositoryError),

    #[error("Failed to seed the store: {0}")]
    Seeding(#[source] RepositoryError),
}

// =========================================================================
// Stage
// =========================================================================

/// One load campaign
pub struct Stage {
    id: Uuid,
    store: DataStoreConfig,
    config: CampaignConfig,
    stats: Arc<CampaignStats>,
    pool_stats: Arc<PoolStats>,
}

impl Stage {
    pub fn new(store: DataStoreConfig, config: CampaignConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            config,
            stats: Arc::new(CampaignStats::new()),
            pool_stats: Arc::new(PoolStats::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the campaign to completion
    pub async fn run(
        self,
        factory: &dyn RepositoryFactory,
    ) -> Result<CampaignReport, CampaignError> {
        let span = tracing::info_span!("campaign", id = %self.id);
        self.execute(factory).instrument(span).await
    }

    async fn execute(
        self,
        factory: &dyn RepositoryFactory,
    ) -> Result<CampaignReport, CampaignError> {
        let started_at = Utc::now();

        let errors = self.config.validation_errors();
        if !errors.is_empty() {
            return Err(CampaignError::InvalidConfig(errors));
        }

        let mut rng = match self.config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // Seeding
        enter(CampaignPhase::Seeding);
        let repository = factory
            .connect(&self.store, self.pool_stats.monitor())
            .await
            .map_err(CampaignError::Connect)?;

        let store_ids = match seed::ensure_data(repository.as_ref(), &mut rng).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Seeding failed, aborting campaign");
                repository.close().await;
                return Err(CampaignError::Seeding(e));
            }
        };
        repository.set_valid_ids(store_ids);
        if self.config.rng_seed.is_some() {
            repository.seed_sampler(rng.gen());
        }

        // Running
        enter(CampaignPhase::Running);
        let (sender, receiver) = async_channel::bounded(QUEUE_CAPACITY);
        let send_every = producer::tick_period(self.config.msg_by_sec);
        let producers: Vec<Producer> = (0..self.config.producers_count as usize)
            .map(|id| Producer::start(id, sender.clone(), send_every))
            .collect();
        // Producers own the only senders; the queue closes once they are all stopped
        drop(sender);

        let mut workers = Vec::new();
        self.add_workers(&mut workers, self.config.workers_count, &receiver, &repository, &mut rng);
        let mut worker_counts = vec![workers.len()];

        for _ in 0..self.config.increment_load {
            tracing::info!(
                "Waiting {} seconds to add {} workers. Current count: {}",
                self.config.time_to_sleep_secs,
                self.config.workers_to_add,
                workers.len()
            );
            self.wait_reporting(self.config.time_to_sleep_secs, repository.as_ref())
                .await;

            self.add_workers(&mut workers, self.config.workers_to_add, &receiver, &repository, &mut rng);
            worker_counts.push(workers.len());
            tracing::info!(
                "{} workers added. Using {} in total",
                self.config.workers_to_add,
                workers.len()
            );
        }

        // Cooling down
        enter(CampaignPhase::CoolingDown);
        tracing::info!("Waiting {} seconds to finish", self.config.time_to_finish_secs);
        self.wait_reporting(self.config.time_to_finish_secs, repository.as_ref())
            .await;

        // Draining
        enter(CampaignPhase::Draining);
        let mut tokens_enqueued = 0;
        for producer in producers {
            tokens_enqueued += producer.stop().await;
        }
        tracing::info!(tokens_enqueued, "Producers stopped.");

        while !receiver.is_empty() {
            self.report_live(repository.as_ref());
            tokio::time::sleep(REPORT_INTERVAL).await;
        }
        drop(receiver);

        let mut reads_completed = 0;
        for worker in workers {
            reads_completed += worker.join().await;
        }

        // Reporting
        enter(CampaignPhase::Reporting);
        repository.close().await;
        tokio::time::sleep(SETTLE_DELAY).await;

        let report = CampaignReport {
            campaign_id: self.id,
            started_at,
            finished_at: Utc::now(),
            tokens_enqueued,
            reads_completed,
            error_count: self.stats.error_count(),
            query_count: repository.query_count(),
            latency: self.stats.summary(),
            pool: self.pool_stats.snapshot(),
            worker_counts,
        };

        tracing::info!("Total query count: {}", report.query_count);
        tracing::info!("{}", report.pool);
        tracing::info!("Errors = {}. {}", report.error_count, report.latency);

        Ok(report)
    }

    fn add_workers(
        &self,
        workers: &mut Vec<Worker>,
        count: u32,
        receiver: &async_channel::Receiver<EventToken>,
        repository: &Arc<dyn StoreRepository>,
        rng: &mut StdRng,
    ) {
        for _ in 0..count {
            workers.push(Worker::spawn(
                workers.len(),
                receiver.clone(),
                Arc::clone(repository),
                Arc::clone(&self.stats),
                self.config.read_settings(),
                StdRng::seed_from_u64(rng.gen()),
            ));
        }
    }

    /// Sleep `secs` seconds, logging live statistics once per second
    async fn wait_reporting(&self, secs: u32, repository: &dyn StoreRepository) {
        for _ in 0..secs {
            self.report_live(repository);
            tokio::time::sleep(REPORT_INTERVAL).await;
        }
    }

    fn report_live(&self, repository: &dyn StoreRepository) {
        repository.sync_pool_events();
        tracing::info!(executed = repository.query_count(), "{}", self.pool_stats);
    }
}

fn enter(phase: CampaignPhase) {
    tracing::info!(%phase, "Campaign phase changed");
}
