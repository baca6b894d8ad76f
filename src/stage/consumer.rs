//! Event consumers (workers)
//!
//! A worker pulls tokens until the queue is closed and drained, issuing one
//! randomly sized read per token.

use std::ops::Range;
use std::sync::Arc;

use async_channel::Receiver;
use rand::rngs::StdRng;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::producer::EventToken;
use crate::repository::StoreRepository;
use crate::stats::CampaignStats;

/// Range of ids requested per read
pub const READ_SIZE: Range<usize> = 100..400;

/// Timeouts applied to every read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSettings {
    pub query_timeout_ms: u64,
    pub context_timeout_ms: u64,
}

/// A running worker task
#[derive(Debug)]
pub struct Worker {
    id: usize,
    handle: JoinHandle<u64>,
}

impl Worker {
    pub fn spawn(
        id: usize,
        receiver: Receiver<EventToken>,
        repository: Arc<dyn StoreRepository>,
        stats: Arc<CampaignStats>,
        settings: ReadSettings,
        rng: StdRng,
    ) -> Self {
        let handle = tokio::spawn(consume(id, receiver, repository, stats, settings, rng));
        Self { id, handle }
    }

    /// Wait for the worker to finish; returns the reads it performed
    pub async fn join(self) -> u64 {
        match self.handle.await {
            Ok(reads) => reads,
            Err(e) => {
                tracing::error!(worker = self.id, error = %e, "Worker task failed");
                0
            }
        }
    }
}

async fn consume(
    id: usize,
    receiver: Receiver<EventToken>,
    repository: Arc<dyn StoreRepository>,
    stats: Arc<CampaignStats>,
    settings: ReadSettings,
    mut rng: StdRng,
) -> u64 {
    let mut reads = 0;

    while receiver.recv().await.is_ok() {
        let size = rng.gen_range(READ_SIZE);
        let start = Instant::now();
        let result = repository
            .get_stores(size, settings.query_timeout_ms, settings.context_timeout_ms)
            .await;
        stats.record_latency(start.elapsed().as_millis() as u64);
        reads += 1;

        if let Err(e) = result {
            stats.record_error();
            tracing::error!(worker = id, error = %e, "Read failed");
        }
    }

    tracing::debug!(worker = id, reads, "Worker finished");
    reads
}
