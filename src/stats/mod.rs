//! Statistics
//!
//! Thread-safe aggregation for pool events and read latencies.

pub mod latency;
pub mod pool;

pub use latency::{CampaignStats, LatencySummary};
pub use pool::{PoolEvent, PoolMonitor, PoolStats, PoolStatsSnapshot};
