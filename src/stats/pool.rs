//! Connection Pool Statistics
//!
//! Counters fed by the repository's pool-event callback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// A state transition reported by the store client's connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    ConnectionCreated,
    ConnectionClosed,
    ConnectionReturned,
    GetSucceeded,
    GetFailed { reason: String },
}

/// Callback the repository invokes for every pool event.
pub type PoolMonitor = Arc<dyn Fn(PoolEvent) + Send + Sync>;

/// Pool event counters.
///
/// Scalar counters are lock-free. The failure-reason histogram is a
/// read-modify-write on a map and sits behind a mutex.
#[derive(Debug, Default)]
pub struct PoolStats {
    created: AtomicI64,
    closed: AtomicI64,
    in_use: AtomicI64,
    returned: AtomicI64,
    gets_ok: AtomicI64,
    gets_failed: AtomicI64,
    reasons: Mutex<BTreeMap<String, i64>>,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one pool event
    pub fn record(&self, event: PoolEvent) {
        match event {
            PoolEvent::ConnectionCreated => {
                self.created.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::ConnectionClosed => {
                self.closed.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::ConnectionReturned => {
                self.returned.fetch_add(1, Ordering::Relaxed);
                self.in_use.fetch_sub(1, Ordering::Relaxed);
            }
            PoolEvent::GetSucceeded => {
                self.gets_ok.fetch_add(1, Ordering::Relaxed);
                self.in_use.fetch_add(1, Ordering::Relaxed);
            }
            PoolEvent::GetFailed { reason } => {
                self.gets_failed.fetch_add(1, Ordering::Relaxed);
                *self.reasons.lock().entry(reason).or_insert(0) += 1;
            }
        }
    }

    /// Build a monitor callback that records into this collector
    pub fn monitor(self: &Arc<Self>) -> PoolMonitor {
        let stats = Arc::clone(self);
        Arc::new(move |event| stats.record(event))
    }

    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            created: self.created.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            returned: self.returned.load(Ordering::Relaxed),
            gets_ok: self.gets_ok.load(Ordering::Relaxed),
            gets_failed: self.gets_failed.load(Ordering::Relaxed),
            failures: self.reasons.lock().clone(),
        }
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    pub created: i64,
    pub closed: i64,
    pub in_use: i64,
    pub returned: i64,
    pub gets_ok: i64,
    pub gets_failed: i64,
    pub failures: BTreeMap<String, i64>,
}

impl fmt::Display for PoolStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{created={}, closed={}, in_use={}, returned={}, gets_OK={}, gets_failed={}, failures={:?}}}",
            self.created,
            self.closed,
            self.in_use,
            self.returned,
            self.gets_ok,
            self.gets_failed,
            self.failures
        )
    }
}
