// Package metrics provides the cache statistics counters.
//
// Plain atomic counters; every write is elided when statistics are
// disabled. The spin diagnostics of the lock paths live next to their
// locks, not here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Cache event counters.
pub struct Metrics {
    enabled: bool,
    hit: AtomicU64,
    miss: AtomicU64,
    load_success: AtomicU64,
    load_exception: AtomicU64,
    total_load_millis: AtomicU64,
    eviction: AtomicU64,
}

impl Metrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            hit: AtomicU64::new(0),
            miss: AtomicU64::new(0),
            load_success: AtomicU64::new(0),
            load_exception: AtomicU64::new(0),
            total_load_millis: AtomicU64::new(0),
            eviction: AtomicU64::new(0),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn hit(&self) {
        if self.enabled {
            self.hit.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn miss(&self) {
        if self.enabled {
            self.miss.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn load_success(&self, elapsed: Duration) {
        if self.enabled {
            self.load_success.fetch_add(1, Ordering::Relaxed);
            self.total_load_millis
                .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        }
    }

    pub fn load_exception(&self) {
        if self.enabled {
            self.load_exception.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn add_evictions(&self, n: u64) {
        if self.enabled {
            self.eviction.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            load_success: self.load_success.load(Ordering::Relaxed),
            load_exception: self.load_exception.load(Ordering::Relaxed),
            total_load_millis: self.total_load_millis.load(Ordering::Relaxed),
            eviction: self.eviction.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub hit: u64,
    pub miss: u64,
    pub load_success: u64,
    pub load_exception: u64,
    pub total_load_millis: u64,
    pub eviction: u64,
}

/// Counter snapshot plus allocator and partition internals.
#[derive(Debug, Clone, Serialize)]
pub struct ExtendedStats {
    pub stats: StatsSnapshot,
    /// Free-block counts per block class; a single class means a single
    /// bucket.
    pub free_block_counts: Vec<u64>,
    pub lru_list_lengths: Vec<u64>,
    pub size: u64,
    pub block_size: u64,
    pub capacity: u64,
}
