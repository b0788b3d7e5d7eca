// Package table provides the partition table layout and per-partition
// spinlocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::mem::Region;
use crate::storage::lock::SPINS_BEFORE_YIELD;

/// Bytes per partition slot: u32 lock word, 4 bytes pad, u64 LRU head.
pub const SLOT_SIZE: u64 = 16;
const SLOT_LOCK_OFF: u64 = 0;
const SLOT_LRU_HEAD_OFF: u64 = 8;

/// PartitionTable addresses the fixed array of partition slots at the
/// start of the region. Partition locks are non-reentrant spinlocks held
/// strictly short: O(partition list length) work at most, and never
/// across user serialization callbacks.
pub struct PartitionTable {
    region: Arc<Region>,
    count: u64,
    mask: u64,
    lock_spins: AtomicU64,
}

impl PartitionTable {
    /// Table byte size for a partition count.
    pub fn size_for(count: u64) -> u64 {
        count * SLOT_SIZE
    }

    pub fn new(region: Arc<Region>, count: u64) -> Self {
        debug_assert!(count.is_power_of_two());
        Self {
            region,
            count,
            mask: count - 1,
            lock_spins: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Partition index owning a hash: `hash & (P - 1)`.
    #[inline]
    pub fn index_for_hash(&self, hash: u32) -> u64 {
        hash as u64 & self.mask
    }

    /// Slot offset for a partition index.
    #[inline]
    pub fn slot_at(&self, index: u64) -> u64 {
        index * SLOT_SIZE
    }

    /// Spins until the partition owning `hash` is locked; returns its
    /// slot offset.
    pub fn lock_for_hash(&self, hash: u32) -> u64 {
        let slot = self.slot_at(self.index_for_hash(hash));
        self.lock_slot(slot);
        slot
    }

    pub fn lock_slot(&self, slot: u64) {
        let lock = self.region.atomic_u32(slot + SLOT_LOCK_OFF);
        let mut spins = 0u64;
        while lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins % SPINS_BEFORE_YIELD == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        if spins > 0 {
            self.lock_spins.fetch_add(spins, Ordering::Relaxed);
        }
    }

    pub fn unlock(&self, slot: u64) {
        self.region
            .atomic_u32(slot + SLOT_LOCK_OFF)
            .store(0, Ordering::Release);
    }

    /// Valid only while the slot is locked.
    pub fn lru_head(&self, slot: u64) -> u64 {
        self.region.load_u64(slot + SLOT_LRU_HEAD_OFF)
    }

    /// Valid only while the slot is locked.
    pub fn set_lru_head(&self, slot: u64, entry: u64) {
        self.region.store_u64(slot + SLOT_LRU_HEAD_OFF, entry)
    }

    /// Cumulative CAS spins across all partition lock acquisitions.
    pub fn lock_spins(&self) -> u64 {
        self.lock_spins.load(Ordering::Relaxed)
    }
}
