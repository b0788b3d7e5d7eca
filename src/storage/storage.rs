// Package storage composes the block pool, partition table and entry
// access into the untyped cache engine.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ::bytes::Bytes;
use tracing::warn;

use crate::config::ResolvedConfig;
use crate::error::CacheError;
use crate::mem::Region;
use crate::metrics::{ExtendedStats, Metrics, StatsSnapshot};
use crate::model::{BytesSink, BytesSource, PutOutcome};
use crate::storage::entry::{EntryAccess, ENTRY_HEADER_SIZE};
use crate::storage::pool::BlockPool;
use crate::storage::table::{PartitionTable, SLOT_SIZE};

const COMP_STORAGE: &str = "storage";

/// RawCache is the untyped engine: hashes and byte streams in, entries in
/// one backing region out. The typed facade in `crate::cache` sits on top.
///
/// Entries larger than one block span a chain of blocks; each partition
/// owns an approximate-LRU doubly-linked list guarded by its spinlock.
pub struct RawCache {
    cfg: ResolvedConfig,
    pool: Arc<BlockPool>,
    table: Arc<PartitionTable>,
    entries: EntryAccess,
    metrics: Metrics,
    cleaning: AtomicBool,
    closed: AtomicBool,
    lru_warned: AtomicBool,
}

impl RawCache {
    /// Allocates the backing region (partition table + block pool) and
    /// seeds the free-stack.
    pub fn new(cfg: ResolvedConfig) -> Result<Self, CacheError> {
        let table_bytes = PartitionTable::size_for(cfg.partition_count);
        let region = Arc::new(Region::alloc((table_bytes + cfg.capacity) as usize)?);
        let pool = Arc::new(BlockPool::new(
            region.clone(),
            cfg.block_size,
            table_bytes,
            cfg.block_count,
        ));
        let table = Arc::new(PartitionTable::new(region.clone(), cfg.partition_count));
        let entries = EntryAccess::new(region, pool.clone(), table.clone(), cfg.block_size);
        let metrics = Metrics::new(cfg.statistics_enabled);
        Ok(Self {
            cfg,
            pool,
            table,
            entries,
            metrics,
            cleaning: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            lru_warned: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.cfg
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // --- operations ---

    /// Stores `value` under hash+key. When the key was present the old
    /// entry is replaced and, if `old` is given, its value is streamed
    /// into the sink before the chain is recycled.
    pub fn put(
        &self,
        hash: u32,
        key: &dyn BytesSource,
        value: &dyn BytesSource,
        old: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError> {
        self.ensure_open()?;
        check_key(key)?;
        check_len("value", value.size())?;

        let entry = self.entries.create_entry(hash, key, Some(value), 0);
        if entry == 0 {
            return Ok(PutOutcome::NoSpace);
        }
        self.index_new_entry(hash, key, entry, old)
    }

    /// Two-phase put for the serializer path: the chain is allocated from
    /// the declared value length and `fill` streams the value into it
    /// before the entry becomes visible to any other thread.
    pub fn put_with(
        &self,
        hash: u32,
        key: &dyn BytesSource,
        value_len: u64,
        fill: &mut dyn FnMut(&mut dyn BytesSink) -> io::Result<()>,
        old: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError> {
        self.ensure_open()?;
        check_key(key)?;
        check_len("value", value_len as usize)?;

        let entry = self.entries.create_entry(hash, key, None, value_len);
        if entry == 0 {
            return Ok(PutOutcome::NoSpace);
        }
        if let Err(e) = self.entries.write_value_with(entry, fill) {
            // The chain was never indexed; recycle it deterministically.
            self.pool.free_chain(entry);
            return Err(e);
        }
        self.index_new_entry(hash, key, entry, old)
    }

    /// Stores the entry only when the key is absent. Returns whether it
    /// was stored; false also covers a full pool.
    pub fn put_if_absent(
        &self,
        hash: u32,
        key: &dyn BytesSource,
        value: &dyn BytesSource,
    ) -> Result<bool, CacheError> {
        self.ensure_open()?;
        check_key(key)?;
        check_len("value", value.size())?;

        let entry = self.entries.create_entry(hash, key, Some(value), 0);
        if entry == 0 {
            return Ok(false);
        }
        let slot = self.table.lock_for_hash(hash);
        let (existing, walked) = self.entries.find(slot, hash, key);
        if existing != 0 {
            self.table.unlock(slot);
            self.pool.free_chain(entry);
            return Ok(false);
        }
        self.entries.lru_add_head(slot, entry);
        self.maybe_warn_long_list(slot, walked + 1);
        self.table.unlock(slot);
        Ok(true)
    }

    /// Streams the value for hash+key into `sink`, promoting the entry.
    /// Returns false on a miss.
    pub fn get(
        &self,
        hash: u32,
        key: &dyn BytesSource,
        sink: &mut dyn BytesSink,
    ) -> Result<bool, CacheError> {
        self.ensure_open()?;
        check_key(key)?;

        let slot = self.table.lock_for_hash(hash);
        let (entry, _) = self.entries.find(slot, hash, key);
        if entry == 0 {
            self.table.unlock(slot);
            self.metrics.miss();
            return Ok(false);
        }
        self.entries.lru_promote(slot, entry);
        self.entries.lock_entry(entry);
        self.table.unlock(slot);

        // Partition lock dropped: the user sink runs under the entry
        // lock only, which is what keeps a concurrent remover waiting.
        let res = self.entries.write_value_to(entry, sink);
        self.entries.unlock_entry(entry);
        res?;
        self.metrics.hit();
        Ok(true)
    }

    /// Membership probe without LRU promotion.
    pub fn contains(&self, hash: u32, key: &dyn BytesSource) -> Result<bool, CacheError> {
        self.ensure_open()?;
        check_key(key)?;
        let slot = self.table.lock_for_hash(hash);
        let (entry, _) = self.entries.find(slot, hash, key);
        self.table.unlock(slot);
        Ok(entry != 0)
    }

    /// Removes hash+key. Returns whether an entry was removed.
    pub fn remove(&self, hash: u32, key: &dyn BytesSource) -> Result<bool, CacheError> {
        self.ensure_open()?;
        check_key(key)?;

        let slot = self.table.lock_for_hash(hash);
        let (entry, _) = self.entries.find(slot, hash, key);
        if entry == 0 {
            self.table.unlock(slot);
            return Ok(false);
        }
        self.entries.lru_remove(slot, entry);
        // Acquired and never released: destruction is a one-way handoff.
        self.entries.lock_entry(entry);
        self.table.unlock(slot);
        self.pool.free_chain(entry);
        Ok(true)
    }

    /// Entry count, summed per partition under each partition lock.
    /// Strongly consistent per partition, O(entries) overall.
    pub fn size(&self) -> u64 {
        let mut total = 0u64;
        for i in 0..self.table.count() {
            let slot = self.table.slot_at(i);
            self.table.lock_slot(slot);
            total += self.entries.list_len(slot);
            self.table.unlock(slot);
        }
        total
    }

    pub fn capacity(&self) -> u64 {
        self.cfg.capacity
    }

    pub fn mem_used(&self) -> u64 {
        (self.pool.block_count() - self.pool.free_count()) * self.pool.block_size()
    }

    pub fn free_space_fraction(&self) -> f64 {
        self.pool.free_count() as f64 / self.pool.block_count() as f64
    }

    /// Runs one eviction pass when the free fraction is at or below the
    /// cleanup trigger. At most one cleanup runs at a time; a concurrent
    /// call returns immediately. Returns the number of evicted entries.
    pub fn cleanup(&self) -> Result<u64, CacheError> {
        self.ensure_open()?;
        if self
            .cleaning
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Ok(0);
        }
        let evicted = self.cleanup_pass();
        self.cleaning.store(false, Ordering::Release);
        Ok(evicted)
    }

    fn cleanup_pass(&self) -> u64 {
        let total = self.pool.block_count();
        let free = self.pool.free_count();
        let free_frac = free as f64 / total as f64;
        if free_frac > self.cfg.cleanup_trigger {
            return 0;
        }

        let entry_count = self.size();
        if entry_count == 0 {
            return 0;
        }

        // Approximate how many entries must go to restore the trigger
        // fraction, assuming the current mean entry footprint.
        let blocks_per_entry = ((total - free) / entry_count).max(1);
        let expected_free = (self.cfg.cleanup_trigger * total as f64) as u64;
        let blocks_to_gain = expected_free.saturating_sub(free);
        let entries_to_remove = blocks_to_gain / blocks_per_entry;
        let per_partition = (entries_to_remove / self.table.count()).max(1);

        let mut evicted = 0u64;
        for i in 0..self.table.count() {
            let slot = self.table.slot_at(i);
            self.table.lock_slot(slot);
            let start = self.detach_tail_suffix(slot, per_partition);
            self.table.unlock(slot);

            // The suffix is unlinked as one unit; destroy entry by entry.
            // Each entry lock is taken and never released, so a reader
            // still copying a value finishes before its blocks recycle.
            let mut entry = start;
            while entry != 0 {
                let next = self.entries.lru_next(entry);
                self.entries.lock_entry(entry);
                self.pool.free_chain(entry);
                evicted += 1;
                entry = next;
            }
        }
        self.metrics.add_evictions(evicted);
        evicted
    }

    /// Detaches up to `max_entries` entries ending at the tail of a
    /// locked partition. Returns the head of the detached suffix, or 0
    /// for an empty partition.
    fn detach_tail_suffix(&self, slot: u64, max_entries: u64) -> u64 {
        let head = self.table.lru_head(slot);
        if head == 0 {
            return 0;
        }
        let tail = self.entries.lru_tail(slot);
        let mut start = tail;
        let mut n = 1u64;
        while n < max_entries {
            let prev = self.entries.lru_prev(start);
            if prev == 0 {
                break;
            }
            start = prev;
            n += 1;
        }
        if start == head {
            self.table.set_lru_head(slot, 0);
        } else {
            let pivot = self.entries.lru_prev(start);
            self.entries.split_before(pivot, start);
        }
        start
    }

    /// Drops every entry and returns all blocks to the free pool.
    pub fn invalidate_all(&self) -> Result<(), CacheError> {
        self.ensure_open()?;
        for i in 0..self.table.count() {
            let slot = self.table.slot_at(i);
            self.table.lock_slot(slot);
            let head = self.table.lru_head(slot);
            self.table.set_lru_head(slot, 0);
            self.table.unlock(slot);

            let mut entry = head;
            while entry != 0 {
                let next = self.entries.lru_next(entry);
                self.entries.lock_entry(entry);
                self.pool.free_chain(entry);
                entry = next;
            }
        }
        Ok(())
    }

    /// Up to `n` most-recently-used keys, gathered head-first per
    /// partition. Approximate across partitions, like the LRU itself.
    pub fn hot_keys(&self, n: u64) -> Result<Vec<Bytes>, CacheError> {
        self.ensure_open()?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let per_partition = (n + self.table.count() - 1) / self.table.count();
        let mut out: Vec<Bytes> = Vec::new();
        for i in 0..self.table.count() {
            if out.len() as u64 >= n {
                break;
            }
            let slot = self.table.slot_at(i);
            self.table.lock_slot(slot);
            let entries = &self.entries;
            let mut keys: Vec<Bytes> = Vec::new();
            entries.hot_entries(slot, per_partition, &mut |entry| {
                keys.push(entries.key_bytes(entry));
            });
            self.table.unlock(slot);
            for k in keys {
                if out.len() as u64 >= n {
                    break;
                }
                out.push(k);
            }
        }
        Ok(out)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.metrics.snapshot()
    }

    pub fn extended_stats(&self) -> ExtendedStats {
        ExtendedStats {
            stats: self.metrics.snapshot(),
            free_block_counts: vec![self.pool.free_count()],
            lru_list_lengths: self.lru_list_lengths(),
            size: self.size(),
            block_size: self.cfg.block_size,
            capacity: self.cfg.capacity,
        }
    }

    /// Per-partition list lengths, each read under its partition lock.
    pub fn lru_list_lengths(&self) -> Vec<u64> {
        let mut lengths = Vec::with_capacity(self.table.count() as usize);
        for i in 0..self.table.count() {
            let slot = self.table.slot_at(i);
            self.table.lock_slot(slot);
            lengths.push(self.entries.list_len(slot));
            self.table.unlock(slot);
        }
        lengths
    }

    /// Cumulative partition lock spins (diagnostic).
    pub fn partition_lock_spins(&self) -> u64 {
        self.table.lock_spins()
    }

    /// Cumulative free-stack pop retries (diagnostic).
    pub fn free_block_spins(&self) -> u64 {
        self.pool.free_block_spins()
    }

    /// O(n) free-stack walk (diagnostic).
    pub fn calc_free_block_count(&self) -> u64 {
        self.pool.calc_free_count()
    }

    /// Marks the cache closed: every later public call fails fast. The
    /// backing region is released when the last reference drops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // --- internals ---

    fn ensure_open(&self) -> Result<(), CacheError> {
        if self.is_closed() {
            return Err(CacheError::Closed);
        }
        Ok(())
    }

    fn index_new_entry(
        &self,
        hash: u32,
        key: &dyn BytesSource,
        entry: u64,
        old_sink: Option<&mut dyn BytesSink>,
    ) -> Result<PutOutcome, CacheError> {
        let slot = self.table.lock_for_hash(hash);
        let (old, walked) = self.entries.find(slot, hash, key);
        if old != 0 {
            self.entries.lru_remove(slot, old);
        }
        self.entries.lru_add_head(slot, entry);
        if old == 0 {
            self.maybe_warn_long_list(slot, walked + 1);
        }
        if old != 0 {
            // Unlinked but possibly mid-read: take the handoff lock
            // before the partition unlocks so nobody new can start.
            self.entries.lock_entry(old);
        }
        self.table.unlock(slot);

        if old == 0 {
            return Ok(PutOutcome::Added);
        }
        let stream_res = match old_sink {
            Some(sink) => self.entries.write_value_to(old, sink),
            None => Ok(()),
        };
        self.pool.free_chain(old);
        stream_res?;
        Ok(PutOutcome::Replaced)
    }

    fn maybe_warn_long_list(&self, slot: u64, len: u64) {
        if len > self.cfg.lru_list_warn_trigger && !self.lru_warned.swap(true, Ordering::Relaxed) {
            warn!(
                component = COMP_STORAGE,
                event = "long_lru_list",
                partition = slot / SLOT_SIZE,
                len,
                trigger = self.cfg.lru_list_warn_trigger,
                "partition LRU list is unusually long; consider a larger hash table"
            );
        }
    }

    /// Walks every partition and verifies the structural invariants:
    /// partition ownership by hash, well-formed doubly-linked lists, and
    /// block accounting against the free counter.
    #[cfg(test)]
    pub fn check_invariants(&self) {
        let mask = self.table.count() - 1;
        let mut entries_seen = 0u64;
        let mut blocks_in_chains = 0u64;
        for i in 0..self.table.count() {
            let slot = self.table.slot_at(i);
            self.table.lock_slot(slot);
            let head = self.table.lru_head(slot);
            if head != 0 {
                assert_eq!(self.entries.lru_prev(head), 0, "head must have no prev");
            }
            let mut prev = 0u64;
            let mut entry = head;
            while entry != 0 {
                assert_eq!(
                    self.entries.hash(entry) as u64 & mask,
                    i,
                    "entry hashed to the wrong partition"
                );
                assert_eq!(self.entries.lru_prev(entry), prev, "broken prev link");
                entries_seen += 1;
                blocks_in_chains += self.entries.chain_len(entry);
                prev = entry;
                entry = self.entries.lru_next(entry);
            }
            self.table.unlock(slot);
        }
        assert_eq!(entries_seen, self.size(), "list lengths disagree with size()");
        assert_eq!(
            blocks_in_chains + self.pool.free_count(),
            self.pool.block_count(),
            "blocks leaked between chains and the free pool"
        );
        assert_eq!(
            self.mem_used() + self.pool.free_count() * self.cfg.block_size,
            self.capacity(),
            "memory accounting identity broken"
        );
    }
}

// Minimum entry footprint: header plus one key byte still fits one block.
const _: () = assert!(ENTRY_HEADER_SIZE + 1 < 512);

fn check_key(key: &dyn BytesSource) -> Result<(), CacheError> {
    if key.size() == 0 {
        return Err(CacheError::InvalidArgument(
            "key must be at least one byte".to_string(),
        ));
    }
    check_len("key", key.size())
}

fn check_len(what: &str, len: usize) -> Result<(), CacheError> {
    if len > u32::MAX as usize {
        return Err(CacheError::InvalidArgument(format!(
            "{} of {} bytes exceeds the u32 length field",
            what, len
        )));
    }
    Ok(())
}
