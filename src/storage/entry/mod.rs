// Package entry owns the entry header encoding, lookup and LRU list
// maintenance inside a locked partition, and the streaming of key and
// value bytes across block chains.

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ::bytes::{Bytes, BytesMut};

use crate::error::CacheError;
use crate::mem::Region;
use crate::model::{BytesSink, BytesSource};
use crate::storage::lock::{SPINS_BEFORE_YIELD, STREAM_CHUNK};
use crate::storage::pool::{BlockPool, BLOCK_DATA_OFF, BLOCK_NEXT_OFF};
use crate::storage::table::PartitionTable;

// Entry header, laid out at the start of the first block of a chain.
// The first 8 bytes double as the block-chain link.
const LRU_NEXT_OFF: u64 = 8;
const LRU_PREV_OFF: u64 = 16;
const HASH_OFF: u64 = 24;
const LOCK_OFF: u64 = 28;
const KEY_LEN_OFF: u64 = 32;
const VALUE_LEN_OFF: u64 = 36;

/// Serialized size of the entry header; counted into the chain total.
pub const ENTRY_HEADER_SIZE: u64 = 40;

/// EntryAccess reads and writes entries as raw offsets into the region.
///
/// Locking contract: LRU and lookup operations require the partition lock;
/// key/value streaming requires only the entry lock; chain creation
/// requires no lock at all because the chain is not yet indexed.
pub struct EntryAccess {
    region: Arc<Region>,
    pool: Arc<BlockPool>,
    table: Arc<PartitionTable>,
    block_size: u64,
}

impl EntryAccess {
    pub fn new(
        region: Arc<Region>,
        pool: Arc<BlockPool>,
        table: Arc<PartitionTable>,
        block_size: u64,
    ) -> Self {
        Self {
            region,
            pool,
            table,
            block_size,
        }
    }

    // --- header fields ---

    pub fn hash(&self, entry: u64) -> u32 {
        self.region.load_u32(entry + HASH_OFF)
    }

    pub fn key_len(&self, entry: u64) -> u64 {
        self.region.load_u32(entry + KEY_LEN_OFF) as u64
    }

    pub fn value_len(&self, entry: u64) -> u64 {
        self.region.load_u32(entry + VALUE_LEN_OFF) as u64
    }

    pub fn lru_next(&self, entry: u64) -> u64 {
        self.region.load_u64(entry + LRU_NEXT_OFF)
    }

    pub fn lru_prev(&self, entry: u64) -> u64 {
        self.region.load_u64(entry + LRU_PREV_OFF)
    }

    // --- creation ---

    /// Allocates a chain and writes the header plus the key bytes. When
    /// `value` is given its bytes are streamed right after the key;
    /// otherwise `value_len` bytes are left blank for a deferred write.
    /// Returns 0 when the pool cannot carry the entry.
    ///
    /// No locks are required: the chain is exclusively owned until it is
    /// linked into a partition.
    pub fn create_entry(
        &self,
        hash: u32,
        key: &dyn BytesSource,
        value: Option<&dyn BytesSource>,
        value_len: u64,
    ) -> u64 {
        let key_len = key.size() as u64;
        let value_len = value.map(|v| v.size() as u64).unwrap_or(value_len);
        let total = ENTRY_HEADER_SIZE + key_len + value_len;

        let entry = self.pool.allocate_chain(total);
        if entry == 0 {
            return 0;
        }

        self.region.store_u64(entry + LRU_NEXT_OFF, 0);
        self.region.store_u64(entry + LRU_PREV_OFF, 0);
        self.region.store_u32(entry + HASH_OFF, hash);
        self.region.store_u32(entry + LOCK_OFF, 0);
        self.region.store_u32(entry + KEY_LEN_OFF, key_len as u32);
        self.region.store_u32(entry + VALUE_LEN_OFF, value_len as u32);

        let mut cur = ChainCursor::at_data_start(&self.region, self.block_size, entry);
        cur.write_source(key);
        if let Some(v) = value {
            cur.write_source(v);
        }
        entry
    }

    /// Streams the deferred value region of a freshly created chain
    /// through `write`. The chain was allocated with the final value
    /// length up front, so the callback must produce exactly that many
    /// bytes.
    pub fn write_value_with(
        &self,
        entry: u64,
        write: &mut dyn FnMut(&mut dyn BytesSink) -> io::Result<()>,
    ) -> Result<(), CacheError> {
        let mut cur = ChainCursor::at_data_start(&self.region, self.block_size, entry);
        cur.skip(self.key_len(entry));
        let mut sink = ChainSink {
            cur,
            remaining: self.value_len(entry),
        };
        write(&mut sink)?;
        if sink.remaining != 0 {
            return Err(CacheError::InvalidArgument(format!(
                "serializer wrote {} bytes short of the declared value length",
                sink.remaining
            )));
        }
        Ok(())
    }

    // --- lookup (partition lock required) ---

    /// Finds the entry for hash+key in a locked partition, walking the
    /// LRU list from the head. Returns `(entry, entries_walked)`; entry
    /// is 0 when absent, in which case the whole list was walked.
    pub fn find(&self, slot: u64, hash: u32, key: &dyn BytesSource) -> (u64, u64) {
        let mut walked = 0u64;
        let mut entry = self.table.lru_head(slot);
        while entry != 0 {
            walked += 1;
            if self.hash(entry) == hash && self.key_matches(entry, key) {
                return (entry, walked);
            }
            entry = self.lru_next(entry);
        }
        (0, walked)
    }

    fn key_matches(&self, entry: u64, key: &dyn BytesSource) -> bool {
        let key_len = key.size();
        if self.key_len(entry) != key_len as u64 {
            return false;
        }
        let mut buf = [0u8; STREAM_CHUNK];
        let mut cur = ChainCursor::at_data_start(&self.region, self.block_size, entry);
        let mut off = 0usize;
        while off < key_len {
            let n = STREAM_CHUNK.min(key_len - off);
            key.read_at(off, &mut buf[..n]);
            if !cur.compare(&buf[..n]) {
                return false;
            }
            off += n;
        }
        true
    }

    // --- per-entry lock ---

    /// Acquires the entry lock: a reader-handoff lock held while value
    /// bytes are copied out. Destroyers acquire it and never call
    /// `unlock_entry` because the blocks stop being an entry the moment
    /// they are freed; any reader that held the lock has already finished.
    pub fn lock_entry(&self, entry: u64) {
        let lock = self.region.atomic_u32(entry + LOCK_OFF);
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
    }

    pub fn unlock_entry(&self, entry: u64) {
        self.region
            .atomic_u32(entry + LOCK_OFF)
            .store(0, Ordering::Release);
    }

    // --- LRU list maintenance (partition lock required) ---

    /// Links the entry in as the new head (most recently used).
    pub fn lru_add_head(&self, slot: u64, entry: u64) {
        let old_head = self.table.lru_head(slot);
        self.region.store_u64(entry + LRU_PREV_OFF, 0);
        self.region.store_u64(entry + LRU_NEXT_OFF, old_head);
        if old_head != 0 {
            self.region.store_u64(old_head + LRU_PREV_OFF, entry);
        }
        self.table.set_lru_head(slot, entry);
    }

    /// Splices the entry out of the list.
    pub fn lru_remove(&self, slot: u64, entry: u64) {
        let prev = self.lru_prev(entry);
        let next = self.lru_next(entry);
        if prev != 0 {
            self.region.store_u64(prev + LRU_NEXT_OFF, next);
        } else {
            self.table.set_lru_head(slot, next);
        }
        if next != 0 {
            self.region.store_u64(next + LRU_PREV_OFF, prev);
        }
        self.region.store_u64(entry + LRU_NEXT_OFF, 0);
        self.region.store_u64(entry + LRU_PREV_OFF, 0);
    }

    /// Moves the entry to the head (promotion on access).
    pub fn lru_promote(&self, slot: u64, entry: u64) {
        if self.table.lru_head(slot) == entry {
            return;
        }
        self.lru_remove(slot, entry);
        self.lru_add_head(slot, entry);
    }

    /// Walks to the tail (least recently used). There is no stored tail
    /// pointer; this is O(list length) by design.
    pub fn lru_tail(&self, slot: u64) -> u64 {
        let mut entry = self.table.lru_head(slot);
        if entry == 0 {
            return 0;
        }
        loop {
            let next = self.lru_next(entry);
            if next == 0 {
                return entry;
            }
            entry = next;
        }
    }

    /// Number of entries on the partition's list.
    pub fn list_len(&self, slot: u64) -> u64 {
        let mut n = 0u64;
        let mut entry = self.table.lru_head(slot);
        while entry != 0 {
            n += 1;
            entry = self.lru_next(entry);
        }
        n
    }

    /// Cuts the list between `pivot` and `start`, leaving `pivot` as the
    /// new tail and `start` as the head of a detached suffix.
    pub fn split_before(&self, pivot: u64, start: u64) {
        self.region.store_u64(pivot + LRU_NEXT_OFF, 0);
        self.region.store_u64(start + LRU_PREV_OFF, 0);
    }

    /// Reports up to `limit` entries from the head of a locked partition.
    pub fn hot_entries(&self, slot: u64, limit: u64, f: &mut dyn FnMut(u64)) {
        let mut reported = 0u64;
        let mut entry = self.table.lru_head(slot);
        while entry != 0 && reported < limit {
            f(entry);
            reported += 1;
            entry = self.lru_next(entry);
        }
    }

    // --- extraction (entry lock suffices; no partition lock) ---

    /// Streams the entry's value into `sink`.
    pub fn write_value_to(&self, entry: u64, sink: &mut dyn BytesSink) -> io::Result<()> {
        let value_len = self.value_len(entry);
        sink.reserve(value_len as usize);
        let mut cur = ChainCursor::at_data_start(&self.region, self.block_size, entry);
        cur.skip(self.key_len(entry));
        cur.stream_to(value_len, sink)
    }

    /// Copies the entry's key bytes out.
    pub fn key_bytes(&self, entry: u64) -> Bytes {
        let key_len = self.key_len(entry) as usize;
        let mut out = BytesMut::zeroed(key_len);
        let mut cur = ChainCursor::at_data_start(&self.region, self.block_size, entry);
        cur.read(&mut out[..]);
        out.freeze()
    }

    /// Number of blocks in the entry's chain.
    pub fn chain_len(&self, entry: u64) -> u64 {
        let mut n = 0u64;
        let mut block = entry;
        while block != 0 {
            n += 1;
            block = self.region.load_u64(block + BLOCK_NEXT_OFF);
        }
        n
    }
}

/// Cursor over a chain's data area: byte 40.. of the first block, byte
/// 8.. of every later block.
struct ChainCursor<'a> {
    region: &'a Region,
    block_size: u64,
    block: u64,
    off: u64,
}

impl<'a> ChainCursor<'a> {
    fn at_data_start(region: &'a Region, block_size: u64, head: u64) -> Self {
        Self {
            region,
            block_size,
            block: head,
            off: ENTRY_HEADER_SIZE,
        }
    }

    /// Returns the next contiguous run of up to `want` bytes as an
    /// absolute offset and length, advancing the cursor.
    fn next_run(&mut self, want: usize) -> (u64, usize) {
        if self.off == self.block_size {
            self.block = self.region.load_u64(self.block + BLOCK_NEXT_OFF);
            self.off = BLOCK_DATA_OFF;
            debug_assert_ne!(self.block, 0, "cursor ran past the chain");
        }
        let room = (self.block_size - self.off) as usize;
        let n = room.min(want);
        let abs = self.block + self.off;
        self.off += n as u64;
        (abs, n)
    }

    fn write(&mut self, mut src: &[u8]) {
        while !src.is_empty() {
            let (abs, n) = self.next_run(src.len());
            self.region.copy_in(abs, &src[..n]);
            src = &src[n..];
        }
    }

    fn write_source(&mut self, src: &dyn BytesSource) {
        let mut buf = [0u8; STREAM_CHUNK];
        let size = src.size();
        let mut off = 0usize;
        while off < size {
            let n = STREAM_CHUNK.min(size - off);
            src.read_at(off, &mut buf[..n]);
            self.write(&buf[..n]);
            off += n;
        }
    }

    fn read(&mut self, mut dst: &mut [u8]) {
        while !dst.is_empty() {
            let (abs, n) = self.next_run(dst.len());
            self.region.copy_out(abs, &mut dst[..n]);
            dst = &mut dst[n..];
        }
    }

    fn skip(&mut self, mut n: u64) {
        while n > 0 {
            let (_, m) = self.next_run(n as usize);
            n -= m as u64;
        }
    }

    fn compare(&mut self, mut expect: &[u8]) -> bool {
        while !expect.is_empty() {
            let (abs, n) = self.next_run(expect.len());
            if self.region.slice(abs, n) != &expect[..n] {
                return false;
            }
            expect = &expect[n..];
        }
        true
    }

    fn stream_to(&mut self, mut remaining: u64, sink: &mut dyn BytesSink) -> io::Result<()> {
        while remaining > 0 {
            let (abs, n) = self.next_run(remaining as usize);
            sink.put(self.region.slice(abs, n))?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Sink over the pre-allocated value region of a chain, used by the
/// deferred value write.
struct ChainSink<'a> {
    cur: ChainCursor<'a>,
    remaining: u64,
}

impl BytesSink for ChainSink<'_> {
    fn put(&mut self, chunk: &[u8]) -> io::Result<()> {
        if chunk.len() as u64 > self.remaining {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "serializer wrote past the declared value length",
            ));
        }
        self.cur.write(chunk);
        self.remaining -= chunk.len() as u64;
        Ok(())
    }
}
