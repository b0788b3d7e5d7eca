// Package pool provides the block-granular allocator over the pool range.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::mem::Region;

/// Offset of the next-block link inside every block.
pub const BLOCK_NEXT_OFF: u64 = 0;
/// First payload byte inside a block.
pub const BLOCK_DATA_OFF: u64 = 8;

/// BlockPool hands out fixed-size blocks from the trailing part of the
/// region and recycles them through a lock-free LIFO free-stack threaded
/// through the blocks' own next pointers.
///
/// The ABA window on pop is narrow by construction: blocks only ever
/// return to this single stack and the next pointer is rewritten before
/// every push CAS, so a re-pushed block never carries a stale link.
pub struct BlockPool {
    region: Arc<Region>,
    block_size: u64,
    pool_off: u64,
    block_count: u64,
    free_head: AtomicU64,
    free_count: AtomicU64,
    pop_spins: AtomicU64,
}

impl BlockPool {
    /// Creates the pool and seeds the free-stack with every block,
    /// back-to-front so the first allocations come from the low end of
    /// the pool.
    pub fn new(region: Arc<Region>, block_size: u64, pool_off: u64, block_count: u64) -> Self {
        debug_assert!(block_size.is_power_of_two());
        debug_assert!(pool_off > 0, "offset 0 is the null reference");

        let pool = Self {
            region,
            block_size,
            pool_off,
            block_count,
            free_head: AtomicU64::new(0),
            free_count: AtomicU64::new(0),
            pop_spins: AtomicU64::new(0),
        };

        let mut head = 0u64;
        for i in (0..block_count).rev() {
            let block = pool.pool_off + i * pool.block_size;
            pool.region.store_u64(block + BLOCK_NEXT_OFF, head);
            head = block;
        }
        pool.free_head.store(head, Ordering::Release);
        pool.free_count.store(block_count, Ordering::Relaxed);
        pool
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn block_count(&self) -> u64 {
        self.block_count
    }

    /// Payload bytes a single block can carry.
    pub fn usable_per_block(&self) -> u64 {
        self.block_size - BLOCK_DATA_OFF
    }

    /// Allocates a chain able to carry `total_bytes` of entry data and
    /// links it through the next pointers. Returns the chain head, or 0
    /// when the pool cannot satisfy the request; a partial allocation is
    /// pushed back onto the free-stack before returning.
    pub fn allocate_chain(&self, total_bytes: u64) -> u64 {
        let usable = self.usable_per_block();
        let mut needed = ((total_bytes + usable - 1) / usable).max(1);

        let mut head = 0u64;
        let mut tail = 0u64;
        while needed > 0 {
            let block = self.pop();
            if block == 0 {
                if head != 0 {
                    self.free_chain(head);
                }
                return 0;
            }
            self.region.store_u64(block + BLOCK_NEXT_OFF, 0);
            if head == 0 {
                head = block;
            } else {
                self.region.store_u64(tail + BLOCK_NEXT_OFF, block);
            }
            tail = block;
            needed -= 1;
        }
        head
    }

    /// Walks the chain and pushes every block back onto the free-stack.
    /// Returns the number of blocks freed.
    pub fn free_chain(&self, head_addr: u64) -> u64 {
        let mut freed = 0u64;
        let mut block = head_addr;
        while block != 0 {
            // Read the link before push rewrites it.
            let next = self.region.load_u64(block + BLOCK_NEXT_OFF);
            self.push(block);
            freed += 1;
            block = next;
        }
        freed
    }

    /// O(1) free-block counter.
    pub fn free_count(&self) -> u64 {
        self.free_count.load(Ordering::Relaxed)
    }

    /// O(n) diagnostic walk of the free-stack. Only meaningful while no
    /// other thread mutates the stack.
    pub fn calc_free_count(&self) -> u64 {
        let mut n = 0u64;
        let mut block = self.free_head.load(Ordering::Acquire);
        while block != 0 {
            n += 1;
            block = self.region.load_u64(block + BLOCK_NEXT_OFF);
        }
        n
    }

    /// Cumulative CAS retries on pop.
    pub fn free_block_spins(&self) -> u64 {
        self.pop_spins.load(Ordering::Relaxed)
    }

    fn pop(&self) -> u64 {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head == 0 {
                return 0;
            }
            let next = self.region.atomic_u64(head + BLOCK_NEXT_OFF).load(Ordering::Acquire);
            if self
                .free_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.free_count.fetch_sub(1, Ordering::Relaxed);
                return head;
            }
            self.pop_spins.fetch_add(1, Ordering::Relaxed);
            std::hint::spin_loop();
        }
    }

    fn push(&self, block: u64) {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            self.region.store_u64(block + BLOCK_NEXT_OFF, head);
            if self
                .free_head
                .compare_exchange_weak(head, block, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.free_count.fetch_add(1, Ordering::Relaxed);
                return;
            }
            std::hint::spin_loop();
        }
    }
}
