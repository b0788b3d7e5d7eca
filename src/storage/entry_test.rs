#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::mem::Region;
    use crate::storage::entry::EntryAccess;
    use crate::storage::pool::BlockPool;
    use crate::storage::table::PartitionTable;

    const BLOCK: u64 = 512;
    const PARTITIONS: u64 = 32;
    const BLOCKS: u64 = 64;

    fn harness() -> (Arc<PartitionTable>, Arc<BlockPool>, EntryAccess) {
        let table_bytes = PartitionTable::size_for(PARTITIONS);
        let region = Arc::new(Region::alloc((table_bytes + BLOCKS * BLOCK) as usize).unwrap());
        let pool = Arc::new(BlockPool::new(region.clone(), BLOCK, table_bytes, BLOCKS));
        let table = Arc::new(PartitionTable::new(region.clone(), PARTITIONS));
        let entries = EntryAccess::new(region, pool.clone(), table.clone(), BLOCK);
        (table, pool, entries)
    }

    /// Test that a created entry carries its header fields and payload.
    #[test]
    fn test_create_and_read_back() {
        let (_, pool, entries) = harness();
        let entry = entries.create_entry(0x2a, &&b"user:1"[..], Some(&&b"payload"[..]), 0);
        assert_ne!(entry, 0);
        assert_eq!(entries.hash(entry), 0x2a);
        assert_eq!(entries.key_len(entry), 6);
        assert_eq!(entries.value_len(entry), 7);
        assert_eq!(entries.chain_len(entry), 1);

        assert_eq!(&entries.key_bytes(entry)[..], b"user:1");
        let mut value: Vec<u8> = Vec::new();
        entries.write_value_to(entry, &mut value).unwrap();
        assert_eq!(value, b"payload");
        pool.free_chain(entry);
    }

    /// Test that values spanning several blocks stream back intact.
    #[test]
    fn test_multi_block_value_round_trip() {
        let (_, pool, entries) = harness();
        let value: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let entry = entries.create_entry(7, &&b"big"[..], Some(&&value[..]), 0);
        assert_ne!(entry, 0);
        // header(40) + key(3) + value(2000) over 504-byte payloads.
        assert_eq!(entries.chain_len(entry), 5);

        let mut out: Vec<u8> = Vec::new();
        entries.write_value_to(entry, &mut out).unwrap();
        assert_eq!(out, value);
        assert_eq!(pool.free_chain(entry), 5);
    }

    /// Test the deferred value write used by the serializer path.
    #[test]
    fn test_deferred_value_write() {
        let (_, pool, entries) = harness();
        let entry = entries.create_entry(1, &&b"k"[..], None, 11);
        assert_ne!(entry, 0);
        entries
            .write_value_with(entry, &mut |sink| {
                sink.put(b"hello ")?;
                sink.put(b"world")
            })
            .unwrap();
        let mut out: Vec<u8> = Vec::new();
        entries.write_value_to(entry, &mut out).unwrap();
        assert_eq!(out, b"hello world");
        pool.free_chain(entry);
    }

    /// Test that a short deferred write is rejected.
    #[test]
    fn test_deferred_write_must_fill_declared_length() {
        let (_, pool, entries) = harness();
        let entry = entries.create_entry(1, &&b"k"[..], None, 10);
        let res = entries.write_value_with(entry, &mut |sink| sink.put(b"short"));
        assert!(res.is_err());
        pool.free_chain(entry);
    }

    /// Test that an overflowing deferred write is rejected.
    #[test]
    fn test_deferred_write_cannot_overflow() {
        let (_, pool, entries) = harness();
        let entry = entries.create_entry(1, &&b"k"[..], None, 3);
        let res = entries.write_value_with(entry, &mut |sink| sink.put(b"too long"));
        assert!(res.is_err());
        pool.free_chain(entry);
    }

    /// Test lookup by hash and streamed key comparison.
    #[test]
    fn test_find_in_partition() {
        let (table, _, entries) = harness();
        let hash = 3u32;
        let slot = table.lock_for_hash(hash);

        let a = entries.create_entry(hash, &&b"alpha"[..], Some(&&b"A"[..]), 0);
        let b = entries.create_entry(hash, &&b"beta"[..], Some(&&b"B"[..]), 0);
        entries.lru_add_head(slot, a);
        entries.lru_add_head(slot, b);

        let (found, _) = entries.find(slot, hash, &&b"alpha"[..]);
        assert_eq!(found, a);
        let (found, walked) = entries.find(slot, hash, &&b"beta"[..]);
        assert_eq!(found, b);
        assert_eq!(walked, 1, "head should match first");

        // Same hash, different key.
        let (found, walked) = entries.find(slot, hash, &&b"gamma"[..]);
        assert_eq!(found, 0);
        assert_eq!(walked, 2, "whole list walked on a miss");

        // Different hash, same partition.
        let (found, _) = entries.find(slot, hash + 32, &&b"alpha"[..]);
        assert_eq!(found, 0);

        table.unlock(slot);
    }

    /// Test LRU list maintenance: add, remove, promote.
    #[test]
    fn test_lru_list_operations() {
        let (table, _, entries) = harness();
        let hash = 9u32;
        let slot = table.lock_for_hash(hash);

        let a = entries.create_entry(hash, &&b"a"[..], Some(&&b"1"[..]), 0);
        let b = entries.create_entry(hash, &&b"b"[..], Some(&&b"2"[..]), 0);
        let c = entries.create_entry(hash, &&b"c"[..], Some(&&b"3"[..]), 0);
        entries.lru_add_head(slot, a);
        entries.lru_add_head(slot, b);
        entries.lru_add_head(slot, c);

        // Head-to-tail order is newest first.
        assert_eq!(table.lru_head(slot), c);
        assert_eq!(entries.lru_next(c), b);
        assert_eq!(entries.lru_next(b), a);
        assert_eq!(entries.lru_next(a), 0);
        assert_eq!(entries.lru_tail(slot), a);
        assert_eq!(entries.list_len(slot), 3);

        // Splice out the middle.
        entries.lru_remove(slot, b);
        assert_eq!(entries.lru_next(c), a);
        assert_eq!(entries.lru_prev(a), c);
        assert_eq!(entries.list_len(slot), 2);

        // Promote the tail to the head.
        entries.lru_promote(slot, a);
        assert_eq!(table.lru_head(slot), a);
        assert_eq!(entries.lru_next(a), c);
        assert_eq!(entries.lru_tail(slot), c);

        // Promoting the head is a no-op.
        entries.lru_promote(slot, a);
        assert_eq!(table.lru_head(slot), a);

        // Removing the head moves the head pointer.
        entries.lru_remove(slot, a);
        assert_eq!(table.lru_head(slot), c);
        assert_eq!(entries.lru_prev(c), 0);

        table.unlock(slot);
    }

    /// Test the entry lock hand-off word.
    #[test]
    fn test_entry_lock_round_trip() {
        let (_, _, entries) = harness();
        let entry = entries.create_entry(0, &&b"k"[..], Some(&&b"v"[..]), 0);
        entries.lock_entry(entry);
        entries.unlock_entry(entry);
        // Re-acquirable after release.
        entries.lock_entry(entry);
    }

    /// Test hot-entry reporting from the head of a partition.
    #[test]
    fn test_hot_entries_reports_head_first() {
        let (table, _, entries) = harness();
        let hash = 4u32;
        let slot = table.lock_for_hash(hash);
        let a = entries.create_entry(hash, &&b"a"[..], Some(&&b"1"[..]), 0);
        let b = entries.create_entry(hash, &&b"b"[..], Some(&&b"2"[..]), 0);
        entries.lru_add_head(slot, a);
        entries.lru_add_head(slot, b);

        let mut seen = Vec::new();
        entries.hot_entries(slot, 1, &mut |e| seen.push(e));
        assert_eq!(seen, vec![b]);

        seen.clear();
        entries.hot_entries(slot, 10, &mut |e| seen.push(e));
        assert_eq!(seen, vec![b, a]);
        table.unlock(slot);
    }
}
