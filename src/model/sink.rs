// Package model provides the write side of the byte-level API.

use std::io;

use ::bytes::BytesMut;

/// Streaming receiver for value bytes copied out of the cache.
///
/// Sinks run outside partition locks (the per-entry lock is held instead),
/// so they are allowed to fail and to be arbitrarily slow.
pub trait BytesSink {
    /// Announces the total value length before the first `put` call.
    fn reserve(&mut self, total: usize) {
        let _ = total;
    }

    /// Appends the next chunk.
    fn put(&mut self, chunk: &[u8]) -> io::Result<()>;
}

impl BytesSink for Vec<u8> {
    fn reserve(&mut self, total: usize) {
        Vec::reserve(self, total);
    }

    fn put(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

impl BytesSink for BytesMut {
    fn reserve(&mut self, total: usize) {
        BytesMut::reserve(self, total);
    }

    fn put(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}
