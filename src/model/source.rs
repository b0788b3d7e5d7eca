// Package model provides the read side of the byte-level API.

use ::bytes::Bytes;
use xxhash_rust::xxh3::Xxh3;

/// Random-access view over serialized key or value bytes.
///
/// Sources are in-memory and infallible by contract: key comparison reads
/// them while a partition lock is held, so implementations must not block
/// or perform i/o.
pub trait BytesSource {
    /// Total number of bytes.
    fn size(&self) -> usize;

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    /// Callers never read past `size()`.
    fn read_at(&self, offset: usize, dst: &mut [u8]);

    /// Stable 32-bit hash of the full content, folded from the xxh3
    /// digest; the typed facade uses it to pick the partition.
    fn hash_code(&self) -> u32 {
        let mut hasher = Xxh3::new();
        let mut buf = [0u8; 256];
        let size = self.size();
        let mut off = 0usize;
        while off < size {
            let n = buf.len().min(size - off);
            self.read_at(off, &mut buf[..n]);
            hasher.update(&buf[..n]);
            off += n;
        }
        let digest = hasher.digest();
        ((digest >> 32) ^ digest) as u32
    }
}

impl BytesSource for [u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        dst.copy_from_slice(&self[offset..offset + dst.len()]);
    }
}

impl BytesSource for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        self.as_slice().read_at(offset, dst)
    }
}

impl BytesSource for str {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        self.as_bytes().read_at(offset, dst)
    }
}

impl BytesSource for Bytes {
    fn size(&self) -> usize {
        self.len()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        self.as_ref().read_at(offset, dst)
    }
}

impl<T: BytesSource + ?Sized> BytesSource for &T {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        (**self).read_at(offset, dst)
    }
}
