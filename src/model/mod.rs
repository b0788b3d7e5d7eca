// Package model provides the byte-level API types: sources, sinks,
// serializers and operation outcomes.

pub mod serializer;
pub mod sink;
pub mod source;

// Re-export main types
pub use serializer::{RawBytesSerializer, Serializer, StringSerializer};
pub use sink::BytesSink;
pub use source::BytesSource;

/// Outcome of a put operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The key was not present; a new entry was stored.
    Added,
    /// An existing entry was replaced.
    Replaced,
    /// The allocator could not provide a chain; nothing was stored.
    NoSpace,
}
