// Package storage provides lock-related constants.

/// CAS attempts on a partition or entry lock before the spinning thread
/// yields its timeslice.
pub const SPINS_BEFORE_YIELD: u64 = 128;

/// Chunk size for streamed key comparison and key/value copies.
pub const STREAM_CHUNK: usize = 256;
