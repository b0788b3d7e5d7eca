// Package error provides the cache error types.

use thiserror::Error;

/// Errors surfaced by the public cache API.
///
/// Running out of blocks during a put is not an error: a bounded cache is
/// expected to fill up, so that case is reported as
/// [`crate::model::PutOutcome::NoSpace`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid user input or mis-sized configuration.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A sink or serializer failed while streaming bytes.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was invoked after `close()`.
    #[error("cache is closed")]
    Closed,

    /// The backing region could not be allocated.
    #[error("backing region allocation of {0} bytes failed")]
    RegionAlloc(usize),

    /// The operation cannot be served safely.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
