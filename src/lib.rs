#[path = "shared/bytes/mod.rs"]
pub mod bytes;

pub mod cache;
pub mod config;
pub mod error;
pub mod mem;
pub mod metrics;
pub mod model;
pub mod storage;
pub mod workers;

#[cfg(test)]
mod tests;

pub use cache::Cache;
pub use config::{CacheConfig, ResolvedConfig};
pub use error::CacheError;
pub use metrics::{ExtendedStats, StatsSnapshot};
pub use model::{
    BytesSink, BytesSource, PutOutcome, RawBytesSerializer, Serializer, StringSerializer,
};
pub use storage::RawCache;
