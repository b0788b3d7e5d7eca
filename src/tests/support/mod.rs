// Shared test support code for integration tests.

use std::sync::{Arc, Once};
use std::time::Duration;

use rand::Rng;

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::model::{RawBytesSerializer, StringSerializer};
use crate::storage::RawCache;

static LOGGING: Once = Once::new();

/// Installs a test subscriber once so worker log lines show up under
/// `RUST_LOG`.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Smallest valid engine: 8 MiB of 512-byte blocks over 32 partitions,
/// no triggered eviction.
pub fn small_config() -> CacheConfig {
    CacheConfig {
        block_size: 512,
        capacity: 8 << 20,
        hash_table_size: Some(32),
        cleanup_trigger: 0.0,
        cleanup_check_interval: None,
        ..Default::default()
    }
}

/// Same footprint with triggered eviction enabled.
pub fn eviction_config(trigger: f64, check_interval: Duration) -> CacheConfig {
    CacheConfig {
        cleanup_trigger: trigger,
        cleanup_check_interval: Some(check_interval),
        ..small_config()
    }
}

pub fn raw_cache(cfg: CacheConfig) -> Arc<RawCache> {
    Arc::new(RawCache::new(cfg.resolve().unwrap()).unwrap())
}

pub fn string_cache(cfg: CacheConfig) -> Cache<String, String> {
    Cache::new(cfg, Arc::new(StringSerializer), Arc::new(StringSerializer)).unwrap()
}

pub fn bytes_cache(cfg: CacheConfig) -> Cache<Vec<u8>, Vec<u8>> {
    Cache::new(
        cfg,
        Arc::new(RawBytesSerializer),
        Arc::new(RawBytesSerializer),
    )
    .unwrap()
}

/// A value filled with one byte derived from the key, so torn reads are
/// detectable as mixed bytes.
pub fn patterned_value(key_no: u32, len: usize) -> Vec<u8> {
    vec![(key_no % 251) as u8; len]
}

pub fn assert_unmixed(value: &[u8]) {
    assert!(!value.is_empty());
    let first = value[0];
    assert!(
        value.iter().all(|&b| b == first),
        "torn read: mixed bytes in a patterned value"
    );
}

pub fn random_blob(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let mut blob = vec![0u8; len];
    rng.fill(&mut blob[..]);
    blob
}
