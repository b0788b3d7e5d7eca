// Configuration loading, validation and normalization.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub const MIN_BLOCK_SIZE: u64 = 512;
pub const MAX_BLOCK_SIZE: u64 = 256 * 1024;
pub const MIN_CAPACITY: u64 = 8 * 1024 * 1024;
pub const MIN_PARTITIONS: u64 = 32;
pub const MAX_PARTITIONS: u64 = 4 * 1024 * 1024;

/// User-facing cache configuration.
///
/// Loadable from YAML; every field has a default. The engine never sees
/// this struct directly: [`CacheConfig::resolve`] validates and normalizes
/// it into a [`ResolvedConfig`] first.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Block size in bytes; rounded up to the next power of two and
    /// clamped to [512, 262144].
    pub block_size: u64,
    /// Total pool capacity in bytes; rounded down to a block multiple.
    /// At least 8 MiB after rounding.
    pub capacity: u64,
    /// Partition count; power-of-two rounded and clamped to
    /// [32, 4194304]. Defaults to `(capacity / block_size) / 16`.
    pub hash_table_size: Option<u64>,
    /// Free-block fraction at or below which a cleanup pass evicts.
    /// 0 disables triggered eviction.
    pub cleanup_trigger: f64,
    /// How often the background cleaner checks the trigger. Required
    /// when `cleanup_trigger` is non-zero, and must be absent otherwise.
    #[serde(default, with = "humantime_serde")]
    pub cleanup_check_interval: Option<Duration>,
    /// Partition list length above which a warning is logged once.
    pub lru_list_warn_trigger: u64,
    pub statistics_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: 2048,
            capacity: 64 << 20,
            hash_table_size: None,
            cleanup_trigger: 0.1,
            cleanup_check_interval: Some(Duration::from_secs(1)),
            lru_list_warn_trigger: 64,
            statistics_enabled: true,
        }
    }
}

impl CacheConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, CacheError> {
        serde_yaml::from_str(raw)
            .map_err(|e| CacheError::InvalidArgument(format!("config parse: {}", e)))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    /// Validates and normalizes into the engine-facing form.
    pub fn resolve(&self) -> Result<ResolvedConfig, CacheError> {
        let block_size = self
            .block_size
            .next_power_of_two()
            .clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);

        let capacity = self.capacity - (self.capacity % block_size);
        if capacity < MIN_CAPACITY {
            return Err(CacheError::InvalidArgument(format!(
                "capacity must be at least {} bytes after block alignment, got {}",
                MIN_CAPACITY, capacity
            )));
        }
        let block_count = capacity / block_size;

        let partition_count = self
            .hash_table_size
            .unwrap_or(block_count / 16)
            .next_power_of_two()
            .clamp(MIN_PARTITIONS, MAX_PARTITIONS);

        if !self.cleanup_trigger.is_finite() || !(0.0..=1.0).contains(&self.cleanup_trigger) {
            return Err(CacheError::InvalidArgument(format!(
                "cleanup_trigger must be within [0, 1], got {}",
                self.cleanup_trigger
            )));
        }
        match (self.cleanup_trigger > 0.0, self.cleanup_check_interval) {
            (true, None) => {
                return Err(CacheError::InvalidArgument(
                    "cleanup_check_interval is required when cleanup_trigger > 0".to_string(),
                ));
            }
            (true, Some(d)) if d.is_zero() => {
                return Err(CacheError::InvalidArgument(
                    "cleanup_check_interval must be non-zero when cleanup_trigger > 0".to_string(),
                ));
            }
            (false, Some(d)) if !d.is_zero() => {
                return Err(CacheError::InvalidArgument(
                    "cleanup_check_interval must be unset when cleanup_trigger is 0".to_string(),
                ));
            }
            _ => {}
        }

        if self.lru_list_warn_trigger == 0 {
            return Err(CacheError::InvalidArgument(
                "lru_list_warn_trigger must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            block_size,
            capacity,
            block_count,
            partition_count,
            cleanup_trigger: self.cleanup_trigger,
            cleanup_check_interval: self.cleanup_check_interval.filter(|d| !d.is_zero()),
            lru_list_warn_trigger: self.lru_list_warn_trigger,
            statistics_enabled: self.statistics_enabled,
        })
    }
}

/// Normalized configuration as enforced by the engine.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub block_size: u64,
    pub capacity: u64,
    pub block_count: u64,
    pub partition_count: u64,
    pub cleanup_trigger: f64,
    pub cleanup_check_interval: Option<Duration>,
    pub lru_list_warn_trigger: u64,
    pub statistics_enabled: bool,
}
