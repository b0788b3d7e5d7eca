// Package cache provides the typed facade over the untyped engine.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::metrics::{ExtendedStats, StatsSnapshot};
use crate::model::{BytesSource, PutOutcome, Serializer};
use crate::storage::RawCache;
use crate::workers;

/// Typed cache: keys and values go through [`Serializer`]s, the partition
/// hash is derived from the serialized key with xxh3, and the engine only
/// ever sees hashes and byte streams.
///
/// When a cleanup check interval is configured and a tokio runtime is
/// present at construction, a background cleaner is spawned; otherwise
/// `cleanup()` must be driven manually.
pub struct Cache<K, V> {
    core: Arc<RawCache>,
    key_ser: Arc<dyn Serializer<K>>,
    value_ser: Arc<dyn Serializer<V>>,
    shutdown_token: CancellationToken,
    cleaner: Option<tokio::task::JoinHandle<()>>,
}

impl<K, V> Cache<K, V> {
    pub fn new(
        cfg: CacheConfig,
        key_ser: Arc<dyn Serializer<K>>,
        value_ser: Arc<dyn Serializer<V>>,
    ) -> Result<Self, CacheError> {
        let resolved = cfg.resolve()?;
        let check_interval = resolved.cleanup_check_interval;
        let core = Arc::new(RawCache::new(resolved)?);
        let shutdown_token = CancellationToken::new();

        let cleaner = match check_interval {
            Some(every) if tokio::runtime::Handle::try_current().is_ok() => Some(
                workers::spawn_cleaner(core.clone(), every, shutdown_token.clone()),
            ),
            Some(_) => {
                tracing::debug!(
                    component = "cache",
                    event = "cleaner_skipped",
                    "no async runtime at construction; run cleanup() manually"
                );
                None
            }
            None => None,
        };

        Ok(Self {
            core,
            key_ser,
            value_ser,
            shutdown_token,
            cleaner,
        })
    }

    /// The untyped engine underneath, for diagnostics and byte-level
    /// access.
    pub fn raw(&self) -> &Arc<RawCache> {
        &self.core
    }

    /// Stores a value. A full pool yields `PutOutcome::NoSpace` and drops
    /// the value without error.
    pub fn put(&self, key: &K, value: &V) -> Result<PutOutcome, CacheError> {
        let kb = self.key_bytes(key)?;
        let hash = hash_of(&kb);
        let value_len = self.value_ser.serialized_size(value) as u64;
        let ser = &self.value_ser;
        self.core.put_with(
            hash,
            &&kb[..],
            value_len,
            &mut |sink| ser.serialize(value, sink),
            None,
        )
    }

    /// Stores a value and returns the previous one when the key was
    /// already present.
    pub fn put_returning_old(
        &self,
        key: &K,
        value: &V,
    ) -> Result<(PutOutcome, Option<V>), CacheError> {
        let kb = self.key_bytes(key)?;
        let hash = hash_of(&kb);
        let value_len = self.value_ser.serialized_size(value) as u64;
        let ser = &self.value_ser;
        let mut old: Vec<u8> = Vec::new();
        let outcome = self.core.put_with(
            hash,
            &&kb[..],
            value_len,
            &mut |sink| ser.serialize(value, sink),
            Some(&mut old),
        )?;
        let old_value = match outcome {
            PutOutcome::Replaced => Some(self.value_ser.deserialize(&old)?),
            _ => None,
        };
        Ok((outcome, old_value))
    }

    /// Stores a value only when the key is absent; returns whether it was
    /// stored.
    pub fn put_if_absent(&self, key: &K, value: &V) -> Result<bool, CacheError> {
        let kb = self.key_bytes(key)?;
        let mut vb: Vec<u8> = Vec::with_capacity(self.value_ser.serialized_size(value));
        self.value_ser.serialize(value, &mut vb)?;
        self.core.put_if_absent(hash_of(&kb), &&kb[..], &&vb[..])
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        let kb = self.key_bytes(key)?;
        let mut out: Vec<u8> = Vec::new();
        if self.core.get(hash_of(&kb), &&kb[..], &mut out)? {
            Ok(Some(self.value_ser.deserialize(&out)?))
        } else {
            Ok(None)
        }
    }

    /// Gets the value, invoking `loader` outside all locks on a miss.
    /// Load time and success/failure are recorded in the statistics.
    pub fn get_or_load<F>(&self, key: &K, loader: F) -> Result<V, CacheError>
    where
        F: FnOnce() -> io::Result<V>,
    {
        if let Some(v) = self.get(key)? {
            return Ok(v);
        }
        let started = Instant::now();
        match loader() {
            Ok(v) => {
                self.core.metrics().load_success(started.elapsed());
                self.put(key, &v)?;
                Ok(v)
            }
            Err(e) => {
                self.core.metrics().load_exception();
                Err(e.into())
            }
        }
    }

    /// Membership probe without LRU promotion.
    pub fn contains(&self, key: &K) -> Result<bool, CacheError> {
        let kb = self.key_bytes(key)?;
        self.core.contains(hash_of(&kb), &&kb[..])
    }

    pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
        let kb = self.key_bytes(key)?;
        self.core.remove(hash_of(&kb), &&kb[..])
    }

    /// Up to `n` most-recently-used keys, deserialized.
    pub fn hot_keys(&self, n: u64) -> Result<Vec<K>, CacheError> {
        let raw = self.core.hot_keys(n)?;
        let mut keys = Vec::with_capacity(raw.len());
        for kb in raw {
            keys.push(self.key_ser.deserialize(&kb)?);
        }
        Ok(keys)
    }

    pub fn size(&self) -> u64 {
        self.core.size()
    }

    pub fn capacity(&self) -> u64 {
        self.core.capacity()
    }

    pub fn mem_used(&self) -> u64 {
        self.core.mem_used()
    }

    pub fn free_space_fraction(&self) -> f64 {
        self.core.free_space_fraction()
    }

    pub fn cleanup(&self) -> Result<u64, CacheError> {
        self.core.cleanup()
    }

    pub fn invalidate_all(&self) -> Result<(), CacheError> {
        self.core.invalidate_all()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats()
    }

    pub fn extended_stats(&self) -> ExtendedStats {
        self.core.extended_stats()
    }

    /// Fails every later operation fast and stops the background cleaner.
    /// The backing region is released when the last reference drops.
    pub fn close(&self) {
        self.shutdown_token.cancel();
        self.core.close();
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Handle of the background cleaner, when one was spawned.
    pub fn cleaner_handle(&self) -> Option<&tokio::task::JoinHandle<()>> {
        self.cleaner.as_ref()
    }

    fn key_bytes(&self, key: &K) -> Result<Vec<u8>, CacheError> {
        let mut buf = Vec::with_capacity(self.key_ser.serialized_size(key));
        self.key_ser.serialize(key, &mut buf)?;
        Ok(buf)
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// Partition hash of a serialized key.
fn hash_of(key_bytes: &[u8]) -> u32 {
    key_bytes.hash_code()
}
