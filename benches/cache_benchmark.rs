// Criterion benchmarks for the off-heap cache hot paths.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use blockcache::{Cache, CacheConfig, RawBytesSerializer};

fn bench_config() -> CacheConfig {
    CacheConfig {
        block_size: 2048,
        capacity: 64 << 20,
        cleanup_trigger: 0.0,
        cleanup_check_interval: None,
        statistics_enabled: false,
        ..Default::default()
    }
}

fn cache() -> Cache<Vec<u8>, Vec<u8>> {
    Cache::new(
        bench_config(),
        Arc::new(RawBytesSerializer),
        Arc::new(RawBytesSerializer),
    )
    .expect("bench config is valid")
}

fn bench_put(c: &mut Criterion) {
    let cache = cache();
    let value = vec![0xabu8; 1024];
    let keys: Vec<Vec<u8>> = (0..4096u32).map(|i| i.to_be_bytes().to_vec()).collect();

    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("put_1k", |b| {
        let mut i = 0usize;
        b.iter(|| {
            cache.put(&keys[i % keys.len()], &value).unwrap();
            i += 1;
        })
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let cache = cache();
    let value = vec![0xcdu8; 1024];
    let keys: Vec<Vec<u8>> = (0..4096u32).map(|i| i.to_be_bytes().to_vec()).collect();
    for key in &keys {
        cache.put(key, &value).unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("get_1k", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let v = cache.get(&keys[i % keys.len()]).unwrap();
            debug_assert!(v.is_some());
            i += 1;
        })
    });
    group.finish();
}

fn bench_mixed(c: &mut Criterion) {
    let cache = cache();
    let value = vec![0xefu8; 1024];
    let keys: Vec<Vec<u8>> = (0..4096u32).map(|i| i.to_be_bytes().to_vec()).collect();
    for key in &keys {
        cache.put(key, &value).unwrap();
    }

    c.bench_function("mixed_get_put", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let key = &keys[i % keys.len()];
            if i % 8 == 0 {
                cache.put(key, &value).unwrap();
            } else {
                cache.get(key).unwrap();
            }
            i += 1;
        })
    });
}

fn config() -> Criterion {
    Criterion::default()
        .measurement_time(Duration::from_secs(3))
        .warm_up_time(Duration::from_secs(1))
}

criterion_group! {
    name = benches;
    config = config();
    targets = bench_put, bench_get, bench_mixed
}
criterion_main!(benches);
