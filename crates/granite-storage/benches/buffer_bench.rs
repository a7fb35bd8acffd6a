//! Buffer pool and replacer benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use granite_storage::buffer::{BufferPoolConfig, BufferPoolManager, FrameId, LruKReplacer};
use granite_storage::disk::DiskManager;
use tempfile::tempdir;

fn replacer_churn_benchmark(c: &mut Criterion) {
    c.bench_function("lru_k_churn_1000", |b| {
        b.iter(|| {
            let replacer = LruKReplacer::new(1000, 2);
            for i in 0..1000 {
                replacer.record_access(FrameId::new(i));
                replacer.set_evictable(FrameId::new(i), true);
            }
            let mut evicted = 0;
            while replacer.evict().is_some() {
                evicted += 1;
            }
            black_box(evicted)
        })
    });
}

fn pool_fetch_hit_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path().join("bench.db")).unwrap();
    let pool = BufferPoolManager::new(BufferPoolConfig::new(128), disk).unwrap();

    let pages: Vec<_> = (0..128)
        .map(|_| pool.new_page().unwrap().page_id())
        .collect();

    c.bench_function("pool_fetch_hit_128", |b| {
        b.iter(|| {
            for &page_id in &pages {
                let guard = pool.fetch_page_read(page_id).unwrap();
                black_box(guard.data()[0]);
            }
        })
    });
}

fn pool_eviction_benchmark(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let disk = DiskManager::open(dir.path().join("bench.db")).unwrap();
    let pool = BufferPoolManager::new(BufferPoolConfig::new(16), disk).unwrap();

    // Four times more pages than frames, so every pass churns the pool.
    let pages: Vec<_> = (0..64)
        .map(|i| {
            let mut guard = pool.new_page().unwrap();
            guard.data_mut()[0] = i as u8;
            guard.page_id()
        })
        .collect();

    c.bench_function("pool_fetch_churn_64_over_16", |b| {
        b.iter(|| {
            for &page_id in &pages {
                let guard = pool.fetch_page_read(page_id).unwrap();
                black_box(guard.data()[0]);
            }
        })
    });
}

criterion_group!(
    benches,
    replacer_churn_benchmark,
    pool_fetch_hit_benchmark,
    pool_eviction_benchmark,
);
criterion_main!(benches);
