//! Write/read throughput, replacing the teacher's compression-ratio bench
//! since compression is out of scope here (spec.md §1 "Non-goals").

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use content_manager::{CachingOptions, FormattingOptions, Manager, MemoryBlobStore};

fn manager_for_bench(max_pack_size: usize) -> (tempfile::TempDir, Manager) {
    let dir = tempfile::tempdir().unwrap();
    let store = Box::new(MemoryBlobStore::new());
    let formatting = FormattingOptions {
        max_pack_size,
        ..FormattingOptions::default()
    };
    let caching = CachingOptions::default();
    let mgr = Manager::new(store, dir.path(), formatting, caching, || 1_700_000_000).unwrap();
    (dir, mgr)
}

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_content");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (_dir, mgr) = manager_for_bench(8 * 1024 * 1024);
            let data = vec![0xabu8; size];
            let mut counter = 0u64;
            b.iter(|| {
                counter += 1;
                // Vary the payload per iteration so dedup never short-circuits
                // the path we're measuring.
                let mut data = data.clone();
                data.extend_from_slice(&counter.to_le_bytes());
                let id = mgr.write_content(black_box(&data), "").unwrap();
                black_box(id);
            });
        });
    }
    group.finish();
}

fn bench_read_after_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_content_sealed");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let (_dir, mgr) = manager_for_bench(8 * 1024 * 1024);
            let data = vec![0xcdu8; size];
            let id = mgr.write_content(&data, "").unwrap();
            mgr.flush().unwrap();
            b.iter(|| {
                let out = mgr.get_content(black_box(&id)).unwrap();
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_write, bench_read_after_flush);
criterion_main!(benches);
