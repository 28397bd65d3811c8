use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use textcrdt_core::{export_missing, Branch, Frontier, OpLog, Replica, SyncSession};

fn typed(agent: &str, len: usize) -> Replica {
    let mut doc = Replica::with_agent(agent);
    for i in 0..len {
        doc.insert(i, "a").unwrap();
    }
    doc
}

/// Two replicas edit the same document concurrently, then merge.
fn forked(len: usize) -> OpLog {
    let mut a = typed("alice", len);
    let mut b = Replica::with_agent("bob");
    SyncSession::new()
        .apply(&mut b, export_missing(&a, b.version_vector()).unwrap())
        .unwrap();
    for i in 0..len / 4 {
        a.insert(i * 2, "x").unwrap();
        b.insert(b.len() - i, "y").unwrap();
    }
    SyncSession::new()
        .apply(&mut a, export_missing(&b, a.version_vector()).unwrap())
        .unwrap();
    a.oplog().clone()
}

fn bench_sequential_typing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_typing");
    for size in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| black_box(typed("typist", size).len()));
        });
    }
    group.finish();
}

fn bench_delete_range(c: &mut Criterion) {
    c.bench_function("delete_1000_chars", |b| {
        b.iter_batched(
            || typed("typist", 1_000),
            |mut doc| black_box(doc.delete(0, 1_000).unwrap()),
            BatchSize::SmallInput,
        );
    });
}

fn bench_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkout_merged_heads");
    group.sample_size(20);
    for size in [1_000usize, 4_000] {
        let oplog = forked(size);
        group.bench_with_input(BenchmarkId::new("walker", size), &oplog, |b, oplog| {
            b.iter(|| {
                let mut branch = Branch::new();
                branch.checkout(oplog, oplog.version()).unwrap();
                black_box(branch.len())
            });
        });
        group.bench_with_input(BenchmarkId::new("rebuild", size), &oplog, |b, oplog| {
            b.iter(|| {
                let mut branch = Branch::new();
                branch.rebuild(oplog, oplog.version()).unwrap();
                black_box(branch.len())
            });
        });
    }
    group.finish();
}

fn bench_time_travel(c: &mut Criterion) {
    let oplog = forked(2_000);
    let mut branch = Branch::new();
    branch.checkout(&oplog, oplog.version()).unwrap();
    let old = Frontier::new_1(oplog.len() / 2);
    c.bench_function("checkout_back_and_forth", |b| {
        b.iter(|| {
            branch.checkout(&oplog, &old).unwrap();
            branch.checkout(&oplog, oplog.version()).unwrap();
            black_box(branch.len())
        });
    });
}

criterion_group!(
    benches,
    bench_sequential_typing,
    bench_delete_range,
    bench_checkout,
    bench_time_travel
);
criterion_main!(benches);
