use crosstown::event::Event;
use crosstown::store::{EventStore, Filter};
use crosstown::store::memory::MemoryStore;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode};
use std::time::Duration;

fn event(i: u32) -> Event {
    Event {
        id: format!("{i:064x}"),
        pubkey: format!("{:064x}", i % 1000),
        created_at: i as i64,
        kind: 1,
        tags: vec![vec!["e".into(), format!("{i:064x}")]],
        content: "benchmark payload".into(),
        sig: "0".repeat(128),
    }
}

fn bench_query(c: &mut Criterion) {
    let store = MemoryStore::new();
    for i in 0..100_000u32 {
        store.store(&event(i)).unwrap();
    }

    let filter = Filter {
        authors: vec![format!("{:064x}", 500)],
        kinds: vec![1],
        ..Default::default()
    };

    let mut g = c.benchmark_group("query");
    g.sample_size(60)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(2))
        .sampling_mode(SamplingMode::Auto);

    g.bench_function(BenchmarkId::new("query by author+kind", 100_000), |b| {
        b.iter(|| {
            let f = black_box(&filter);
            let results = store.query(std::slice::from_ref(f)).unwrap();
            black_box(results.len());
        });
    });

    g.finish();
}

criterion_group!(benches, bench_query);
criterion_main!(benches);
