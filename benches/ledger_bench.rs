//! Performance benchmarks for the Neural Ledger.
//!
//! Run with: cargo bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use neural_ledger::crypto::{
    compute_data_hash, compute_event_hash, compute_merkle_root, repair_chain, verify_chain,
    KeyRing, GENESIS_HASH,
};
use neural_ledger::domain::{EventType, LedgerEvent, SessionId};
use neural_ledger::infra::{
    EventProcessor, MemoryAnalyticalStore, MemoryDurableStore, MemoryRealtimeStore,
    ProcessorConfig,
};

fn sample_event(i: u64) -> LedgerEvent {
    LedgerEvent::new(EventType::DataIngested)
        .with_session(SessionId::from("s-bench"))
        .with_data_hash("ab".repeat(32))
        .with_metadata("data_size_bytes", 4096u64)
        .with_metadata("seq", i)
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashing");

    let event = sample_event(0);
    group.bench_function("compute_event_hash", |b| {
        b.iter(|| black_box(compute_event_hash(black_box(&event), GENESIS_HASH)));
    });

    let payload = vec![0x5au8; 64 * 1024];
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("compute_data_hash_64k", |b| {
        b.iter(|| black_box(compute_data_hash(black_box(&payload))));
    });

    group.finish();
}

fn bench_chain_verification(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");

    for size in [64usize, 1024] {
        let events: Vec<LedgerEvent> = (0..size as u64).map(sample_event).collect();
        let chain = repair_chain(&events);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("verify_chain", size), &chain, |b, chain| {
            b.iter(|| black_box(verify_chain(black_box(chain))));
        });
        group.bench_with_input(
            BenchmarkId::new("merkle_root", size),
            &chain,
            |b, chain| {
                b.iter(|| black_box(compute_merkle_root(black_box(chain))));
            },
        );
    }

    group.finish();
}

fn bench_signing(c: &mut Criterion) {
    let ring = KeyRing::new();
    let event = repair_chain(&[sample_event(0)]).remove(0);

    c.bench_function("sign_event_hash", |b| {
        b.iter(|| black_box(ring.sign_hash(black_box(&event.event_hash)).unwrap()));
    });

    let sig = ring.sign_hash(&event.event_hash).unwrap();
    c.bench_function("verify_event_signature", |b| {
        b.iter(|| {
            black_box(
                ring.verify_hash(&event.event_hash, &sig.signature, &sig.key_id)
                    .unwrap(),
            )
        });
    });
}

fn bench_pipeline(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("process_commit", |b| {
        b.iter_custom(|iters| {
            runtime.block_on(async {
                let processor = EventProcessor::new(
                    MemoryDurableStore::shared(),
                    MemoryRealtimeStore::shared(),
                    MemoryAnalyticalStore::shared(),
                    Arc::new(KeyRing::new()),
                    ProcessorConfig::default(),
                )
                .await
                .unwrap();

                let start = std::time::Instant::now();
                for i in 0..iters {
                    black_box(processor.process(sample_event(i)).await.unwrap());
                }
                start.elapsed()
            })
        });
    });
}

criterion_group!(
    benches,
    bench_hashing,
    bench_chain_verification,
    bench_signing,
    bench_pipeline
);
criterion_main!(benches);
