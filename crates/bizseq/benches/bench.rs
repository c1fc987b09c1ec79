use bizseq::{MemoryStore, Sequencer, SequencerConfig};
use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Builder, Runtime};

// Number of IDs drawn per benchmark iteration (split across tasks for the
// contended runs).
const TOTAL_IDS: usize = 4096;

fn sequencer(rt: &Runtime, step: u32) -> Arc<Sequencer> {
    let config = SequencerConfig::default().with_default_step(step);
    let sequencer = rt
        .block_on(Sequencer::with_store(config, Arc::new(MemoryStore::new())))
        .unwrap();
    Arc::new(sequencer)
}

/// One task drawing from one key; almost every call is the in-memory fast
/// path.
fn bench_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory/sequential");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    for step in [100, 1_000, 10_000] {
        group.bench_function(format!("elems/{TOTAL_IDS}/step/{step}"), |b| {
            let rt = Builder::new_multi_thread()
                .enable_all()
                .worker_threads(1)
                .build()
                .unwrap();
            let sequencer = sequencer(&rt, step);

            b.to_async(&rt).iter_custom(|iters| {
                let sequencer = Arc::clone(&sequencer);
                async move {
                    let start = Instant::now();
                    for _ in 0..iters {
                        for _ in 0..TOTAL_IDS {
                            black_box(sequencer.get_next_id("bench").await.unwrap());
                        }
                    }
                    start.elapsed()
                }
            });

            rt.block_on(sequencer.close()).unwrap();
        });
    }

    group.finish();
}

/// Many tasks hammering the same key or one key each.
fn bench_contended(c: &mut Criterion, shared_key: bool) {
    let name = if shared_key {
        "memory/contended/shared-key"
    } else {
        "memory/contended/key-per-task"
    };
    let mut group = c.benchmark_group(name);
    group.sample_size(10);
    group.sampling_mode(criterion::SamplingMode::Flat);

    let total_ids = TOTAL_IDS * 64;
    group.throughput(Throughput::Elements(total_ids as u64));

    for tasks in [1, 2, 4, 8, 16, 32] {
        let ids_per_task = total_ids / tasks;

        group.bench_function(format!("elems/{total_ids}/tasks/{tasks}"), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();
            let sequencer = sequencer(&rt, 1_000);

            b.to_async(&rt).iter_custom(|iters| {
                let sequencer = Arc::clone(&sequencer);
                async move {
                    let start = Instant::now();
                    for _ in 0..iters {
                        let handles = (0..tasks).map(|t| {
                            let sequencer = Arc::clone(&sequencer);
                            let key = if shared_key {
                                String::from("bench")
                            } else {
                                format!("bench-{t}")
                            };
                            tokio::spawn(async move {
                                for _ in 0..ids_per_task {
                                    black_box(sequencer.get_next_id(&key).await?);
                                }
                                Ok::<_, bizseq::Error>(())
                            })
                        });

                        for result in try_join_all(handles).await.unwrap() {
                            result.unwrap();
                        }
                    }
                    start.elapsed()
                }
            });

            rt.block_on(sequencer.close()).unwrap();
        });
    }

    group.finish();
}

fn bench_contended_shared_key(c: &mut Criterion) {
    bench_contended(c, true);
}

fn bench_contended_key_per_task(c: &mut Criterion) {
    bench_contended(c, false);
}

criterion_group!(
    benches,
    bench_sequential,
    bench_contended_shared_key,
    bench_contended_key_per_task,
);
criterion_main!(benches);
