use std::{
    hint::black_box,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use listener_container::{
    backend::memory::{MemoryBroker, MemoryConnection},
    listener_fn, Connection, ContainerConfig, ListenerContainer, Topic,
};
use tokio::runtime::Runtime;

fn subscribed(
    rt: &Runtime,
    broker: &Arc<MemoryBroker>,
    count: usize,
) -> Vec<MemoryConnection> {
    rt.block_on(async {
        let mut conns = Vec::with_capacity(count);
        for _ in 0..count {
            let mut conn = broker.connect().unwrap();
            conn.subscribe(&Topic::channel("chan")).await.unwrap();
            conns.push(conn);
        }
        conns
    })
}

fn bench_publish_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("broker_publish");
    for subs in [0usize, 1, 10, 100] {
        let broker = Arc::new(MemoryBroker::new());
        let mut conns = subscribed(&rt, &broker, subs);
        group.bench_with_input(BenchmarkId::from_parameter(subs), &subs, |b, _| {
            b.iter(|| {
                black_box(broker.publish("chan", Bytes::from_static(b"x")));
            });
            // очищаем входящие очереди, чтобы не копить память между итерациями
            rt.block_on(async {
                for conn in conns.iter_mut() {
                    while let Ok(Ok(_)) =
                        tokio::time::timeout(Duration::from_micros(1), conn.receive()).await
                    {}
                }
            });
        });
    }
    group.finish();
}

fn bench_publish_pattern(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let broker = Arc::new(MemoryBroker::new());
    let _conns = rt.block_on(async {
        let mut conn = broker.connect().unwrap();
        for i in 0..50 {
            conn.subscribe(&Topic::pattern(format!("other.{i}.*")).unwrap())
                .await
                .unwrap();
        }
        conn
    });
    c.bench_function("broker_publish_50_patterns_no_match", |b| {
        b.iter(|| black_box(broker.publish("chan", Bytes::from_static(b"x"))))
    });
}

/// Публикация → вызов слушателя через работающий контейнер.
fn bench_end_to_end(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("container_dispatch");

    for workers in [0usize, 4] {
        let broker = Arc::new(MemoryBroker::new());
        let factory = Arc::new(listener_container::backend::memory::MemoryConnectionFactory::new(
            broker.clone(),
        ));
        let config = ContainerConfig {
            dispatch_workers: workers,
            ..Default::default()
        };
        let container = ListenerContainer::new(factory, config);
        let delivered = Arc::new(AtomicU64::new(0));
        let counter = delivered.clone();
        container.subscribe(
            Topic::channel("chan"),
            listener_fn(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        );
        rt.block_on(container.start()).unwrap();

        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, _| {
            b.iter_custom(|iters| {
                let target = delivered.load(Ordering::Relaxed) + iters;
                let start = Instant::now();
                for _ in 0..iters {
                    broker.publish("chan", Bytes::from_static(b"x"));
                }
                rt.block_on(async {
                    while delivered.load(Ordering::Relaxed) < target {
                        tokio::task::yield_now().await;
                    }
                });
                start.elapsed()
            });
        });

        rt.block_on(container.stop(Duration::from_secs(5))).unwrap();
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_publish_fanout,
    bench_publish_pattern,
    bench_end_to_end
);
criterion_main!(benches);
