use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use typebus::{Bus, Consumer, ConsumerMethod, ThreadMode};

// Sample event for benchmarking
#[derive(Clone, Debug)]
struct TestEvent {
    pub id: u64,
    pub data: String,
}

impl typebus::Event for TestEvent {}

struct CountingConsumer {
    counter: Arc<AtomicU64>,
}

impl Consumer for CountingConsumer {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        let counter = self.counter.clone();
        vec![ConsumerMethod::typed(
            ThreadMode::Posting,
            move |_: &CountingConsumer, _, event: &TestEvent| {
                counter.fetch_add(event.id, Ordering::Relaxed);
            },
        )]
    }
}

fn bench_posting_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("posting_dispatch");

    for subscribers in [1usize, 5, 20] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &subscribers| {
                let bus = Bus::builder().send_no_subscriber_event(false).build();
                let counter = Arc::new(AtomicU64::new(0));
                let targets: Vec<_> = (0..subscribers)
                    .map(|_| {
                        let target = Arc::new(CountingConsumer {
                            counter: counter.clone(),
                        });
                        bus.register(&target).unwrap();
                        target
                    })
                    .collect();

                b.iter(|| {
                    bus.post(black_box(TestEvent {
                        id: 1,
                        data: "payload".to_string(),
                    }))
                    .unwrap();
                });

                for target in &targets {
                    bus.unregister(target);
                }
            },
        );
    }
    group.finish();
}

fn bench_sticky_post(c: &mut Criterion) {
    c.bench_function("post_sticky", |b| {
        let bus = Bus::builder().send_no_subscriber_event(false).build();
        let counter = Arc::new(AtomicU64::new(0));
        let target = Arc::new(CountingConsumer { counter });
        bus.register(&target).unwrap();

        b.iter(|| {
            bus.post_sticky(black_box(TestEvent {
                id: 1,
                data: "sticky".to_string(),
            }))
            .unwrap();
        });
    });
}

fn bench_register_unregister(c: &mut Criterion) {
    c.bench_function("register_unregister", |b| {
        let bus = Bus::builder().send_no_subscriber_event(false).build();
        let counter = Arc::new(AtomicU64::new(0));

        b.iter(|| {
            let target = Arc::new(CountingConsumer {
                counter: counter.clone(),
            });
            bus.register(&target).unwrap();
            bus.unregister(&target);
        });
    });
}

criterion_group!(
    benches,
    bench_posting_throughput,
    bench_sticky_post,
    bench_register_unregister
);
criterion_main!(benches);
