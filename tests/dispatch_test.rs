//! Delivery strategy behaviour with real threads: main-loop serialisation,
//! the background worker and parallel async fan-out.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use typebus::{BusBuilder, Consumer, ConsumerMethod, DedicatedMainLoop, MainLoop, ThreadMode};

fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

// ---- main loop ----

struct MainObserver {
    threads: Mutex<Vec<ThreadId>>,
}

impl Consumer for MainObserver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        vec![ConsumerMethod::typed(
            ThreadMode::Main,
            |me: &MainObserver, _, _: &u32| {
                me.threads.lock().unwrap().push(thread::current().id());
            },
        )]
    }
}

#[test]
fn main_mode_hops_to_the_loop_thread_for_off_main_emitters() {
    let main_loop = Arc::new(DedicatedMainLoop::spawn().unwrap());
    let bus = BusBuilder::new()
        .main_loop(main_loop.clone())
        .send_no_subscriber_event(false)
        .build();
    let observer = Arc::new(MainObserver {
        threads: Mutex::new(Vec::new()),
    });
    bus.register(&observer).unwrap();

    bus.post(1u32).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !observer.threads.lock().unwrap().is_empty()
    }));
    let delivered_on = observer.threads.lock().unwrap()[0];
    assert_ne!(delivered_on, thread::current().id());
}

struct OrderingObserver {
    order: Arc<Mutex<Vec<&'static str>>>,
}

impl Consumer for OrderingObserver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        let inline_order = self.order.clone();
        let ordered_order = self.order.clone();
        vec![
            ConsumerMethod::typed(ThreadMode::Main, move |_: &OrderingObserver, _, _: &u32| {
                inline_order.lock().unwrap().push("main");
            }),
            ConsumerMethod::typed(
                ThreadMode::MainOrdered,
                move |_: &OrderingObserver, _, _: &u64| {
                    ordered_order.lock().unwrap().push("main-ordered");
                },
            ),
        ]
    }
}

#[test]
fn main_is_inline_on_the_loop_thread_while_main_ordered_queues() {
    let main_loop = Arc::new(DedicatedMainLoop::spawn().unwrap());
    let bus = BusBuilder::new()
        .main_loop(main_loop.clone())
        .send_no_subscriber_event(false)
        .build();
    let order = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::new(OrderingObserver {
        order: order.clone(),
    });
    bus.register(&observer).unwrap();

    // Emit from the loop thread itself so MAIN can fall through inline.
    let (tx, rx) = mpsc::channel();
    let task_bus = bus.clone();
    let task_order = order.clone();
    main_loop
        .post_task(Box::new(move || {
            task_order.lock().unwrap().push("before");
            task_bus.post(1u32).unwrap();
            task_bus.post(1u64).unwrap();
            task_order.lock().unwrap().push("after");
            tx.send(()).unwrap();
        }))
        .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        order.lock().unwrap().len() == 4
    }));
    // MAIN ran nested inside the tick; MAIN_ORDERED strictly after it.
    assert_eq!(
        *order.lock().unwrap(),
        vec!["before", "main", "after", "main-ordered"]
    );
}

#[test]
fn without_a_main_loop_main_modes_degrade_to_inline() {
    let bus = BusBuilder::new().send_no_subscriber_event(false).build();
    let order = Arc::new(Mutex::new(Vec::new()));
    let observer = Arc::new(OrderingObserver {
        order: order.clone(),
    });
    bus.register(&observer).unwrap();

    bus.post(1u32).unwrap();
    bus.post(1u64).unwrap();

    // Both delivered synchronously on the emitting thread.
    assert_eq!(*order.lock().unwrap(), vec!["main", "main-ordered"]);
}

// ---- background ----

struct BackgroundObserver {
    threads: Mutex<Vec<ThreadId>>,
    seen: Mutex<Vec<u32>>,
}

impl BackgroundObserver {
    fn new() -> Arc<Self> {
        Arc::new(BackgroundObserver {
            threads: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl Consumer for BackgroundObserver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        vec![ConsumerMethod::typed(
            ThreadMode::Background,
            |me: &BackgroundObserver, _, event: &u32| {
                me.threads.lock().unwrap().push(thread::current().id());
                me.seen.lock().unwrap().push(*event);
            },
        )]
    }
}

#[test]
fn background_consumers_drain_fifo_off_the_emitting_thread() {
    // No main loop: every thread counts as main, so background deliveries
    // always hop to the worker.
    let bus = BusBuilder::new().send_no_subscriber_event(false).build();
    let observer = BackgroundObserver::new();
    bus.register(&observer).unwrap();

    for event in 0..20u32 {
        bus.post(event).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        observer.seen.lock().unwrap().len() == 20
    }));
    // Serialised on one worker, in emit order.
    let expected: Vec<u32> = (0..20).collect();
    assert_eq!(*observer.seen.lock().unwrap(), expected);
    let threads = observer.threads.lock().unwrap();
    assert!(threads.iter().all(|id| *id != thread::current().id()));
}

#[test]
fn background_runs_inline_when_the_emitter_is_off_main() {
    let main_loop = Arc::new(DedicatedMainLoop::spawn().unwrap());
    let bus = BusBuilder::new()
        .main_loop(main_loop)
        .send_no_subscriber_event(false)
        .build();
    let observer = BackgroundObserver::new();
    bus.register(&observer).unwrap();

    // This test thread is not the loop thread, so the emitter is off-main
    // and the consumer runs synchronously right here.
    bus.post(7u32).unwrap();

    assert_eq!(*observer.seen.lock().unwrap(), vec![7]);
    assert_eq!(
        *observer.threads.lock().unwrap(),
        vec![thread::current().id()]
    );
}

// ---- async ----

struct AsyncObserver {
    hits: AtomicUsize,
}

impl Consumer for AsyncObserver {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        vec![ConsumerMethod::typed(
            ThreadMode::Async,
            |me: &AsyncObserver, _, _: &u32| {
                me.hits.fetch_add(1, Ordering::SeqCst);
            },
        )]
    }
}

#[test]
fn async_consumers_deliver_every_payload_through_the_executor() {
    let bus = BusBuilder::new().send_no_subscriber_event(false).build();
    let observer = Arc::new(AsyncObserver {
        hits: AtomicUsize::new(0),
    });
    bus.register(&observer).unwrap();

    for event in 0..10u32 {
        bus.post(event).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || {
        observer.hits.load(Ordering::SeqCst) == 10
    }));
}

// ---- cross-channel isolation under threads ----

#[test]
fn both_channels_deliver_concurrently_without_interference() {
    struct DualObserver {
        events: AtomicUsize,
        errors: AtomicUsize,
    }

    impl Consumer for DualObserver {
        fn as_any(&self) -> &dyn Any {
            self
        }

        fn subscriptions(&self) -> Vec<ConsumerMethod> {
            vec![ConsumerMethod::typed(
                ThreadMode::Background,
                |me: &DualObserver, _, _: &u32| {
                    me.events.fetch_add(1, Ordering::SeqCst);
                },
            )]
        }

        fn error_handlers(&self) -> Vec<ConsumerMethod> {
            vec![ConsumerMethod::typed(
                ThreadMode::Background,
                |me: &DualObserver, _, _: &u32| {
                    me.errors.fetch_add(1, Ordering::SeqCst);
                },
            )]
        }
    }

    let bus = BusBuilder::new()
        .send_no_subscriber_event(false)
        .send_no_handler_event(false)
        .build();
    let observer = Arc::new(DualObserver {
        events: AtomicUsize::new(0),
        errors: AtomicUsize::new(0),
    });
    bus.register(&observer).unwrap();

    let posting_bus = bus.clone();
    let poster = thread::spawn(move || {
        for event in 0..25u32 {
            posting_bus.post(event).unwrap();
        }
    });
    let raising_bus = bus.clone();
    let raiser = thread::spawn(move || {
        for event in 0..25u32 {
            raising_bus.raise(event).unwrap();
        }
    });
    poster.join().unwrap();
    raiser.join().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        observer.events.load(Ordering::SeqCst) == 25
            && observer.errors.load(Ordering::SeqCst) == 25
    }));
}
