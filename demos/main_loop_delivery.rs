//! Shows the four delivery strategies side by side, using the bundled
//! run-loop thread as the "main thread".
//!
//! A target may hold at most one consumer per event type, so each strategy
//! gets its own sampler here.
//!
//! Run with: `cargo run --example main_loop_delivery`

use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use typebus::{Bus, Consumer, ConsumerMethod, DedicatedMainLoop, Event, ThreadMode};

#[derive(Clone, Debug)]
struct FrameRendered {
    frame: u64,
}

impl Event for FrameRendered {}

fn report(mode: &str, frame: u64) {
    println!(
        "[{mode:>10}] frame {frame} on {:?}",
        thread::current().name().unwrap_or("<unnamed>")
    );
}

macro_rules! sampler {
    ($name:ident, $mode:expr, $label:literal) => {
        struct $name;

        impl Consumer for $name {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn subscriptions(&self) -> Vec<ConsumerMethod> {
                vec![ConsumerMethod::typed(
                    $mode,
                    |_: &$name, _, e: &FrameRendered| {
                        report($label, e.frame);
                    },
                )]
            }
        }
    };
}

sampler!(PostingSampler, ThreadMode::Posting, "posting");
sampler!(MainSampler, ThreadMode::Main, "main");
sampler!(BackgroundSampler, ThreadMode::Background, "background");
sampler!(AsyncSampler, ThreadMode::Async, "async");

fn main() {
    let main_loop = Arc::new(DedicatedMainLoop::spawn().expect("spawn main loop"));
    let bus = Bus::builder()
        .main_loop(main_loop)
        .send_no_subscriber_event(false)
        .build();

    let posting = Arc::new(PostingSampler);
    let main = Arc::new(MainSampler);
    let background = Arc::new(BackgroundSampler);
    let parallel = Arc::new(AsyncSampler);
    bus.register(&posting).expect("register");
    bus.register(&main).expect("register");
    bus.register(&background).expect("register");
    bus.register(&parallel).expect("register");

    for frame in 0..3u64 {
        bus.post(FrameRendered { frame }).expect("post");
    }

    // Give the queued strategies a moment to drain before exiting.
    thread::sleep(Duration::from_millis(300));
    bus.unregister(&posting);
    bus.unregister(&main);
    bus.unregister(&background);
    bus.unregister(&parallel);
}
