/*!
# typebus

An in-process publish/subscribe event bus with typed payloads:

- Per-consumer delivery strategies: inline on the emitting thread, serialised
  on a host main loop, serialised on a shared background worker, or parallel
  on an executor
- Priority ordering among consumers of one event type, stable on ties
- Sticky events: the most recent payload of a type is replayed to
  late-registering consumers
- Inheritance widening through explicitly declared type lineages
- A second, structurally identical channel reserved for error signalling, so
  error traffic never interleaves with regular events

## Quick start

```rust
use std::any::Any;
use std::sync::Arc;
use typebus::{Bus, Consumer, ConsumerMethod, ThreadMode};

struct Metrics;

impl Consumer for Metrics {
    fn as_any(&self) -> &dyn Any { self }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        vec![
            ConsumerMethod::typed(ThreadMode::Posting, |_me: &Metrics, _bus, ms: &u64| {
                println!("request took {ms} ms");
            })
            .priority(10),
        ]
    }
}

let bus = Bus::new();
let metrics = Arc::new(Metrics);
bus.register(&metrics).unwrap();
bus.post(42u64).unwrap();
bus.unregister(&metrics);
```

Posting-mode consumers run before `post` returns and may cancel further
delivery of the current payload; all other modes decouple the consumer from
the emitter through per-strategy queues. See [`BusBuilder`] for the policy
flags (panic handling, no-consumer fallbacks, inheritance) which exist once
per channel.
*/

// Set mimalloc as the global allocator for better memory performance.
// Only when this crate is used as a binary, not as a library dependency.
#[cfg(not(feature = "no-global-allocator"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod builder;
mod bus;
mod channel;
mod consumer;
mod context;
mod error;
mod hierarchy;
mod queue;
mod registry;
mod types;

pub mod dispatch;
pub mod logging;

pub use builder::BusBuilder;
pub use bus::Bus;
pub use consumer::{Consumer, ConsumerMethod, DeclaredConsumers, Introspector};
pub use dispatch::{DedicatedMainLoop, Executor, MainLoop, MainTask, TokioExecutor};
pub use error::{BusError, BusResult};
pub use logging::{setup_logging, LoggingConfig};
pub use types::{
    ChannelKind, ConsumerPanicEvent, Delivery, Event, EventTypeId, NoConsumerEvent, ThreadMode,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::Arc;

    #[test]
    fn bus_creation() {
        let bus = Bus::new();
        assert!(!bus.has_subscriber_for::<String>());
        assert!(!bus.has_handler_for::<String>());
    }

    #[test]
    fn buses_are_separate_scopes() {
        struct Probe;
        impl Consumer for Probe {
            fn as_any(&self) -> &dyn Any {
                self
            }
            fn subscriptions(&self) -> Vec<ConsumerMethod> {
                vec![ConsumerMethod::typed(
                    ThreadMode::Posting,
                    |_: &Probe, _, _: &u32| {},
                )]
            }
        }

        let first = Bus::new();
        let second = Bus::new();
        let probe = Arc::new(Probe);
        first.register(&probe).unwrap();
        assert!(first.has_subscriber_for::<u32>());
        assert!(!second.has_subscriber_for::<u32>());
    }

    #[test]
    fn global_bus_is_a_singleton() {
        let first = Bus::global();
        let second = Bus::global();
        assert_eq!(format!("{first:?}"), format!("{second:?}"));
        // Once a default exists, installing another fails.
        assert!(matches!(
            BusBuilder::new().install_global(),
            Err(BusError::DefaultBusAlreadySet)
        ));
    }
}
