//! Walkthrough of the core surface: registration, posting, priorities,
//! sticky replay and the error channel.
//!
//! Run with: `cargo run --example basic_post`

use std::any::Any;
use std::sync::Arc;

use typebus::{Bus, Consumer, ConsumerMethod, Event, LoggingConfig, ThreadMode};

#[derive(Clone, Debug)]
struct OrderPlaced {
    order_id: u64,
    amount_cents: u64,
}

impl Event for OrderPlaced {}

#[derive(Clone, Debug)]
struct PaymentDeclined {
    order_id: u64,
    reason: String,
}

impl Event for PaymentDeclined {}

/// Ships orders; runs after fraud screening thanks to its lower priority.
struct Shipping;

impl Consumer for Shipping {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        vec![ConsumerMethod::typed(
            ThreadMode::Posting,
            |_: &Shipping, _, order: &OrderPlaced| {
                println!("shipping order #{}", order.order_id);
            },
        )]
    }
}

/// Screens orders first and stops delivery of suspicious ones.
struct FraudScreen;

impl Consumer for FraudScreen {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        vec![ConsumerMethod::for_type(
            typebus::EventTypeId::of::<OrderPlaced>(),
            ThreadMode::Posting,
            |_: &FraudScreen, bus: &Bus, delivery| {
                let order = delivery.downcast_ref::<OrderPlaced>().unwrap();
                if order.amount_cents > 1_000_000 {
                    println!("order #{} looks fishy, stopping delivery", order.order_id);
                    bus.cancel_delivery(delivery).unwrap();
                }
            },
        )
        .priority(100)]
    }

    fn error_handlers(&self) -> Vec<ConsumerMethod> {
        vec![ConsumerMethod::typed(
            ThreadMode::Posting,
            |_: &FraudScreen, _, declined: &PaymentDeclined| {
                println!(
                    "payment declined for order #{}: {}",
                    declined.order_id, declined.reason
                );
            },
        )]
    }
}

fn main() {
    typebus::setup_logging(LoggingConfig::default()).expect("logging setup");

    let bus = Bus::new();
    let shipping = Arc::new(Shipping);
    let fraud = Arc::new(FraudScreen);
    bus.register(&shipping).expect("register shipping");
    bus.register(&fraud).expect("register fraud screen");

    // A sticky post: late subscribers with the sticky flag would see it too.
    bus.post_sticky(OrderPlaced {
        order_id: 1,
        amount_cents: 4_200,
    })
    .expect("post");

    // This one trips the fraud screen and never reaches shipping.
    bus.post(OrderPlaced {
        order_id: 2,
        amount_cents: 2_000_000,
    })
    .expect("post");

    // Error signalling travels on its own channel.
    bus.raise(PaymentDeclined {
        order_id: 1,
        reason: "card expired".to_string(),
    })
    .expect("raise");

    bus.unregister(&shipping);
    bus.unregister(&fraud);
}
