use std::sync::{Arc, Weak};

use crate::bus::{Bus, BusInner};
use crate::consumer::Registration;
use crate::error::BusResult;
use crate::queue::{DeliveryQueue, PendingDelivery};
use crate::types::{ChannelKind, Delivery};

use super::{Dispatcher, Executor};

/// Parallel fan-out: one executor task per enqueued delivery.
///
/// Multiple async consumers of the same payload may run concurrently on
/// distinct executor workers; nothing orders them.
pub(crate) struct AsyncDispatcher {
    me: Weak<AsyncDispatcher>,
    bus: Weak<BusInner>,
    kind: ChannelKind,
    executor: Arc<dyn Executor>,
    queue: DeliveryQueue,
}

impl AsyncDispatcher {
    pub(crate) fn new(
        bus: Weak<BusInner>,
        kind: ChannelKind,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| AsyncDispatcher {
            me: me.clone(),
            bus,
            kind,
            executor,
            queue: DeliveryQueue::new(),
        })
    }

    fn run_one(self: Arc<Self>) {
        let Some(pending) = self.queue.poll() else {
            return;
        };
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let bus = Bus::from_inner(inner);
        bus.inner()
            .channel(self.kind)
            .invoke_detached(&bus, &pending.registration, &pending.delivery);
    }
}

impl Dispatcher for AsyncDispatcher {
    fn enqueue(&self, registration: Arc<Registration>, delivery: Delivery) -> BusResult<()> {
        self.queue.enqueue(PendingDelivery {
            registration,
            delivery,
        });
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        self.executor.execute(Box::new(move || me.run_one()))
    }
}
