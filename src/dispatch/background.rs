use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::bus::{Bus, BusInner};
use crate::consumer::Registration;
use crate::error::BusResult;
use crate::queue::{DeliveryQueue, PendingDelivery};
use crate::types::{ChannelKind, Delivery};

use super::{Dispatcher, Executor};

/// How long the worker parks on an empty queue before considering exit.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Serialised delivery on one shared executor worker.
///
/// A single worker task drains the queue FIFO; when a poll times out it
/// double-checks under the flag lock and releases the worker slot if the
/// queue is still empty.
pub(crate) struct BackgroundDispatcher {
    me: Weak<BackgroundDispatcher>,
    bus: Weak<BusInner>,
    kind: ChannelKind,
    executor: Arc<dyn Executor>,
    queue: DeliveryQueue,
    executor_running: Mutex<bool>,
}

struct RunningGuard<'a> {
    flag: &'a Mutex<bool>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self
            .flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
    }
}

impl BackgroundDispatcher {
    pub(crate) fn new(
        bus: Weak<BusInner>,
        kind: ChannelKind,
        executor: Arc<dyn Executor>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| BackgroundDispatcher {
            me: me.clone(),
            bus,
            kind,
            executor,
            queue: DeliveryQueue::new(),
            executor_running: Mutex::new(false),
        })
    }

    fn run(self: Arc<Self>) {
        let _guard = RunningGuard {
            flag: &self.executor_running,
        };
        loop {
            let pending = match self.queue.poll_timeout(IDLE_POLL) {
                Some(pending) => pending,
                None => {
                    // Check again under the flag lock so a concurrent
                    // enqueue either sees us running or finds the slot free.
                    let mut running = self
                        .executor_running
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    match self.queue.poll() {
                        Some(pending) => {
                            drop(running);
                            pending
                        }
                        None => {
                            *running = false;
                            return;
                        }
                    }
                }
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
}

impl Dispatcher for BackgroundDispatcher {
    fn enqueue(&self, registration: Arc<Registration>, delivery: Delivery) -> BusResult<()> {
        self.queue.enqueue(PendingDelivery {
            registration,
            delivery,
        });
        let mut running = self
            .executor_running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*running {
            *running = true;
            let Some(me) = self.me.upgrade() else {
                *running = false;
                return Ok(());
            };
            if let Err(err) = self.executor.execute(Box::new(move || me.run())) {
                *running = false;
                return Err(err);
            }
        }
        Ok(())
    }
}
