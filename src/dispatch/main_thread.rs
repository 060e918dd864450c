use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::error;

use crate::bus::{Bus, BusInner};
use crate::consumer::Registration;
use crate::error::BusResult;
use crate::queue::{DeliveryQueue, PendingDelivery};
use crate::types::{ChannelKind, Delivery};

use super::{Dispatcher, MainLoop};

/// Serialised delivery on the host main loop.
///
/// At most one drain task is in flight; it yields and reposts itself when
/// it has occupied the loop for longer than the configured budget, so a
/// burst of deliveries cannot starve the host's own work.
pub(crate) struct MainDispatcher {
    me: Weak<MainDispatcher>,
    bus: Weak<BusInner>,
    kind: ChannelKind,
    main_loop: Arc<dyn MainLoop>,
    queue: DeliveryQueue,
    handler_active: Mutex<bool>,
    drain_budget: Duration,
}

/// Restores `handler_active` when the drain task exits, including by
/// unwinding out of an escalated consumer panic.
struct ActiveGuard<'a> {
    flag: &'a Mutex<bool>,
    rescheduled: bool,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self
            .flag
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = self.rescheduled;
    }
}

impl MainDispatcher {
    pub(crate) fn new(
        bus: Weak<BusInner>,
        kind: ChannelKind,
        main_loop: Arc<dyn MainLoop>,
        drain_budget: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| MainDispatcher {
            me: me.clone(),
            bus,
            kind,
            main_loop,
            queue: DeliveryQueue::new(),
            handler_active: Mutex::new(false),
            drain_budget,
        })
    }

    fn schedule(&self) -> BusResult<()> {
        let Some(me) = self.me.upgrade() else {
            return Ok(());
        };
        self.main_loop.post_task(Box::new(move || me.drain()))
    }

    fn drain(self: Arc<Self>) {
        let started = Instant::now();
        let mut guard = ActiveGuard {
            flag: &self.handler_active,
            rescheduled: false,
        };
        loop {
            let pending = match self.queue.poll() {
                Some(pending) => pending,
                None => {
                    // Check again under the flag lock before going idle.
                    let mut active = self
                        .handler_active
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    match self.queue.poll() {
                        Some(pending) => {
                            drop(active);
                            pending
                        }
                        None => {
                            *active = false;
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

            if started.elapsed() >= self.drain_budget {
                match self.schedule() {
                    Ok(()) => guard.rescheduled = true,
                    Err(err) => error!("could not reschedule main-loop drain: {err}"),
                }
                return;
            }
        }
    }
}

impl Dispatcher for MainDispatcher {
    fn enqueue(&self, registration: Arc<Registration>, delivery: Delivery) -> BusResult<()> {
        self.queue.enqueue(PendingDelivery {
            registration,
            delivery,
        });
        let mut active = self
            .handler_active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*active {
            *active = true;
            if let Err(err) = self.schedule() {
                *active = false;
                return Err(err);
            }
        }
        Ok(())
    }
}
