//! One delivery channel: registry, dispatchers and the posting loop.
//!
//! The bus owns two instances of [`ChannelState`] — events and error-events
//! — which behave identically apart from vocabulary. Emits enter the
//! calling thread's posting context; the first frame on the stack drains
//! the context FIFO, widening each payload through its lineage and handing
//! every matched registration to the dispatcher its thread mode names.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::bus::{Bus, BusInner};
use crate::consumer::{Consumer, ConsumerMethod, Introspector, Registration};
use crate::context;
use crate::dispatch::{
    AsyncDispatcher, BackgroundDispatcher, Dispatcher, Executor, InlineDispatcher, MainDispatcher,
    MainLoop,
};
use crate::error::{BusError, BusResult};
use crate::registry::Registry;
use crate::types::{ChannelKind, ConsumerPanicEvent, Delivery, EventTypeId, ThreadMode};

/// Per-channel behaviour flags, set through the builder.
#[derive(Debug, Clone)]
pub(crate) struct ChannelPolicy {
    pub(crate) log_panics: bool,
    pub(crate) log_no_consumer: bool,
    pub(crate) send_panic_event: bool,
    pub(crate) send_no_consumer_event: bool,
    pub(crate) throw_panics: bool,
    pub(crate) inheritance: bool,
}

impl Default for ChannelPolicy {
    fn default() -> Self {
        ChannelPolicy {
            log_panics: true,
            log_no_consumer: true,
            send_panic_event: true,
            send_no_consumer_event: true,
            throw_panics: false,
            inheritance: true,
        }
    }
}

/// How a consumer panic escalated by `throw_*_panic` leaves the channel.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Escalation {
    /// Inline dispatch: surface [`BusError::InvocationFailed`] to the
    /// emitting caller.
    Return,
    /// Detached dispatch: resume the unwind on the delivery thread.
    Resume,
}

pub(crate) struct ChannelState {
    kind: ChannelKind,
    bus_id: u64,
    policy: ChannelPolicy,
    registry: Registry,
    introspector: Arc<dyn Introspector>,
    main_loop: Option<Arc<dyn MainLoop>>,
    inline: InlineDispatcher,
    main: Option<Arc<MainDispatcher>>,
    background: Arc<BackgroundDispatcher>,
    async_pool: Arc<AsyncDispatcher>,
}

impl ChannelState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        bus: Weak<BusInner>,
        bus_id: u64,
        kind: ChannelKind,
        policy: ChannelPolicy,
        introspector: Arc<dyn Introspector>,
        main_loop: Option<Arc<dyn MainLoop>>,
        executor: Arc<dyn Executor>,
        drain_budget: Duration,
    ) -> Self {
        ChannelState {
            kind,
            bus_id,
            policy,
            registry: Registry::new(),
            introspector,
            main_loop: main_loop.clone(),
            inline: InlineDispatcher::new(bus.clone(), kind),
            main: main_loop
                .map(|main_loop| MainDispatcher::new(bus.clone(), kind, main_loop, drain_budget)),
            background: BackgroundDispatcher::new(bus.clone(), kind, executor.clone()),
            async_pool: AsyncDispatcher::new(bus, kind, executor),
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn state_key(&self) -> context::StateKey {
        (self.bus_id, self.kind)
    }

    /// With no main loop configured every thread counts as main; `Main`
    /// consumers then run inline and `Background` consumers always hop.
    fn is_main_thread(&self) -> bool {
        self.main_loop
            .as_ref()
            .map_or(true, |main_loop| main_loop.is_main_thread())
    }

    // ---- Registration ----

    pub(crate) fn introspect(
        &self,
        target: &Arc<dyn Consumer>,
    ) -> BusResult<Vec<ConsumerMethod>> {
        self.introspector.consumer_methods(target.as_ref(), self.kind)
    }

    /// Registers `target` on this channel, failing when it declares nothing
    /// here.
    pub(crate) fn register_target(
        &self,
        bus: &Bus,
        target: &Arc<dyn Consumer>,
        target_name: &'static str,
    ) -> BusResult<()> {
        let methods = self.introspect(target)?;
        if methods.is_empty() {
            return Err(BusError::NoConsumerMethods {
                target: target_name,
            });
        }
        self.register_methods(bus, target, methods)
    }

    /// Inserts pre-introspected methods and performs owed sticky replays.
    ///
    /// Replays run after the registry lock is released but before this
    /// call returns; each goes through the consumer's own dispatcher. A
    /// replay bypasses the posting context, so cancellation from a replayed
    /// consumer fails with `IllegalCancel`.
    pub(crate) fn register_methods(
        &self,
        bus: &Bus,
        target: &Arc<dyn Consumer>,
        methods: Vec<ConsumerMethod>,
    ) -> BusResult<()> {
        debug!(
            channel = self.kind.consumer_noun(),
            methods = methods.len(),
            "registering {}",
            methods[0].target_type()
        );
        let replays = self
            .registry
            .register(target.clone(), methods, self.policy.inheritance)?;
        let is_main = self.is_main_thread();
        for (registration, sticky) in replays {
            self.dispatch(bus, &registration, &sticky, is_main)?;
        }
        Ok(())
    }

    pub(crate) fn unregister_target(&self, key: usize) {
        if !self.registry.unregister(key) {
            warn!(
                "{} to unregister was not registered before",
                self.kind.consumer_noun()
            );
        }
    }

    // ---- Emission ----

    /// Emits a payload: queue it on the calling thread's posting context
    /// and drain unless a frame further up the stack already is.
    pub(crate) fn post(&self, bus: &Bus, delivery: Delivery) -> BusResult<()> {
        let key = self.state_key();
        context::enqueue(key, delivery);
        if !context::try_begin(key, self.is_main_thread()) {
            return Ok(());
        }
        let mut result = Ok(());
        while let Some(next) = context::next(key) {
            if let Err(err) = self.post_single(bus, next) {
                result = Err(err);
                break;
            }
        }
        context::finish(key);
        result
    }

    /// Caches the payload as the most recent of its exact type, then posts.
    pub(crate) fn post_sticky(&self, bus: &Bus, delivery: Delivery) -> BusResult<()> {
        self.registry.sticky_put(delivery.clone());
        // Posted after the cache write so an immediate removal from a
        // consumer observes the entry.
        self.post(bus, delivery)
    }

    fn post_single(&self, bus: &Bus, delivery: Delivery) -> BusResult<()> {
        let key = self.state_key();
        let is_main = context::is_main_thread(key);
        let mut matched = false;
        if self.policy.inheritance {
            let widened = delivery.widened().clone();
            for event_type in widened.iter() {
                matched |= self.post_for_type(bus, &delivery, *event_type, is_main)?;
            }
        } else {
            matched = self.post_for_type(bus, &delivery, delivery.event_type(), is_main)?;
        }

        if !matched {
            if self.policy.log_no_consumer {
                debug!(
                    "no {} registered for {}",
                    self.kind.consumer_noun(),
                    delivery.event_type()
                );
            }
            if self.policy.send_no_consumer_event && !delivery.is_fallback() {
                let fallback = crate::types::NoConsumerEvent {
                    bus: bus.clone(),
                    original: delivery,
                };
                self.post(bus, Delivery::capture(fallback))?;
            }
        }
        Ok(())
    }

    fn post_for_type(
        &self,
        bus: &Bus,
        delivery: &Delivery,
        event_type: EventTypeId,
        is_main: bool,
    ) -> BusResult<bool> {
        let Some(snapshot) = self.registry.snapshot(&event_type) else {
            return Ok(false);
        };
        if snapshot.is_empty() {
            return Ok(false);
        }
        let key = self.state_key();
        for registration in snapshot.iter() {
            context::set_current(key, delivery.payload_arc(), registration.method().mode());
            let outcome = self.dispatch(bus, registration, delivery, is_main);
            let aborted = context::clear_current(key);
            outcome?;
            if aborted {
                break;
            }
        }
        Ok(true)
    }

    /// Routes one `(consumer, payload)` pair to the dispatcher its thread
    /// mode names.
    fn dispatch(
        &self,
        bus: &Bus,
        registration: &Arc<Registration>,
        delivery: &Delivery,
        is_main: bool,
    ) -> BusResult<()> {
        match registration.method().mode() {
            ThreadMode::Posting => self
                .inline
                .enqueue(registration.clone(), delivery.clone()),
            ThreadMode::Main => match &self.main {
                Some(main) if !is_main => main.enqueue(registration.clone(), delivery.clone()),
                _ => self.inline.enqueue(registration.clone(), delivery.clone()),
            },
            ThreadMode::MainOrdered => match &self.main {
                Some(main) => main.enqueue(registration.clone(), delivery.clone()),
                // Degraded mode without a main loop.
                None => self.inline.enqueue(registration.clone(), delivery.clone()),
            },
            ThreadMode::Background => {
                if is_main {
                    self.background.enqueue(registration.clone(), delivery.clone())
                } else {
                    self.inline.enqueue(registration.clone(), delivery.clone())
                }
            }
            ThreadMode::Async => self.async_pool.enqueue(registration.clone(), delivery.clone()),
        }
    }

    // ---- Invocation ----

    /// Invokes one consumer, honouring the `active` flag and the channel's
    /// panic policy.
    pub(crate) fn invoke(
        &self,
        bus: &Bus,
        registration: &Arc<Registration>,
        delivery: &Delivery,
        escalation: Escalation,
    ) -> BusResult<()> {
        if !registration.is_active() {
            return Ok(());
        }
        match catch_unwind(AssertUnwindSafe(|| registration.invoke(bus, delivery))) {
            Ok(()) => Ok(()),
            Err(panic) => self.on_consumer_panic(bus, registration, delivery, panic, escalation),
        }
    }

    /// Invocation entry for queued dispatch; submit-level errors have no
    /// caller to reach here.
    pub(crate) fn invoke_detached(
        &self,
        bus: &Bus,
        registration: &Arc<Registration>,
        delivery: &Delivery,
    ) {
        let _ = self.invoke(bus, registration, delivery, Escalation::Resume);
    }

    fn on_consumer_panic(
        &self,
        bus: &Bus,
        registration: &Arc<Registration>,
        delivery: &Delivery,
        panic: Box<dyn std::any::Any + Send>,
        escalation: Escalation,
    ) -> BusResult<()> {
        let noun = self.kind.consumer_noun();
        if delivery.is::<ConsumerPanicEvent>() {
            // Never rebroadcast failures of the failure event itself.
            if self.policy.log_panics {
                let original = delivery
                    .downcast_ref::<ConsumerPanicEvent>()
                    .map(|event| event.original.event_type().name())
                    .unwrap_or("<unknown>");
                error!(
                    "{} {} panicked while handling a consumer panic event (original event {})",
                    noun,
                    registration.method().target_type(),
                    original
                );
            }
            return Ok(());
        }

        let message = panic_message(panic.as_ref());
        if self.policy.throw_panics {
            return match escalation {
                Escalation::Return => Err(BusError::InvocationFailed {
                    event_type: delivery.event_type().name(),
                    message,
                }),
                Escalation::Resume => resume_unwind(panic),
            };
        }
        if self.policy.log_panics {
            error!(
                "{} {} panicked while handling {}: {}",
                noun,
                registration.method().target_type(),
                delivery.event_type(),
                message
            );
        }
        if self.policy.send_panic_event {
            let event = ConsumerPanicEvent {
                bus: bus.clone(),
                panic_message: message,
                original: delivery.clone(),
                target_type: registration.method().target_type(),
            };
            self.post(bus, Delivery::capture(event))?;
        }
        Ok(())
    }

    // ---- Queries ----

    pub(crate) fn cancel(&self, delivery: &Delivery) -> BusResult<()> {
        context::cancel(self.state_key(), delivery.payload_arc())
    }

    pub(crate) fn has_consumer_for(&self, types: &[EventTypeId]) -> bool {
        self.registry.has_consumer_for(types)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
