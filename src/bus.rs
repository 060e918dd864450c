//! The public bus facade.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::builder::BusBuilder;
use crate::channel::ChannelState;
use crate::consumer::{target_key, Consumer, DeclaredConsumers, Introspector};
use crate::dispatch::default_executor;
use crate::error::{BusError, BusResult};
use crate::hierarchy;
use crate::types::{ChannelKind, Delivery, Event, EventTypeId};

static NEXT_BUS_ID: AtomicU64 = AtomicU64::new(0);
static GLOBAL: OnceCell<Bus> = OnceCell::new();

pub(crate) struct BusInner {
    id: u64,
    events: ChannelState,
    errors: ChannelState,
}

impl BusInner {
    pub(crate) fn channel(&self, kind: ChannelKind) -> &ChannelState {
        match kind {
            ChannelKind::Events => &self.events,
            ChannelKind::Errors => &self.errors,
        }
    }
}

/// A publish/subscribe bus with two independent delivery channels: events
/// (`post`, subscriptions) and error-events (`raise`, handlers).
///
/// Each clone is a cheap handle onto the same bus; each constructed bus is
/// a separate scope in which payloads are delivered. For a process-wide
/// instance see [`Bus::global`].
///
/// # Examples
///
/// ```rust
/// use std::any::Any;
/// use std::sync::Arc;
/// use typebus::{Bus, Consumer, ConsumerMethod, ThreadMode};
///
/// struct Greeter;
///
/// impl Consumer for Greeter {
///     fn as_any(&self) -> &dyn Any { self }
///
///     fn subscriptions(&self) -> Vec<ConsumerMethod> {
///         vec![ConsumerMethod::typed(
///             ThreadMode::Posting,
///             |_me: &Greeter, _bus, name: &String| {
///                 println!("hello, {name}");
///             },
///         )]
///     }
/// }
///
/// let bus = Bus::new();
/// let greeter = Arc::new(Greeter);
/// bus.register(&greeter).unwrap();
/// bus.post("world".to_string()).unwrap();
/// bus.unregister(&greeter);
/// ```
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Bus {
    /// Creates a bus with the default configuration.
    pub fn new() -> Self {
        BusBuilder::new().build()
    }

    /// Starts configuring a bus.
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    /// The process-wide default bus, built lazily with the default
    /// configuration unless one was installed through
    /// [`BusBuilder::install_global`] first.
    pub fn global() -> &'static Bus {
        GLOBAL.get_or_init(Bus::new)
    }

    pub(crate) fn install_global(bus: Bus) -> BusResult<Bus> {
        GLOBAL
            .set(bus.clone())
            .map_err(|_| BusError::DefaultBusAlreadySet)?;
        Ok(bus)
    }

    pub(crate) fn from_builder(builder: BusBuilder) -> Self {
        let id = NEXT_BUS_ID.fetch_add(1, Ordering::Relaxed);
        let executor = builder.executor.unwrap_or_else(default_executor);
        let strict = builder.strict_method_verification;
        let introspector: Arc<dyn Introspector> = builder
            .introspector
            .unwrap_or_else(|| Arc::new(DeclaredConsumers::new(strict)));
        let error_introspector: Arc<dyn Introspector> = builder
            .error_introspector
            .unwrap_or_else(|| Arc::new(DeclaredConsumers::new(strict)));

        let inner = Arc::new_cyclic(|weak| BusInner {
            id,
            events: ChannelState::new(
                weak.clone(),
                id,
                ChannelKind::Events,
                builder.events,
                introspector,
                builder.main_loop.clone(),
                executor.clone(),
                builder.main_drain_budget,
            ),
            errors: ChannelState::new(
                weak.clone(),
                id,
                ChannelKind::Errors,
                builder.errors,
                error_introspector,
                builder.main_loop,
                executor,
                builder.main_drain_budget,
            ),
        });
        Bus { inner }
    }

    pub(crate) fn from_inner(inner: Arc<BusInner>) -> Self {
        Bus { inner }
    }

    pub(crate) fn inner(&self) -> &BusInner {
        &self.inner
    }

    // ---- Registration ----

    /// Registers `target` on both channels at once: its `subscriptions` on
    /// the event channel and its `error_handlers` on the error channel.
    /// Fails with [`BusError::NoConsumerMethods`] when it declares neither.
    pub fn register<T: Consumer>(&self, target: &Arc<T>) -> BusResult<()> {
        let erased: Arc<dyn Consumer> = target.clone();
        let subscriptions = self.inner.events.introspect(&erased)?;
        let handlers = self.inner.errors.introspect(&erased)?;
        if subscriptions.is_empty() && handlers.is_empty() {
            return Err(BusError::NoConsumerMethods {
                target: std::any::type_name::<T>(),
            });
        }
        let registered_events = !subscriptions.is_empty();
        if registered_events {
            self.inner
                .events
                .register_methods(self, &erased, subscriptions)?;
        }
        if !handlers.is_empty() {
            if let Err(err) = self.inner.errors.register_methods(self, &erased, handlers) {
                // Keep the two channels consistent on failure.
                if registered_events {
                    self.inner.events.registry().unregister(target_key(&erased));
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Removes `target` from both channels. Unknown targets only log.
    pub fn unregister<T: Consumer>(&self, target: &Arc<T>) {
        let erased: Arc<dyn Consumer> = target.clone();
        let key = target_key(&erased);
        self.inner.events.unregister_target(key);
        self.inner.errors.unregister_target(key);
    }

    /// Registers `target`'s subscriptions on the event channel only.
    pub fn register_subscriber<T: Consumer>(&self, target: &Arc<T>) -> BusResult<()> {
        let erased: Arc<dyn Consumer> = target.clone();
        self.inner
            .events
            .register_target(self, &erased, std::any::type_name::<T>())
    }

    /// Removes `target` from the event channel.
    pub fn unregister_subscriber<T: Consumer>(&self, target: &Arc<T>) {
        let erased: Arc<dyn Consumer> = target.clone();
        self.inner.events.unregister_target(target_key(&erased));
    }

    /// Registers `target`'s error handlers on the error channel only.
    pub fn register_handler<T: Consumer>(&self, target: &Arc<T>) -> BusResult<()> {
        let erased: Arc<dyn Consumer> = target.clone();
        self.inner
            .errors
            .register_target(self, &erased, std::any::type_name::<T>())
    }

    /// Removes `target` from the error channel.
    pub fn unregister_handler<T: Consumer>(&self, target: &Arc<T>) {
        let erased: Arc<dyn Consumer> = target.clone();
        self.inner.errors.unregister_target(target_key(&erased));
    }

    /// True while `target` holds registrations on the event channel.
    pub fn is_subscriber_registered<T: Consumer>(&self, target: &Arc<T>) -> bool {
        let erased: Arc<dyn Consumer> = target.clone();
        self.inner.events.registry().is_registered(target_key(&erased))
    }

    /// True while `target` holds registrations on the error channel.
    pub fn is_handler_registered<T: Consumer>(&self, target: &Arc<T>) -> bool {
        let erased: Arc<dyn Consumer> = target.clone();
        self.inner.errors.registry().is_registered(target_key(&erased))
    }

    // ---- Event channel ----

    /// Posts an event. Subscribers in [`ThreadMode::Posting`] run inline
    /// before this returns; other modes are handed to their dispatchers.
    ///
    /// [`ThreadMode::Posting`]: crate::ThreadMode::Posting
    pub fn post<E: Event>(&self, event: E) -> BusResult<()> {
        self.inner.events.post(self, Delivery::capture(event))
    }

    /// Caches `event` as the most recent sticky of its type, then posts it.
    pub fn post_sticky<E: Event>(&self, event: E) -> BusResult<()> {
        self.inner.events.post_sticky(self, Delivery::capture(event))
    }

    /// Cancels further subscriber traversal for the in-flight event. Only
    /// valid from a posting-mode subscriber, for the delivery it is
    /// currently handling.
    pub fn cancel_delivery(&self, delivery: &Delivery) -> BusResult<()> {
        self.inner.events.cancel(delivery)
    }

    /// True when posting an `E` now would reach at least one subscriber,
    /// widening through `E`'s lineage.
    pub fn has_subscriber_for<E: Event>(&self) -> bool {
        let lineage = hierarchy::global().lineage_of::<E>();
        self.inner.events.has_consumer_for(&lineage)
    }

    /// The cached sticky event of exact type `E`.
    pub fn sticky<E: Event>(&self) -> Option<Arc<E>> {
        self.inner
            .events
            .registry()
            .sticky_get(&EventTypeId::of::<E>())
            .and_then(|delivery| delivery.downcast::<E>())
    }

    /// Removes and returns the sticky event of exact type `E`.
    pub fn remove_sticky<E: Event>(&self) -> Option<Arc<E>> {
        self.inner
            .events
            .registry()
            .sticky_remove(&EventTypeId::of::<E>())
            .and_then(|delivery| delivery.downcast::<E>())
    }

    /// Removes the sticky entry of `event`'s type only if the cached
    /// payload equals `event`. Returns whether an entry was removed.
    pub fn remove_sticky_if_equal<E: Event + PartialEq>(&self, event: &E) -> bool {
        self.inner
            .events
            .registry()
            .sticky_remove_if(&EventTypeId::of::<E>(), |cached| {
                cached.downcast_ref::<E>() == Some(event)
            })
    }

    /// Clears the event channel's sticky cache.
    pub fn remove_all_sticky(&self) {
        self.inner.events.registry().sticky_clear();
    }

    // ---- Error channel ----

    /// Raises an error-event. The error channel mirrors the event channel
    /// exactly; only the registered handlers differ.
    pub fn raise<E: Event>(&self, event: E) -> BusResult<()> {
        self.inner.errors.post(self, Delivery::capture(event))
    }

    /// Caches `event` as the most recent sticky error-event of its type,
    /// then raises it.
    pub fn raise_sticky<E: Event>(&self, event: E) -> BusResult<()> {
        self.inner.errors.post_sticky(self, Delivery::capture(event))
    }

    /// Cancels further handler traversal for the in-flight error-event.
    pub fn cancel_raise_delivery(&self, delivery: &Delivery) -> BusResult<()> {
        self.inner.errors.cancel(delivery)
    }

    /// True when raising an `E` now would reach at least one handler.
    pub fn has_handler_for<E: Event>(&self) -> bool {
        let lineage = hierarchy::global().lineage_of::<E>();
        self.inner.errors.has_consumer_for(&lineage)
    }

    /// The cached sticky error-event of exact type `E`.
    pub fn error_sticky<E: Event>(&self) -> Option<Arc<E>> {
        self.inner
            .errors
            .registry()
            .sticky_get(&EventTypeId::of::<E>())
            .and_then(|delivery| delivery.downcast::<E>())
    }

    /// Removes and returns the sticky error-event of exact type `E`.
    pub fn remove_error_sticky<E: Event>(&self) -> Option<Arc<E>> {
        self.inner
            .errors
            .registry()
            .sticky_remove(&EventTypeId::of::<E>())
            .and_then(|delivery| delivery.downcast::<E>())
    }

    /// Removes the sticky error entry of `event`'s type only if the cached
    /// payload equals `event`.
    pub fn remove_error_sticky_if_equal<E: Event + PartialEq>(&self, event: &E) -> bool {
        self.inner
            .errors
            .registry()
            .sticky_remove_if(&EventTypeId::of::<E>(), |cached| {
                cached.downcast_ref::<E>() == Some(event)
            })
    }

    /// Clears the error channel's sticky cache.
    pub fn remove_all_error_sticky(&self) {
        self.inner.errors.registry().sticky_clear();
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus").field("id", &self.inner.id).finish()
    }
}
