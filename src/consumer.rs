//! Consumer declarations and the introspection seam.
//!
//! A target registers as an [`Arc`] implementing [`Consumer`]; the bus asks
//! the configured [`Introspector`] for the target's [`ConsumerMethod`]s and
//! turns each into a registration. The default introspector simply returns
//! what the trait declares, but the seam allows generated or decorating
//! implementations without the dispatcher caring.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::Bus;
use crate::error::{BusError, BusResult};
use crate::types::{ChannelKind, Delivery, Event, EventTypeId, ThreadMode};

/// A registration target.
///
/// `subscriptions` feeds the event channel, `error_handlers` the
/// error-event channel; both default to empty so a target can serve either
/// or both.
pub trait Consumer: Any + Send + Sync {
    /// The receiver as [`Any`], used to hand the concrete type back to
    /// typed consumer methods.
    fn as_any(&self) -> &dyn Any;

    /// Consumer methods for the event channel.
    fn subscriptions(&self) -> Vec<ConsumerMethod> {
        Vec::new()
    }

    /// Consumer methods for the error-event channel.
    fn error_handlers(&self) -> Vec<ConsumerMethod> {
        Vec::new()
    }
}

type InvokeFn = dyn Fn(&dyn Consumer, &Bus, &Delivery) + Send + Sync;

/// One consumer declaration: an invocable bound to a declared event type,
/// thread mode, priority and sticky flag.
pub struct ConsumerMethod {
    event_type: EventTypeId,
    mode: ThreadMode,
    priority: i32,
    sticky: bool,
    target_type: &'static str,
    invoke: Arc<InvokeFn>,
}

impl ConsumerMethod {
    /// Declares a consumer for the exact event type `E`.
    ///
    /// The payload is handed to `f` as `&E`. Widened deliveries of a
    /// subtype declaring `E` in its lineage do reach this registration but
    /// carry the subtype payload, which cannot downcast to `E`; consumers
    /// that want to observe a whole lineage use [`ConsumerMethod::for_type`]
    /// instead.
    pub fn typed<T, E, F>(mode: ThreadMode, f: F) -> Self
    where
        T: Consumer,
        E: Event,
        F: Fn(&T, &Bus, &E) + Send + Sync + 'static,
    {
        ConsumerMethod {
            event_type: EventTypeId::of::<E>(),
            mode,
            priority: 0,
            sticky: false,
            target_type: std::any::type_name::<T>(),
            invoke: Arc::new(move |target, bus, delivery| {
                let Some(target) = target.as_any().downcast_ref::<T>() else {
                    return;
                };
                if let Some(event) = delivery.downcast_ref::<E>() {
                    f(target, bus, event);
                }
            }),
        }
    }

    /// Declares a consumer for an event type by identifier, receiving the
    /// erased [`Delivery`].
    ///
    /// This is the form that observes widened subtype payloads, and the one
    /// to use when the consumer needs the delivery handle (e.g. for
    /// [`Bus::cancel_delivery`]).
    pub fn for_type<T, F>(event_type: EventTypeId, mode: ThreadMode, f: F) -> Self
    where
        T: Consumer,
        F: Fn(&T, &Bus, &Delivery) + Send + Sync + 'static,
    {
        ConsumerMethod {
            event_type,
            mode,
            priority: 0,
            sticky: false,
            target_type: std::any::type_name::<T>(),
            invoke: Arc::new(move |target, bus, delivery| {
                let Some(target) = target.as_any().downcast_ref::<T>() else {
                    return;
                };
                f(target, bus, delivery);
            }),
        }
    }

    /// Sets the priority; higher runs earlier among consumers of one event
    /// type. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the consumer sticky: on registration it immediately receives
    /// the cached most-recent payload matching its declared type.
    pub fn sticky(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub(crate) fn event_type(&self) -> EventTypeId {
        self.event_type
    }

    pub(crate) fn mode(&self) -> ThreadMode {
        self.mode
    }

    pub(crate) fn priority_value(&self) -> i32 {
        self.priority
    }

    pub(crate) fn is_sticky(&self) -> bool {
        self.sticky
    }

    pub(crate) fn target_type(&self) -> &'static str {
        self.target_type
    }

    pub(crate) fn call(&self, target: &dyn Consumer, bus: &Bus, delivery: &Delivery) {
        (self.invoke)(target, bus, delivery)
    }
}

impl fmt::Debug for ConsumerMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerMethod")
            .field("event_type", &self.event_type)
            .field("mode", &self.mode)
            .field("priority", &self.priority)
            .field("sticky", &self.sticky)
            .field("target_type", &self.target_type)
            .finish()
    }
}

/// Discovers a target's consumer methods for one channel.
pub trait Introspector: Send + Sync {
    /// Returns the target's declarations for `channel`. An empty list is
    /// not an error here; the registration path decides whether that is
    /// acceptable.
    fn consumer_methods(
        &self,
        target: &dyn Consumer,
        channel: ChannelKind,
    ) -> BusResult<Vec<ConsumerMethod>>;
}

/// Default introspector: asks the [`Consumer`] trait itself.
pub struct DeclaredConsumers {
    strict: bool,
}

impl DeclaredConsumers {
    /// `strict` turns duplicate declared event types within one target into
    /// [`BusError::IllegalMethodSignature`] at introspection time instead of
    /// letting registration fail later with `AlreadyRegistered`.
    pub fn new(strict: bool) -> Self {
        DeclaredConsumers { strict }
    }
}

impl Introspector for DeclaredConsumers {
    fn consumer_methods(
        &self,
        target: &dyn Consumer,
        channel: ChannelKind,
    ) -> BusResult<Vec<ConsumerMethod>> {
        let methods = match channel {
            ChannelKind::Events => target.subscriptions(),
            ChannelKind::Errors => target.error_handlers(),
        };
        if self.strict {
            for (i, method) in methods.iter().enumerate() {
                let duplicated = methods[..i]
                    .iter()
                    .any(|other| other.event_type() == method.event_type());
                if duplicated {
                    return Err(BusError::IllegalMethodSignature {
                        target: method.target_type(),
                        detail: format!(
                            "duplicate {} declaration for {}",
                            channel.consumer_noun(),
                            method.event_type()
                        ),
                    });
                }
            }
        }
        Ok(methods)
    }
}

/// One live binding of a target to a consumer method.
///
/// `active` flips false exactly once on unregister; every invocation path
/// checks it first, which closes the race between unregister and a pending
/// queued delivery.
pub(crate) struct Registration {
    target: Arc<dyn Consumer>,
    method: ConsumerMethod,
    active: AtomicBool,
}

impl Registration {
    pub(crate) fn new(target: Arc<dyn Consumer>, method: ConsumerMethod) -> Self {
        Registration {
            target,
            method,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn method(&self) -> &ConsumerMethod {
        &self.method
    }

    pub(crate) fn target_key(&self) -> usize {
        target_key(&self.target)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn invoke(&self, bus: &Bus, delivery: &Delivery) {
        self.method.call(self.target.as_ref(), bus, delivery)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("target_key", &target_key(&self.target))
            .field("method", &self.method)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Identity of a registration target: the address of the `Arc` data.
pub(crate) fn target_key(target: &Arc<dyn Consumer>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}
