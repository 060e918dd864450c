use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::bus::Bus;
use crate::hierarchy;

/// Identifies an event type at runtime.
///
/// Identity is the Rust [`TypeId`]; the type name rides along for logs and
/// error messages only.
#[derive(Clone, Copy)]
pub struct EventTypeId {
    id: TypeId,
    name: &'static str,
}

impl EventTypeId {
    /// Returns the identifier for the event type `E`.
    pub fn of<E: Event>() -> Self {
        EventTypeId {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// The raw [`TypeId`] this identifier wraps.
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified name of the event type.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EventTypeId {}

impl std::hash::Hash for EventTypeId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for EventTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A payload that can travel through the bus.
///
/// Rust has no runtime type hierarchy, so widening is declared explicitly:
/// an event that should also reach consumers of a broader type extends its
/// lineage with the parent's. The lineage is transitive and its first
/// element is always the type itself.
///
/// ```rust
/// use typebus::{Event, EventTypeId};
///
/// struct InputEvent;
/// impl Event for InputEvent {}
///
/// struct KeyPressed { code: u32 }
/// impl Event for KeyPressed {
///     fn widened() -> Vec<EventTypeId> {
///         let mut types = vec![EventTypeId::of::<Self>()];
///         types.extend(InputEvent::widened());
///         types
///     }
/// }
/// ```
pub trait Event: Any + Send + Sync + 'static {
    /// The type lineage used for inheritance widening, starting with the
    /// concrete type itself. The default is a lineage of one.
    fn widened() -> Vec<EventTypeId>
    where
        Self: Sized,
    {
        vec![EventTypeId::of::<Self>()]
    }
}

impl Event for String {}
impl Event for &'static str {}
impl Event for bool {}
impl Event for i32 {}
impl Event for i64 {}
impl Event for u32 {}
impl Event for u64 {}
impl Event for usize {}

/// Controls which dispatcher delivers a payload to a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadMode {
    /// Invoke inline on the posting (or raising) thread, before the emit
    /// call returns. The only mode from which delivery can be canceled.
    Posting,
    /// Invoke on the host main loop. When the caller already is the main
    /// thread the consumer runs inline, nested in the current tick.
    Main,
    /// Invoke on the host main loop, always queued: even for a main-thread
    /// caller the consumer runs strictly after the current tick returns.
    MainOrdered,
    /// Invoke serialised on a single shared background worker. A caller
    /// that is already off the main thread invokes inline.
    Background,
    /// Invoke on the executor with unbounded concurrency, one task per
    /// delivery.
    Async,
}

/// The two delivery channels of a bus.
///
/// Both behave identically; the error channel exists so that error
/// signalling traffic never interleaves with regular event traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// The regular event channel (`post` / subscriptions).
    Events,
    /// The error-event channel (`raise` / handlers).
    Errors,
}

impl ChannelKind {
    /// The vocabulary used in logs and errors for this channel's consumers.
    pub(crate) fn consumer_noun(&self) -> &'static str {
        match self {
            ChannelKind::Events => "subscriber",
            ChannelKind::Errors => "handler",
        }
    }
}

/// An in-flight payload: the erased event plus its runtime type identity
/// and widening lineage.
///
/// Consumers registered through
/// [`ConsumerMethod::for_type`](crate::ConsumerMethod::for_type) receive the
/// `Delivery` itself and may inspect or downcast it; this is also the
/// handle passed to [`Bus::cancel_delivery`].
#[derive(Clone)]
pub struct Delivery {
    payload: Arc<dyn Any + Send + Sync>,
    type_id: EventTypeId,
    widened: Arc<[EventTypeId]>,
}

impl Delivery {
    /// Wraps a typed event for dispatch, resolving its lineage through the
    /// shared cache.
    pub(crate) fn capture<E: Event>(event: E) -> Self {
        Delivery {
            payload: Arc::new(event),
            type_id: EventTypeId::of::<E>(),
            widened: hierarchy::global().lineage_of::<E>(),
        }
    }

    /// The runtime type of the payload.
    pub fn event_type(&self) -> EventTypeId {
        self.type_id
    }

    /// Borrows the payload as `E` if that is its exact runtime type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    /// Returns a shared handle to the payload as `E` if that is its exact
    /// runtime type.
    pub fn downcast<E: Event>(&self) -> Option<Arc<E>> {
        self.payload.clone().downcast::<E>().ok()
    }

    /// True if the payload's runtime type is `E`.
    pub fn is<E: Event>(&self) -> bool {
        self.type_id == EventTypeId::of::<E>()
    }

    pub(crate) fn payload_arc(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.payload
    }

    pub(crate) fn widened(&self) -> &Arc<[EventTypeId]> {
        &self.widened
    }

    /// True for the bus's own fallback payloads, which must never trigger
    /// another fallback.
    pub(crate) fn is_fallback(&self) -> bool {
        self.is::<NoConsumerEvent>() || self.is::<ConsumerPanicEvent>()
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event_type", &self.type_id)
            .finish()
    }
}

/// Posted on a channel when an emitted payload matched no registration.
///
/// Enabled per channel via the `send_no_*_event` builder flags.
pub struct NoConsumerEvent {
    /// The bus the original payload was emitted on.
    pub bus: Bus,
    /// The payload nobody consumed.
    pub original: Delivery,
}

impl Event for NoConsumerEvent {}

/// Posted on a channel when a consumer panicked while handling a payload.
///
/// Enabled per channel via the `send_*_panic_event` builder flags. A panic
/// raised while handling a `ConsumerPanicEvent` is only logged, never
/// rebroadcast.
pub struct ConsumerPanicEvent {
    /// The bus the original payload was emitted on.
    pub bus: Bus,
    /// Best-effort rendering of the panic payload.
    pub panic_message: String,
    /// The payload whose consumer panicked.
    pub original: Delivery,
    /// Type name of the registered target whose consumer panicked.
    pub target_type: &'static str,
}

impl Event for ConsumerPanicEvent {}
