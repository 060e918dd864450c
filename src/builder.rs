//! Builder for configuring and creating a [`Bus`].

use std::sync::Arc;
use std::time::Duration;

use crate::bus::Bus;
use crate::channel::ChannelPolicy;
use crate::consumer::Introspector;
use crate::dispatch::{Executor, MainLoop};
use crate::error::BusResult;

/// Configures a bus before construction.
///
/// Every flag exists once per channel; the two channels are configured and
/// behave independently.
///
/// # Examples
///
/// ```rust,no_run
/// use typebus::BusBuilder;
///
/// let bus = BusBuilder::new()
///     .throw_subscriber_panic(true)
///     .send_no_handler_event(false)
///     .build();
/// ```
pub struct BusBuilder {
    pub(crate) events: ChannelPolicy,
    pub(crate) errors: ChannelPolicy,
    pub(crate) executor: Option<Arc<dyn Executor>>,
    pub(crate) main_loop: Option<Arc<dyn MainLoop>>,
    pub(crate) introspector: Option<Arc<dyn Introspector>>,
    pub(crate) error_introspector: Option<Arc<dyn Introspector>>,
    pub(crate) strict_method_verification: bool,
    pub(crate) main_drain_budget: Duration,
}

impl BusBuilder {
    /// Creates a builder with the default policy: log and rebroadcast both
    /// consumer panics and unmatched payloads, never escalate, widen
    /// through lineages, no main loop, default executor.
    pub fn new() -> Self {
        BusBuilder {
            events: ChannelPolicy::default(),
            errors: ChannelPolicy::default(),
            executor: None,
            main_loop: None,
            introspector: None,
            error_introspector: None,
            strict_method_verification: false,
            main_drain_budget: Duration::from_millis(10),
        }
    }

    // ---- Event channel policy ----

    /// Log subscriber panics (default: true).
    pub fn log_subscriber_panics(mut self, enabled: bool) -> Self {
        self.events.log_panics = enabled;
        self
    }

    /// Log posts that matched no subscriber (default: true).
    pub fn log_no_subscriber_messages(mut self, enabled: bool) -> Self {
        self.events.log_no_consumer = enabled;
        self
    }

    /// Rebroadcast subscriber panics as [`ConsumerPanicEvent`]s on the
    /// event channel (default: true).
    ///
    /// [`ConsumerPanicEvent`]: crate::ConsumerPanicEvent
    pub fn send_subscriber_panic_event(mut self, enabled: bool) -> Self {
        self.events.send_panic_event = enabled;
        self
    }

    /// Post a [`NoConsumerEvent`] when a payload matched no subscriber
    /// (default: true).
    ///
    /// [`NoConsumerEvent`]: crate::NoConsumerEvent
    pub fn send_no_subscriber_event(mut self, enabled: bool) -> Self {
        self.events.send_no_consumer_event = enabled;
        self
    }

    /// Escalate subscriber panics to the caller instead of applying the
    /// log/rebroadcast policy (default: false). Independent of
    /// [`throw_handler_panic`](Self::throw_handler_panic).
    pub fn throw_subscriber_panic(mut self, enabled: bool) -> Self {
        self.events.throw_panics = enabled;
        self
    }

    /// Widen posted payloads through their declared lineage (default:
    /// true). When disabled only exact-type subscribers match.
    pub fn event_inheritance(mut self, enabled: bool) -> Self {
        self.events.inheritance = enabled;
        self
    }

    // ---- Error channel policy ----

    /// Log handler panics (default: true).
    pub fn log_handler_panics(mut self, enabled: bool) -> Self {
        self.errors.log_panics = enabled;
        self
    }

    /// Log raises that matched no handler (default: true).
    pub fn log_no_handler_messages(mut self, enabled: bool) -> Self {
        self.errors.log_no_consumer = enabled;
        self
    }

    /// Rebroadcast handler panics as [`ConsumerPanicEvent`]s on the error
    /// channel (default: true).
    ///
    /// [`ConsumerPanicEvent`]: crate::ConsumerPanicEvent
    pub fn send_handler_panic_event(mut self, enabled: bool) -> Self {
        self.errors.send_panic_event = enabled;
        self
    }

    /// Raise a [`NoConsumerEvent`] when an error payload matched no handler
    /// (default: true).
    ///
    /// [`NoConsumerEvent`]: crate::NoConsumerEvent
    pub fn send_no_handler_event(mut self, enabled: bool) -> Self {
        self.errors.send_no_consumer_event = enabled;
        self
    }

    /// Escalate handler panics to the caller (default: false). Independent
    /// of [`throw_subscriber_panic`](Self::throw_subscriber_panic).
    pub fn throw_handler_panic(mut self, enabled: bool) -> Self {
        self.errors.throw_panics = enabled;
        self
    }

    /// Widen raised payloads through their declared lineage (default:
    /// true).
    pub fn error_inheritance(mut self, enabled: bool) -> Self {
        self.errors.inheritance = enabled;
        self
    }

    // ---- Shared collaborators ----

    /// Executor backing the background and async dispatchers of both
    /// channels. Defaults to a tokio-blocking-pool executor.
    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Host main loop for `Main`/`MainOrdered` delivery. Without one the
    /// bus runs in degraded mode: every thread counts as main.
    pub fn main_loop(mut self, main_loop: Arc<dyn MainLoop>) -> Self {
        self.main_loop = Some(main_loop);
        self
    }

    /// Introspector for the event channel. Defaults to asking the
    /// [`Consumer`](crate::Consumer) trait.
    pub fn introspector(mut self, introspector: Arc<dyn Introspector>) -> Self {
        self.introspector = Some(introspector);
        self
    }

    /// Introspector for the error channel.
    pub fn error_introspector(mut self, introspector: Arc<dyn Introspector>) -> Self {
        self.error_introspector = Some(introspector);
        self
    }

    /// Make the default introspectors reject duplicate declarations with
    /// [`IllegalMethodSignature`](crate::BusError::IllegalMethodSignature)
    /// instead of leaving the failure to registration (default: false).
    pub fn strict_method_verification(mut self, enabled: bool) -> Self {
        self.strict_method_verification = enabled;
        self
    }

    /// How long one main-loop drain task may run before yielding and
    /// rescheduling itself (default: 10 ms).
    pub fn main_drain_budget(mut self, budget: Duration) -> Self {
        self.main_drain_budget = budget;
        self
    }

    /// Builds the bus.
    pub fn build(self) -> Bus {
        Bus::from_builder(self)
    }

    /// Builds the bus and installs it as the process-wide default returned
    /// by [`Bus::global`]. Fails if a default already exists.
    pub fn install_global(self) -> BusResult<Bus> {
        Bus::install_global(self.build())
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let builder = BusBuilder::new();
        for policy in [&builder.events, &builder.errors] {
            assert!(policy.log_panics);
            assert!(policy.log_no_consumer);
            assert!(policy.send_panic_event);
            assert!(policy.send_no_consumer_event);
            assert!(!policy.throw_panics);
            assert!(policy.inheritance);
        }
        assert!(builder.executor.is_none());
        assert!(builder.main_loop.is_none());
        assert!(!builder.strict_method_verification);
        assert_eq!(builder.main_drain_budget, Duration::from_millis(10));
    }

    #[test]
    fn throw_flags_are_independent() {
        let builder = BusBuilder::new().throw_handler_panic(true);
        assert!(!builder.events.throw_panics);
        assert!(builder.errors.throw_panics);

        let builder = BusBuilder::new().throw_subscriber_panic(true);
        assert!(builder.events.throw_panics);
        assert!(!builder.errors.throw_panics);
    }

    #[test]
    fn channel_policies_are_customised_separately() {
        let builder = BusBuilder::new()
            .event_inheritance(false)
            .send_no_handler_event(false)
            .log_subscriber_panics(false);
        assert!(!builder.events.inheritance);
        assert!(builder.errors.inheritance);
        assert!(builder.events.send_no_consumer_event);
        assert!(!builder.errors.send_no_consumer_event);
        assert!(!builder.events.log_panics);
        assert!(builder.errors.log_panics);
    }
}
