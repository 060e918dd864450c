use thiserror::Error;

/// Errors surfaced by the bus API.
///
/// Consumer panics are normally handled by the configured policy (logged
/// and/or rebroadcast as a [`ConsumerPanicEvent`](crate::ConsumerPanicEvent));
/// [`BusError::InvocationFailed`] is only returned when the channel's
/// `throw_*_panic` flag escalates them to the caller.
#[derive(Debug, Error)]
pub enum BusError {
    /// `register` was called on a target that declares no consumer methods.
    #[error("no consumer methods declared by {target}")]
    NoConsumerMethods { target: &'static str },

    /// The target already holds a registration for this event type.
    #[error("{target} already registered for event type {event_type}")]
    AlreadyRegistered {
        target: &'static str,
        event_type: &'static str,
    },

    /// An introspector rejected a consumer declaration.
    #[error("invalid consumer declaration on {target}: {detail}")]
    IllegalMethodSignature {
        target: &'static str,
        detail: String,
    },

    /// `cancel_delivery` was called outside the window where it is valid.
    #[error("invalid delivery cancellation: {0}")]
    IllegalCancel(&'static str),

    /// A consumer panicked and the channel is configured to escalate.
    #[error("invoking consumer for {event_type} failed: {message}")]
    InvocationFailed {
        event_type: &'static str,
        message: String,
    },

    /// The main loop refused a task or the executor rejected a submission.
    #[error("dispatcher could not submit delivery task: {0}")]
    DispatcherSubmitFailed(String),

    /// `install_global` was called after a default bus already existed.
    #[error("a process-wide default bus is already installed")]
    DefaultBusAlreadySet,

    /// A configuration value could not be interpreted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias used across the crate.
pub type BusResult<T> = std::result::Result<T, BusError>;
