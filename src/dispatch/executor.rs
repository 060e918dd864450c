//! The executor seam backing the background and async dispatchers.

use std::io;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::error::{BusError, BusResult};

/// Runs delivery tasks off the emitting thread.
///
/// Submitted tasks may block (the background worker parks on its queue for
/// up to a second), so implementations must run them where blocking is
/// acceptable.
pub trait Executor: Send + Sync {
    /// Submits a task. Rejection maps to
    /// [`BusError::DispatcherSubmitFailed`] for the emitter.
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) -> BusResult<()>;
}

/// Executor bound to a specific tokio runtime, submitting through
/// [`Handle::spawn_blocking`] — the pool grows on demand and reuses idle
/// threads, the behaviour the bus expects from its default executor.
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    /// Wraps an explicit runtime handle.
    pub fn new(handle: Handle) -> Self {
        TokioExecutor { handle }
    }

    /// Binds to the runtime of the calling context, if inside one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(TokioExecutor::new)
    }
}

impl Executor for TokioExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) -> BusResult<()> {
        self.handle.spawn_blocking(task);
        Ok(())
    }
}

static FALLBACK_RUNTIME: Lazy<Result<Runtime, io::Error>> = Lazy::new(|| {
    Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("typebus-worker")
        .enable_time()
        .build()
});

/// The default executor: delivery tasks go to the ambient tokio runtime
/// when the emitter runs inside one, otherwise to a process-wide fallback
/// runtime built on first use.
struct DefaultExecutor;

impl Executor for DefaultExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send + 'static>) -> BusResult<()> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => FALLBACK_RUNTIME
                .as_ref()
                .map(|runtime| runtime.handle().clone())
                .map_err(|err| {
                    BusError::DispatcherSubmitFailed(format!(
                        "fallback runtime unavailable: {err}"
                    ))
                })?,
        };
        handle.spawn_blocking(task);
        Ok(())
    }
}

/// Builds the executor used when a bus is configured without one.
pub fn default_executor() -> Arc<dyn Executor> {
    Arc::new(DefaultExecutor)
}
