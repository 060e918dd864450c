//! Delivery strategies.
//!
//! Every consumer registration names a [`ThreadMode`](crate::ThreadMode);
//! the channel routes each `(consumer, payload)` pair to the matching
//! dispatcher. Inline dispatch invokes on the emitting thread, the main and
//! background dispatchers serialise through their own FIFO drained by a
//! single task, and the async dispatcher fans out one executor task per
//! payload.

mod async_pool;
mod background;
mod executor;
mod inline;
mod main_loop;
mod main_thread;

pub use executor::{default_executor, Executor, TokioExecutor};
pub use main_loop::{DedicatedMainLoop, MainLoop, MainTask};

pub(crate) use async_pool::AsyncDispatcher;
pub(crate) use background::BackgroundDispatcher;
pub(crate) use inline::InlineDispatcher;
pub(crate) use main_thread::MainDispatcher;

use std::sync::Arc;

use crate::consumer::Registration;
use crate::error::BusResult;
use crate::types::Delivery;

/// A delivery strategy.
///
/// `enqueue` either invokes the consumer before returning (inline) or hands
/// the pair to the strategy's own queue and schedules a drain; scheduling on
/// a serialised dispatcher is idempotent while a drain task is in flight.
pub(crate) trait Dispatcher: Send + Sync {
    fn enqueue(&self, registration: Arc<Registration>, delivery: Delivery) -> BusResult<()>;
}
