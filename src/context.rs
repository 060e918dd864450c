//! Per-thread posting state.
//!
//! Each `(bus, channel)` pair owns an independent state machine on every
//! thread that emits through it: a pending queue, the `is_posting` flag that
//! serialises recursive emits into the outer drain loop, and the
//! current-dispatch fields that back [`cancel`].

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{BusError, BusResult};
use crate::types::{ChannelKind, Delivery, ThreadMode};

/// Identifies one posting state: bus id plus channel.
pub(crate) type StateKey = (u64, ChannelKind);

struct CurrentDispatch {
    payload: Arc<dyn Any + Send + Sync>,
    mode: ThreadMode,
}

#[derive(Default)]
struct PostingState {
    queue: VecDeque<Delivery>,
    is_posting: bool,
    is_main_thread: bool,
    canceled: bool,
    current: Option<CurrentDispatch>,
}

thread_local! {
    static STATES: RefCell<HashMap<StateKey, PostingState>> = RefCell::new(HashMap::new());
}

fn with_state<R>(key: StateKey, f: impl FnOnce(&mut PostingState) -> R) -> R {
    STATES.with(|states| f(states.borrow_mut().entry(key).or_default()))
}

/// Appends a payload to this thread's pending queue.
pub(crate) fn enqueue(key: StateKey, delivery: Delivery) {
    with_state(key, |state| state.queue.push_back(delivery));
}

/// Attempts to enter the drain loop. Returns `false` when this thread is
/// already posting on the channel, in which case the outer loop will pick up
/// the freshly queued payload.
pub(crate) fn try_begin(key: StateKey, is_main_thread: bool) -> bool {
    with_state(key, |state| {
        if state.is_posting {
            return false;
        }
        debug_assert!(!state.canceled, "abort state was not reset");
        state.is_posting = true;
        state.is_main_thread = is_main_thread;
        true
    })
}

/// Removes the next pending payload, if any.
pub(crate) fn next(key: StateKey) -> Option<Delivery> {
    with_state(key, |state| state.queue.pop_front())
}

/// The main-thread flag cached at drain entry.
pub(crate) fn is_main_thread(key: StateKey) -> bool {
    with_state(key, |state| state.is_main_thread)
}

/// Leaves the drain loop, dropping the state record when nothing is pending.
pub(crate) fn finish(key: StateKey) {
    STATES.with(|states| {
        let mut states = states.borrow_mut();
        if let Some(state) = states.get_mut(&key) {
            state.is_posting = false;
            state.is_main_thread = false;
            if state.queue.is_empty() {
                states.remove(&key);
            }
        }
    });
}

/// Records the dispatch about to happen, for cancellation bookkeeping.
pub(crate) fn set_current(key: StateKey, payload: &Arc<dyn Any + Send + Sync>, mode: ThreadMode) {
    with_state(key, |state| {
        state.current = Some(CurrentDispatch {
            payload: payload.clone(),
            mode,
        });
    });
}

/// Clears the current dispatch and returns (resetting) the cancel flag.
pub(crate) fn clear_current(key: StateKey) -> bool {
    with_state(key, |state| {
        state.current = None;
        std::mem::take(&mut state.canceled)
    })
}

/// Cancels further consumer traversal for the in-flight payload.
///
/// Valid only while this thread is draining the channel, for the payload
/// currently being dispatched, and only when that dispatch is inline
/// ([`ThreadMode::Posting`]).
pub(crate) fn cancel(key: StateKey, payload: &Arc<dyn Any + Send + Sync>) -> BusResult<()> {
    with_state(key, |state| {
        if !state.is_posting {
            return Err(BusError::IllegalCancel(
                "only valid from inside a consumer running on the emitting thread",
            ));
        }
        let Some(current) = &state.current else {
            return Err(BusError::IllegalCancel(
                "no delivery is currently being dispatched",
            ));
        };
        if !Arc::ptr_eq(&current.payload, payload) {
            return Err(BusError::IllegalCancel(
                "only the in-flight payload can be canceled",
            ));
        }
        if current.mode != ThreadMode::Posting {
            return Err(BusError::IllegalCancel(
                "only posting-mode consumers may cancel delivery",
            ));
        }
        state.canceled = true;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: StateKey = (u64::MAX, ChannelKind::Events);

    fn reset() {
        STATES.with(|states| states.borrow_mut().remove(&KEY));
    }

    #[test]
    fn begin_is_exclusive_until_finished() {
        reset();
        assert!(try_begin(KEY, true));
        assert!(!try_begin(KEY, true));
        finish(KEY);
        assert!(try_begin(KEY, false));
        assert!(!is_main_thread(KEY));
        finish(KEY);
    }

    #[test]
    fn queue_drains_fifo() {
        reset();
        enqueue(KEY, Delivery::capture(1u32));
        enqueue(KEY, Delivery::capture(2u32));
        assert_eq!(next(KEY).unwrap().downcast_ref::<u32>(), Some(&1));
        assert_eq!(next(KEY).unwrap().downcast_ref::<u32>(), Some(&2));
        assert!(next(KEY).is_none());
    }

    #[test]
    fn cancel_requires_matching_inline_dispatch() {
        reset();
        let delivery = Delivery::capture(5u32);
        let other = Delivery::capture(6u32);

        // Not posting at all.
        assert!(matches!(
            cancel(KEY, delivery.payload_arc()),
            Err(BusError::IllegalCancel(_))
        ));

        assert!(try_begin(KEY, true));
        set_current(KEY, delivery.payload_arc(), ThreadMode::Posting);

        // Wrong payload.
        assert!(matches!(
            cancel(KEY, other.payload_arc()),
            Err(BusError::IllegalCancel(_))
        ));

        cancel(KEY, delivery.payload_arc()).unwrap();
        assert!(clear_current(KEY));
        // Flag resets after being read once.
        assert!(!clear_current(KEY));

        // Wrong mode.
        set_current(KEY, delivery.payload_arc(), ThreadMode::Async);
        assert!(matches!(
            cancel(KEY, delivery.payload_arc()),
            Err(BusError::IllegalCancel(_))
        ));
        clear_current(KEY);
        finish(KEY);
    }
}
