//! FIFO queue shared by the serialised dispatchers.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::consumer::Registration;
use crate::types::Delivery;

/// One queued `(consumer, payload)` pair awaiting delivery.
pub(crate) struct PendingDelivery {
    pub(crate) registration: Arc<Registration>,
    pub(crate) delivery: Delivery,
}

/// FIFO of pending deliveries with blocking poll support.
///
/// Storage is a `VecDeque`; its buffer is reused across bursts, so steady
/// traffic does not allocate per delivery.
pub(crate) struct DeliveryQueue {
    entries: Mutex<VecDeque<PendingDelivery>>,
    available: Condvar,
}

impl DeliveryQueue {
    pub(crate) fn new() -> Self {
        DeliveryQueue {
            entries: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingDelivery>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a pending delivery and wakes one blocked poller.
    pub(crate) fn enqueue(&self, pending: PendingDelivery) {
        self.lock().push_back(pending);
        self.available.notify_one();
    }

    /// Removes and returns the head, or `None` when empty.
    pub(crate) fn poll(&self) -> Option<PendingDelivery> {
        self.lock().pop_front()
    }

    /// Like [`poll`](Self::poll), but waits up to `timeout` for an entry to
    /// arrive. Returns `None` on timeout.
    pub(crate) fn poll_timeout(&self, timeout: Duration) -> Option<PendingDelivery> {
        let mut entries = self.lock();
        if entries.is_empty() {
            let (guard, _timed_out) = self
                .available
                .wait_timeout(entries, timeout)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries = guard;
        }
        entries.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Consumer, ConsumerMethod};
    use crate::types::{Delivery, ThreadMode};
    use std::any::Any;
    use std::thread;
    use std::time::Instant;

    struct Nobody;
    impl Consumer for Nobody {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn pending(tag: u32) -> PendingDelivery {
        let target: Arc<dyn Consumer> = Arc::new(Nobody);
        let method = ConsumerMethod::typed(ThreadMode::Posting, |_: &Nobody, _, _: &u32| {});
        PendingDelivery {
            registration: Arc::new(Registration::new(target, method)),
            delivery: Delivery::capture(tag),
        }
    }

    fn tag_of(p: &PendingDelivery) -> u32 {
        *p.delivery.downcast_ref::<u32>().unwrap()
    }

    #[test]
    fn polls_in_fifo_order() {
        let queue = DeliveryQueue::new();
        queue.enqueue(pending(1));
        queue.enqueue(pending(2));
        queue.enqueue(pending(3));

        assert_eq!(tag_of(&queue.poll().unwrap()), 1);
        assert_eq!(tag_of(&queue.poll().unwrap()), 2);
        assert_eq!(tag_of(&queue.poll().unwrap()), 3);
        assert!(queue.poll().is_none());
    }

    #[test]
    fn poll_timeout_returns_none_when_nothing_arrives() {
        let queue = DeliveryQueue::new();
        let started = Instant::now();
        assert!(queue.poll_timeout(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn poll_timeout_wakes_on_enqueue() {
        let queue = Arc::new(DeliveryQueue::new());
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                queue.enqueue(pending(9));
            })
        };

        let polled = queue.poll_timeout(Duration::from_secs(2));
        producer.join().unwrap();
        assert_eq!(tag_of(&polled.unwrap()), 9);
    }
}
