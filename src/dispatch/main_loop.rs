//! The host main-thread seam.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::{self, JoinHandle, ThreadId};

use tracing::error;

use crate::error::{BusError, BusResult};

/// A task posted onto the main loop.
pub type MainTask = Box<dyn FnOnce() + Send + 'static>;

/// Abstracts the platform's main thread.
///
/// A bus configured without a main loop treats every thread as "main":
/// `Main` and `MainOrdered` consumers then run inline on the emitting
/// thread and `Background` consumers always hop through the executor. This
/// degraded mode mirrors headless hosts.
pub trait MainLoop: Send + Sync {
    /// True when the calling thread is the loop's thread.
    fn is_main_thread(&self) -> bool;

    /// Schedules a task to run on the loop. Refusal maps to
    /// [`BusError::DispatcherSubmitFailed`].
    fn post_task(&self, task: MainTask) -> BusResult<()>;
}

enum LoopMessage {
    Task(MainTask),
    Shutdown,
}

/// A [`MainLoop`] backed by a dedicated run-loop thread.
///
/// Useful in services and tests that want main-thread delivery semantics
/// without a UI toolkit. The loop survives panicking tasks; dropping the
/// handle shuts the thread down.
pub struct DedicatedMainLoop {
    sender: mpsc::Sender<LoopMessage>,
    thread_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DedicatedMainLoop {
    /// Spawns the run-loop thread.
    pub fn spawn() -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<LoopMessage>();
        let worker = thread::Builder::new()
            .name("typebus-main".into())
            .spawn(move || {
                while let Ok(message) = receiver.recv() {
                    match message {
                        LoopMessage::Task(task) => {
                            if catch_unwind(AssertUnwindSafe(task)).is_err() {
                                error!("main loop task panicked");
                            }
                        }
                        LoopMessage::Shutdown => break,
                    }
                }
            })?;
        let thread_id = worker.thread().id();
        Ok(DedicatedMainLoop {
            sender,
            thread_id,
            worker: Mutex::new(Some(worker)),
        })
    }
}

impl MainLoop for DedicatedMainLoop {
    fn is_main_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn post_task(&self, task: MainTask) -> BusResult<()> {
        self.sender
            .send(LoopMessage::Task(task))
            .map_err(|_| BusError::DispatcherSubmitFailed("main loop has shut down".into()))
    }
}

impl Drop for DedicatedMainLoop {
    fn drop(&mut self) {
        let _ = self.sender.send(LoopMessage::Shutdown);
        if thread::current().id() != self.thread_id {
            let worker = self
                .worker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(worker) = worker {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    #[test]
    fn runs_tasks_on_its_own_thread() {
        let main_loop = DedicatedMainLoop::spawn().unwrap();
        assert!(!main_loop.is_main_thread());

        let (tx, rx) = channel();
        main_loop
            .post_task(Box::new(move || {
                tx.send(thread::current().id()).unwrap();
            }))
            .unwrap();
        let loop_thread = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_ne!(loop_thread, thread::current().id());
    }

    #[test]
    fn survives_a_panicking_task() {
        let main_loop = DedicatedMainLoop::spawn().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        main_loop
            .post_task(Box::new(|| panic!("task blew up")))
            .unwrap();
        let observed = counter.clone();
        let (tx, rx) = channel();
        main_loop
            .post_task(Box::new(move || {
                observed.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            }))
            .unwrap();

        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
