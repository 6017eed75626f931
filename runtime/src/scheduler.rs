//! LocalScheduler - next-tick scheduling on a tokio `LocalSet`.
//!
//! Deferred stream updates are queued in a [`TickQueue`]; the first task
//! queued while the scheduler is idle spawns a local drain task, which runs
//! queued batches (yielding to the runtime between them) until nothing is
//! left.

use sluice_core::{Scheduler, TickQueue};
use sluice_core::scheduler::{self as core_scheduler, Task};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

struct Shared {
    queue: TickQueue,
    armed: Cell<bool>,
}

/// Runs stream ticks as tokio local tasks.
///
/// Must be used from within a [`tokio::task::LocalSet`]: scheduling outside
/// of one panics.
#[derive(Clone)]
pub struct LocalScheduler {
    shared: Rc<Shared>,
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("pending", &self.shared.queue.len())
            .field("armed", &self.shared.armed.get())
            .finish()
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScheduler {
    pub fn new() -> Self {
        Self {
            shared: Rc::new(Shared {
                queue: TickQueue::new(),
                armed: Cell::new(false),
            }),
        }
    }

    /// A handle to pass to `StreamOptions::scheduler`.
    pub fn handle(&self) -> Rc<dyn Scheduler> {
        let handle: Rc<dyn Scheduler> = Rc::new(self.clone());
        handle
    }

    /// Makes this the default scheduler for streams created on this thread
    /// from now on. Returns the previous default.
    pub fn install(&self) -> Rc<dyn Scheduler> {
        core_scheduler::set_current(self.handle())
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    fn arm(&self) {
        if self.shared.armed.replace(true) {
            return;
        }
        let shared = Rc::clone(&self.shared);
        tokio::task::spawn_local(async move {
            loop {
                let ran = shared.queue.run_once();
                trace!(ran, "local tick");
                if shared.queue.is_empty() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            shared.armed.set(false);
        });
    }
}

impl Scheduler for LocalScheduler {
    fn schedule(&self, task: Task) {
        self.shared.queue.schedule(task);
        self.arm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn test_tasks_run_after_current_work() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let log = Rc::new(RefCell::new(Vec::new()));
                for i in 0..3 {
                    let log = Rc::clone(&log);
                    scheduler.schedule(Box::new(move || log.borrow_mut().push(i)));
                }
                log.borrow_mut().push(99);
                assert_eq!(scheduler.pending(), 3);

                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert_eq!(*log.borrow(), vec![99, 0, 1, 2]);
                assert_eq!(scheduler.pending(), 0);
            })
            .await;
    }

    #[tokio::test]
    async fn test_rearms_after_idle() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let scheduler = LocalScheduler::new();
                let hits = Rc::new(Cell::new(0));
                for _ in 0..2 {
                    let counter = Rc::clone(&hits);
                    scheduler.schedule(Box::new(move || counter.set(counter.get() + 1)));
                    for _ in 0..3 {
                        tokio::task::yield_now().await;
                    }
                }
                assert_eq!(hits.get(), 2);
            })
            .await;
    }
}
