//! Deferred task scheduling ("next tick").
//!
//! Public stream operations never drive a stream synchronously; they set bits
//! and ask the scheduler to run an update once the current synchronous work is
//! done. Every stream holds one `Scheduler`; unless told otherwise it uses the
//! thread's default, which starts out as the thread-local [`TickQueue`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

pub type Task = Box<dyn FnOnce()>;

pub trait Scheduler {
    /// Runs `task` after the current synchronous work has finished.
    fn schedule(&self, task: Task);
}

/// A FIFO of deferred tasks, drained explicitly by its owner.
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("pending", &self.len())
            .finish()
    }
}

impl TickQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    fn pop(&self) -> Option<Task> {
        self.tasks.borrow_mut().pop_front()
    }

    /// Runs the tasks that were queued when the call started. Tasks they
    /// schedule wait for the next call.
    pub fn run_once(&self) -> usize {
        let batch = self.len();
        let mut ran = 0;
        while ran < batch {
            let Some(task) = self.pop() else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    /// Runs tasks until the queue is empty, including the ones scheduled
    /// along the way.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.pop() {
            task();
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "tick queue idle");
        }
        ran
    }
}

impl Scheduler for TickQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

thread_local! {
    static TICK_QUEUE: Rc<TickQueue> = Rc::new(TickQueue::new());
    static CURRENT: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// The thread-local tick queue.
pub fn tick_queue() -> Rc<TickQueue> {
    TICK_QUEUE.with(Rc::clone)
}

/// The scheduler new streams on this thread use by default.
pub fn current() -> Rc<dyn Scheduler> {
    let installed = CURRENT.with(|current| current.borrow().clone());
    match installed {
        Some(scheduler) => scheduler,
        None => {
            let queue: Rc<dyn Scheduler> = tick_queue();
            queue
        }
    }
}

/// Replaces the thread's default scheduler. Returns the previous one.
///
/// Streams keep the scheduler they were built with.
pub fn set_current(scheduler: Rc<dyn Scheduler>) -> Rc<dyn Scheduler> {
    let previous = current();
    CURRENT.with(|current| *current.borrow_mut() = Some(scheduler));
    previous
}

/// Drains the thread-local tick queue.
pub fn run_until_idle() -> usize {
    tick_queue().run_until_idle()
}
