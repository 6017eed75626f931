//! Duplex - the unified stream core.
//!
//! One `Inner` owns the state register, both half-states, the handler and
//! the listeners. The read and write halves (`readable.rs`, `writable.rs`)
//! are further `impl` blocks on the same `Inner`; this module holds what the
//! halves share: hook invocation, completions, open and destroy.
//!
//! # Re-entrancy
//!
//! The handler is borrowed for the duration of a hook call. A completion
//! fired while a hook of the same stream is running is queued and resolved
//! right after the hook returns, which is exactly where a synchronous
//! callback would have been observed. Public operations never drive the
//! stream directly; they schedule a tick.

use crate::config::{StreamOptions, byte_length_or_default};
use crate::error::{StreamError, StreamResult};
use crate::events::{Listeners, Signal};
use crate::handler::{CompletionTarget, Context, Handler, HookKind, Noop, Step};
use crate::queue::ByteQueue;
use crate::readable::ReadableState;
use crate::scheduler::{self, Scheduler};
use crate::writable::WritableState;
use sluice_flow::{Phase, StreamState, Teardown};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique stream identity, used in logs and by pipeline links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Hands out a fresh id. Foreign pipe targets use this for their own.
    pub fn allocate() -> Self {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

type Deferred = (HookKind, u64, StreamResult);

pub(crate) struct Inner<R: 'static, W: 'static> {
    pub(crate) id: StreamId,
    state: Cell<StreamState>,
    pub(crate) readable: Option<RefCell<ReadableState<R>>>,
    pub(crate) writable: Option<RefCell<WritableState<W>>>,
    handler: RefCell<Option<Box<dyn Handler<R, W>>>>,
    pub(crate) batched: bool,
    pub(crate) listeners: Listeners<R>,
    scheduler: Rc<dyn Scheduler>,
    error: RefCell<Option<StreamError>>,
    in_hook: Cell<bool>,
    deferred: RefCell<VecDeque<Deferred>>,
    predestroy_pending: Cell<bool>,
    tickets: Cell<u64>,
    pending: [Cell<Option<u64>>; HookKind::COUNT],
}

impl<R: 'static, W: 'static> Inner<R, W> {
    pub(crate) fn state(&self) -> StreamState {
        self.state.get()
    }

    /// Applies one transition to the register and returns its result.
    pub(crate) fn transition<T>(&self, f: impl FnOnce(&mut StreamState) -> T) -> T {
        let mut state = self.state.get();
        let out = f(&mut state);
        self.state.set(state);
        out
    }

    pub(crate) fn schedule_read(self: &Rc<Self>) {
        if self.readable.is_none() || !self.transition(StreamState::schedule_read_tick) {
            return;
        }
        trace!(stream = %self.id, "read tick scheduled");
        let this = Rc::clone(self);
        self.scheduler.schedule(Box::new(move || {
            this.transition(|s| s.remove(StreamState::READ_NEXT_TICK));
            this.update_read();
        }));
    }

    pub(crate) fn schedule_write(self: &Rc<Self>) {
        if self.writable.is_none() || !self.transition(StreamState::schedule_write_tick) {
            return;
        }
        trace!(stream = %self.id, "write tick scheduled");
        let this = Rc::clone(self);
        self.scheduler.schedule(Box::new(move || {
            this.transition(|s| s.remove(StreamState::WRITE_NEXT_TICK));
            this.update_write();
        }));
    }

    /// Invokes one extension point. A `Ready` step, and any completion fired
    /// while the hook ran, is resolved before this returns.
    pub(crate) fn run_hook<F>(self: &Rc<Self>, kind: HookKind, f: F)
    where
        F: FnOnce(&mut dyn Handler<R, W>, &mut Context<'_, R, W>) -> Step,
    {
        let ticket = self.tickets.get() + 1;
        self.tickets.set(ticket);
        self.pending[kind.index()].set(Some(ticket));
        trace!(stream = %self.id, hook = ?kind, ticket, "invoke");

        let stream = Duplex {
            inner: Rc::clone(self),
        };
        let step = {
            let mut slot = self.handler.borrow_mut();
            match slot.as_mut() {
                Some(handler) => {
                    let mut cx = Context::new(&stream, kind, ticket);
                    self.in_hook.set(true);
                    let step = f(&mut **handler, &mut cx);
                    self.in_hook.set(false);
                    step
                }
                None => Step::done(),
            }
        };

        if let Step::Ready(result) = step {
            self.resolve(kind, ticket, result);
        }
        self.flush_deferred();
    }

    fn resolve(self: &Rc<Self>, kind: HookKind, ticket: u64, result: StreamResult) {
        let slot = &self.pending[kind.index()];
        if slot.get() != Some(ticket) {
            trace!(stream = %self.id, hook = ?kind, ticket, "stale completion ignored");
            return;
        }
        slot.set(None);

        match kind {
            HookKind::Open => self.after_open(result),
            HookKind::Read => self.after_read(result),
            HookKind::Write => self.after_write(result),
            HookKind::Final => self.after_final(result),
            HookKind::Destroy => self.after_destroy(result),
        }
    }

    fn flush_deferred(self: &Rc<Self>) {
        if self.predestroy_pending.replace(false) {
            self.run_predestroy();
        }
        loop {
            let next = self.deferred.borrow_mut().pop_front();
            let Some((kind, ticket, result)) = next else {
                break;
            };
            self.resolve(kind, ticket, result);
        }
    }

    fn run_predestroy(&self) {
        let mut slot = self.handler.borrow_mut();
        if let Some(handler) = slot.as_mut() {
            trace!(stream = %self.id, "predestroy");
            self.in_hook.set(true);
            handler.predestroy();
            self.in_hook.set(false);
        }
    }

    /// Non-primary drive shared by both halves: destroy beats open.
    pub(crate) fn teardown(self: &Rc<Self>) {
        match self.transition(StreamState::next_teardown) {
            Teardown::Destroy => {
                debug!(stream = %self.id, "invoking destroy");
                self.run_hook(HookKind::Destroy, |h, cx| h.destroy(cx));
            }
            Teardown::Open => {
                debug!(stream = %self.id, "invoking open");
                self.run_hook(HookKind::Open, |h, cx| h.open(cx));
            }
            Teardown::Wait => {
                trace!(stream = %self.id, "destroy waiting for active hook");
            }
            Teardown::Idle => {}
        }
    }

    pub(crate) fn destroy(self: &Rc<Self>, err: Option<StreamError>) {
        if !self.transition(StreamState::begin_destroy) {
            trace!(stream = %self.id, "destroy ignored, already destroying");
            return;
        }
        let err = err.unwrap_or(StreamError::Destroyed);
        debug!(stream = %self.id, error = %err, "destroy requested");
        {
            let mut slot = self.error.borrow_mut();
            if slot.is_none() {
                *slot = Some(err);
            }
        }

        if self.in_hook.get() {
            self.predestroy_pending.set(true);
        } else {
            self.run_predestroy();
            if !self.deferred.borrow().is_empty() {
                let this = Rc::clone(self);
                self.scheduler.schedule(Box::new(move || this.flush_deferred()));
            }
        }

        self.schedule_read();
        self.schedule_write();
    }

    fn after_open(self: &Rc<Self>, result: StreamResult) {
        if let Err(err) = result {
            self.destroy(Some(err));
        }
        if self.transition(StreamState::complete_open) {
            debug!(stream = %self.id, "opened");
            self.listeners.emit(Signal::Open);
        }
        if self.writable.is_some() {
            self.update_write();
        }
        if self.readable.is_some() {
            self.update_read();
        }
    }

    fn after_destroy(self: &Rc<Self>, result: StreamResult) {
        let err = match result {
            Err(err) => {
                let mut slot = self.error.borrow_mut();
                if slot.as_ref().is_none_or(StreamError::is_sentinel) {
                    *slot = Some(err.clone());
                }
                Some(err)
            }
            Ok(()) => self.error.borrow().clone().filter(|err| !err.is_sentinel()),
        };

        if let Some(err) = &err {
            debug!(stream = %self.id, error = %err, "destroyed with error");
            self.listeners.emit_error(err);
        }
        self.transition(StreamState::complete_destroy);
        debug!(stream = %self.id, "closed");
        self.listeners.emit(Signal::Close);

        let read_link = self
            .readable
            .as_ref()
            .and_then(|rs| rs.borrow_mut().detach());
        let write_link = self
            .writable
            .as_ref()
            .and_then(|ws| ws.borrow_mut().detach());
        if let Some(link) = read_link {
            link.done(self.id, err.clone());
        }
        if let Some(link) = write_link {
            link.done(self.id, err);
        }

        self.listeners.clear();
        let handler = self.handler.borrow_mut().take();
        drop(handler);
    }
}

impl<R: 'static, W: 'static> CompletionTarget for Inner<R, W> {
    fn complete(self: Rc<Self>, kind: HookKind, ticket: u64, result: StreamResult) {
        if self.in_hook.get() {
            trace!(stream = %self.id, hook = ?kind, ticket, "completion deferred until hook returns");
            self.deferred.borrow_mut().push_back((kind, ticket, result));
            return;
        }
        self.resolve(kind, ticket, result);
    }
}

/// A stream with a read side producing `R` and a write side accepting `W`.
///
/// `Duplex` is a cheap handle; clones refer to the same stream. All
/// operations are single-threaded and never block: they flip state bits and
/// schedule a tick on the stream's [`Scheduler`].
pub struct Duplex<R: 'static, W: 'static> {
    pub(crate) inner: Rc<Inner<R, W>>,
}

impl<R: 'static, W: 'static> Clone for Duplex<R, W> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: 'static, W: 'static> fmt::Debug for Duplex<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Duplex")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .field("state", &self.inner.state())
            .finish()
    }
}

impl<R: 'static, W: 'static> Default for Duplex<R, W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: 'static, W: 'static> Duplex<R, W> {
    /// A duplex whose hooks all complete immediately.
    pub fn new() -> Self {
        Self::from_handler(Noop)
    }

    pub fn from_handler(handler: impl Handler<R, W>) -> Self {
        Self::with_options(handler, StreamOptions::default())
    }

    pub fn with_options(handler: impl Handler<R, W>, options: StreamOptions<R, W>) -> Self {
        Self::build(Box::new(handler), StreamState::duplex(), true, true, options)
    }

    pub(crate) fn build(
        handler: Box<dyn Handler<R, W>>,
        state: StreamState,
        readable: bool,
        writable: bool,
        options: StreamOptions<R, W>,
    ) -> Self {
        let StreamOptions {
            config,
            byte_length_readable,
            byte_length_writable,
            map_readable,
            map_writable,
            scheduler,
        } = options;

        let readable = readable.then(|| {
            RefCell::new(ReadableState::new(ByteQueue::new(
                config.readable_hwm(),
                byte_length_or_default(byte_length_readable),
                map_readable,
            )))
        });
        let writable = writable.then(|| {
            RefCell::new(WritableState::new(ByteQueue::new(
                config.writable_hwm(),
                byte_length_or_default(byte_length_writable),
                map_writable,
            )))
        });

        let id = StreamId::allocate();
        let batched = handler.batched();
        trace!(stream = %id, readable = readable.is_some(), writable = writable.is_some(), "created");

        Self {
            inner: Rc::new(Inner {
                id,
                state: Cell::new(state),
                readable,
                writable,
                handler: RefCell::new(Some(handler)),
                batched,
                listeners: Listeners::default(),
                scheduler: scheduler.unwrap_or_else(scheduler::current),
                error: RefCell::new(None),
                in_hook: Cell::new(false),
                deferred: RefCell::new(VecDeque::new()),
                predestroy_pending: Cell::new(false),
                tickets: Cell::new(0),
                pending: Default::default(),
            }),
        }
    }

    pub fn id(&self) -> StreamId {
        self.inner.id
    }

    pub fn phase(&self) -> Phase {
        self.inner.state().phase()
    }

    /// Snapshot of the state register.
    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    pub fn is_readable(&self) -> bool {
        self.inner.readable.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.inner.writable.is_some()
    }

    /// Tears the stream down without an error. Only the first destroy
    /// request has any effect; `close` fires on a later tick.
    pub fn destroy(&self) {
        self.inner.destroy(None);
    }

    pub fn destroy_with(&self, err: impl Into<StreamError>) {
        self.inner.destroy(Some(err.into()));
    }

    pub fn is_destroying(&self) -> bool {
        self.inner.state().is_destroying()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state().is_destroyed()
    }

    /// The error the stream was destroyed with, unless it was a plain destroy.
    pub fn error(&self) -> Option<StreamError> {
        self.inner
            .error
            .borrow()
            .clone()
            .filter(|err| !err.is_sentinel())
    }

    /// Like [`Duplex::error`], but also reports a plain destroy.
    pub fn error_including_destroyed(&self) -> Option<StreamError> {
        self.inner.error.borrow().clone()
    }

    pub fn on_open(&self, f: impl FnMut() + 'static) {
        self.inner.listeners.on(Signal::Open, f);
    }

    pub fn on_close(&self, f: impl FnMut() + 'static) {
        self.inner.listeners.on(Signal::Close, f);
    }

    pub fn on_error(&self, f: impl FnMut(&StreamError) + 'static) {
        self.inner.listeners.on_error(f);
    }

    pub(crate) fn completion_target(&self) -> Rc<dyn CompletionTarget> {
        let target: Rc<dyn CompletionTarget> = self.inner.clone();
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Completion;
    use crate::scheduler::TickQueue;
    use std::cell::Cell;

    fn local() -> (Rc<TickQueue>, StreamOptions<u32, u32>) {
        let queue = Rc::new(TickQueue::new());
        let options = StreamOptions::new().scheduler(queue.clone());
        (queue, options)
    }

    #[derive(Default)]
    struct Counting {
        opens: Rc<Cell<u32>>,
        destroys: Rc<Cell<u32>>,
        predestroys: Rc<Cell<u32>>,
    }

    impl Handler<u32, u32> for Counting {
        fn open(&mut self, _cx: &mut Context<'_, u32, u32>) -> Step {
            self.opens.set(self.opens.get() + 1);
            Step::done()
        }

        fn destroy(&mut self, _cx: &mut Context<'_, u32, u32>) -> Step {
            self.destroys.set(self.destroys.get() + 1);
            Step::done()
        }

        fn predestroy(&mut self) {
            self.predestroys.set(self.predestroys.get() + 1);
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let a: Duplex<u8, u8> = Duplex::new();
        let b: Duplex<u8, u8> = Duplex::new();
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("stream#"));
    }

    #[test]
    fn test_destroy_before_open_never_opens() {
        let (queue, options) = local();
        let handler = Counting::default();
        let (opens, destroys, predestroys) = (
            handler.opens.clone(),
            handler.destroys.clone(),
            handler.predestroys.clone(),
        );
        let stream = Duplex::with_options(handler, options);
        let closes = Rc::new(Cell::new(0));
        let counter = closes.clone();
        stream.on_close(move || counter.set(counter.get() + 1));

        stream.destroy();
        stream.destroy();
        assert_eq!(predestroys.get(), 1);
        assert!(!stream.is_destroyed());

        queue.run_until_idle();
        assert_eq!(opens.get(), 0);
        assert_eq!(destroys.get(), 1);
        assert_eq!(closes.get(), 1);
        assert!(stream.is_destroyed());
        assert_eq!(stream.phase(), Phase::Destroyed);
        assert!(stream.error().is_none());
        assert!(stream.error_including_destroyed().unwrap().is_sentinel());
    }

    #[test]
    fn test_first_error_wins() {
        let (queue, options) = local();
        let stream: Duplex<u32, u32> = Duplex::with_options(Noop, options);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        stream.on_error(move |err| sink.borrow_mut().push(err.to_string()));

        stream.destroy_with(StreamError::msg("first"));
        stream.destroy_with(StreamError::msg("second"));
        queue.run_until_idle();

        assert_eq!(*seen.borrow(), vec!["first".to_string()]);
        assert_eq!(stream.error().unwrap().to_string(), "first");
    }

    struct SlowOpen {
        pending: Rc<RefCell<Vec<Completion>>>,
    }

    impl Handler<u32, u32> for SlowOpen {
        fn open(&mut self, cx: &mut Context<'_, u32, u32>) -> Step {
            let mut pending = self.pending.borrow_mut();
            pending.push(cx.completion());
            pending.push(cx.completion());
            Step::Pending
        }
    }

    #[test]
    fn test_pending_open_and_stale_completion() {
        let (queue, options) = local();
        let pending = Rc::new(RefCell::new(Vec::new()));
        let stream = Duplex::with_options(
            SlowOpen {
                pending: pending.clone(),
            },
            options,
        );
        let opened = Rc::new(Cell::new(0));
        let counter = opened.clone();
        stream.on_open(move || counter.set(counter.get() + 1));

        stream.resume();
        queue.run_until_idle();
        assert_eq!(opened.get(), 0);

        let mut completions = std::mem::take(&mut *pending.borrow_mut());
        let duplicate = completions.pop().unwrap();
        let completion = completions.pop().unwrap();
        completion.done();
        assert_eq!(opened.get(), 1);

        duplicate.fail(StreamError::msg("late"));
        queue.run_until_idle();
        assert!(!stream.is_destroying());
    }

    #[test]
    fn test_open_failure_destroys_with_error() {
        let (queue, options) = local();
        let stream: Duplex<u32, u32> =
            Duplex::with_options(FailingOpen, options);
        stream.resume();
        queue.run_until_idle();
        assert!(stream.is_destroyed());
        assert_eq!(stream.error().unwrap().to_string(), "no disk");
    }

    struct FailingOpen;

    impl Handler<u32, u32> for FailingOpen {
        fn open(&mut self, _cx: &mut Context<'_, u32, u32>) -> Step {
            Step::fail(StreamError::msg("no disk"))
        }
    }
}
