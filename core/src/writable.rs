//! The write half: queued writes, drain signaling, finish sequencing.

use crate::config::StreamOptions;
use crate::error::StreamResult;
use crate::events::Signal;
use crate::handler::{FnSink, HookKind, Noop, Sink, SinkHandler, Step, WriteContext};
use crate::pipeline::PipelineLink;
use crate::queue::ByteQueue;
use crate::stream::{Duplex, Inner};
use sluice_flow::StreamState;
use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, trace, warn};

pub(crate) struct WritableState<T: 'static> {
    pub(crate) queue: ByteQueue<T>,
    pub(crate) pipeline: Option<Rc<PipelineLink>>,
}

impl<T: 'static> WritableState<T> {
    pub(crate) fn new(queue: ByteQueue<T>) -> Self {
        Self {
            queue,
            pipeline: None,
        }
    }

    pub(crate) fn detach(&mut self) -> Option<Rc<PipelineLink>> {
        self.queue.clear();
        self.pipeline.take()
    }
}

impl<R: 'static, W: 'static> Inner<R, W> {
    pub(crate) fn write(self: &Rc<Self>, data: W) -> bool {
        let Some(ws) = self.writable.as_ref() else {
            return false;
        };
        let state = self.state();
        if state.is_destroying() {
            warn!(stream = %self.id, "write after destroy, data dropped");
            return false;
        }
        if state.is_write_ended() {
            panic!("{}: write after end", self.id);
        }

        self.schedule_write();
        let below = ws.borrow_mut().queue.push(data);
        self.transition(|s| s.queue_write(!below));
        below
    }

    pub(crate) fn end(self: &Rc<Self>, data: Option<W>) {
        if self.writable.is_none() {
            return;
        }
        if self.state().is_write_ended() {
            trace!(stream = %self.id, "end ignored, already finishing");
            return;
        }
        if let Some(data) = data {
            self.write(data);
        }
        self.schedule_write();
        self.transition(StreamState::begin_finish);
    }

    fn emit_drain_if_owed(&self) {
        if self.transition(StreamState::mark_drained) {
            trace!(stream = %self.id, "drained");
            self.listeners.emit(Signal::Drain);
        }
    }

    fn shift_write(&self) -> Option<W> {
        let ws = self.writable.as_ref()?;
        let (data, empty) = {
            let mut ws = ws.borrow_mut();
            let data = ws.queue.shift();
            (data, ws.queue.is_empty())
        };
        if empty {
            self.emit_drain_if_owed();
        }
        data
    }

    fn take_write_backlog(&self) -> Vec<W> {
        let Some(ws) = self.writable.as_ref() else {
            return Vec::new();
        };
        let batch = ws.borrow_mut().queue.take_all();
        self.emit_drain_if_owed();
        batch
    }

    pub(crate) fn update_write(self: &Rc<Self>) {
        if self.writable.is_none() {
            return;
        }

        while self.state().can_shift_write() {
            if self.batched {
                let batch = self.take_write_backlog();
                self.transition(StreamState::begin_write);
                self.run_hook(HookKind::Write, |h, cx| h.writev(batch, cx));
            } else {
                let Some(data) = self.shift_write() else {
                    break;
                };
                self.transition(StreamState::begin_write);
                self.run_hook(HookKind::Write, |h, cx| h.write(data, cx));
            }
            self.transition(StreamState::end_write_sync);
        }

        if self.state().write_is_non_primary() {
            self.write_non_primary();
        }
    }

    fn write_non_primary(self: &Rc<Self>) {
        if self.transition(StreamState::take_final) {
            debug!(stream = %self.id, "invoking final");
            self.run_hook(HookKind::Final, |h, cx| h.finalize(cx));
            return;
        }
        self.teardown();
    }

    pub(crate) fn after_write(self: &Rc<Self>, result: StreamResult) {
        if let Err(err) = result {
            self.destroy(Some(err));
        }
        self.transition(StreamState::release_write);
        if !self.state().contains(StreamState::WRITE_SYNC) {
            self.update_write();
        }
    }

    pub(crate) fn after_final(self: &Rc<Self>, result: StreamResult) {
        if let Err(err) = result {
            self.destroy(Some(err));
        }
        if self.transition(StreamState::complete_final) {
            debug!(stream = %self.id, "write side finished");
            self.listeners.emit(Signal::Finish);
        }
        if self.transition(StreamState::take_auto_destroy) {
            debug!(stream = %self.id, "both sides done, destroying");
        }
        self.transition(StreamState::release_write);
        self.update_write();
    }
}

impl<R: 'static, W: 'static> Duplex<R, W> {
    /// Queues `data` for the write hook. Returns `false` once the queue is at
    /// or above the high-water mark; wait for `drain` before writing more.
    /// Writes after destroy are dropped and return `false`.
    ///
    /// # Panics
    ///
    /// Panics if `end` was already called.
    pub fn write(&self, data: W) -> bool {
        self.inner.write(data)
    }

    /// Signals that no more data will be written. `finish` fires once the
    /// queue is flushed and `finalize` completed. Repeated calls are ignored.
    pub fn end(&self) {
        self.inner.end(None);
    }

    /// Writes `data` and ends.
    pub fn end_with(&self, data: W) {
        self.inner.end(Some(data));
    }

    pub fn on_drain(&self, f: impl FnMut() + 'static) {
        self.inner.listeners.on(Signal::Drain, f);
        if self.inner.writable.is_some() {
            self.inner
                .transition(|s| s.insert(StreamState::WRITE_EMIT_DRAIN));
            self.inner.schedule_write();
        }
    }

    pub fn on_finish(&self, f: impl FnMut() + 'static) {
        self.inner.listeners.on(Signal::Finish, f);
    }

    pub fn writable_buffered(&self) -> usize {
        self.inner
            .writable
            .as_ref()
            .map_or(0, |ws| ws.borrow().queue.buffered())
    }

    pub fn writable_high_water_mark(&self) -> usize {
        self.inner
            .writable
            .as_ref()
            .map_or(0, |ws| ws.borrow().queue.high_water_mark())
    }

    /// `true` if more writes would only queue up: the buffer is full, or the
    /// write side is finishing, finished or being destroyed.
    pub fn is_writable_backpressured(&self) -> bool {
        let saturated = self
            .inner
            .writable
            .as_ref()
            .is_none_or(|ws| ws.borrow().queue.is_saturated());
        saturated || self.inner.state().is_write_backpressured()
    }

    pub fn is_writable_finished(&self) -> bool {
        self.inner.state().contains(StreamState::WRITE_DONE)
    }
}

/// A write-only stream.
pub struct Writable<T: 'static> {
    stream: Duplex<Infallible, T>,
}

impl<T: 'static> Writable<T> {
    /// A writable that accepts and discards everything.
    pub fn new() -> Self {
        Self::from_sink(Noop)
    }

    pub fn from_sink(sink: impl Sink<T>) -> Self {
        Self::with_options(sink, StreamOptions::default())
    }

    pub fn with_options(sink: impl Sink<T>, options: StreamOptions<Infallible, T>) -> Self {
        let stream = Duplex::build(
            Box::new(SinkHandler(sink)),
            StreamState::writable(),
            false,
            true,
            options,
        );
        Self { stream }
    }

    pub fn from_fn<F>(write: F) -> Self
    where
        F: FnMut(T, &mut WriteContext<'_, T>) -> Step + 'static,
    {
        Self::from_sink(FnSink::new(write))
    }

    pub fn is_backpressured(&self) -> bool {
        self.stream.is_writable_backpressured()
    }

    pub fn as_duplex(&self) -> &Duplex<Infallible, T> {
        &self.stream
    }

    pub fn into_duplex(self) -> Duplex<Infallible, T> {
        self.stream
    }
}

impl<T: 'static> Deref for Writable<T> {
    type Target = Duplex<Infallible, T>;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl<T: 'static> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
        }
    }
}

impl<T: 'static> Default for Writable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Writable").field(&self.stream).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use crate::handler::Completion;
    use crate::scheduler::TickQueue;
    use std::cell::{Cell, RefCell};

    fn local<T: 'static>() -> (Rc<TickQueue>, StreamOptions<Infallible, T>) {
        let queue = Rc::new(TickQueue::new());
        let options = StreamOptions::new().scheduler(queue.clone());
        (queue, options)
    }

    #[test]
    fn test_backpressure_then_single_drain() {
        let (queue, options) = local::<&'static str>();
        let stream = Writable::with_options(Noop, options);
        for _ in 0..15 {
            assert!(stream.write("a"));
        }
        assert!(!stream.write("a"));
        assert!(stream.is_backpressured());

        let drains = Rc::new(Cell::new(0));
        let counter = drains.clone();
        stream.on_drain(move || counter.set(counter.get() + 1));
        queue.run_until_idle();

        assert_eq!(drains.get(), 1);
        assert_eq!(stream.writable_buffered(), 0);
        assert!(!stream.is_backpressured());
    }

    struct Recorder {
        batches: Rc<RefCell<Vec<Vec<u32>>>>,
        finals: Rc<Cell<u32>>,
    }

    impl Sink<u32> for Recorder {
        fn batched(&self) -> bool {
            true
        }

        fn writev(&mut self, batch: Vec<u32>, _cx: &mut WriteContext<'_, u32>) -> Step {
            self.batches.borrow_mut().push(batch);
            Step::done()
        }

        fn finalize(&mut self, _cx: &mut WriteContext<'_, u32>) -> Step {
            self.finals.set(self.finals.get() + 1);
            Step::done()
        }
    }

    #[test]
    fn test_writev_receives_backlog_and_many_ends_finish_once() {
        let (queue, options) = local::<u32>();
        let batches = Rc::new(RefCell::new(Vec::new()));
        let finals = Rc::new(Cell::new(0));
        let stream = Writable::with_options(
            Recorder {
                batches: batches.clone(),
                finals: finals.clone(),
            },
            options,
        );
        let finishes = Rc::new(Cell::new(0));
        let counter = finishes.clone();
        stream.on_finish(move || counter.set(counter.get() + 1));

        stream.write(1);
        stream.write(2);
        stream.end_with(3);
        stream.end();
        queue.run_until_idle();
        stream.end();
        queue.run_until_idle();

        assert_eq!(*batches.borrow(), vec![vec![1, 2, 3]]);
        assert_eq!(finals.get(), 1);
        assert_eq!(finishes.get(), 1);
        assert!(stream.is_writable_finished());
        assert!(stream.is_destroyed());
    }

    struct Parking {
        seen: Rc<RefCell<Vec<u32>>>,
        parked: Rc<RefCell<Option<Completion>>>,
    }

    impl Sink<u32> for Parking {
        fn write(&mut self, data: u32, cx: &mut WriteContext<'_, u32>) -> Step {
            self.seen.borrow_mut().push(data);
            *self.parked.borrow_mut() = Some(cx.completion());
            Step::Pending
        }
    }

    #[test]
    fn test_one_write_in_flight_at_a_time() {
        let (queue, options) = local::<u32>();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let parked = Rc::new(RefCell::new(None));
        let stream = Writable::with_options(
            Parking {
                seen: seen.clone(),
                parked: parked.clone(),
            },
            options,
        );

        stream.write(1);
        stream.write(2);
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![1]);

        let first = parked.borrow_mut().take().unwrap();
        first.done();
        assert_eq!(*seen.borrow(), vec![1, 2]);

        stream.end();
        queue.run_until_idle();
        assert!(!stream.is_writable_finished());

        let second = parked.borrow_mut().take().unwrap();
        second.done();
        assert!(stream.is_writable_finished());
        queue.run_until_idle();
        assert!(stream.is_destroyed());
    }

    struct BatchedParking(Parking);

    impl Sink<u32> for BatchedParking {
        fn batched(&self) -> bool {
            true
        }

        fn write(&mut self, data: u32, cx: &mut WriteContext<'_, u32>) -> Step {
            self.0.write(data, cx)
        }
    }

    fn batched_parking() -> (
        Rc<TickQueue>,
        Writable<u32>,
        Rc<RefCell<Vec<u32>>>,
        Rc<RefCell<Option<Completion>>>,
    ) {
        let (queue, options) = local::<u32>();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let parked = Rc::new(RefCell::new(None));
        let stream = Writable::with_options(
            BatchedParking(Parking {
                seen: seen.clone(),
                parked: parked.clone(),
            }),
            options,
        );
        (queue, stream, seen, parked)
    }

    #[test]
    fn test_default_writev_fails_on_pending_mid_batch() {
        let (queue, stream, seen, _parked) = batched_parking();
        stream.write(1);
        stream.write(2);
        stream.write(3);
        stream.end();
        queue.run_until_idle();

        assert_eq!(*seen.borrow(), vec![1]);
        assert!(!stream.is_writable_finished());
        assert!(stream.is_destroyed());
        assert!(matches!(
            stream.error(),
            Some(StreamError::PendingBatch { remaining: 2 })
        ));
    }

    #[test]
    fn test_default_writev_pending_last_entry_completes_batch() {
        let (queue, stream, seen, parked) = batched_parking();
        stream.write(1);
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![1]);

        let completion = parked.borrow_mut().take().unwrap();
        completion.done();
        stream.end();
        queue.run_until_idle();

        assert!(stream.is_writable_finished());
        assert!(stream.error().is_none());
    }

    #[test]
    fn test_failed_write_destroys_error_then_close() {
        let (queue, options) = local::<u32>();
        let stream = Writable::with_options(
            FnSink::new(|data: u32, _cx: &mut WriteContext<'_, u32>| {
                if data == 2 {
                    Step::fail(StreamError::msg("boom"))
                } else {
                    Step::done()
                }
            }),
            options,
        );
        let log = Rc::new(RefCell::new(Vec::new()));
        let errors = log.clone();
        stream.on_error(move |err| errors.borrow_mut().push(format!("error: {err}")));
        let closes = log.clone();
        stream.on_close(move || closes.borrow_mut().push("close".to_string()));
        let finishes = log.clone();
        stream.on_finish(move || finishes.borrow_mut().push("finish".to_string()));

        stream.write(1);
        stream.write(2);
        stream.write(3);
        stream.end();
        queue.run_until_idle();

        assert_eq!(*log.borrow(), vec!["error: boom", "close"]);
        assert_eq!(stream.error().unwrap().to_string(), "boom");
    }

    struct SlowFinal {
        finals: Rc<Cell<u32>>,
        parked: Rc<RefCell<Option<Completion>>>,
    }

    impl Sink<u32> for SlowFinal {
        fn finalize(&mut self, cx: &mut WriteContext<'_, u32>) -> Step {
            self.finals.set(self.finals.get() + 1);
            *self.parked.borrow_mut() = Some(cx.completion());
            Step::Pending
        }
    }

    fn slow_final() -> (
        Rc<TickQueue>,
        Writable<u32>,
        Rc<Cell<u32>>,
        Rc<RefCell<Option<Completion>>>,
    ) {
        let (queue, options) = local::<u32>();
        let finals = Rc::new(Cell::new(0));
        let parked = Rc::new(RefCell::new(None));
        let stream = Writable::with_options(
            SlowFinal {
                finals: finals.clone(),
                parked: parked.clone(),
            },
            options,
        );
        (queue, stream, finals, parked)
    }

    #[test]
    fn test_end_during_pending_final_is_ignored() {
        let (queue, stream, finals, parked) = slow_final();
        let finishes = Rc::new(Cell::new(0));
        let counter = finishes.clone();
        stream.on_finish(move || counter.set(counter.get() + 1));

        stream.end();
        queue.run_until_idle();
        assert_eq!(finals.get(), 1);
        assert!(stream.is_backpressured());

        stream.end();
        queue.run_until_idle();
        assert_eq!(finals.get(), 1);

        let completion = parked.borrow_mut().take().unwrap();
        completion.done();
        queue.run_until_idle();
        stream.end();
        queue.run_until_idle();

        assert_eq!(finals.get(), 1);
        assert_eq!(finishes.get(), 1);
        assert!(stream.is_destroyed());
    }

    #[test]
    #[should_panic(expected = "write after end")]
    fn test_write_during_pending_final_panics() {
        let (queue, stream, finals, _parked) = slow_final();
        stream.end();
        queue.run_until_idle();
        assert_eq!(finals.get(), 1);
        stream.write(1);
    }

    #[test]
    #[should_panic(expected = "write after end")]
    fn test_write_after_end_panics() {
        let (_queue, options) = local::<u32>();
        let stream = Writable::with_options(Noop, options);
        stream.end();
        stream.write(1);
    }

    #[test]
    fn test_write_after_destroy_is_dropped() {
        let (queue, options) = local::<u32>();
        let stream = Writable::with_options(Noop, options);
        stream.destroy();
        assert!(!stream.write(1));
        assert!(stream.is_backpressured());
        queue.run_until_idle();
        assert!(stream.is_destroyed());
    }
}
