//! The read half: buffering, draining to consumers and the pipe target,
//! end sequencing.

use crate::config::StreamOptions;
use crate::error::StreamResult;
use crate::events::Signal;
use crate::handler::{FnSource, HookKind, Noop, ReadContext, Source, SourceHandler, Step};
use crate::pipeline::{PipeTarget, PipelineLink};
use crate::queue::ByteQueue;
use crate::stream::{Duplex, Inner};
use sluice_flow::StreamState;
use std::convert::Infallible;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use tracing::{debug, trace, warn};

pub(crate) struct ReadableState<T: 'static> {
    pub(crate) queue: ByteQueue<T>,
    pub(crate) pipe: Option<Rc<dyn PipeTarget<T>>>,
    pub(crate) pipeline: Option<Rc<PipelineLink>>,
}

impl<T: 'static> ReadableState<T> {
    pub(crate) fn new(queue: ByteQueue<T>) -> Self {
        Self {
            queue,
            pipe: None,
            pipeline: None,
        }
    }

    /// Releases buffered data and the pipe after close.
    pub(crate) fn detach(&mut self) -> Option<Rc<PipelineLink>> {
        self.queue.clear();
        self.pipe = None;
        self.pipeline.take()
    }
}

impl<R: 'static, W: 'static> Inner<R, W> {
    pub(crate) fn push(self: &Rc<Self>, data: R) -> bool {
        let Some(rs) = self.readable.as_ref() else {
            return false;
        };
        let state = self.state();
        if state.is_destroying() {
            warn!(stream = %self.id, "push after destroy, data dropped");
            return false;
        }
        if state.is_read_ended() {
            panic!("{}: push after end-of-stream", self.id);
        }

        self.schedule_read();
        let below = rs.borrow_mut().queue.push(data);
        self.transition(StreamState::push_data);
        below
    }

    pub(crate) fn push_end(self: &Rc<Self>) {
        let Some(rs) = self.readable.as_ref() else {
            return;
        };
        if self.state().is_read_ended() {
            trace!(stream = %self.id, "end-of-stream already pushed");
            return;
        }
        self.schedule_read();
        rs.borrow_mut().queue.set_high_water_mark(0);
        self.transition(StreamState::push_end);
    }

    pub(crate) fn unshift(self: &Rc<Self>, data: R) -> bool {
        let Some(rs) = self.readable.as_ref() else {
            return false;
        };
        let state = self.state();
        if state.is_destroying() || state.contains(StreamState::READ_DONE) {
            warn!(stream = %self.id, "unshift after end, data dropped");
            return false;
        }

        self.schedule_read();
        let below = rs.borrow_mut().queue.push_front(data);
        self.transition(StreamState::push_data);
        below
    }

    fn shift_read(&self) -> Option<R> {
        let rs = self.readable.as_ref()?;
        let (data, empty) = {
            let mut rs = rs.borrow_mut();
            let data = rs.queue.shift();
            (data, rs.queue.is_empty())
        };
        if empty {
            self.transition(StreamState::clear_read_queued);
        }
        data
    }

    /// Hands one entry to data listeners and the pipe target. Returns it to
    /// the caller only when nothing is piped.
    fn dispatch(&self, data: R) -> Option<R> {
        if self.state().contains(StreamState::READ_EMIT_DATA) {
            self.listeners.emit_data(&data);
        }
        let pipe = self
            .readable
            .as_ref()
            .and_then(|rs| rs.borrow().pipe.clone());
        match pipe {
            Some(pipe) => {
                if !pipe.write(data) {
                    trace!(stream = %self.id, "pipe target backpressured");
                    self.transition(StreamState::pipe_backpressured);
                }
                None
            }
            None => Some(data),
        }
    }

    pub(crate) fn read(self: &Rc<Self>) -> Option<R> {
        self.schedule_read();
        if !self.state().can_shift_read() {
            return None;
        }
        let data = self.shift_read()?;
        self.dispatch(data)
    }

    fn drain_read(&self) {
        loop {
            let state = self.state();
            if !(state.can_shift_read() && state.is_read_flowing()) {
                break;
            }
            let Some(data) = self.shift_read() else {
                break;
            };
            let _ = self.dispatch(data);
        }
    }

    fn has_read_room(&self) -> bool {
        self.readable
            .as_ref()
            .is_some_and(|rs| !rs.borrow().queue.is_saturated())
    }

    pub(crate) fn update_read(self: &Rc<Self>) {
        if self.readable.is_none() {
            return;
        }

        self.drain_read();

        while self.has_read_room() && self.state().should_read() {
            self.transition(StreamState::begin_read);
            self.run_hook(HookKind::Read, |h, cx| h.read(cx));
            self.transition(StreamState::end_read_sync);
            if self.state().none_of(StreamState::READ_ACTIVE) {
                self.drain_read();
            }
        }

        if self.state().should_emit_readable() {
            self.transition(|s| s.insert(StreamState::READ_EMITTED_READABLE));
            self.listeners.emit(Signal::Readable);
        }

        if self.state().read_is_non_primary() {
            self.read_non_primary();
        }
    }

    fn read_non_primary(self: &Rc<Self>) {
        if self.transition(StreamState::take_read_end) {
            debug!(stream = %self.id, "read side ended");
            self.listeners.emit(Signal::End);
            if self.transition(StreamState::take_auto_destroy) {
                debug!(stream = %self.id, "both sides done, destroying");
            }
            let pipe = self
                .readable
                .as_ref()
                .and_then(|rs| rs.borrow().pipe.clone());
            if let Some(pipe) = pipe {
                pipe.end();
            }
        }
        self.teardown();
    }

    pub(crate) fn after_read(self: &Rc<Self>, result: StreamResult) {
        if let Err(err) = result {
            self.destroy(Some(err));
        }
        self.transition(StreamState::release_read);
        if !self.state().contains(StreamState::READ_SYNC) {
            self.update_read();
        }
    }

    pub(crate) fn after_drain(self: &Rc<Self>) {
        if self.transition(StreamState::pipe_drained) {
            self.schedule_read();
        }
    }
}

impl<R: 'static, W: 'static> Duplex<R, W> {
    /// Buffers `data` on the read side. Returns `false` once the buffer is at
    /// or above the high-water mark.
    ///
    /// # Panics
    ///
    /// Panics if the end-of-stream marker was already pushed.
    pub fn push(&self, data: R) -> bool {
        self.inner.push(data)
    }

    /// Pushes the end-of-stream marker. `end` fires once the buffer drains.
    pub fn push_end(&self) {
        self.inner.push_end();
    }

    /// Puts `data` back at the head of the read buffer.
    pub fn unshift(&self, data: R) -> bool {
        self.inner.unshift(data)
    }

    /// Takes the next buffered entry, if any. While piped, the entry goes to
    /// the pipe target and `None` is returned.
    pub fn read(&self) -> Option<R> {
        self.inner.read()
    }

    /// Switches to flowing mode: buffered data is drained to data listeners
    /// (or dropped when there are none).
    pub fn resume(&self) {
        if self.inner.readable.is_none() {
            return;
        }
        self.inner
            .transition(|s| s.insert(StreamState::READ_RESUMED));
        self.inner.schedule_read();
    }

    pub fn pause(&self) {
        self.inner
            .transition(|s| s.remove(StreamState::READ_RESUMED));
    }

    pub fn is_paused(&self) -> bool {
        !self.inner.state().contains(StreamState::READ_RESUMED)
    }

    /// Registers a data listener. Implies [`Duplex::resume`].
    pub fn on_data(&self, f: impl FnMut(&R) + 'static) {
        self.inner.listeners.on_data(f);
        if self.inner.readable.is_some() {
            self.inner
                .transition(|s| s.insert(StreamState::READ_EMIT_DATA | StreamState::READ_RESUMED));
            self.inner.schedule_read();
        }
    }

    /// Registers a listener fired when data is buffered and nothing drains it.
    pub fn on_readable(&self, f: impl FnMut() + 'static) {
        self.inner.listeners.on(Signal::Readable, f);
        if self.inner.readable.is_some() {
            self.inner
                .transition(|s| s.insert(StreamState::READ_EMIT_READABLE));
            self.inner.schedule_read();
        }
    }

    pub fn on_end(&self, f: impl FnMut() + 'static) {
        self.inner.listeners.on(Signal::End, f);
    }

    pub fn readable_buffered(&self) -> usize {
        self.inner
            .readable
            .as_ref()
            .map_or(0, |rs| rs.borrow().queue.buffered())
    }

    pub fn readable_high_water_mark(&self) -> usize {
        self.inner
            .readable
            .as_ref()
            .map_or(0, |rs| rs.borrow().queue.high_water_mark())
    }

    pub(crate) fn is_readable_saturated(&self) -> bool {
        !self.inner.has_read_room()
    }

    /// `true` if pushing more would not be consumed soon: the buffer is full,
    /// or the read side is ending, done or being destroyed.
    pub fn is_readable_backpressured(&self) -> bool {
        self.is_readable_saturated() || self.inner.state().is_read_backpressured()
    }

    pub fn is_readable_ended(&self) -> bool {
        self.inner.state().contains(StreamState::READ_DONE)
    }
}

/// A read-only stream.
pub struct Readable<T: 'static> {
    stream: Duplex<T, Infallible>,
}

impl<T: 'static> Readable<T> {
    /// A readable fed only through [`Duplex::push`].
    pub fn new() -> Self {
        Self::from_source(Noop)
    }

    pub fn from_source(source: impl Source<T>) -> Self {
        Self::with_options(source, StreamOptions::default())
    }

    pub fn with_options(source: impl Source<T>, options: StreamOptions<T, Infallible>) -> Self {
        let stream = Duplex::build(
            Box::new(SourceHandler(source)),
            StreamState::readable(),
            true,
            false,
            options,
        );
        Self { stream }
    }

    pub fn from_fn<F>(read: F) -> Self
    where
        F: FnMut(&mut ReadContext<'_, T>) -> Step + 'static,
    {
        Self::from_source(FnSource::new(read))
    }

    pub fn is_backpressured(&self) -> bool {
        self.stream.is_readable_backpressured()
    }

    pub fn as_duplex(&self) -> &Duplex<T, Infallible> {
        &self.stream
    }

    pub fn into_duplex(self) -> Duplex<T, Infallible> {
        self.stream
    }
}

impl<T: 'static> Deref for Readable<T> {
    type Target = Duplex<T, Infallible>;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl<T: 'static> Clone for Readable<T> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
        }
    }
}

impl<T: 'static> Default for Readable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> fmt::Debug for Readable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Readable").field(&self.stream).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickQueue;
    use std::cell::{Cell, RefCell};

    fn readable<T: 'static>() -> (Rc<TickQueue>, Readable<T>) {
        let queue = Rc::new(TickQueue::new());
        let stream = Readable::with_options(Noop, StreamOptions::new().scheduler(queue.clone()));
        (queue, stream)
    }

    #[test]
    fn test_push_backpressure_at_default_weight() {
        let (_queue, stream) = readable::<&'static str>();
        for _ in 0..15 {
            assert!(stream.push("a"));
        }
        assert!(!stream.push("a"));
        assert_eq!(stream.readable_buffered(), 16 * 1024);
        assert!(stream.is_backpressured());
    }

    #[test]
    fn test_data_listener_sees_everything_then_end_then_close() {
        let (queue, stream) = readable::<&'static str>();
        let log = Rc::new(RefCell::new(Vec::new()));

        stream.push("hello");
        stream.push("world");
        stream.push_end();

        let data = log.clone();
        stream.on_data(move |d| data.borrow_mut().push(d.to_string()));
        let end = log.clone();
        stream.on_end(move || end.borrow_mut().push("<end>".to_string()));
        let close = log.clone();
        stream.on_close(move || close.borrow_mut().push("<close>".to_string()));

        queue.run_until_idle();
        assert_eq!(*log.borrow(), vec!["hello", "world", "<end>", "<close>"]);
        assert!(stream.is_destroyed());
    }

    #[test]
    fn test_readable_then_read() {
        let queue = Rc::new(TickQueue::new());
        let stream = Readable::with_options(
            FnSource::new(|cx: &mut ReadContext<'_, u32>| {
                cx.push(7);
                Step::done()
            }),
            StreamOptions::new().scheduler(queue.clone()),
        );
        let got = Rc::new(RefCell::new(Vec::new()));
        let reader = stream.clone();
        let sink = got.clone();
        stream.on_readable(move || {
            if sink.borrow().is_empty() {
                sink.borrow_mut().push(reader.read());
                sink.borrow_mut().push(reader.read());
                reader.destroy();
                sink.borrow_mut().push(reader.read());
            }
        });

        queue.run_until_idle();
        assert_eq!(*got.borrow(), vec![Some(7), Some(7), None]);
        assert!(stream.is_destroyed());
    }

    #[test]
    fn test_read_waits_for_a_push() {
        let queue = Rc::new(TickQueue::new());
        let reads = Rc::new(Cell::new(0));
        let counter = reads.clone();
        let stream = Readable::with_options(
            FnSource::new(move |_cx: &mut ReadContext<'_, u32>| {
                counter.set(counter.get() + 1);
                Step::done()
            }),
            StreamOptions::new().scheduler(queue.clone()),
        );
        stream.resume();
        queue.run_until_idle();
        assert_eq!(reads.get(), 1);

        queue.run_until_idle();
        assert_eq!(reads.get(), 1);

        stream.push(1);
        queue.run_until_idle();
        assert_eq!(reads.get(), 2);
    }

    #[test]
    fn test_unshift_goes_to_the_head() {
        let (queue, stream) = readable::<u32>();
        stream.push(2);
        stream.push(3);
        stream.unshift(1);
        stream.push_end();

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        stream.on_data(move |d| sink.borrow_mut().push(*d));
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_resume_discards_without_listeners() {
        let (queue, stream) = readable::<u32>();
        let ended = Rc::new(Cell::new(0));
        let counter = ended.clone();
        stream.on_end(move || counter.set(counter.get() + 1));

        stream.push(1);
        stream.push(2);
        stream.push_end();
        stream.resume();
        queue.run_until_idle();
        assert_eq!(ended.get(), 1);
        assert!(stream.is_destroyed());
    }

    #[test]
    #[should_panic(expected = "push after end-of-stream")]
    fn test_push_after_end_panics() {
        let (_queue, stream) = readable::<u32>();
        stream.push_end();
        stream.push(1);
    }

    #[test]
    fn test_push_after_destroy_is_dropped() {
        let (queue, stream) = readable::<u32>();
        stream.destroy();
        assert!(!stream.push(1));
        queue.run_until_idle();
        assert!(stream.is_destroyed());
        assert_eq!(stream.read(), None);
    }

    #[test]
    fn test_pause_stops_flowing() {
        let (queue, stream) = readable::<u32>();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        stream.on_data(move |d| sink.borrow_mut().push(*d));
        stream.pause();
        assert!(stream.is_paused());
        stream.push(1);
        queue.run_until_idle();
        assert!(seen.borrow().is_empty());

        stream.resume();
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![1]);
    }
}
