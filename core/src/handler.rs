//! Extension points.
//!
//! A stream does no I/O of its own. Everything concrete happens in a
//! [`Handler`]: the stream calls its hooks when the state register says a hook
//! may run, and the hook reports back through a [`Step`].
//!
//! # Philosophy
//! > A hook either finished or it will tell you when it has.
//!
//! `Step::Ready` completes the invocation before the hook call returns, which
//! lets the stream keep driving in the same loop. `Step::Pending` means the
//! hook kept a [`Completion`] (from [`Context::completion`]) and fires it
//! later; the stream then resumes from the completion.
//!
//! [`Source`] and [`Sink`] are the one-sided variants used by read-only and
//! write-only streams.

use crate::error::{StreamError, StreamResult};
use crate::stream::Duplex;
use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Outcome of one hook invocation.
#[must_use]
#[derive(Debug)]
pub enum Step {
    /// Completed before the hook returned.
    Ready(StreamResult),
    /// A [`Completion`] will be fired later.
    Pending,
}

impl Step {
    pub fn done() -> Self {
        Step::Ready(Ok(()))
    }

    pub fn fail(err: impl Into<StreamError>) -> Self {
        Step::Ready(Err(err.into()))
    }
}

impl From<StreamResult> for Step {
    fn from(result: StreamResult) -> Self {
        Step::Ready(result)
    }
}

/// Which extension point an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    Open,
    Read,
    Write,
    Final,
    Destroy,
}

impl HookKind {
    pub(crate) const COUNT: usize = 5;

    pub(crate) fn index(self) -> usize {
        match self {
            HookKind::Open => 0,
            HookKind::Read => 1,
            HookKind::Write => 2,
            HookKind::Final => 3,
            HookKind::Destroy => 4,
        }
    }
}

pub(crate) trait CompletionTarget {
    fn complete(self: Rc<Self>, kind: HookKind, ticket: u64, result: StreamResult);
}

/// Single-use handle that finishes a pending hook invocation.
///
/// Each invocation gets a fresh ticket; completing an invocation that has
/// already been resolved is ignored.
pub struct Completion {
    target: Rc<dyn CompletionTarget>,
    kind: HookKind,
    ticket: u64,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("kind", &self.kind)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl Completion {
    pub fn complete(self, result: StreamResult) {
        self.target.complete(self.kind, self.ticket, result);
    }

    pub fn done(self) {
        self.complete(Ok(()));
    }

    pub fn fail(self, err: impl Into<StreamError>) {
        self.complete(Err(err.into()));
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }
}

/// What a hook sees of its stream.
pub struct Context<'a, R: 'static, W: 'static> {
    stream: &'a Duplex<R, W>,
    kind: HookKind,
    ticket: u64,
}

pub type ReadContext<'a, T> = Context<'a, T, Infallible>;
pub type WriteContext<'a, T> = Context<'a, Infallible, T>;
/// Context of a transform: reads produce `Out`, writes accept `In`.
pub type TransformContext<'a, In, Out> = Context<'a, Out, In>;

impl<'a, R: 'static, W: 'static> Context<'a, R, W> {
    pub(crate) fn new(stream: &'a Duplex<R, W>, kind: HookKind, ticket: u64) -> Self {
        Self {
            stream,
            kind,
            ticket,
        }
    }

    /// Rebuilds the context of an invocation that is still pending.
    pub(crate) fn resume(stream: &'a Duplex<R, W>, completion: &Completion) -> Self {
        Self::new(stream, completion.kind, completion.ticket)
    }

    /// Pushes onto the read side. See [`Duplex::push`].
    pub fn push(&self, data: R) -> bool {
        self.stream.push(data)
    }

    /// Pushes the end-of-stream marker onto the read side.
    pub fn push_end(&self) {
        self.stream.push_end();
    }

    pub fn stream(&self) -> &'a Duplex<R, W> {
        self.stream
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Takes a handle to finish this invocation later. Return
    /// [`Step::Pending`] after taking it.
    pub fn completion(&self) -> Completion {
        Completion {
            target: self.stream.completion_target(),
            kind: self.kind,
            ticket: self.ticket,
        }
    }
}

/// Extension points of a duplex stream reading `R` and writing `W`.
///
/// Every hook has a default that completes immediately.
pub trait Handler<R: 'static, W: 'static>: 'static {
    /// Runs once, before the first read or write.
    fn open(&mut self, cx: &mut Context<'_, R, W>) -> Step {
        let _ = cx;
        Step::done()
    }

    /// Asked whenever the read buffer has room. Push zero or more entries,
    /// now or later, then complete.
    fn read(&mut self, cx: &mut Context<'_, R, W>) -> Step {
        let _ = cx;
        Step::done()
    }

    /// Consumes one queued entry.
    fn write(&mut self, data: W, cx: &mut Context<'_, R, W>) -> Step {
        let _ = (data, cx);
        Step::done()
    }

    /// Opt into receiving the whole write backlog through [`Handler::writev`].
    fn batched(&self) -> bool {
        false
    }

    /// Consumes the whole write backlog, oldest first. The default forwards
    /// to [`Handler::write`]; only the last write of a batch may go pending,
    /// otherwise the stream fails with [`StreamError::PendingBatch`].
    fn writev(&mut self, batch: Vec<W>, cx: &mut Context<'_, R, W>) -> Step {
        write_each(batch, |data| self.write(data, cx))
    }

    /// Runs once after `end` and after the write backlog is flushed.
    fn finalize(&mut self, cx: &mut Context<'_, R, W>) -> Step {
        let _ = cx;
        Step::done()
    }

    /// Runs exactly once during teardown.
    fn destroy(&mut self, cx: &mut Context<'_, R, W>) -> Step {
        let _ = cx;
        Step::done()
    }

    /// Runs synchronously from the first `destroy` call, before teardown is
    /// scheduled. Use it to abort in-flight work.
    fn predestroy(&mut self) {}
}

/// Forwards a batch entry by entry. A pending write ends the batch: it is
/// the batch's completion when it was the last entry, and a failure when
/// entries are left behind it.
fn write_each<T>(batch: Vec<T>, mut write: impl FnMut(T) -> Step) -> Step {
    let mut remaining = batch.len();
    for data in batch {
        remaining -= 1;
        match write(data) {
            Step::Ready(Ok(())) => {}
            Step::Pending if remaining == 0 => return Step::Pending,
            Step::Pending => return Step::fail(StreamError::PendingBatch { remaining }),
            failed => return failed,
        }
    }
    Step::done()
}

/// Extension points of a read-only stream.
pub trait Source<T: 'static>: 'static {
    fn open(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn read(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn destroy(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn predestroy(&mut self) {}
}

/// Extension points of a write-only stream.
pub trait Sink<T: 'static>: 'static {
    fn open(&mut self, cx: &mut WriteContext<'_, T>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn write(&mut self, data: T, cx: &mut WriteContext<'_, T>) -> Step {
        let _ = (data, cx);
        Step::done()
    }

    fn batched(&self) -> bool {
        false
    }

    fn writev(&mut self, batch: Vec<T>, cx: &mut WriteContext<'_, T>) -> Step {
        write_each(batch, |data| self.write(data, cx))
    }

    fn finalize(&mut self, cx: &mut WriteContext<'_, T>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn destroy(&mut self, cx: &mut WriteContext<'_, T>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn predestroy(&mut self) {}
}

/// Hooks that all complete immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Noop;

impl<R: 'static, W: 'static> Handler<R, W> for Noop {}
impl<T: 'static> Source<T> for Noop {}
impl<T: 'static> Sink<T> for Noop {}

pub(crate) struct SourceHandler<S>(pub(crate) S);

impl<T: 'static, S: Source<T>> Handler<T, Infallible> for SourceHandler<S> {
    fn open(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        self.0.open(cx)
    }

    fn read(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        self.0.read(cx)
    }

    fn write(&mut self, data: Infallible, _cx: &mut ReadContext<'_, T>) -> Step {
        match data {}
    }

    fn destroy(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        self.0.destroy(cx)
    }

    fn predestroy(&mut self) {
        self.0.predestroy();
    }
}

pub(crate) struct SinkHandler<S>(pub(crate) S);

impl<T: 'static, S: Sink<T>> Handler<Infallible, T> for SinkHandler<S> {
    fn open(&mut self, cx: &mut WriteContext<'_, T>) -> Step {
        self.0.open(cx)
    }

    fn write(&mut self, data: T, cx: &mut WriteContext<'_, T>) -> Step {
        self.0.write(data, cx)
    }

    fn batched(&self) -> bool {
        self.0.batched()
    }

    fn writev(&mut self, batch: Vec<T>, cx: &mut WriteContext<'_, T>) -> Step {
        self.0.writev(batch, cx)
    }

    fn finalize(&mut self, cx: &mut WriteContext<'_, T>) -> Step {
        self.0.finalize(cx)
    }

    fn destroy(&mut self, cx: &mut WriteContext<'_, T>) -> Step {
        self.0.destroy(cx)
    }

    fn predestroy(&mut self) {
        self.0.predestroy();
    }
}

/// A [`Source`] whose `read` is a closure.
pub struct FnSource<T, F> {
    read: F,
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> FnSource<T, F>
where
    T: 'static,
    F: FnMut(&mut ReadContext<'_, T>) -> Step + 'static,
{
    pub fn new(read: F) -> Self {
        Self {
            read,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Source<T> for FnSource<T, F>
where
    T: 'static,
    F: FnMut(&mut ReadContext<'_, T>) -> Step + 'static,
{
    fn read(&mut self, cx: &mut ReadContext<'_, T>) -> Step {
        (self.read)(cx)
    }
}

/// A [`Sink`] whose `write` is a closure.
pub struct FnSink<T, F> {
    write: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> FnSink<T, F>
where
    T: 'static,
    F: FnMut(T, &mut WriteContext<'_, T>) -> Step + 'static,
{
    pub fn new(write: F) -> Self {
        Self {
            write,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Sink<T> for FnSink<T, F>
where
    T: 'static,
    F: FnMut(T, &mut WriteContext<'_, T>) -> Step + 'static,
{
    fn write(&mut self, data: T, cx: &mut WriteContext<'_, T>) -> Step {
        (self.write)(data, cx)
    }
}
