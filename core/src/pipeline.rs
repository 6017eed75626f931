//! Pipe composition.
//!
//! `source.pipe(&dest)` hands every entry the source drains to `dest.write`,
//! stops flowing when the destination reports backpressure and resumes on its
//! `drain`. A [`PipelineLink`] watches both ends and decides how the pair
//! completes:
//!
//! - destination closes while the source is still alive: the source is
//!   destroyed with [`StreamError::PrematureClose`] unless it ended and the
//!   destination finished;
//! - source closes while the destination is still alive: the destination is
//!   destroyed with [`StreamError::SourceClosedEarly`] unless the source ended;
//! - once both ends closed, the completion callback runs exactly once with
//!   the first error the link saw.
//!
//! The link only observes the destination's public notifications (`drain`,
//! `finish`, `error`, `close`); any type implementing [`PipeTarget`] can be a
//! destination.
//!
//! A [`Chain`] pipes any number of stages in a row under one callback: the
//! first error any link reports destroys every stage, and the callback runs
//! once every link completed.
//!
//! The link holds both ends until each of them closed, and a piped source
//! holds its destination. A pipe that never closes keeps both streams alive;
//! destroy either end to release an abandoned pipe.

use crate::error::{StreamError, StreamResult};
use crate::stream::{Duplex, StreamId};
use crate::writable::Writable;
use sluice_flow::StreamState;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// One end of a pipe, as seen by its [`PipelineLink`].
pub trait Endpoint: 'static {
    fn id(&self) -> StreamId;

    fn destroy_with_error(&self, err: StreamError);

    /// Whether the read side emitted `end`. Destinations that are not
    /// readable report `true`.
    fn read_done(&self) -> bool {
        true
    }
}

/// Anything a readable can pipe into.
pub trait PipeTarget<T>: Endpoint {
    /// Returns `false` to ask the source to stop until `drain`.
    fn write(&self, data: T) -> bool;

    fn end(&self);

    fn watch_drain(&self, f: Box<dyn FnMut()>);

    fn watch_finish(&self, f: Box<dyn FnMut()>);

    fn watch_error(&self, f: Box<dyn FnMut(&StreamError)>);

    fn watch_close(&self, f: Box<dyn FnMut()>);

    /// Lets a destination report its own close to the link. Returning
    /// `false` makes the link listen for `error` and `close` instead.
    fn attach_pipeline(&self, link: &Rc<PipelineLink>) -> bool {
        let _ = link;
        false
    }
}

type PipeCallback = Box<dyn FnOnce(Option<StreamError>)>;

/// Completion coupling between a source and its pipe destination.
pub struct PipelineLink {
    from_id: StreamId,
    to_id: StreamId,
    from: RefCell<Option<Rc<dyn Endpoint>>>,
    to: RefCell<Option<Rc<dyn Endpoint>>>,
    callback: RefCell<Option<PipeCallback>>,
    error: RefCell<Option<StreamError>>,
    target_finished: Cell<bool>,
}

impl fmt::Debug for PipelineLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineLink")
            .field("from", &self.from_id)
            .field("to", &self.to_id)
            .field("from_open", &self.from.borrow().is_some())
            .field("to_open", &self.to.borrow().is_some())
            .field("target_finished", &self.target_finished.get())
            .finish()
    }
}

impl PipelineLink {
    pub fn new(
        from: Rc<dyn Endpoint>,
        to: Rc<dyn Endpoint>,
        callback: Option<PipeCallback>,
    ) -> Self {
        Self {
            from_id: from.id(),
            to_id: to.id(),
            from: RefCell::new(Some(from)),
            to: RefCell::new(Some(to)),
            callback: RefCell::new(callback),
            error: RefCell::new(None),
            target_finished: Cell::new(false),
        }
    }

    pub fn from_id(&self) -> StreamId {
        self.from_id
    }

    pub fn to_id(&self) -> StreamId {
        self.to_id
    }

    /// The destination emitted `finish`.
    pub fn finished(&self) {
        self.target_finished.set(true);
    }

    pub fn is_target_finished(&self) -> bool {
        self.target_finished.get()
    }

    /// `true` once both ends reported their close.
    pub fn is_complete(&self) -> bool {
        self.from.borrow().is_none() && self.to.borrow().is_none()
    }

    /// The first error either end closed with.
    pub fn error(&self) -> Option<StreamError> {
        self.error.borrow().clone()
    }

    /// Stream `id` closed, with `err` if it failed. Reports for an end that
    /// already closed are ignored.
    pub fn done(&self, id: StreamId, err: Option<StreamError>) {
        if let Some(err) = err {
            let mut slot = self.error.borrow_mut();
            if slot.is_none() {
                *slot = Some(err);
            }
        }

        if id == self.to_id {
            let closed = self.to.borrow_mut().take();
            if closed.is_none() {
                return;
            }
            let from = self.from.borrow().clone();
            if let Some(from) = from {
                if !from.read_done() || !self.target_finished.get() {
                    debug!(from = %self.from_id, to = %self.to_id, "pipe target closed early");
                    from.destroy_with_error(StreamError::PrematureClose);
                }
                return;
            }
        } else if id == self.from_id {
            let Some(from) = self.from.borrow_mut().take() else {
                return;
            };
            let to = self.to.borrow().clone();
            if let Some(to) = to {
                if !from.read_done() {
                    debug!(from = %self.from_id, to = %self.to_id, "pipe source closed before ending");
                    to.destroy_with_error(StreamError::SourceClosedEarly);
                }
                return;
            }
        } else {
            return;
        }

        let callback = self.callback.borrow_mut().take();
        let err = self.error();
        debug!(from = %self.from_id, to = %self.to_id, failed = err.is_some(), "pipeline complete");
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

impl<R: 'static, W: 'static> Endpoint for Duplex<R, W> {
    fn id(&self) -> StreamId {
        Duplex::id(self)
    }

    fn destroy_with_error(&self, err: StreamError) {
        self.destroy_with(err);
    }

    fn read_done(&self) -> bool {
        self.state().contains(StreamState::READ_DONE)
    }
}

impl<R: 'static, W: 'static> PipeTarget<W> for Duplex<R, W> {
    fn write(&self, data: W) -> bool {
        Duplex::write(self, data)
    }

    fn end(&self) {
        Duplex::end(self);
    }

    fn watch_drain(&self, f: Box<dyn FnMut()>) {
        Duplex::on_drain(self, f);
    }

    fn watch_finish(&self, f: Box<dyn FnMut()>) {
        Duplex::on_finish(self, f);
    }

    fn watch_error(&self, f: Box<dyn FnMut(&StreamError)>) {
        Duplex::on_error(self, f);
    }

    fn watch_close(&self, f: Box<dyn FnMut()>) {
        Duplex::on_close(self, f);
    }

    fn attach_pipeline(&self, link: &Rc<PipelineLink>) -> bool {
        let Some(ws) = self.inner.writable.as_ref() else {
            return false;
        };
        ws.borrow_mut().pipeline = Some(Rc::clone(link));
        true
    }
}

impl<T: 'static> Endpoint for Writable<T> {
    fn id(&self) -> StreamId {
        self.as_duplex().id()
    }

    fn destroy_with_error(&self, err: StreamError) {
        self.as_duplex().destroy_with_error(err);
    }
}

impl<T: 'static> PipeTarget<T> for Writable<T> {
    fn write(&self, data: T) -> bool {
        self.as_duplex().write(data)
    }

    fn end(&self) {
        self.as_duplex().end();
    }

    fn watch_drain(&self, f: Box<dyn FnMut()>) {
        self.as_duplex().on_drain(f);
    }

    fn watch_finish(&self, f: Box<dyn FnMut()>) {
        self.as_duplex().on_finish(f);
    }

    fn watch_error(&self, f: Box<dyn FnMut(&StreamError)>) {
        self.as_duplex().on_error(f);
    }

    fn watch_close(&self, f: Box<dyn FnMut()>) {
        self.as_duplex().on_close(f);
    }

    fn attach_pipeline(&self, link: &Rc<PipelineLink>) -> bool {
        self.as_duplex().attach_pipeline(link)
    }
}

impl<R: 'static, W: 'static> Duplex<R, W> {
    /// Pipes the read side into `dest` and returns `dest` for chaining.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyPiped`] if this stream already has a pipe
    /// destination.
    ///
    /// # Panics
    ///
    /// Panics if the stream has no read side.
    pub fn pipe<D>(&self, dest: &D) -> StreamResult<D>
    where
        D: PipeTarget<R> + Clone,
    {
        self.attach_pipe(dest, None)
    }

    /// Like [`Duplex::pipe`], and calls `callback` once both ends closed.
    pub fn pipe_with<D>(
        &self,
        dest: &D,
        callback: impl FnOnce(Option<StreamError>) + 'static,
    ) -> StreamResult<D>
    where
        D: PipeTarget<R> + Clone,
    {
        self.attach_pipe(dest, Some(Box::new(callback)))
    }

    pub fn is_piped(&self) -> bool {
        self.inner
            .readable
            .as_ref()
            .is_some_and(|rs| rs.borrow().pipe.is_some())
    }

    fn attach_pipe<D>(&self, dest: &D, callback: Option<PipeCallback>) -> StreamResult<D>
    where
        D: PipeTarget<R> + Clone,
    {
        let Some(rs) = self.inner.readable.as_ref() else {
            panic!("{}: cannot pipe from a stream without a read side", self.id());
        };
        if rs.borrow().pipe.is_some() {
            return Err(StreamError::AlreadyPiped);
        }

        let from: Rc<dyn Endpoint> = Rc::new(self.clone());
        let to: Rc<dyn Endpoint> = Rc::new(dest.clone());
        let link = Rc::new(PipelineLink::new(from, to, callback));
        let target: Rc<dyn PipeTarget<R>> = Rc::new(dest.clone());
        {
            let mut rs = rs.borrow_mut();
            rs.pipe = Some(target);
            rs.pipeline = Some(Rc::clone(&link));
        }
        self.inner
            .transition(|s| s.insert(StreamState::READ_PIPE_DRAINED));

        if !dest.attach_pipeline(&link) {
            let to_id = link.to_id();
            let on_error = Rc::clone(&link);
            dest.watch_error(Box::new(move |err| on_error.done(to_id, Some(err.clone()))));
            let on_close = Rc::clone(&link);
            dest.watch_close(Box::new(move || on_close.done(to_id, None)));
        }
        let on_finish = Rc::clone(&link);
        dest.watch_finish(Box::new(move || on_finish.finished()));
        let source = Rc::downgrade(&self.inner);
        dest.watch_drain(Box::new(move || {
            if let Some(source) = source.upgrade() {
                source.after_drain();
            }
        }));

        debug!(from = %self.id(), to = %link.to_id(), "piped");
        self.inner.schedule_read();
        Ok(dest.clone())
    }
}

struct ChainState {
    stages: RefCell<Vec<Rc<dyn Endpoint>>>,
    pending: Cell<usize>,
    error: RefCell<Option<StreamError>>,
    callback: RefCell<Option<PipeCallback>>,
}

impl ChainState {
    fn fail(&self, err: StreamError) {
        {
            let mut slot = self.error.borrow_mut();
            if slot.is_some() {
                return;
            }
            *slot = Some(err.clone());
        }
        let stages = self.stages.borrow().clone();
        debug!(stages = stages.len(), error = %err, "chain failed, destroying every stage");
        for stage in stages {
            stage.destroy_with_error(err.clone());
        }
    }

    fn link_done(&self, err: Option<StreamError>) {
        if let Some(err) = err {
            self.fail(err);
        }
        let left = self.pending.get().saturating_sub(1);
        self.pending.set(left);
        if left > 0 {
            return;
        }
        self.stages.borrow_mut().clear();
        let callback = self.callback.borrow_mut().take();
        let err = self.error.borrow().clone();
        debug!(failed = err.is_some(), "chain complete");
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

/// Pipes several stages in a row with a single completion callback.
///
/// ```ignore
/// Chain::new(&source)
///     .through(&parse)?
///     .through(&encode)?
///     .into_target(&sink, |err| report(err))?;
/// ```
pub struct Chain<R: 'static, W: 'static> {
    state: Rc<ChainState>,
    tail: Duplex<R, W>,
}

impl<R: 'static, W: 'static> fmt::Debug for Chain<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("stages", &self.state.stages.borrow().len())
            .field("tail", &self.tail.id())
            .finish()
    }
}

impl<R: 'static, W: 'static> Chain<R, W> {
    pub fn new(source: &Duplex<R, W>) -> Self {
        let head: Rc<dyn Endpoint> = Rc::new(source.clone());
        Self {
            state: Rc::new(ChainState {
                stages: RefCell::new(vec![head]),
                pending: Cell::new(0),
                error: RefCell::new(None),
                callback: RefCell::new(None),
            }),
            tail: source.clone(),
        }
    }

    /// Pipes the current tail into `stage`, which becomes the new tail.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyPiped`] if the tail is already piped.
    pub fn through<O: 'static>(self, stage: &Duplex<O, R>) -> StreamResult<Chain<O, R>> {
        self.link(stage)?;
        Ok(Chain {
            state: self.state,
            tail: stage.clone(),
        })
    }

    /// Pipes the tail into the last stage. `callback` runs once every link
    /// completed, with the first error any stage failed with.
    ///
    /// # Errors
    ///
    /// [`StreamError::AlreadyPiped`] if the tail is already piped.
    pub fn into_target<D>(
        self,
        dest: &D,
        callback: impl FnOnce(Option<StreamError>) + 'static,
    ) -> StreamResult<D>
    where
        D: PipeTarget<R> + Clone,
    {
        let dest = self.link(dest)?;
        *self.state.callback.borrow_mut() = Some(Box::new(callback));
        Ok(dest)
    }

    fn link<D>(&self, dest: &D) -> StreamResult<D>
    where
        D: PipeTarget<R> + Clone,
    {
        let state = Rc::clone(&self.state);
        let dest = self
            .tail
            .pipe_with(dest, move |err| state.link_done(err))?;
        let stage: Rc<dyn Endpoint> = Rc::new(dest.clone());
        self.state.stages.borrow_mut().push(stage);
        self.state.pending.set(self.state.pending.get() + 1);
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Peer {
        id: StreamId,
        ended: bool,
        destroyed: Rc<RefCell<Option<StreamError>>>,
    }

    impl Peer {
        fn new(ended: bool) -> (Rc<Self>, Rc<RefCell<Option<StreamError>>>) {
            let destroyed = Rc::new(RefCell::new(None));
            let peer = Rc::new(Self {
                id: StreamId::allocate(),
                ended,
                destroyed: Rc::clone(&destroyed),
            });
            (peer, destroyed)
        }
    }

    impl Endpoint for Peer {
        fn id(&self) -> StreamId {
            self.id
        }

        fn destroy_with_error(&self, err: StreamError) {
            *self.destroyed.borrow_mut() = Some(err);
        }

        fn read_done(&self) -> bool {
            self.ended
        }
    }

    fn link(
        from_ended: bool,
    ) -> (
        PipelineLink,
        Rc<RefCell<Option<StreamError>>>,
        Rc<RefCell<Option<StreamError>>>,
        Rc<RefCell<Vec<Option<String>>>>,
    ) {
        let (from, from_destroyed) = Peer::new(from_ended);
        let (to, to_destroyed) = Peer::new(true);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        let link = PipelineLink::new(
            from,
            to,
            Some(Box::new(move |err: Option<StreamError>| {
                sink.borrow_mut().push(err.map(|e| e.to_string()))
            })),
        );
        (link, from_destroyed, to_destroyed, calls)
    }

    #[test]
    fn test_clean_completion_calls_back_once() {
        let (link, from_destroyed, to_destroyed, calls) = link(true);
        link.done(link.from_id(), None);
        assert!(calls.borrow().is_empty());
        link.finished();
        link.done(link.to_id(), None);
        link.done(link.to_id(), None);

        assert_eq!(*calls.borrow(), vec![None]);
        assert!(from_destroyed.borrow().is_none());
        assert!(to_destroyed.borrow().is_none());
        assert!(link.is_complete());
    }

    #[test]
    fn test_target_closing_first_destroys_source() {
        let (link, from_destroyed, _to_destroyed, calls) = link(false);
        link.done(link.to_id(), Some(StreamError::msg("blerg")));
        assert!(matches!(
            *from_destroyed.borrow(),
            Some(StreamError::PrematureClose)
        ));

        link.done(link.from_id(), Some(StreamError::PrematureClose));
        assert_eq!(*calls.borrow(), vec![Some("blerg".to_string())]);
    }

    #[test]
    fn test_ended_source_still_needs_target_finish() {
        let (link, from_destroyed, _to_destroyed, _calls) = link(true);
        link.done(link.to_id(), None);
        assert!(matches!(
            *from_destroyed.borrow(),
            Some(StreamError::PrematureClose)
        ));
    }

    #[test]
    fn test_source_closing_before_end_destroys_target() {
        let (link, _from_destroyed, to_destroyed, calls) = link(false);
        link.done(link.from_id(), None);
        assert!(matches!(
            *to_destroyed.borrow(),
            Some(StreamError::SourceClosedEarly)
        ));
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_link_releases_ends_once_complete() {
        let (from, _) = Peer::new(true);
        let (to, _) = Peer::new(true);
        let link = PipelineLink::new(from.clone(), to.clone(), None);
        assert_eq!(Rc::strong_count(&from), 2);

        link.finished();
        link.done(link.from_id(), None);
        assert_eq!(Rc::strong_count(&from), 1);
        assert_eq!(Rc::strong_count(&to), 2);
        link.done(link.to_id(), None);
        assert_eq!(Rc::strong_count(&to), 1);
        assert!(link.is_complete());
    }
}
