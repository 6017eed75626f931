//! Async iteration over the read side of a stream.
//!
//! [`ReadableStream`] is a `futures_core::Stream` of `Result<R, StreamError>`:
//! it yields buffered entries, ends once the stream emitted `end`, and fails
//! once with the stream's error. A stream that closes without ending yields
//! [`StreamError::Destroyed`]. Dropping the iterator before the end destroys
//! the underlying stream.

use futures_core::Stream;
use futures_util::TryStreamExt;
use sluice_core::{Duplex, Readable, StreamError};
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::trace;

#[derive(Default)]
struct Progress {
    waker: RefCell<Option<Waker>>,
    ended: Cell<bool>,
    closed: Cell<bool>,
    error: RefCell<Option<StreamError>>,
}

impl Progress {
    fn wake(&self) {
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

pub struct ReadableStream<R: 'static, W: 'static = Infallible> {
    stream: Duplex<R, W>,
    progress: Rc<Progress>,
    finished: bool,
}

impl<R: 'static, W: 'static> fmt::Debug for ReadableStream<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableStream")
            .field("stream", &self.stream)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<R: 'static, W: 'static> ReadableStream<R, W> {
    pub fn new(stream: Duplex<R, W>) -> Self {
        let progress = Rc::new(Progress::default());

        let on_readable = Rc::clone(&progress);
        stream.on_readable(move || on_readable.wake());
        let on_end = Rc::clone(&progress);
        stream.on_end(move || {
            on_end.ended.set(true);
            on_end.wake();
        });
        let on_error = Rc::clone(&progress);
        stream.on_error(move |err| {
            *on_error.error.borrow_mut() = Some(err.clone());
            on_error.wake();
        });
        let on_close = Rc::clone(&progress);
        stream.on_close(move || {
            on_close.closed.set(true);
            on_close.wake();
        });

        Self {
            stream,
            progress,
            finished: false,
        }
    }

    pub fn get_ref(&self) -> &Duplex<R, W> {
        &self.stream
    }
}

impl<R: 'static, W: 'static> Stream for ReadableStream<R, W> {
    type Item = Result<R, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(data) = this.stream.read() {
            return Poll::Ready(Some(Ok(data)));
        }

        let error = this.progress.error.borrow_mut().take();
        if let Some(err) = error {
            this.finished = true;
            return Poll::Ready(Some(Err(err)));
        }

        if this.progress.ended.get() || this.stream.is_readable_ended() {
            this.finished = true;
            return Poll::Ready(None);
        }

        if this.progress.closed.get() || this.stream.is_destroyed() {
            trace!(stream = %this.stream.id(), "closed before end");
            this.finished = true;
            return Poll::Ready(Some(Err(StreamError::Destroyed)));
        }

        *this.progress.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<R: 'static, W: 'static> Drop for ReadableStream<R, W> {
    fn drop(&mut self) {
        if !self.finished && !self.stream.is_readable_ended() {
            trace!(stream = %self.stream.id(), "iterator dropped early, destroying");
            self.stream.destroy();
        }
    }
}

/// Conversion into a [`ReadableStream`].
pub trait IntoReadableStream<R: 'static, W: 'static> {
    fn into_stream(self) -> ReadableStream<R, W>;
}

impl<R: 'static, W: 'static> IntoReadableStream<R, W> for Duplex<R, W> {
    fn into_stream(self) -> ReadableStream<R, W> {
        ReadableStream::new(self)
    }
}

impl<T: 'static> IntoReadableStream<T, Infallible> for Readable<T> {
    fn into_stream(self) -> ReadableStream<T, Infallible> {
        ReadableStream::new(self.into_duplex())
    }
}

/// Reads `stream` to its end and collects every entry.
///
/// # Errors
///
/// The stream's error, or [`StreamError::Destroyed`] if it closed before
/// ending.
pub async fn read_all<R: 'static, W: 'static>(stream: Duplex<R, W>) -> Result<Vec<R>, StreamError> {
    ReadableStream::new(stream).try_collect().await
}
