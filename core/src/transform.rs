//! Transform - a duplex whose writes are mapped onto its read side.
//!
//! Every write goes through [`Transformer::transform`], which pushes zero or
//! more outputs and completes. While the read buffer is at its high-water
//! mark the write is held instead: it stays in flight (so the write side
//! stops too) until the next read invocation releases it. Ending the write
//! side runs [`Transformer::flush`] and then pushes end-of-stream.

use crate::config::StreamOptions;
use crate::error::StreamResult;
use crate::handler::{Completion, Context, Handler, Step, TransformContext};
use crate::stream::Duplex;
use std::marker::PhantomData;
use tracing::trace;

/// A duplex reading `Out` and writing `In`.
pub type Transform<In, Out> = Duplex<Out, In>;

pub trait Transformer<In: 'static, Out: 'static>: 'static {
    fn transform(&mut self, data: In, cx: &mut TransformContext<'_, In, Out>) -> Step;

    /// Runs once, after the last write. Push any trailing output here.
    fn flush(&mut self, cx: &mut TransformContext<'_, In, Out>) -> StreamResult {
        let _ = cx;
        Ok(())
    }

    fn open(&mut self, cx: &mut TransformContext<'_, In, Out>) -> Step {
        let _ = cx;
        Step::done()
    }

    fn destroy(&mut self, cx: &mut TransformContext<'_, In, Out>) -> Step {
        let _ = cx;
        Step::done()
    }
}

/// A [`Transformer`] whose `transform` is a closure.
pub struct FnTransform<In, Out, F> {
    transform: F,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> FnTransform<In, Out, F>
where
    In: 'static,
    Out: 'static,
    F: FnMut(In, &mut TransformContext<'_, In, Out>) -> Step + 'static,
{
    pub fn new(transform: F) -> Self {
        Self {
            transform,
            _marker: PhantomData,
        }
    }
}

impl<In, Out, F> Transformer<In, Out> for FnTransform<In, Out, F>
where
    In: 'static,
    Out: 'static,
    F: FnMut(In, &mut TransformContext<'_, In, Out>) -> Step + 'static,
{
    fn transform(&mut self, data: In, cx: &mut TransformContext<'_, In, Out>) -> Step {
        (self.transform)(data, cx)
    }
}

struct TransformHandler<In, T> {
    transformer: T,
    held: Option<(In, Completion)>,
}

impl<In, Out, T> Handler<Out, In> for TransformHandler<In, T>
where
    In: 'static,
    Out: 'static,
    T: Transformer<In, Out>,
{
    fn open(&mut self, cx: &mut Context<'_, Out, In>) -> Step {
        self.transformer.open(cx)
    }

    fn read(&mut self, cx: &mut Context<'_, Out, In>) -> Step {
        let Some((data, completion)) = self.held.take() else {
            return Step::done();
        };
        trace!(stream = %cx.stream().id(), "releasing held write");
        let mut write_cx = Context::resume(cx.stream(), &completion);
        if let Step::Ready(result) = self.transformer.transform(data, &mut write_cx) {
            completion.complete(result);
        }
        Step::done()
    }

    fn write(&mut self, data: In, cx: &mut Context<'_, Out, In>) -> Step {
        if cx.stream().is_readable_saturated() {
            trace!(stream = %cx.stream().id(), "read side saturated, holding write");
            self.held = Some((data, cx.completion()));
            return Step::Pending;
        }
        self.transformer.transform(data, cx)
    }

    fn finalize(&mut self, cx: &mut Context<'_, Out, In>) -> Step {
        match self.transformer.flush(cx) {
            Ok(()) => {
                cx.push_end();
                Step::done()
            }
            Err(err) => Step::fail(err),
        }
    }

    fn destroy(&mut self, cx: &mut Context<'_, Out, In>) -> Step {
        self.transformer.destroy(cx)
    }

    fn predestroy(&mut self) {
        if let Some((_, completion)) = self.held.take() {
            completion.done();
        }
    }
}

impl<In: 'static, Out: 'static> Duplex<Out, In> {
    pub fn from_transformer(transformer: impl Transformer<In, Out>) -> Self {
        Self::transformer_with_options(transformer, StreamOptions::default())
    }

    pub fn transformer_with_options(
        transformer: impl Transformer<In, Out>,
        options: StreamOptions<Out, In>,
    ) -> Self {
        Self::with_options(
            TransformHandler {
                transformer,
                held: None,
            },
            options,
        )
    }

    pub fn from_transform_fn<F>(transform: F) -> Self
    where
        F: FnMut(In, &mut TransformContext<'_, In, Out>) -> Step + 'static,
    {
        Self::from_transformer(FnTransform::new(transform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickQueue;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn identity(queue: &Rc<TickQueue>, hwm: usize) -> Transform<u32, u32> {
        Transform::transformer_with_options(
            FnTransform::new(|data: u32, cx: &mut TransformContext<'_, u32, u32>| {
                cx.push(data);
                Step::done()
            }),
            StreamOptions::new()
                .readable_high_water_mark(hwm)
                .scheduler(queue.clone()),
        )
    }

    #[test]
    fn test_saturated_read_side_holds_writes() {
        let queue = Rc::new(TickQueue::new());
        let stream = identity(&queue, 1);
        let ended = Rc::new(RefCell::new(false));
        let flag = ended.clone();
        stream.on_end(move || *flag.borrow_mut() = true);

        stream.write(1);
        stream.write(2);
        stream.write(3);
        stream.end();
        queue.run_until_idle();
        assert_eq!(stream.readable_buffered(), 1024);

        let mut out = Vec::new();
        for _ in 0..6 {
            if let Some(data) = stream.read() {
                out.push(data);
            }
            queue.run_until_idle();
        }
        assert_eq!(out, vec![1, 2, 3]);
        assert!(*ended.borrow());
        assert!(stream.is_destroyed());
    }

    #[test]
    fn test_destroy_releases_held_write() {
        let queue = Rc::new(TickQueue::new());
        let stream = identity(&queue, 1);
        for i in 0..20 {
            stream.write(i);
        }
        queue.run_until_idle();
        assert!(!stream.is_destroyed());

        stream.destroy();
        queue.run_until_idle();
        assert!(stream.is_destroyed());
    }

    struct Sum(u32);

    impl Transformer<u32, u32> for Sum {
        fn transform(&mut self, data: u32, _cx: &mut TransformContext<'_, u32, u32>) -> Step {
            self.0 += data;
            Step::done()
        }

        fn flush(&mut self, cx: &mut TransformContext<'_, u32, u32>) -> StreamResult {
            cx.push(self.0);
            Ok(())
        }
    }

    #[test]
    fn test_flush_output_precedes_end() {
        let queue = Rc::new(TickQueue::new());
        let stream = Transform::transformer_with_options(
            Sum(0),
            StreamOptions::new().scheduler(queue.clone()),
        );
        let log = Rc::new(RefCell::new(Vec::new()));
        let data = log.clone();
        stream.on_data(move |sum| data.borrow_mut().push(sum.to_string()));
        let end = log.clone();
        stream.on_end(move || end.borrow_mut().push("end".to_string()));

        stream.write(1);
        stream.write(2);
        stream.end_with(3);
        queue.run_until_idle();

        assert_eq!(*log.borrow(), vec!["6", "end"]);
    }
}
