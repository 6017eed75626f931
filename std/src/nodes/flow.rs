use sluice_core::{Step, Transform, TransformContext, Transformer};
use std::marker::PhantomData;

/// Forwards every write to the read side unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl<T: 'static> Transformer<T, T> for PassThrough {
    fn transform(&mut self, data: T, cx: &mut TransformContext<'_, T, T>) -> Step {
        cx.push(data);
        Step::done()
    }
}

pub fn pass_through<T: 'static>() -> Transform<T, T> {
    Transform::from_transformer(PassThrough)
}

/// Pushes `f(data)` for every write.
pub struct Map<In, F> {
    f: F,
    _marker: PhantomData<fn(In)>,
}

impl<In, F> Map<In, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<In, Out, F> Transformer<In, Out> for Map<In, F>
where
    In: 'static,
    Out: 'static,
    F: FnMut(In) -> Out + 'static,
{
    fn transform(&mut self, data: In, cx: &mut TransformContext<'_, In, Out>) -> Step {
        cx.push((self.f)(data));
        Step::done()
    }
}

pub fn map<In, Out, F>(f: F) -> Transform<In, Out>
where
    In: 'static,
    Out: 'static,
    F: FnMut(In) -> Out + 'static,
{
    Transform::from_transformer(Map::new(f))
}

/// Forwards the writes `predicate` accepts and drops the rest.
pub struct Filter<T, F> {
    predicate: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> Filter<T, F> {
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            _marker: PhantomData,
        }
    }
}

impl<T, F> Transformer<T, T> for Filter<T, F>
where
    T: 'static,
    F: FnMut(&T) -> bool + 'static,
{
    fn transform(&mut self, data: T, cx: &mut TransformContext<'_, T, T>) -> Step {
        if (self.predicate)(&data) {
            cx.push(data);
        }
        Step::done()
    }
}

pub fn filter<T, F>(predicate: F) -> Transform<T, T>
where
    T: 'static,
    F: FnMut(&T) -> bool + 'static,
{
    Transform::from_transformer(Filter::new(predicate))
}
