use sluice_core::{ReadContext, Readable, Source, Step, StreamOptions};
use std::convert::Infallible;
use std::fmt;

/// A [`Source`] pushing one iterator item per read and ending once the
/// iterator is exhausted.
pub struct IterSource<I> {
    iter: I,
    exhausted: bool,
}

impl<I> IterSource<I> {
    pub fn new(iter: I) -> Self {
        Self {
            iter,
            exhausted: false,
        }
    }
}

impl<I> fmt::Debug for IterSource<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterSource")
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

impl<I> Source<I::Item> for IterSource<I>
where
    I: Iterator + 'static,
    I::Item: 'static,
{
    fn read(&mut self, cx: &mut ReadContext<'_, I::Item>) -> Step {
        if self.exhausted {
            return Step::done();
        }
        match self.iter.next() {
            Some(item) => {
                cx.push(item);
            }
            None => {
                self.exhausted = true;
                cx.push_end();
            }
        }
        Step::done()
    }
}

/// A Readable over `iter`.
pub fn from_iter<I>(iter: I) -> Readable<I::Item>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    I::Item: 'static,
{
    from_iter_with_options(iter, StreamOptions::default())
}

pub fn from_iter_with_options<I>(
    iter: I,
    options: StreamOptions<I::Item, Infallible>,
) -> Readable<I::Item>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    I::Item: 'static,
{
    Readable::with_options(IterSource::new(iter.into_iter()), options)
}
