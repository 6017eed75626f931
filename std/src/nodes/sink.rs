use sluice_core::{Sink, Step, StreamOptions, Writable, WriteContext};
use std::cell::{Ref, RefCell};
use std::convert::Infallible;
use std::fmt;
use std::rc::Rc;

/// Shared view of the entries a [`Collect`] sink recorded.
pub struct Collected<T> {
    items: Rc<RefCell<Vec<T>>>,
}

impl<T> Clone for Collected<T> {
    fn clone(&self) -> Self {
        Self {
            items: Rc::clone(&self.items),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Collected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.borrow().iter()).finish()
    }
}

impl<T> Collected<T> {
    pub fn borrow(&self) -> Ref<'_, Vec<T>> {
        self.items.borrow()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.borrow_mut())
    }
}

/// Records every write.
pub struct Collect<T> {
    items: Rc<RefCell<Vec<T>>>,
}

impl<T> Collect<T> {
    pub fn new() -> (Self, Collected<T>) {
        let items = Rc::new(RefCell::new(Vec::new()));
        let view = Collected {
            items: Rc::clone(&items),
        };
        (Self { items }, view)
    }
}

impl<T: 'static> Sink<T> for Collect<T> {
    fn write(&mut self, data: T, _cx: &mut WriteContext<'_, T>) -> Step {
        self.items.borrow_mut().push(data);
        Step::done()
    }

    fn batched(&self) -> bool {
        true
    }

    fn writev(&mut self, batch: Vec<T>, _cx: &mut WriteContext<'_, T>) -> Step {
        self.items.borrow_mut().extend(batch);
        Step::done()
    }
}

/// A Writable recording its writes, plus the view to read them back.
pub fn collect<T: 'static>() -> (Writable<T>, Collected<T>) {
    collect_with_options(StreamOptions::default())
}

pub fn collect_with_options<T: 'static>(
    options: StreamOptions<Infallible, T>,
) -> (Writable<T>, Collected<T>) {
    let (sink, view) = Collect::new();
    (Writable::with_options(sink, options), view)
}

/// Accepts and drops every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl<T: 'static> Sink<T> for Discard {}

pub fn discard<T: 'static>() -> Writable<T> {
    Writable::from_sink(Discard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::TickQueue;

    #[test]
    fn test_collect_records_batches_in_order() {
        let queue = Rc::new(TickQueue::new());
        let (sink, seen) = collect_with_options(StreamOptions::new().scheduler(queue.clone()));
        for n in 0..5 {
            sink.write(n);
        }
        sink.end();
        queue.run_until_idle();

        assert_eq!(*seen.borrow(), vec![0, 1, 2, 3, 4]);
        assert!(sink.is_writable_finished());
        assert_eq!(seen.take().len(), 5);
        assert!(seen.is_empty());
    }
}
