use crate::error::StreamError;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Notifications a stream emits that carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Readable,
    End,
    Finish,
    Drain,
    Open,
    Close,
}

type Callback = Rc<RefCell<dyn FnMut()>>;
type DataCallback<R> = Rc<RefCell<dyn FnMut(&R)>>;
type ErrorCallback = Rc<RefCell<dyn FnMut(&StreamError)>>;

/// Listener registry of one stream.
///
/// Emission snapshots the listener list first, so a listener may register
/// further listeners (they see the next emission) or call back into the
/// stream. A listener that is already running is skipped on re-entry.
pub(crate) struct Listeners<R> {
    signals: RefCell<Vec<(Signal, Callback)>>,
    data: RefCell<Vec<DataCallback<R>>>,
    errors: RefCell<Vec<ErrorCallback>>,
}

impl<R> Default for Listeners<R> {
    fn default() -> Self {
        Self {
            signals: RefCell::new(Vec::new()),
            data: RefCell::new(Vec::new()),
            errors: RefCell::new(Vec::new()),
        }
    }
}

impl<R> fmt::Debug for Listeners<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("signals", &self.signals.borrow().len())
            .field("data", &self.data.borrow().len())
            .field("errors", &self.errors.borrow().len())
            .finish()
    }
}

impl<R> Listeners<R> {
    pub(crate) fn on(&self, signal: Signal, f: impl FnMut() + 'static) {
        let callback: Callback = Rc::new(RefCell::new(f));
        self.signals.borrow_mut().push((signal, callback));
    }

    pub(crate) fn on_data(&self, f: impl FnMut(&R) + 'static) {
        let callback: DataCallback<R> = Rc::new(RefCell::new(f));
        self.data.borrow_mut().push(callback);
    }

    pub(crate) fn on_error(&self, f: impl FnMut(&StreamError) + 'static) {
        let callback: ErrorCallback = Rc::new(RefCell::new(f));
        self.errors.borrow_mut().push(callback);
    }

    pub(crate) fn emit(&self, signal: Signal) {
        let callbacks: Vec<Callback> = self
            .signals
            .borrow()
            .iter()
            .filter(|(registered, _)| *registered == signal)
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        trace!(?signal, listeners = callbacks.len(), "emit");
        for callback in callbacks {
            let Ok(mut f) = callback.try_borrow_mut() else {
                continue;
            };
            (&mut *f)();
        }
    }

    pub(crate) fn emit_data(&self, data: &R) {
        let callbacks: Vec<DataCallback<R>> = self.data.borrow().iter().map(Rc::clone).collect();
        for callback in callbacks {
            let Ok(mut f) = callback.try_borrow_mut() else {
                continue;
            };
            (&mut *f)(data);
        }
    }

    pub(crate) fn emit_error(&self, err: &StreamError) {
        let callbacks: Vec<ErrorCallback> = self.errors.borrow().iter().map(Rc::clone).collect();
        trace!(error = %err, listeners = callbacks.len(), "emit error");
        for callback in callbacks {
            let Ok(mut f) = callback.try_borrow_mut() else {
                continue;
            };
            (&mut *f)(err);
        }
    }

    /// Drops every listener. Called once the stream has closed, which also
    /// releases whatever the closures captured.
    pub(crate) fn clear(&self) {
        let signals = std::mem::take(&mut *self.signals.borrow_mut());
        let data = std::mem::take(&mut *self.data.borrow_mut());
        let errors = std::mem::take(&mut *self.errors.borrow_mut());
        drop((signals, data, errors));
    }
}
