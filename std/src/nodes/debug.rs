use sluice_core::{Step, StreamResult, TransformContext, Transformer};
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::Level;

/// A pass-through tap logging every entry at `level`.
#[derive(Debug, Clone)]
pub struct Log<T> {
    pub message: String,
    pub level: Level,
    _marker: PhantomData<fn(T)>,
}

impl<T> Log<T> {
    pub fn new(message: impl Into<String>, level: Level) -> Self {
        Self {
            message: message.into(),
            level,
            _marker: PhantomData,
        }
    }
}

impl<T> Transformer<T, T> for Log<T>
where
    T: Debug + 'static,
{
    fn transform(&mut self, data: T, cx: &mut TransformContext<'_, T, T>) -> Step {
        let stream = cx.stream().id();
        match self.level {
            Level::ERROR => tracing::error!(%stream, "{}: {:?}", self.message, data),
            Level::WARN => tracing::warn!(%stream, "{}: {:?}", self.message, data),
            Level::DEBUG => tracing::debug!(%stream, "{}: {:?}", self.message, data),
            Level::TRACE => tracing::trace!(%stream, "{}: {:?}", self.message, data),
            _ => tracing::info!(%stream, "{}: {:?}", self.message, data),
        }
        cx.push(data);
        Step::done()
    }

    fn flush(&mut self, cx: &mut TransformContext<'_, T, T>) -> StreamResult {
        tracing::debug!(stream = %cx.stream().id(), "{}: end", self.message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::{StreamOptions, TickQueue, Transform};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_log_forwards_entries() {
        let queue = Rc::new(TickQueue::new());
        let stream: Transform<u8, u8> = Transform::transformer_with_options(
            Log::new("tap", Level::INFO),
            StreamOptions::new().scheduler(queue.clone()),
        );
        let seen = Rc::new(RefCell::new(Vec::new()));
        let data = Rc::clone(&seen);
        stream.on_data(move |b| data.borrow_mut().push(*b));
        stream.write(7);
        stream.write(9);
        stream.end();
        queue.run_until_idle();
        assert_eq!(*seen.borrow(), vec![7, 9]);
    }
}
