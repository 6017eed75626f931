//! Completion futures.

use sluice_core::{Chain, Duplex, PipeTarget, StreamError, StreamResult};
use std::cell::RefCell;
use std::rc::Rc;
use tokio::sync::oneshot;
use tracing::debug;

fn outcome<R: 'static, W: 'static>(stream: &Duplex<R, W>) -> StreamResult {
    if let Some(err) = stream.error() {
        return Err(err);
    }
    let read_ok = !stream.is_readable() || stream.is_readable_ended();
    let write_ok = !stream.is_writable() || stream.is_writable_finished();
    if read_ok && write_ok {
        Ok(())
    } else {
        Err(StreamError::PrematureClose)
    }
}

/// Resolves once `stream` closed.
///
/// # Errors
///
/// The stream's error if it was destroyed with one, otherwise
/// [`StreamError::PrematureClose`] if it closed before every side it has
/// ended or finished.
pub async fn finished<R: 'static, W: 'static>(stream: &Duplex<R, W>) -> StreamResult {
    if stream.is_destroyed() {
        return outcome(stream);
    }

    let (tx, rx) = oneshot::channel();
    let tx = Rc::new(RefCell::new(Some(tx)));
    let watched = stream.clone();
    stream.on_close(move || {
        let tx = tx.borrow_mut().take();
        if let Some(tx) = tx {
            let _ = tx.send(outcome(&watched));
        }
    });

    rx.await.unwrap_or(Err(StreamError::Destroyed))
}

/// Pipes `source` into `dest` and resolves once both closed, with the first
/// error either of them failed with.
///
/// # Errors
///
/// [`StreamError::AlreadyPiped`] immediately if `source` is already piped;
/// otherwise the error the pipeline completed with.
pub async fn pipeline<R, W, D>(source: &Duplex<R, W>, dest: &D) -> StreamResult
where
    R: 'static,
    W: 'static,
    D: PipeTarget<R> + Clone,
{
    let (tx, rx) = oneshot::channel();
    source.pipe_with(dest, move |err| {
        let _ = tx.send(err);
    })?;
    debug!(from = %source.id(), to = %dest.id(), "awaiting pipeline");

    match rx.await {
        Ok(None) => Ok(()),
        Ok(Some(err)) => Err(err),
        Err(_) => Err(StreamError::Destroyed),
    }
}

/// Pipes the tail of `chain` into `dest` and resolves once every stage
/// closed, with the first error any stage failed with.
///
/// # Errors
///
/// [`StreamError::AlreadyPiped`] immediately if the tail is already piped;
/// otherwise the error the chain completed with.
pub async fn pipeline_chain<R, W, D>(chain: Chain<R, W>, dest: &D) -> StreamResult
where
    R: 'static,
    W: 'static,
    D: PipeTarget<R> + Clone,
{
    let (tx, rx) = oneshot::channel();
    chain.into_target(dest, move |err| {
        let _ = tx.send(err);
    })?;
    debug!(to = %dest.id(), "awaiting pipeline chain");

    match rx.await {
        Ok(None) => Ok(()),
        Ok(Some(err)) => Err(err),
        Err(_) => Err(StreamError::Destroyed),
    }
}
