use std::sync::Arc;
use thiserror::Error;

pub type StreamResult<T = ()> = Result<T, StreamError>;

/// Every failure a stream can report.
///
/// Errors are fanned out to several observers (error listeners, the pipeline
/// link, the error accessor), so the type is cheap to clone.
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    /// Default reason for a destroy without a cause. Never emitted as an error.
    #[error("Stream was destroyed")]
    Destroyed,
    /// A pipe target closed before the source ended or before it finished.
    #[error("Writable stream closed prematurely")]
    PrematureClose,
    /// A piped source closed before it ended.
    #[error("Readable stream closed before ending")]
    SourceClosedEarly,
    #[error("Readable stream is already piped")]
    AlreadyPiped,
    /// The default `writev` got a pending write with entries still queued
    /// behind it. Batched handlers with asynchronous writes override `writev`.
    #[error("Batched write went pending with {remaining} entries left")]
    PendingBatch { remaining: usize },
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(Arc<anyhow::Error>),
}

impl StreamError {
    pub fn msg(message: impl Into<String>) -> Self {
        StreamError::Message(message.into())
    }

    pub fn other(err: impl Into<anyhow::Error>) -> Self {
        StreamError::Other(Arc::new(err.into()))
    }

    /// `true` for the destroy sentinel, which marks a shutdown without a failure.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, StreamError::Destroyed)
    }
}

impl From<anyhow::Error> for StreamError {
    fn from(err: anyhow::Error) -> Self {
        StreamError::Other(Arc::new(err))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::other(err)
    }
}
