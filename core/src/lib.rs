pub mod byte_length;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod pipeline;
pub mod queue;
pub mod scheduler;
pub mod transform;

mod readable;
mod stream;
mod writable;

pub use byte_length::{ByteLength, DEFAULT_WEIGHT, default_byte_length};
pub use config::{DEFAULT_HIGH_WATER_MARK, StreamConfig, StreamOptions};
pub use error::{StreamError, StreamResult};
pub use events::Signal;
pub use handler::{
    Completion, Context, FnSink, FnSource, Handler, HookKind, Noop, ReadContext, Sink, Source,
    Step, TransformContext, WriteContext,
};
pub use pipeline::{Chain, Endpoint, PipeTarget, PipelineLink};
pub use queue::ByteQueue;
pub use readable::Readable;
pub use scheduler::{Scheduler, TickQueue};
pub use sluice_flow::{Phase, StreamState};
pub use stream::{Duplex, StreamId};
pub use transform::{FnTransform, Transform, Transformer};
pub use writable::Writable;
