//! Sluice - single-threaded streams with backpressure.
//!
//! Readable, Writable, Duplex and Transform streams share one lifecycle:
//! an optional `open`, buffered reads and writes bounded by a high-water
//! mark, `end`/`finish`, and a `destroy` that always ends in exactly one
//! `close`. Streams can be piped, and a pipe couples the completion of both
//! ends.

pub mod observe;

pub use sluice_core::{
    ByteLength, Chain, Completion, Context, DEFAULT_HIGH_WATER_MARK, Duplex, Endpoint, FnSink,
    FnSource, FnTransform, Handler, HookKind, Noop, PipeTarget, PipelineLink, ReadContext,
    Readable, Scheduler, Signal, Sink, Source, Step, StreamConfig, StreamError, StreamId,
    StreamOptions, StreamResult, TickQueue, Transform, TransformContext, Transformer, Writable,
    WriteContext,
};
pub use sluice_core::scheduler;
pub use sluice_flow::{Phase, StreamState};

pub mod runtime {
    pub use sluice_runtime::*;
}

pub mod std_lib {
    pub use sluice_std::*;
}

pub mod prelude {
    pub use crate::observe::init_tracing;
    pub use sluice_core::{
        Chain, Completion, Duplex, FnSink, FnSource, FnTransform, Handler, PipeTarget, ReadContext,
        Readable, Sink, Source, Step, StreamError, StreamOptions, StreamResult, Transform,
        TransformContext, Transformer, Writable, WriteContext,
    };
    pub use sluice_runtime::prelude::*;
    pub use sluice_std::prelude::*;
}
