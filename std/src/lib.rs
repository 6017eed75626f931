//! Ready-made streams: iterator sources, pass-through and mapping
//! transforms, logging taps and sinks.

pub mod nodes;
pub mod prelude;

pub use nodes::debug::Log;
pub use nodes::flow::{Filter, Map, PassThrough, filter, map, pass_through};
pub use nodes::sink::{Collect, Collected, Discard, collect, collect_with_options, discard};
pub use nodes::source::{IterSource, from_iter, from_iter_with_options};
