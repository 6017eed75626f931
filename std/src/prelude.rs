pub use crate::nodes::debug::Log;
pub use crate::nodes::flow::{Filter, Map, PassThrough, filter, map, pass_through};
pub use crate::nodes::sink::{Collect, Collected, Discard, collect, discard};
pub use crate::nodes::source::{IterSource, from_iter};
