pub mod finished;
pub mod iter;
pub mod scheduler;

pub mod prelude {
    pub use crate::finished::{finished, pipeline, pipeline_chain};
    pub use crate::iter::{IntoReadableStream, ReadableStream, read_all};
    pub use crate::scheduler::LocalScheduler;
}

pub use finished::{finished, pipeline, pipeline_chain};
pub use iter::{IntoReadableStream, ReadableStream, read_all};
pub use scheduler::LocalScheduler;
