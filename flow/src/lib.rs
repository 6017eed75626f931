//! Sluice Flow - Stream State Register Layer
//!
//! This crate defines the **structural** aspects of a sluice stream:
//! - `StreamState`: the packed register shared by both halves of a stream
//! - `Teardown`: the priority-ordered open/destroy decision
//! - The guard algebra (`transition`) the stream core is built from
//!
//! **IMPORTANT**: This layer is Pure Rust - no I/O, no Async, no allocation.

pub mod state;
pub mod transition;

pub use state::{Phase, StreamState};
pub use transition::Teardown;
