pub mod debug;
pub mod flow;
pub mod sink;
pub mod source;
