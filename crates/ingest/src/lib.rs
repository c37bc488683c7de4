pub mod decode;
pub mod legacy;
pub mod pipeline;
pub mod replay;
pub mod server;

pub use pipeline::{Pipeline, PipelineConfig, SharedTrace, lock, shared};
