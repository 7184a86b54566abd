mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;
pub mod decode;
pub mod frame_store;
pub mod inference;
pub mod pipeline;

#[cfg(test)]
mod test_support;

pub use app::start_app;
pub use pipeline::{FramePipeline, PipelineError};
