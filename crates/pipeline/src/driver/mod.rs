#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use clipper_common::{ExecutionReport, MediaInfo};

use crate::graph::{CompiledPlan, GraphError};
use crate::sources::{Sink, Source};

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("Failed to initialize driver: {0}")]
    Initialization(String),
    #[error("Pass execution failed: {0}")]
    Execution(String),
    #[error("Probe failed: {0}")]
    Probe(String),
    #[error("Plan cannot be rendered: {0}")]
    InvalidGraph(#[from] GraphError),
}

/// Reads the metadata the compiler needs from a source, once per compile
pub trait MediaProbe {
    fn probe(&self, media: &str) -> Result<MediaInfo, DriverError>;
}

/// A backend that can run a compiled plan.
///
/// Each backend defines the source and sink types it accepts.
pub trait Driver {
    type Source: Source;
    type Sink: Sink;

    /// Check the source and read its metadata
    fn load(&self, source: &Self::Source) -> Result<MediaInfo, DriverError>;

    /// Run every pass of the plan in order, writing the last artifact to `sink`
    fn render(&self, plan: &CompiledPlan, sink: &Self::Sink) -> Result<ExecutionReport, DriverError>;
}
