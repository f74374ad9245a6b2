//! # Pipeline - Edit Pipeline Compiler
//!
//! Turns an ordered list of declarative editing operations into a plan of
//! filter-graph passes for a media engine.
//!
//! Compilation runs in four stages:
//! 1. [`operation::parse`] validates each raw JSON operation into a
//!    [`Descriptor`], filling defaults.
//! 2. [`timing`] resolves end-of-media sentinels and schedules segment lists.
//! 3. The fragment generators translate each descriptor into labeled nodes.
//! 4. [`assemble`] threads stream labels through the fragments and splits the
//!    result into passes with exactly one terminal node each.
//!
//! ## Example
//!
//! ```rust
//! use clipper_common::MediaInfo;
//! use pipeline::{Compiler, EditRequest};
//!
//! let request = EditRequest::from_json(r#"{
//!     "media": "a.mp4",
//!     "operations": [{"op": "trim", "start_sec": 0, "end_sec": 5}]
//! }"#).unwrap();
//!
//! let plan = Compiler::default()
//!     .compile(&request, Some(&MediaInfo::with_duration(10.0)))
//!     .unwrap();
//! assert_eq!(plan.passes.len(), 1);
//! ```

pub mod assembler;
pub mod driver;
pub mod error;
mod fragment;
pub mod graph;
pub mod operation;
pub mod settings;
pub mod sources;
pub mod timing;

use clipper_common::MediaInfo;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use assembler::assemble;
pub use driver::{DriverError, MediaProbe};
pub use error::{CompileError, ErrorKind, ErrorReport, Result};
pub use graph::{CompiledPlan, FilterNode, NodeOp, Pass};
pub use operation::{Descriptor, OpKind};
pub use settings::CompilerSettings;

/// A source media reference and the operations to apply to it, in order
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct EditRequest {
    /// Path or URL of the source media
    pub media: String,
    /// Raw operations, each an object with an `op` name
    #[serde(default)]
    pub operations: Vec<serde_json::Value>,
}

impl EditRequest {
    pub fn new(media: impl Into<String>, operations: Vec<serde_json::Value>) -> Self {
        Self {
            media: media.into(),
            operations,
        }
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// Entry point of the compiler
#[derive(Debug, Clone, Default)]
pub struct Compiler {
    settings: CompilerSettings,
}

impl Compiler {
    pub fn new(settings: CompilerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Validate every operation, stopping at the first invalid one
    pub fn validate(&self, request: &EditRequest) -> Result<Vec<Descriptor>> {
        request
            .operations
            .iter()
            .enumerate()
            .map(|(index, raw)| operation::parse(index, raw))
            .collect()
    }

    /// Compile against already probed media, or with an unknown duration when
    /// `media` is `None`
    pub fn compile(&self, request: &EditRequest, media: Option<&MediaInfo>) -> Result<CompiledPlan> {
        let descriptors = self.validate(request)?;
        self.compile_descriptors(&request.media, &descriptors, media)
    }

    /// Validate, probe the source once, then compile.
    ///
    /// The probe is skipped when the first operation downloads the source,
    /// since there is nothing local to probe yet.
    pub fn compile_with_probe<P: MediaProbe + ?Sized>(
        &self,
        request: &EditRequest,
        probe: &P,
    ) -> Result<CompiledPlan> {
        let descriptors = self.validate(request)?;
        let media = match descriptors.first() {
            Some(Descriptor::DownloadFromYoutube(_)) => None,
            _ => {
                debug!(media = %request.media, "Probing source");
                let info = probe
                    .probe(&request.media)
                    .map_err(|e| CompileError::probe(e.to_string()))?;
                Some(info)
            }
        };
        self.compile_descriptors(&request.media, &descriptors, media.as_ref())
    }

    fn compile_descriptors(
        &self,
        source: &str,
        descriptors: &[Descriptor],
        media: Option<&MediaInfo>,
    ) -> Result<CompiledPlan> {
        if let Some(info) = media {
            if !info.duration.is_finite() || info.duration <= 0.0 {
                return Err(CompileError::probe(format!(
                    "Invalid or zero duration: {}",
                    info.duration
                )));
            }
        }

        info!(media = %source, operations = descriptors.len(), "Compiling pipeline");
        let plan = assemble(source, descriptors, media, &self.settings)?;
        info!(passes = plan.passes.len(), nodes = plan.node_count(), "Pipeline compiled");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FixedProbe(Option<MediaInfo>);

    impl MediaProbe for FixedProbe {
        fn probe(&self, media: &str) -> std::result::Result<MediaInfo, DriverError> {
            self.0
                .clone()
                .ok_or_else(|| DriverError::Probe(format!("cannot read {media}")))
        }
    }

    fn request(operations: serde_json::Value) -> EditRequest {
        serde_json::from_value(json!({"media": "a.mp4", "operations": operations})).unwrap()
    }

    #[test]
    fn test_request_without_operations() {
        let request = EditRequest::from_json(r#"{"media": "a.mp4"}"#).unwrap();
        assert!(request.operations.is_empty());
    }

    #[test]
    fn test_validation_stops_at_first_error() {
        let err = Compiler::default()
            .validate(&request(json!([{"op": "trim"}, {"op": "nope"}, {"op": "also_nope"}])))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
        assert_eq!(err.index(), Some(1));
    }

    #[test]
    fn test_zero_duration_is_a_probe_failure() {
        let err = Compiler::default()
            .compile(&request(json!([])), Some(&MediaInfo::with_duration(0.0)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProbeFailure);
        assert!(err.to_string().contains("Invalid or zero duration"));
    }

    #[test]
    fn test_probe_errors_become_probe_failures() {
        let err = Compiler::default()
            .compile_with_probe(&request(json!([{"op": "trim", "end_sec": 2}])), &FixedProbe(None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProbeFailure);
        assert_eq!(err.index(), None);
    }

    #[test]
    fn test_invalid_operations_are_reported_before_probing() {
        let err = Compiler::default()
            .compile_with_probe(&request(json!([{"op": "nope"}])), &FixedProbe(None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownOperation);
    }

    #[test]
    fn test_download_skips_the_probe() {
        let plan = Compiler::default()
            .compile_with_probe(
                &request(json!([{"op": "download_from_youtube", "url": "https://youtu.be/x"}])),
                &FixedProbe(None),
            )
            .unwrap();
        assert_eq!(plan.passes.len(), 1);
    }

    #[test]
    fn test_probed_duration_resolves_sentinels() {
        let plan = Compiler::default()
            .compile_with_probe(
                &request(json!([{"op": "trim", "start_sec": 2, "end_sec": -1}])),
                &FixedProbe(Some(MediaInfo::with_duration(10.0))),
            )
            .unwrap();
        assert_eq!(
            plan.passes[0].nodes[0].op,
            NodeOp::Trim { start: 2.0, end: Some(10.0) }
        );
    }
}
