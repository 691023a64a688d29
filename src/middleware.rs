//! Post-extraction middleware pipeline.
//!
//! Middleware runs after a converter has been committed and before artifacts
//! are persisted. Each stage sees the mutable segment list and artifact bag
//! and may enrich them (the canonical example: an AI stage that fills
//! [`crate::model::ImageArtifact::detailed_description`] and rewrites the
//! image's placeholder Markdown in its segment).
//!
//! A middleware failure is logged and the pipeline continues with the next
//! stage — enrichment is never allowed to sink an otherwise successful
//! conversion.

use crate::cancel::CancelToken;
use crate::descriptor::StreamDescriptor;
use crate::model::{ConversionArtifacts, DocumentSegment};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Mutable view of a committed conversion handed to each middleware stage.
pub struct PipelineContext<'a> {
    /// The candidate descriptor the winning converter was committed under.
    pub descriptor: &'a StreamDescriptor,
    /// Raw extraction artifacts; stages may enrich in place.
    pub artifacts: &'a mut ConversionArtifacts,
    /// Ordered document segments; stages may rewrite segment Markdown but
    /// must not truncate the list (image artifacts hold indices into it).
    pub segments: &'a mut Vec<DocumentSegment>,
    /// Result metadata; keys under reserved prefixes stay pipeline-internal.
    pub metadata: &'a mut BTreeMap<String, String>,
}

/// Error type middleware stages may return. Opaque to the core: failures are
/// logged, never propagated.
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// One post-extraction enrichment stage.
#[async_trait]
pub trait ConversionMiddleware: Send + Sync {
    /// Stable name for logging.
    fn name(&self) -> &str;

    /// Mutate the context in place.
    async fn invoke(
        &self,
        context: &mut PipelineContext<'_>,
        cancel: &CancelToken,
    ) -> Result<(), MiddlewareError>;
}

/// Run every stage in order. Failures are logged and swallowed; cancellation
/// stops the pipeline between stages (in-flight stage work is cooperative).
pub(crate) async fn run_pipeline(
    stages: &[Arc<dyn ConversionMiddleware>],
    context: &mut PipelineContext<'_>,
    cancel: &CancelToken,
) {
    for stage in stages {
        if cancel.is_cancelled() {
            debug!("middleware pipeline cancelled before stage '{}'", stage.name());
            return;
        }
        match stage.invoke(context, cancel).await {
            Ok(()) => debug!("middleware '{}' completed", stage.name()),
            Err(e) => warn!("middleware '{}' failed (continuing): {e}", stage.name()),
        }
    }
}
