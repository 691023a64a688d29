//! Progress reporting for conversion requests.
//!
//! Inject an `Arc<dyn ProgressSink>` via
//! [`crate::config::ConversionConfigBuilder::progress_sink`] to receive
//! events as the engine buffers, sniffs, and dispatches. The sink approach is
//! the least-invasive integration point: callers can forward events to a
//! progress bar, a channel, or a log without the library knowing how the host
//! application communicates. Sinks must be `Send + Sync`; parallel dispatch
//! reports from multiple tasks.

use std::sync::Arc;

/// Defined reporting stages, in rough pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    /// The source stream is being copied to the disk buffer.
    BufferStream,
    /// Buffering finished; `completed` carries the byte count.
    Buffered,
    /// Candidate descriptors are being detected.
    DetectFormats,
    /// One converter attempt is starting (detailed only).
    TryingConverter,
    /// One converter attempt failed (detailed only).
    ConverterFailed,
    /// A converter succeeded and was committed.
    ConverterSelected,
    /// The whole request finished successfully.
    Completed,
    /// The whole request failed.
    Failed,
}

impl ProgressStage {
    /// High-frequency per-attempt stages suppressed at basic detail level.
    pub fn is_detailed_only(&self) -> bool {
        matches!(
            self,
            ProgressStage::TryingConverter | ProgressStage::ConverterFailed
        )
    }
}

/// How much to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProgressDetail {
    /// Suppress per-attempt events. (default)
    #[default]
    Basic,
    /// Report every attempt.
    Detailed,
}

/// One progress event.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    /// Units completed so far; meaning depends on the stage (bytes for
    /// buffering, attempts for dispatch).
    pub completed: usize,
    /// Total units, when known; 0 when open-ended.
    pub total: usize,
    /// Human-readable detail (converter name, candidate mime, error text).
    pub details: Option<String>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, completed: usize, total: usize) -> Self {
        Self {
            stage,
            completed,
            total,
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Receives progress events. All methods are infallible; a sink must never
/// disturb the conversion it observes.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// No-op sink used when the caller configures none.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Shared handle type stored in the config.
pub type SharedProgressSink = Arc<dyn ProgressSink>;

/// Internal reporter pairing a sink with the configured detail level.
#[derive(Clone)]
pub(crate) struct Reporter {
    sink: Option<SharedProgressSink>,
    detail: ProgressDetail,
}

impl Reporter {
    pub(crate) fn new(sink: Option<SharedProgressSink>, detail: ProgressDetail) -> Self {
        Self { sink, detail }
    }

    pub(crate) fn report(&self, event: ProgressEvent) {
        let Some(ref sink) = self.sink else { return };
        if event.stage.is_detailed_only() && self.detail == ProgressDetail::Basic {
            return;
        }
        sink.report(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        stages: Mutex<Vec<ProgressStage>>,
    }

    impl ProgressSink for RecordingSink {
        fn report(&self, event: &ProgressEvent) {
            self.stages.lock().unwrap().push(event.stage);
        }
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = NoopProgressSink;
        sink.report(&ProgressEvent::new(ProgressStage::Completed, 1, 1));
    }

    #[test]
    fn basic_detail_suppresses_per_attempt_stages() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = Reporter::new(Some(sink.clone()), ProgressDetail::Basic);

        reporter.report(ProgressEvent::new(ProgressStage::DetectFormats, 0, 0));
        reporter.report(ProgressEvent::new(ProgressStage::TryingConverter, 1, 3));
        reporter.report(ProgressEvent::new(ProgressStage::ConverterFailed, 1, 3));
        reporter.report(ProgressEvent::new(ProgressStage::ConverterSelected, 2, 3));

        let stages = sink.stages.lock().unwrap();
        assert_eq!(
            *stages,
            vec![ProgressStage::DetectFormats, ProgressStage::ConverterSelected]
        );
    }

    #[test]
    fn detailed_level_reports_everything() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = Reporter::new(Some(sink.clone()), ProgressDetail::Detailed);

        reporter.report(ProgressEvent::new(ProgressStage::TryingConverter, 1, 3));
        reporter.report(
            ProgressEvent::new(ProgressStage::ConverterFailed, 1, 3).with_details("nope"),
        );

        assert_eq!(sink.stages.lock().unwrap().len(), 2);
    }

    #[test]
    fn missing_sink_is_silent() {
        let reporter = Reporter::new(None, ProgressDetail::Detailed);
        reporter.report(ProgressEvent::new(ProgressStage::Failed, 0, 0));
    }
}
