//! End-to-end pipeline tests for anymd.
//!
//! These tests exercise the whole orchestration — buffering, format
//! detection, dispatch, middleware, artifact persistence — against small
//! scriptable converters.  No network, no real document formats; everything
//! runs in CI.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use anymd::{
    convert, convert_bytes, convert_cancellable, convert_sync, convert_to_file, ArtifactPolicy,
    CancelToken, ConversionConfig, ConversionMiddleware, ConversionStats, ConvertError,
    DocumentConverter,
    DocumentConverterResult, DocumentSegment, MiddlewareError, PipelineContext, ProgressDetail,
    ProgressEvent, ProgressSink, ProgressStage, SegmentKind, StreamDescriptor, WorkspaceOptions,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs::File;

// ── Test helpers ─────────────────────────────────────────────────────────────

const CSV_BODY: &[u8] = b"name,qty\nwidget,3\nsprocket,7\n";

/// A scriptable converter: accepts by mime and/or extension, optionally
/// sleeps, optionally fails, and emits fixed Markdown on success.
struct Fake {
    name: &'static str,
    accept_mime: Option<&'static str>,
    accept_extension: Option<&'static str>,
    fail_convert: bool,
    delay_ms: u64,
    output: &'static str,
    pages: Vec<usize>,
    converts: AtomicUsize,
}

impl Fake {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            accept_mime: None,
            accept_extension: None,
            fail_convert: false,
            delay_ms: 0,
            output: "converted",
            pages: Vec::new(),
            converts: AtomicUsize::new(0),
        }
    }

    fn mime(mut self, mime: &'static str) -> Self {
        self.accept_mime = Some(mime);
        self
    }

    fn extension(mut self, ext: &'static str) -> Self {
        self.accept_extension = Some(ext);
        self
    }

    fn failing(mut self) -> Self {
        self.fail_convert = true;
        self
    }

    fn delayed(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    fn output(mut self, md: &'static str) -> Self {
        self.output = md;
        self
    }

    fn pages(mut self, pages: Vec<usize>) -> Self {
        self.pages = pages;
        self
    }
}

#[async_trait]
impl DocumentConverter for Fake {
    fn name(&self) -> &str {
        self.name
    }

    async fn accepts(
        &self,
        _stream: &mut File,
        descriptor: &StreamDescriptor,
        _cancel: &CancelToken,
    ) -> Result<bool, ConvertError> {
        if let Some(mime) = self.accept_mime {
            if descriptor.mime_type.as_deref() != Some(mime) {
                return Ok(false);
            }
        }
        if let Some(ext) = self.accept_extension {
            if descriptor.extension.as_deref() != Some(ext) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn convert(
        &self,
        _stream: File,
        _descriptor: &StreamDescriptor,
        _cancel: &CancelToken,
    ) -> Result<DocumentConverterResult, ConvertError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        self.converts.fetch_add(1, Ordering::SeqCst);
        if self.fail_convert {
            return Err(ConvertError::Internal(format!("{} blew up", self.name)));
        }
        if self.pages.is_empty() {
            Ok(DocumentConverterResult::from_markdown(self.output))
        } else {
            let segments = self
                .pages
                .iter()
                .map(|&n| {
                    DocumentSegment::new(SegmentKind::Page, format!("page {n}")).with_number(n)
                })
                .collect();
            Ok(DocumentConverterResult::from_segments(segments))
        }
    }
}

/// Captures every reported stage in order.
struct RecordingSink {
    stages: Mutex<Vec<ProgressStage>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stages: Mutex::new(Vec::new()),
        })
    }

    fn stages(&self) -> Vec<ProgressStage> {
        self.stages.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, event: &ProgressEvent) {
        self.stages.lock().unwrap().push(event.stage);
    }
}

/// Install a test tracing subscriber once. `RUST_LOG=anymd=debug cargo test`
/// shows the pipeline's step logs interleaved with test output.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn config_with(converters: Vec<Arc<dyn DocumentConverter>>) -> ConversionConfig {
    init_tracing();
    let mut builder = ConversionConfig::builder();
    for c in converters {
        builder = builder.converter(c);
    }
    builder.build().expect("valid config")
}

// ── Happy path ───────────────────────────────────────────────────────────────

/// The canonical scenario: CSV bytes with a matching extension hint go to
/// the CSV converter on the first candidate.
#[tokio::test]
async fn csv_bytes_with_extension_hint_convert_first_try() {
    let config = config_with(vec![Arc::new(
        Fake::new("csv").extension(".csv").output("| name | qty |"),
    )]);
    let hints = StreamDescriptor::new().with_file_name("inventory.csv");

    let output = convert_bytes(CSV_BODY, hints, &config)
        .await
        .expect("conversion should succeed");

    assert_eq!(output.converter_name, "csv");
    assert_eq!(output.markdown(), "| name | qty |");
    assert_eq!(output.stats.attempts_failed, 0);
    assert_eq!(output.stats.buffered_bytes, CSV_BODY.len() as u64);
    assert_eq!(
        output.result.metadata.get("converter.name").map(String::as_str),
        Some("csv")
    );
}

/// A wrong extension hint must not be fatal: content sniffing proposes a
/// delimited-text candidate and the CSV converter matches on the *second*
/// candidate descriptor.
#[tokio::test]
async fn misleading_extension_recovers_via_sniffed_candidate() {
    let config = config_with(vec![Arc::new(Fake::new("csv").mime("text/csv"))]);
    // ".dat" maps to no known mime; the base candidate cannot match.
    let hints = StreamDescriptor::new().with_file_name("export.dat");

    let output = convert_bytes(CSV_BODY, hints, &config)
        .await
        .expect("sniffed candidate should rescue the conversion");

    assert_eq!(output.converter_name, "csv");
    assert_eq!(
        output.descriptor.mime_type.as_deref(),
        Some("text/csv"),
        "commit must happen under the sniffed descriptor"
    );
    // Origin identity carries over from the hints onto sniffed candidates.
    assert_eq!(output.descriptor.file_name.as_deref(), Some("export.dat"));
}

/// Convert a real file on disk through the path-based entry point.
#[tokio::test]
async fn convert_local_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.csv");
    std::fs::write(&path, CSV_BODY).unwrap();

    let config = config_with(vec![Arc::new(Fake::new("csv").extension(".csv"))]);
    let output = convert(path.to_str().unwrap(), &config)
        .await
        .expect("local file conversion should succeed");

    assert_eq!(output.converter_name, "csv");
    assert_eq!(
        output.descriptor.local_path.as_deref(),
        path.to_str(),
        "descriptor should record where the bytes came from"
    );
}

/// The blocking wrapper spins up its own runtime, so it must run in a plain
/// test without an ambient tokio context.
#[test]
fn convert_sync_runs_without_an_ambient_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.csv");
    std::fs::write(&path, CSV_BODY).unwrap();

    let config = config_with(vec![Arc::new(Fake::new("csv").extension(".csv"))]);
    let output = convert_sync(path.to_str().unwrap(), &config)
        .expect("blocking conversion should succeed");
    assert_eq!(output.converter_name, "csv");
}

#[tokio::test]
async fn convert_missing_file_is_file_not_found() {
    let config = config_with(vec![Arc::new(Fake::new("any"))]);
    let err = convert("/definitely/not/a/real/file.csv", &config)
        .await
        .expect_err("missing file must fail");
    assert!(matches!(err, ConvertError::FileNotFound { .. }), "got: {err}");
}

// ── Dispatch semantics ───────────────────────────────────────────────────────

/// The first success short-circuits: converters registered after the winner
/// are never invoked.
#[tokio::test]
async fn sequential_success_short_circuits() {
    let winner = Arc::new(Fake::new("winner"));
    let never = Arc::new(Fake::new("never"));
    let config = config_with(vec![winner.clone(), never.clone()]);

    let output = convert_bytes(b"anything".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect("conversion should succeed");

    assert_eq!(output.converter_name, "winner");
    assert_eq!(winner.converts.load(Ordering::SeqCst), 1);
    assert_eq!(never.converts.load(Ordering::SeqCst), 0);
}

/// A converter error is recorded and dispatch moves on to the next one.
#[tokio::test]
async fn failure_is_recorded_then_next_converter_wins() {
    let config = config_with(vec![
        Arc::new(Fake::new("flaky").failing()),
        Arc::new(Fake::new("steady")),
    ]);

    let output = convert_bytes(b"anything".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect("second converter should rescue the conversion");

    assert_eq!(output.converter_name, "steady");
    assert_eq!(output.stats.attempts_failed, 1);
}

/// When every converter declines or fails, the error aggregates each failed
/// attempt with its candidate identity.
#[tokio::test]
async fn exhaustion_aggregates_attempts() {
    let config = config_with(vec![
        Arc::new(Fake::new("a").failing()),
        Arc::new(Fake::new("b").failing()),
    ]);
    let hints = StreamDescriptor::new().with_file_name("inventory.csv");

    let err = convert_bytes(CSV_BODY, hints, &config)
        .await
        .expect_err("all attempts fail");

    match err {
        ConvertError::UnsupportedFormat { attempts } => {
            assert!(
                !attempts.is_empty(),
                "failed attempts must be carried in the error"
            );
            assert!(attempts.iter().any(|a| a.converter == "a"));
            assert!(attempts.iter().any(|a| a.converter == "b"));
            // Each attempt names the candidate it ran under.
            assert!(attempts
                .iter()
                .all(|a| a.mime_type.is_some() || a.extension.is_some()));
        }
        other => panic!("expected UnsupportedFormat, got: {other}"),
    }
}

/// Declining converters leave no trace in the aggregate error.
#[tokio::test]
async fn declines_are_not_reported_as_failures() {
    let config = config_with(vec![Arc::new(Fake::new("pdf-only").mime("application/pdf"))]);

    let err = convert_bytes(b"plain words".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect_err("nothing matches");

    match err {
        ConvertError::UnsupportedFormat { attempts } => {
            assert!(attempts.is_empty(), "declines are not failures: {attempts:?}");
        }
        other => panic!("expected UnsupportedFormat, got: {other}"),
    }
}

/// In parallel mode the first wall-clock completion wins the tier, not the
/// first registration.
#[tokio::test]
async fn parallel_tier_first_completion_wins() {
    let slow = Arc::new(Fake::new("slow").delayed(400).output("slow"));
    let fast = Arc::new(Fake::new("fast").delayed(10).output("fast"));

    let config = ConversionConfig::builder()
        .converter(slow)
        .converter(fast)
        .parallel(true)
        .max_parallel(4)
        .build()
        .expect("valid config");

    let output = convert_bytes(b"race me".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect("race should commit a winner");

    assert_eq!(output.converter_name, "fast");
    assert_eq!(output.markdown(), "fast");
}

/// A committed result whose page segments skip a number is an integrity
/// violation, surfaced as a fatal error rather than silently returned.
#[tokio::test]
async fn non_contiguous_pages_fail_the_conversion() {
    let config = config_with(vec![Arc::new(Fake::new("gappy").pages(vec![1, 2, 4]))]);

    let err = convert_bytes(b"pages".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect_err("page gap must be fatal");

    assert!(
        matches!(err, ConvertError::IntegrityViolation { .. }),
        "got: {err}"
    );
}

#[tokio::test]
async fn contiguous_pages_pass_validation() {
    let config = config_with(vec![Arc::new(Fake::new("paged").pages(vec![1, 2, 3]))]);

    let output = convert_bytes(b"pages".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect("contiguous pages are fine");

    assert_eq!(output.result.segments.len(), 3);
    assert!(output.markdown().contains("page 1"));
    assert!(output.markdown().contains("page 3"));
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_cancelled_token_aborts_before_any_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.csv");
    std::fs::write(&path, CSV_BODY).unwrap();

    let converter = Arc::new(Fake::new("csv"));
    let config = config_with(vec![converter.clone()]);

    let cancel = CancelToken::new();
    cancel.cancel();

    let err = convert_cancellable(path.to_str().unwrap(), &config, &cancel)
        .await
        .expect_err("pre-cancelled request must abort");

    assert!(matches!(err, ConvertError::Cancelled), "got: {err}");
    assert_eq!(converter.converts.load(Ordering::SeqCst), 0);
}

// ── Middleware ───────────────────────────────────────────────────────────────

struct Stamper;

#[async_trait]
impl ConversionMiddleware for Stamper {
    fn name(&self) -> &str {
        "stamper"
    }

    async fn invoke(
        &self,
        context: &mut PipelineContext<'_>,
        _cancel: &CancelToken,
    ) -> Result<(), MiddlewareError> {
        context
            .metadata
            .insert("reviewed".into(), "yes".into());
        for seg in context.segments.iter_mut() {
            seg.markdown.push_str("\n\n*stamped*");
        }
        Ok(())
    }
}

struct Exploder;

#[async_trait]
impl ConversionMiddleware for Exploder {
    fn name(&self) -> &str {
        "exploder"
    }

    async fn invoke(
        &self,
        _context: &mut PipelineContext<'_>,
        _cancel: &CancelToken,
    ) -> Result<(), MiddlewareError> {
        Err("deliberate".into())
    }
}

/// Middleware runs after commit and its edits land in the final output; a
/// failing stage is logged and skipped without failing the conversion.
#[tokio::test]
async fn middleware_enriches_and_failures_are_non_fatal() {
    let config = ConversionConfig::builder()
        .converter(Arc::new(Fake::new("base").pages(vec![1])))
        .middleware(Arc::new(Exploder))
        .middleware(Arc::new(Stamper))
        .build()
        .expect("valid config");

    let output = convert_bytes(b"anything".to_vec(), StreamDescriptor::new(), &config)
        .await
        .expect("middleware failure must not sink the conversion");

    assert!(output.markdown().contains("*stamped*"));
    assert_eq!(
        output.result.metadata.get("reviewed").map(String::as_str),
        Some("yes")
    );
}

// ── Progress reporting ───────────────────────────────────────────────────────

/// At detailed level every stage shows up, in pipeline order.
#[tokio::test]
async fn detailed_progress_reports_full_stage_sequence() {
    let sink = RecordingSink::new();
    let config = ConversionConfig::builder()
        .converter(Arc::new(Fake::new("only")))
        .progress_sink(sink.clone())
        .progress_detail(ProgressDetail::Detailed)
        .build()
        .expect("valid config");

    convert_bytes(CSV_BODY, StreamDescriptor::new(), &config)
        .await
        .expect("conversion should succeed");

    let stages = sink.stages();
    let expect_order = [
        ProgressStage::Buffered,
        ProgressStage::DetectFormats,
        ProgressStage::TryingConverter,
        ProgressStage::ConverterSelected,
        ProgressStage::Completed,
    ];
    let mut cursor = 0;
    for stage in &stages {
        if cursor < expect_order.len() && *stage == expect_order[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expect_order.len(),
        "stage order mismatch, got: {stages:?}"
    );
}

/// At basic level the per-attempt chatter is suppressed.
#[tokio::test]
async fn basic_progress_suppresses_per_attempt_stages() {
    let sink = RecordingSink::new();
    let config = ConversionConfig::builder()
        .converter(Arc::new(Fake::new("flaky").failing()))
        .converter(Arc::new(Fake::new("steady")))
        .progress_sink(sink.clone())
        .build()
        .expect("valid config");

    convert_bytes(CSV_BODY, StreamDescriptor::new(), &config)
        .await
        .expect("conversion should succeed");

    let stages = sink.stages();
    assert!(
        !stages.contains(&ProgressStage::TryingConverter),
        "basic detail must hide TryingConverter, got: {stages:?}"
    );
    assert!(
        !stages.contains(&ProgressStage::ConverterFailed),
        "basic detail must hide ConverterFailed, got: {stages:?}"
    );
    assert!(stages.contains(&ProgressStage::Completed));
}

/// Failure paths report the Failed stage.
#[tokio::test]
async fn failed_conversion_reports_failed_stage() {
    let sink = RecordingSink::new();
    let config = ConversionConfig::builder()
        .converter(Arc::new(Fake::new("flaky").failing()))
        .progress_sink(sink.clone())
        .build()
        .expect("valid config");

    convert_bytes(CSV_BODY, StreamDescriptor::new(), &config)
        .await
        .expect_err("conversion fails");

    assert!(sink.stages().contains(&ProgressStage::Failed));
}

// ── Artifact persistence ─────────────────────────────────────────────────────

/// With an explicit workspace directory, persisted artifacts land there and
/// survive disposal (explicit directories are never auto-deleted).
#[tokio::test]
async fn explicit_workspace_persists_source_and_markdown() {
    let dir = tempfile::tempdir().unwrap();
    let workspace_dir = dir.path().join("artifacts");

    let config = ConversionConfig::builder()
        .converter(Arc::new(Fake::new("csv").extension(".csv").output("# ok")))
        .artifacts(ArtifactPolicy {
            copy_source: true,
            persist_markdown: true,
            persist_images: false,
        })
        .workspace(WorkspaceOptions {
            directory: Some(workspace_dir.clone()),
            ..WorkspaceOptions::default()
        })
        .build()
        .expect("valid config");

    let hints = StreamDescriptor::new().with_file_name("inventory.csv");
    let output = convert_bytes(CSV_BODY, hints, &config)
        .await
        .expect("conversion should succeed");

    let source = workspace_dir.join("source.csv");
    let markdown = workspace_dir.join("output.md");
    assert!(source.exists(), "source copy must be persisted");
    assert!(markdown.exists(), "markdown must be persisted");
    assert_eq!(std::fs::read(&source).unwrap(), CSV_BODY);
    assert_eq!(std::fs::read_to_string(&markdown).unwrap(), "# ok");

    assert!(output.result.artifact_directory.is_some());
    assert!(output.result.metadata.contains_key("artifact.source"));
    assert!(output.result.metadata.contains_key("artifact.markdown"));
}

/// Reserved metadata prefixes stay out of the public view.
#[tokio::test]
async fn public_metadata_hides_reserved_keys() {
    let config = config_with(vec![Arc::new(Fake::new("only"))]);

    let output = convert_bytes(CSV_BODY, StreamDescriptor::new(), &config)
        .await
        .expect("conversion should succeed");

    // The pipeline annotates under the converter. prefix.
    assert!(output.result.metadata.contains_key("converter.name"));
    let public = output.result.public_metadata();
    assert!(
        !public.keys().any(|k| k.starts_with("converter.")),
        "reserved keys leaked: {public:?}"
    );
}

// ── Output file writing ──────────────────────────────────────────────────────

#[tokio::test]
async fn convert_to_file_writes_markdown_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("doc.csv");
    std::fs::write(&input, CSV_BODY).unwrap();
    let out_path = dir.path().join("nested/out.md");

    let config = config_with(vec![Arc::new(
        Fake::new("csv").extension(".csv").output("# report"),
    )]);

    let stats = convert_to_file(input.to_str().unwrap(), &out_path, &config)
        .await
        .expect("conversion and write should succeed");

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "# report");
    assert!(stats.total_ms >= stats.dispatch_ms);
    // No stray temp file left behind.
    assert!(!out_path.with_extension("md.tmp").exists());
}

/// Stats serialise cleanly for callers that log them as JSON.
#[tokio::test]
async fn stats_round_trip_through_json() {
    let config = config_with(vec![Arc::new(Fake::new("only"))]);

    let output = convert_bytes(CSV_BODY, StreamDescriptor::new(), &config)
        .await
        .expect("conversion should succeed");

    let json = serde_json::to_string(&output.stats).expect("stats must serialise");
    let back: ConversionStats = serde_json::from_str(&json).expect("stats must deserialise");
    assert_eq!(back.buffered_bytes, output.stats.buffered_bytes);
    assert_eq!(back.attempts_failed, output.stats.attempts_failed);
}
