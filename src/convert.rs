//! Top-level conversion entry points.
//!
//! The orchestration here follows the control flow the rest of the crate
//! builds pieces for: resolve the input, materialise it into the disk
//! buffer, sniff candidate descriptors, dispatch over the registry, run the
//! middleware pipeline, persist side-artifacts, and return. Temporary state
//! (buffer, ephemeral workspace) is disposed on every exit path — success,
//! exhaustion, or error.

use crate::buffer::{BufferSource, DiskBuffer};
use crate::cancel::CancelToken;
use crate::config::ConversionConfig;
use crate::descriptor::StreamDescriptor;
use crate::dispatch;
use crate::error::ConvertError;
use crate::input;
use crate::middleware::{self, PipelineContext};
use crate::model::{AiUsage, DocumentConverterResult};
use crate::progress::{ProgressEvent, ProgressStage, Reporter};
use crate::workspace::ArtifactWorkspace;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Timings and counters for one conversion request.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConversionStats {
    /// Bytes materialised into the disk buffer.
    pub buffered_bytes: u64,
    /// Wall-clock time spent buffering the source.
    pub buffer_ms: u64,
    /// Wall-clock time spent in candidate dispatch.
    pub dispatch_ms: u64,
    /// Wall-clock time spent in the middleware pipeline.
    pub middleware_ms: u64,
    /// End-to-end wall-clock time.
    pub total_ms: u64,
    /// Converter attempts that failed before the commit.
    pub attempts_failed: usize,
    /// AI enrichment counters aggregated from image artifacts.
    pub ai_usage: AiUsage,
}

/// What [`convert`] returns on success.
#[derive(Debug)]
pub struct ConversionOutput {
    /// The committed conversion result.
    pub result: DocumentConverterResult,
    /// Name of the converter that produced it.
    pub converter_name: String,
    /// The candidate descriptor the conversion was committed under.
    pub descriptor: StreamDescriptor,
    /// Timings and counters.
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Convenience accessor for the composed Markdown body.
    pub fn markdown(&self) -> &str {
        self.result.markdown()
    }
}

/// Convert a local file or HTTP/HTTPS URL to Markdown.
///
/// This is the primary entry point for the library.
///
/// # Errors
/// Returns `Err(ConvertError)` for fatal conditions only: unreachable input,
/// buffer/workspace resource failures, converter exhaustion
/// ([`ConvertError::UnsupportedFormat`] aggregating every attempt), or an
/// integrity violation in a committed result.
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    convert_cancellable(input_str, config, &CancelToken::new()).await
}

/// [`convert`] with a caller-supplied cancellation token.
///
/// The token is checked by the buffer copy loop, between converter attempts,
/// inside raced parallel tiers, and per download chunk. Cancellation is
/// cooperative; see [`CancelToken`].
pub async fn convert_cancellable(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
    cancel: &CancelToken,
) -> Result<ConversionOutput, ConvertError> {
    let input_str = input_str.as_ref();
    info!("starting conversion: {input_str}");
    let (source, hints) =
        input::resolve_input(input_str, config.download_timeout_secs, cancel).await?;
    convert_source(source, hints, config, cancel).await
}

/// Convert an in-memory payload to Markdown.
///
/// `hints` carries whatever the caller knows about the bytes (file name,
/// mime type); pass `StreamDescriptor::new()` when nothing is known and let
/// the sniffer do the work.
pub async fn convert_bytes(
    bytes: impl Into<Vec<u8>>,
    hints: StreamDescriptor,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    convert_source(
        BufferSource::from_bytes(bytes),
        hints,
        config,
        &CancelToken::new(),
    )
    .await
}

/// Convert any async byte stream to Markdown.
pub async fn convert_reader(
    reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
    hints: StreamDescriptor,
    config: &ConversionConfig,
    cancel: &CancelToken,
) -> Result<ConversionOutput, ConvertError> {
    convert_source(BufferSource::from_reader(reader), hints, config, cancel).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, ConvertError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConvertError::Internal(format!("failed to create tokio runtime: {e}")))?
        .block_on(convert(input_str, config))
}

/// Convert and write the Markdown output directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionStats, ConvertError> {
    let output = convert(input_str, config).await?;
    let path = output_path.as_ref();

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| ConvertError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("md.tmp");
    tokio::fs::write(&tmp_path, output.markdown())
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| ConvertError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(output.stats)
}

// ── Internal orchestration ───────────────────────────────────────────────

async fn convert_source(
    source: BufferSource,
    hints: StreamDescriptor,
    config: &ConversionConfig,
    cancel: &CancelToken,
) -> Result<ConversionOutput, ConvertError> {
    let total_start = Instant::now();
    let reporter = Reporter::new(config.progress_sink.clone(), config.progress_detail);

    // ── Step 1: Materialise the source into the disk buffer ─────────────
    let buffer_start = Instant::now();
    reporter.report(ProgressEvent::new(ProgressStage::BufferStream, 0, 0));
    let copy_reporter = reporter.clone();
    let progress = move |total: u64| {
        copy_reporter.report(ProgressEvent::new(
            ProgressStage::BufferStream,
            total as usize,
            0,
        ));
    };
    let buffer = DiskBuffer::from_stream(
        source,
        hints.extension.as_deref(),
        config.chunk_size,
        config.temp_root.as_deref(),
        Some(&progress),
        cancel,
    )
    .await
    .inspect_err(|_| {
        reporter.report(ProgressEvent::new(ProgressStage::Failed, 0, 0));
    })?;
    let buffer_ms = buffer_start.elapsed().as_millis() as u64;
    reporter.report(ProgressEvent::new(
        ProgressStage::Buffered,
        buffer.len() as usize,
        buffer.len() as usize,
    ));

    // Everything past this point must dispose the buffer on its way out.
    let outcome = run_pipeline(&buffer, &hints, config, &reporter, cancel).await;
    buffer.dispose().await;

    match outcome {
        Ok((mut output, dispatch_ms, middleware_ms)) => {
            output.stats.buffered_bytes = buffer.len();
            output.stats.buffer_ms = buffer_ms;
            output.stats.dispatch_ms = dispatch_ms;
            output.stats.middleware_ms = middleware_ms;
            output.stats.total_ms = total_start.elapsed().as_millis() as u64;
            info!(
                "conversion complete via '{}' in {}ms",
                output.converter_name, output.stats.total_ms
            );
            reporter.report(ProgressEvent::new(ProgressStage::Completed, 1, 1));
            Ok(output)
        }
        Err(e) => {
            reporter.report(
                ProgressEvent::new(ProgressStage::Failed, 0, 0).with_details(e.to_string()),
            );
            Err(e)
        }
    }
}

async fn run_pipeline(
    buffer: &DiskBuffer,
    hints: &StreamDescriptor,
    config: &ConversionConfig,
    reporter: &Reporter,
    cancel: &CancelToken,
) -> Result<(ConversionOutput, u64, u64), ConvertError> {
    // ── Step 2: Propose candidate descriptors ────────────────────────────
    reporter.report(ProgressEvent::new(ProgressStage::DetectFormats, 0, 0));
    let candidates = crate::sniff::candidates(buffer, hints).await;
    debug!("{} candidate descriptor(s)", candidates.len());

    // ── Step 3: Dispatch over the registry ───────────────────────────────
    let dispatch_start = Instant::now();
    let committed = dispatch::dispatch(buffer, &candidates, config, reporter, cancel).await?;
    let dispatch_ms = dispatch_start.elapsed().as_millis() as u64;
    let mut result = committed.result;

    // ── Step 4: Middleware pipeline ──────────────────────────────────────
    let middleware_start = Instant::now();
    if !config.middleware.is_empty() {
        let mut context = PipelineContext {
            descriptor: &committed.descriptor,
            artifacts: &mut result.artifacts,
            segments: &mut result.segments,
            metadata: &mut result.metadata,
        };
        middleware::run_pipeline(&config.middleware, &mut context, cancel).await;
    }
    let middleware_ms = middleware_start.elapsed().as_millis() as u64;

    // ── Step 5: Annotate the result ──────────────────────────────────────
    let ai_usage = result.artifacts.ai_usage();
    result
        .metadata
        .insert("converter.name".into(), committed.converter_name.clone());
    result.metadata.insert(
        "converter.elapsed_ms".into(),
        dispatch_ms.to_string(),
    );
    if !ai_usage.is_zero() {
        result
            .metadata
            .insert("ai.described_images".into(), ai_usage.described_images.to_string());
        result.metadata.insert(
            "ai.diagrammed_images".into(),
            ai_usage.diagrammed_images.to_string(),
        );
        result.metadata.insert(
            "ai.transcribed_images".into(),
            ai_usage.transcribed_images.to_string(),
        );
    }

    // ── Step 6: Persist side-artifacts ───────────────────────────────────
    if config.artifacts.persists_anything() {
        persist_artifacts(buffer, &committed.descriptor, config, &mut result).await?;
    }

    Ok((
        ConversionOutput {
            result,
            converter_name: committed.converter_name,
            descriptor: committed.descriptor,
            stats: ConversionStats {
                attempts_failed: committed.attempts_failed,
                ai_usage,
                ..Default::default()
            },
        },
        dispatch_ms,
        middleware_ms,
    ))
}

/// Persist the configured side-artifacts into a workspace.
///
/// The workspace is disposed on every path; whether its contents survive is
/// the disposal policy's call (`delete_on_dispose`, explicit directories are
/// never deleted).
async fn persist_artifacts(
    buffer: &DiskBuffer,
    descriptor: &StreamDescriptor,
    config: &ConversionConfig,
    result: &mut DocumentConverterResult,
) -> Result<(), ConvertError> {
    let mut workspace_options = config.workspace.clone();
    if workspace_options.local_root.is_none() {
        workspace_options.local_root = config.temp_root.clone();
    }
    let workspace =
        ArtifactWorkspace::create(descriptor, &workspace_options, &config.storage).await?;

    let persisted = persist_into(buffer, descriptor, config, result, &workspace).await;

    match persisted {
        Ok(()) => {
            result.artifact_directory = Some(workspace.reported_directory());
            workspace.dispose().await;
            Ok(())
        }
        Err(e) => {
            workspace.dispose().await;
            Err(e)
        }
    }
}

async fn persist_into(
    buffer: &DiskBuffer,
    descriptor: &StreamDescriptor,
    config: &ConversionConfig,
    result: &mut DocumentConverterResult,
    workspace: &ArtifactWorkspace,
) -> Result<(), ConvertError> {
    if config.artifacts.copy_source {
        let ext = descriptor.extension.as_deref().unwrap_or("");
        let name = format!("source{ext}");
        let path = workspace
            .persist_file(buffer.path(), &name, descriptor.mime_type.as_deref())
            .await?;
        result.metadata.insert("artifact.source".into(), path);
    }

    if config.artifacts.persist_images {
        for (i, image) in result.artifacts.images.iter().enumerate() {
            let ext = crate::descriptor::extension_for_mime(&image.content_type).unwrap_or(".bin");
            let name = format!("image{:03}{ext}", i + 1);
            let path = workspace
                .persist_binary(&image.bytes, &name, Some(&image.content_type))
                .await?;
            debug!("persisted image artifact: {path}");
        }
    }

    if config.artifacts.persist_markdown {
        let markdown = result.markdown().to_string();
        let path = workspace
            .persist_text(&markdown, "output.md", Some("text/markdown"))
            .await?;
        result.metadata.insert("artifact.markdown".into(), path);
    }

    Ok(())
}
