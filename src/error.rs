//! Error types for the anymd library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConvertError`] — **Fatal**: the conversion request cannot produce a
//!   result at all (input unreachable, disk buffer broken, every converter
//!   exhausted, a converter produced corrupt output). Returned as
//!   `Err(ConvertError)` from the top-level `convert*` functions.
//!
//! * [`AttemptFailure`] — **Non-fatal**: a single converter's probe or
//!   conversion failed for one candidate descriptor. Recorded and dispatch
//!   moves on to the next converter. Only when *every* candidate × converter
//!   pair has failed do the recorded failures surface, aggregated inside
//!   [`ConvertError::UnsupportedFormat`].
//!
//! The separation lets the dispatch engine keep trying cheaply while still
//! giving the caller a complete post-mortem when nothing worked.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the anymd library.
///
/// Per-attempt failures use [`AttemptFailure`] and are aggregated into
/// [`ConvertError::UnsupportedFormat`] rather than propagated individually.
#[derive(Debug, Error)]
pub enum ConvertError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Dispatch errors ───────────────────────────────────────────────────
    /// Every candidate descriptor × registered converter was exhausted.
    ///
    /// `attempts` holds one entry per converter that was tried and failed,
    /// tagged with the mime/extension it was tried against.
    #[error("No converter could handle the input ({} attempt(s) failed).\nTried: {}", attempts.len(), describe_attempts(attempts))]
    UnsupportedFormat { attempts: Vec<AttemptFailure> },

    /// The request was cancelled through its cancellation token.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── Resource errors ───────────────────────────────────────────────────
    /// The disk buffer could not be created or written.
    #[error("Failed to buffer input stream: {detail}")]
    BufferFailed { detail: String },

    /// The artifact workspace (or its storage backend) could not be set up.
    #[error("Failed to create artifact workspace '{name}': {detail}")]
    WorkspaceFailed { name: String, detail: String },

    // ── Integrity errors ──────────────────────────────────────────────────
    /// A converter produced structurally invalid output — a converter bug,
    /// not an input problem.
    #[error("Converter '{converter}' produced invalid output: {detail}")]
    IntegrityViolation { converter: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output Markdown file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of one converter against one candidate descriptor.
///
/// Recorded by the dispatch engine; dispatch continues with the next
/// converter. Surfaces only inside [`ConvertError::UnsupportedFormat`] when
/// every combination has failed.
#[derive(Debug, Clone, Error)]
#[error("{converter} [{}/{}] during {stage:?}: {detail}",
    mime_type.as_deref().unwrap_or("-"),
    extension.as_deref().unwrap_or("-"))]
pub struct AttemptFailure {
    /// Name of the converter that failed.
    pub converter: String,
    /// Mime type of the candidate descriptor it was tried against.
    pub mime_type: Option<String>,
    /// Extension of the candidate descriptor it was tried against.
    pub extension: Option<String>,
    /// Which phase of the attempt failed.
    pub stage: AttemptStage,
    /// Human-readable error description.
    pub detail: String,
}

/// Which phase of a converter attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    /// The `accepts` probe returned an error.
    Probe,
    /// The `convert` call returned an error.
    Convert,
}

fn describe_attempts(attempts: &[AttemptFailure]) -> String {
    if attempts.is_empty() {
        return "(no converters registered)".to_string();
    }
    attempts
        .iter()
        .map(|a| {
            format!(
                "{} against {}/{}",
                a.converter,
                a.mime_type.as_deref().unwrap_or("-"),
                a.extension.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}
