//! # anymd
//!
//! Convert arbitrary byte streams — files, URLs, in-memory payloads — into
//! structured Markdown by routing them through a registry of format-specific
//! converters.
//!
//! ## Why this crate?
//!
//! Real-world inputs lie about their format: extensions are wrong, servers
//! send `application/octet-stream`, payloads arrive with no name at all.
//! Instead of trusting a single signal, anymd buffers the stream to disk
//! once, derives *multiple candidate interpretations* (caller hints first,
//! content sniffing second), and tries registered converters against each
//! candidate in priority order — optionally racing a whole priority tier and
//! committing to the first success. The converters themselves (CSV, HTML,
//! spreadsheets, PDF, ...) are pluggable collaborators implementing
//! [`DocumentConverter`]; this crate is the orchestration engine.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input (path / URL / bytes)
//!  │
//!  ├─ 1. Buffer    materialise to a private temp file; rewindable readers
//!  ├─ 2. Sniff     magic bytes + text shape → ordered candidate descriptors
//!  ├─ 3. Dispatch  candidates × converter registry, sequential or raced
//!  ├─ 4. Enrich    middleware pipeline mutates segments/artifacts
//!  ├─ 5. Persist   workspace stores images / source copy / Markdown
//!  └─ 6. Output    ConversionOutput with segments, artifacts, stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use anymd::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         // .converter(Arc::new(CsvConverter)) etc. — register your formats
//!         .build()?;
//!     let output = convert("report.csv", &config).await?;
//!     println!("{}", output.markdown());
//!     Ok(())
//! }
//! ```
//!
//! ## Guarantees
//!
//! * Every converter attempt reads from its own fresh position-0 stream;
//!   probes never interfere with each other.
//! * The first sequential success short-circuits all remaining work; a
//!   parallel tier commits to the first *wall-clock* success and cancels
//!   siblings (cooperatively).
//! * Temporary buffers and ephemeral workspaces are cleaned up on every
//!   exit path; disposal is idempotent.
//! * A failed conversion returns one aggregate error naming every attempted
//!   mime/extension pair.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod buffer;
pub mod cancel;
pub mod config;
pub mod convert;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod input;
pub mod middleware;
pub mod model;
pub mod progress;
pub mod registry;
pub mod sniff;
pub mod storage;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use buffer::{BufferSource, DiskBuffer};
pub use cancel::CancelToken;
pub use config::{ArtifactPolicy, ConversionConfig, ConversionConfigBuilder};
pub use convert::{
    convert, convert_bytes, convert_cancellable, convert_reader, convert_sync, convert_to_file,
    ConversionOutput, ConversionStats,
};
pub use descriptor::StreamDescriptor;
pub use error::{AttemptFailure, AttemptStage, ConvertError};
pub use middleware::{ConversionMiddleware, MiddlewareError, PipelineContext};
pub use model::{
    AiUsage, ConversionArtifacts, DocumentConverterResult, DocumentSegment, ImageArtifact,
    SegmentKind, TableArtifact, TextArtifact,
};
pub use progress::{
    NoopProgressSink, ProgressDetail, ProgressEvent, ProgressSink, ProgressStage,
    SharedProgressSink,
};
pub use registry::{
    ConverterRegistration, ConverterRegistry, DocumentConverter, PRIORITY_GENERIC_FORMAT,
    PRIORITY_SPECIFIC_FORMAT,
};
pub use storage::{BlobMetadata, BlobUpload, StorageBackend, StorageError};
pub use workspace::{
    ArtifactWorkspace, DirectoryFormatter, StorageFactory, StorageOptions, WorkspaceNameGenerator,
    WorkspaceOptions,
};
