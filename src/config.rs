//! Configuration for stream-to-Markdown conversion.
//!
//! All behaviour is controlled through [`ConversionConfig`], built via its
//! [`ConversionConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across tasks and diff two runs to understand why
//! their outputs differ.
//!
//! # Design choice: builder over constructor
//! A fifteen-field constructor is unreadable and breaks on every new field.
//! The builder lets callers set only what they care about and rely on
//! documented defaults for the rest.

use crate::buffer::clamp_chunk_size;
use crate::error::ConvertError;
use crate::middleware::ConversionMiddleware;
use crate::progress::{ProgressDetail, SharedProgressSink};
use crate::registry::{ConverterRegistry, DocumentConverter};
use crate::workspace::{StorageOptions, WorkspaceOptions};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Flags controlling which side-artifacts a conversion persists.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactPolicy {
    /// Persist a copy of the buffered source into the workspace.
    pub copy_source: bool,
    /// Persist the rendered Markdown into the workspace.
    pub persist_markdown: bool,
    /// Persist extracted image artifacts into the workspace.
    pub persist_images: bool,
}

impl Default for ArtifactPolicy {
    fn default() -> Self {
        Self {
            copy_source: false,
            persist_markdown: false,
            persist_images: false,
        }
    }
}

impl ArtifactPolicy {
    /// Whether any artifact persistence is requested at all. A conversion with
    /// nothing to persist skips workspace creation entirely.
    pub fn persists_anything(&self) -> bool {
        self.copy_source || self.persist_markdown || self.persist_images
    }
}

/// Configuration for a conversion request.
///
/// Built via [`ConversionConfig::builder()`] or [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use anymd::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .chunk_size(64 * 1024)
///     .parallel(true)
///     .max_parallel(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Registered converters, tried in priority order.
    pub converters: ConverterRegistry,

    /// Post-extraction middleware stages, run in order after dispatch.
    pub middleware: Vec<Arc<dyn ConversionMiddleware>>,

    /// Disk-buffer copy chunk size in bytes, clamped to [4 KiB, 4 MiB].
    /// Default: 64 KiB.
    pub chunk_size: usize,

    /// Race converters within a priority tier instead of trying them
    /// sequentially. Default: false.
    ///
    /// Racing trades predictability for latency: the first *completion*
    /// wins, not the first registration. Leave off when converter order
    /// carries meaning beyond priority.
    pub parallel: bool,

    /// Maximum concurrent converter attempts in parallel mode. Default: 4.
    pub max_parallel: usize,

    /// Which side-artifacts to persist.
    pub artifacts: ArtifactPolicy,

    /// Workspace allocation and naming.
    pub workspace: WorkspaceOptions,

    /// Storage backend wiring and disposal policy.
    pub storage: StorageOptions,

    /// Root for all on-disk temporary state (buffers and auto-allocated
    /// workspaces). System temp when `None`.
    pub temp_root: Option<PathBuf>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Progress sink; silent when `None`.
    pub progress_sink: Option<SharedProgressSink>,

    /// Progress verbosity. Default: [`ProgressDetail::Basic`].
    pub progress_detail: ProgressDetail,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            converters: ConverterRegistry::new(),
            middleware: Vec::new(),
            chunk_size: 64 * 1024,
            parallel: false,
            max_parallel: 4,
            artifacts: ArtifactPolicy::default(),
            workspace: WorkspaceOptions::default(),
            storage: StorageOptions::default(),
            temp_root: None,
            download_timeout_secs: 120,
            progress_sink: None,
            progress_detail: ProgressDetail::default(),
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("converters", &self.converters)
            .field("middleware", &self.middleware.len())
            .field("chunk_size", &self.chunk_size)
            .field("parallel", &self.parallel)
            .field("max_parallel", &self.max_parallel)
            .field("artifacts", &self.artifacts)
            .field("workspace", &self.workspace)
            .field("storage", &self.storage)
            .field("temp_root", &self.temp_root)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("progress_sink", &self.progress_sink.as_ref().map(|_| "<dyn ProgressSink>"))
            .field("progress_detail", &self.progress_detail)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    /// Register a converter at its declared priority.
    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.config.converters.register(converter);
        self
    }

    /// Register a converter at an explicit priority.
    pub fn converter_with_priority(
        mut self,
        converter: Arc<dyn DocumentConverter>,
        priority: i32,
    ) -> Self {
        self.config.converters.register_with_priority(converter, priority);
        self
    }

    /// Append a middleware stage.
    pub fn middleware(mut self, stage: Arc<dyn ConversionMiddleware>) -> Self {
        self.config.middleware.push(stage);
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.config.chunk_size = clamp_chunk_size(bytes);
        self
    }

    pub fn parallel(mut self, enabled: bool) -> Self {
        self.config.parallel = enabled;
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.max_parallel = n.max(1);
        self
    }

    pub fn artifacts(mut self, policy: ArtifactPolicy) -> Self {
        self.config.artifacts = policy;
        self
    }

    pub fn workspace(mut self, options: WorkspaceOptions) -> Self {
        self.config.workspace = options;
        self
    }

    pub fn storage(mut self, options: StorageOptions) -> Self {
        self.config.storage = options;
        self
    }

    /// Root for all on-disk temporary state. Also used for auto-allocated
    /// workspace directories unless the workspace options override it.
    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.temp_root = Some(root.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_sink(mut self, sink: SharedProgressSink) -> Self {
        self.config.progress_sink = Some(sink);
        self
    }

    pub fn progress_detail(mut self, detail: ProgressDetail) -> Self {
        self.config.progress_detail = detail;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConvertError> {
        let c = &self.config;
        if c.max_parallel == 0 {
            return Err(ConvertError::InvalidConfig("max_parallel must be ≥ 1".into()));
        }
        if c.chunk_size != clamp_chunk_size(c.chunk_size) {
            return Err(ConvertError::InvalidConfig(format!(
                "chunk_size must be within [{}, {}], got {}",
                crate::buffer::MIN_CHUNK_SIZE,
                crate::buffer::MAX_CHUNK_SIZE,
                c.chunk_size
            )));
        }
        Ok(self.config)
    }
}
