//! The typed output contract converters must produce.
//!
//! A converter emits an ordered list of [`DocumentSegment`]s (the composed
//! document, in order), a bag of raw [`ConversionArtifacts`] (pre-Markdown
//! extraction units: text blocks, tables, images), and free-form string
//! metadata. The final Markdown body is computed lazily from the segments
//! unless the converter supplied one explicitly.
//!
//! Metadata keys under the reserved prefixes in [`RESERVED_METADATA_PREFIXES`]
//! are internal pipeline signalling (set by the dispatch engine and
//! middleware) and are stripped from [`DocumentConverterResult::public_metadata`].

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

/// Metadata prefixes reserved for pipeline-internal signalling.
pub const RESERVED_METADATA_PREFIXES: &[&str] = &["ai.", "artifact.", "converter.", "image."];

/// The kind of a document segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentKind {
    Page,
    Slide,
    Sheet,
    Table,
    Section,
    Chapter,
    Image,
    Metadata,
    Audio,
}

/// One ordered, typed chunk of the final document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSegment {
    /// Markdown body of this segment.
    pub markdown: String,
    /// Segment kind.
    pub kind: SegmentKind,
    /// 1-indexed ordinal within its kind (page number, slide number, ...).
    pub number: Option<usize>,
    /// Human-readable label (sheet name, chapter title, ...).
    pub label: Option<String>,
    /// Start offset in seconds, for time-based media.
    pub start_time: Option<f64>,
    /// End offset in seconds, for time-based media.
    pub end_time: Option<f64>,
    /// Origin hint (source file within an archive, track name, ...).
    pub source: Option<String>,
    /// Free-form per-segment metadata.
    #[serde(default)]
    pub additional_metadata: BTreeMap<String, String>,
}

impl DocumentSegment {
    /// Create a segment of `kind` with the given Markdown body.
    pub fn new(kind: SegmentKind, markdown: impl Into<String>) -> Self {
        Self {
            markdown: markdown.into(),
            kind,
            number: None,
            label: None,
            start_time: None,
            end_time: None,
            source: None,
            additional_metadata: BTreeMap::new(),
        }
    }

    pub fn with_number(mut self, n: usize) -> Self {
        self.number = Some(n);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_time_range(mut self, start: f64, end: f64) -> Self {
        self.start_time = Some(start);
        self.end_time = Some(end);
        self
    }
}

/// A raw extracted block of text, prior to Markdown composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextArtifact {
    pub text: String,
    /// 1-indexed page the text came from, if known.
    pub page: Option<usize>,
    pub source: Option<String>,
}

/// A raw extracted table: rows of cells, pre-escaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableArtifact {
    pub rows: Vec<Vec<String>>,
    pub page: Option<usize>,
    pub label: Option<String>,
}

/// A raw extracted image plus the enrichment slots middleware fills in.
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    /// Raw image bytes.
    pub bytes: Vec<u8>,
    /// Image content type, e.g. `"image/png"`.
    pub content_type: String,
    /// 1-indexed page the image came from, if known.
    pub page: Option<usize>,
    pub source: Option<String>,
    pub label: Option<String>,
    /// AI-generated prose description, filled by enrichment middleware.
    pub detailed_description: Option<String>,
    /// AI-generated Mermaid diagram source, filled by enrichment middleware.
    pub mermaid_diagram: Option<String>,
    /// OCR text recovered from the image, filled by enrichment middleware.
    pub raw_text: Option<String>,
    /// Index into the result's segment list for the segment this image was
    /// emitted under. Valid only while the segment list has not been
    /// truncated; it is a lookup key, not an owning reference.
    pub segment_index: Option<usize>,
    /// Markdown snapshot the converter emitted for this image, used by later
    /// middleware for in-place text replacement.
    pub placeholder_markdown: Option<String>,
}

impl ImageArtifact {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
            page: None,
            source: None,
            label: None,
            detailed_description: None,
            mermaid_diagram: None,
            raw_text: None,
            segment_index: None,
            placeholder_markdown: None,
        }
    }

    /// Whether any enrichment middleware has written into this image.
    pub fn is_enriched(&self) -> bool {
        self.detailed_description.is_some()
            || self.mermaid_diagram.is_some()
            || self.raw_text.is_some()
    }
}

/// Raw pre-Markdown extraction units produced by a converter.
#[derive(Debug, Clone, Default)]
pub struct ConversionArtifacts {
    pub text_blocks: Vec<TextArtifact>,
    pub tables: Vec<TableArtifact>,
    pub images: Vec<ImageArtifact>,
    pub metadata: BTreeMap<String, String>,
}

static EMPTY_ARTIFACTS: OnceCell<Arc<ConversionArtifacts>> = OnceCell::new();

impl ConversionArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared empty instance for converters that produce no raw artifacts.
    ///
    /// The backing collections are empty and behind an `Arc`, so no caller
    /// can grow them; clone-on-write if you need a mutable copy.
    pub fn empty() -> Arc<ConversionArtifacts> {
        EMPTY_ARTIFACTS
            .get_or_init(|| Arc::new(ConversionArtifacts::default()))
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.text_blocks.is_empty()
            && self.tables.is_empty()
            && self.images.is_empty()
            && self.metadata.is_empty()
    }

    /// Aggregate AI-usage counters from enriched image artifacts.
    pub fn ai_usage(&self) -> AiUsage {
        let mut usage = AiUsage::default();
        for img in &self.images {
            if img.detailed_description.is_some() {
                usage.described_images += 1;
            }
            if img.mermaid_diagram.is_some() {
                usage.diagrammed_images += 1;
            }
            if img.raw_text.is_some() {
                usage.transcribed_images += 1;
            }
        }
        usage
    }
}

/// Counters for AI-based enrichment performed during one conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiUsage {
    /// Images that received a detailed description.
    pub described_images: usize,
    /// Images that received a Mermaid diagram.
    pub diagrammed_images: usize,
    /// Images that received OCR text.
    pub transcribed_images: usize,
}

impl AiUsage {
    pub fn is_zero(&self) -> bool {
        *self == AiUsage::default()
    }
}

/// The result a converter returns on success.
///
/// `markdown()` is computed lazily: an explicitly supplied body wins,
/// otherwise segments are joined in order with blank lines.
#[derive(Debug)]
pub struct DocumentConverterResult {
    explicit_markdown: Option<String>,
    rendered: OnceCell<String>,
    /// Document title, if the converter recovered one.
    pub title: Option<String>,
    /// Ordered document segments.
    pub segments: Vec<DocumentSegment>,
    /// Raw extraction artifacts.
    pub artifacts: ConversionArtifacts,
    /// Free-form metadata. Keys under [`RESERVED_METADATA_PREFIXES`] are
    /// pipeline-internal and hidden by [`Self::public_metadata`].
    pub metadata: BTreeMap<String, String>,
    /// Workspace directory artifacts were persisted into, if any.
    pub artifact_directory: Option<String>,
    /// Wall-clock creation instant.
    pub generated_at: SystemTime,
}

impl DocumentConverterResult {
    /// Build a result from segments; the Markdown body is derived lazily.
    pub fn from_segments(segments: Vec<DocumentSegment>) -> Self {
        Self {
            explicit_markdown: None,
            rendered: OnceCell::new(),
            title: None,
            segments,
            artifacts: ConversionArtifacts::new(),
            metadata: BTreeMap::new(),
            artifact_directory: None,
            generated_at: SystemTime::now(),
        }
    }

    /// Build a result whose Markdown body is supplied verbatim.
    pub fn from_markdown(markdown: impl Into<String>) -> Self {
        let mut r = Self::from_segments(Vec::new());
        r.explicit_markdown = Some(markdown.into());
        r
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_artifacts(mut self, artifacts: ConversionArtifacts) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// The composed Markdown body.
    ///
    /// Computed at most once; subsequent calls return the cached string.
    pub fn markdown(&self) -> &str {
        self.rendered.get_or_init(|| {
            if let Some(ref md) = self.explicit_markdown {
                return md.clone();
            }
            self.segments
                .iter()
                .map(|s| s.markdown.trim_end())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n\n")
        })
    }

    /// Metadata with pipeline-internal keys stripped.
    pub fn public_metadata(&self) -> BTreeMap<String, String> {
        self.metadata
            .iter()
            .filter(|(k, _)| !RESERVED_METADATA_PREFIXES.iter().any(|p| k.starts_with(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Check the Page-contiguity invariant: Page-typed segments, if present,
    /// must be numbered 1..N in emission order.
    ///
    /// Returns a human-readable violation description on failure. Violations
    /// are converter bugs and must be treated as fatal by the caller.
    pub fn validate_page_contiguity(&self) -> Result<(), String> {
        let mut expected = 1usize;
        for seg in &self.segments {
            if seg.kind != SegmentKind::Page {
                continue;
            }
            match seg.number {
                Some(n) if n == expected => expected += 1,
                Some(n) => {
                    return Err(format!(
                        "page segments must be numbered contiguously from 1; expected {expected}, found {n}"
                    ))
                }
                None => return Err("page segment is missing its number".to_string()),
            }
        }
        Ok(())
    }
}
