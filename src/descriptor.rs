//! Stream descriptors: immutable metadata identifying a byte stream's format.
//!
//! A [`StreamDescriptor`] is what the caller *claims* about a stream (mime
//! type, extension, charset, origin) and what the sniffer *detects*. The two
//! are combined by structural merging — each field resolved
//! fill-in-the-blanks, never overwritten from a weaker source — so caller
//! hints always win over detection.

use serde::{Deserialize, Serialize};

/// Fallback mime type when nothing better can be resolved.
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Immutable metadata describing one byte stream.
///
/// Construct with [`StreamDescriptor::new`] and the `with_*` methods, or
/// derive a refined copy via [`StreamDescriptor::merged_with`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Mime type, e.g. `"text/csv"`.
    pub mime_type: Option<String>,
    /// Extension, normalised to lowercase with a leading dot, e.g. `".csv"`.
    pub extension: Option<String>,
    /// Character set hint, passed through verbatim (the core never transcodes).
    pub charset: Option<String>,
    /// Original file name, if known.
    pub file_name: Option<String>,
    /// Local filesystem origin, if the stream came from a file.
    pub local_path: Option<String>,
    /// URL origin, if the stream was downloaded.
    pub url: Option<String>,
}

impl StreamDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Set the extension, normalising to lowercase dot-prefixed form.
    pub fn with_extension(mut self, ext: impl AsRef<str>) -> Self {
        self.extension = normalize_extension(ext.as_ref());
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_local_path(mut self, path: impl Into<String>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Structural merge: produce a new descriptor where each field is taken
    /// from `overrides` if set, else from `self`.
    ///
    /// Callers chain merges to express precedence left-to-right:
    /// `detected.merged_with(&caller_hints)` yields a descriptor where the
    /// caller's hints fill first and detection only fills the blanks.
    pub fn merged_with(&self, overrides: &StreamDescriptor) -> StreamDescriptor {
        StreamDescriptor {
            mime_type: overrides.mime_type.clone().or_else(|| self.mime_type.clone()),
            extension: overrides.extension.clone().or_else(|| self.extension.clone()),
            charset: overrides.charset.clone().or_else(|| self.charset.clone()),
            file_name: overrides.file_name.clone().or_else(|| self.file_name.clone()),
            local_path: overrides
                .local_path
                .clone()
                .or_else(|| self.local_path.clone()),
            url: overrides.url.clone().or_else(|| self.url.clone()),
        }
    }

    /// Normalise the descriptor for candidate generation:
    ///
    /// 1. collapse an unknown/octet-stream mime to absent,
    /// 2. fill a missing mime from the extension,
    /// 3. fill a missing extension from the mime, then from the file name.
    pub fn normalized(&self) -> StreamDescriptor {
        let mut out = self.clone();

        if matches!(
            out.mime_type.as_deref(),
            Some(FALLBACK_MIME) | Some("application/unknown") | Some("")
        ) {
            out.mime_type = None;
        }
        out.extension = out
            .extension
            .as_deref()
            .and_then(normalize_extension)
            .or_else(|| out.file_name.as_deref().and_then(extension_of));

        if out.mime_type.is_none() {
            out.mime_type = out
                .extension
                .as_deref()
                .and_then(mime_for_extension)
                .map(str::to_string);
        }
        if out.extension.is_none() {
            out.extension = out
                .mime_type
                .as_deref()
                .and_then(extension_for_mime)
                .map(str::to_string);
        }
        out
    }

    /// The mime type, falling back to [`FALLBACK_MIME`].
    pub fn mime_or_fallback(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(FALLBACK_MIME)
    }

    /// Key used to deduplicate candidate descriptors.
    pub(crate) fn dedup_key(&self) -> (Option<String>, Option<String>) {
        (self.mime_type.clone(), self.extension.clone())
    }
}

/// Normalise an extension string to lowercase leading-dot form.
///
/// Returns `None` for empty or dot-only input.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_ascii_lowercase()))
}

/// Extract a normalised extension from a file name or path.
pub fn extension_of(name: &str) -> Option<String> {
    let stem = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (_, ext) = stem.rsplit_once('.')?;
    normalize_extension(ext)
}

// Static extension↔mime table covering the formats the sniffer and workspace
// care about. Converters for exotic formats carry their own knowledge.
const MIME_TABLE: &[(&str, &str)] = &[
    (".md", "text/markdown"),
    (".txt", "text/plain"),
    (".csv", "text/csv"),
    (".tsv", "text/tab-separated-values"),
    (".json", "application/json"),
    (".xml", "application/xml"),
    (".html", "text/html"),
    (".htm", "text/html"),
    (".rss", "application/rss+xml"),
    (".atom", "application/atom+xml"),
    (".pdf", "application/pdf"),
    (".zip", "application/zip"),
    (".epub", "application/epub+zip"),
    (".docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    (".xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    (".pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".gif", "image/gif"),
    (".webp", "image/webp"),
    (".bmp", "image/bmp"),
    (".mp3", "audio/mpeg"),
    (".wav", "audio/wav"),
    (".m4a", "audio/mp4"),
];

/// Look up the mime type for a normalised extension.
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    MIME_TABLE.iter().find(|(e, _)| *e == ext).map(|(_, m)| *m)
}

/// Look up the canonical extension for a mime type (first table hit wins).
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    MIME_TABLE.iter().find(|(_, m)| *m == mime).map(|(e, _)| *e)
}

/// Resolve a mime type for a file about to be persisted:
/// explicit value → inferred from the file name → [`FALLBACK_MIME`].
pub fn resolve_mime(explicit: Option<&str>, file_name: &str) -> String {
    if let Some(m) = explicit {
        if !m.is_empty() {
            return m.to_string();
        }
    }
    extension_of(file_name)
        .as_deref()
        .and_then(mime_for_extension)
        .unwrap_or(FALLBACK_MIME)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_normalized() {
        let d = StreamDescriptor::new().with_extension("CSV");
        assert_eq!(d.extension.as_deref(), Some(".csv"));
        let d = StreamDescriptor::new().with_extension(".Md");
        assert_eq!(d.extension.as_deref(), Some(".md"));
        let d = StreamDescriptor::new().with_extension("");
        assert_eq!(d.extension, None);
        let d = StreamDescriptor::new().with_extension(".");
        assert_eq!(d.extension, None);
    }

    #[test]
    fn merge_prefers_overrides_then_base() {
        let base = StreamDescriptor::new()
            .with_mime_type("text/plain")
            .with_file_name("notes.txt");
        let overrides = StreamDescriptor::new().with_mime_type("text/csv");
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.mime_type.as_deref(), Some("text/csv"));
        assert_eq!(merged.file_name.as_deref(), Some("notes.txt"));
    }

    #[test]
    fn normalize_collapses_octet_stream() {
        let d = StreamDescriptor::new()
            .with_mime_type("application/octet-stream")
            .with_extension(".csv")
            .normalized();
        assert_eq!(d.mime_type.as_deref(), Some("text/csv"));
    }

    #[test]
    fn normalize_fills_extension_from_mime() {
        let d = StreamDescriptor::new().with_mime_type("text/html").normalized();
        assert_eq!(d.extension.as_deref(), Some(".html"));
    }

    #[test]
    fn normalize_fills_extension_from_file_name() {
        let d = StreamDescriptor::new()
            .with_file_name("report.Xlsx")
            .normalized();
        assert_eq!(d.extension.as_deref(), Some(".xlsx"));
        assert!(d.mime_type.as_deref().unwrap().contains("spreadsheetml"));
    }

    #[test]
    fn extension_of_handles_paths() {
        assert_eq!(extension_of("/a/b/doc.PDF").as_deref(), Some(".pdf"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(extension_of("noext"), None);
    }

    #[test]
    fn resolve_mime_precedence() {
        assert_eq!(resolve_mime(Some("text/html"), "x.csv"), "text/html");
        assert_eq!(resolve_mime(None, "x.csv"), "text/csv");
        assert_eq!(resolve_mime(None, "x.weird"), FALLBACK_MIME);
        assert_eq!(resolve_mime(Some(""), "x.png"), "image/png");
    }
}
