//! Format sniffing: propose candidate descriptors for an ambiguous stream.
//!
//! The sniffer never decides alone — it proposes. The caller-supplied
//! descriptor (normalised) is always the first candidate because explicit
//! hints take precedence; a genuinely different detection from magic bytes or
//! text shape is appended as a fallback. Dispatch then tries candidates in
//! order.
//!
//! Detection is a closed classifier ([`DetectedShape`]): container magic
//! bytes first (zip family, PDF, common image signatures), then a lightweight
//! text-shape pass (JSON-ish leading byte, markup with RSS/Atom/HTML
//! sub-detection, delimiter-count consistency for delimited text).

use crate::buffer::DiskBuffer;
use crate::descriptor::StreamDescriptor;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

/// How many leading bytes the sniffer inspects.
pub const SNIFF_PREFIX_LEN: usize = 8 * 1024;

/// Everything the content sniffer can recognise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedShape {
    Zip,
    Pdf,
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
    JsonLike,
    Html,
    Rss,
    Atom,
    Xml,
    Delimited(Delimiter),
}

/// Field delimiter of a detected delimited-text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
    Semicolon,
}

impl DetectedShape {
    /// The descriptor this shape maps to. Deterministic per variant.
    pub fn descriptor(&self) -> StreamDescriptor {
        let (mime, ext) = match self {
            DetectedShape::Zip => ("application/zip", ".zip"),
            DetectedShape::Pdf => ("application/pdf", ".pdf"),
            DetectedShape::Png => ("image/png", ".png"),
            DetectedShape::Jpeg => ("image/jpeg", ".jpg"),
            DetectedShape::Gif => ("image/gif", ".gif"),
            DetectedShape::Webp => ("image/webp", ".webp"),
            DetectedShape::Bmp => ("image/bmp", ".bmp"),
            DetectedShape::JsonLike => ("application/json", ".json"),
            DetectedShape::Html => ("text/html", ".html"),
            DetectedShape::Rss => ("application/rss+xml", ".rss"),
            DetectedShape::Atom => ("application/atom+xml", ".atom"),
            DetectedShape::Xml => ("application/xml", ".xml"),
            DetectedShape::Delimited(Delimiter::Comma | Delimiter::Semicolon) => {
                ("text/csv", ".csv")
            }
            DetectedShape::Delimited(Delimiter::Tab) => {
                ("text/tab-separated-values", ".tsv")
            }
        };
        StreamDescriptor::new().with_mime_type(mime).with_extension(ext)
    }
}

/// Produce the ordered, deduplicated candidate list for a buffered stream.
///
/// Always non-empty: the normalised base descriptor comes first; a detection
/// that differs by (mime, extension) is appended second. Prefix-read failures
/// degrade to the base-only list — sniffing is advisory, never fatal.
pub async fn candidates(buffer: &DiskBuffer, base: &StreamDescriptor) -> Vec<StreamDescriptor> {
    let normalized = base.normalized();
    let mut out = vec![normalized.clone()];

    let prefix = match buffer.read_prefix(SNIFF_PREFIX_LEN).await {
        Ok(p) => p,
        Err(e) => {
            debug!("sniff prefix read failed (ignored): {e}");
            return out;
        }
    };

    if let Some(shape) = classify(&prefix) {
        debug!("sniffed content shape: {shape:?}");
        // Detection only overrides format fields; origin metadata (file
        // name, paths) carries over from the base.
        let detected = normalized.merged_with(&shape.descriptor());
        if detected.dedup_key() != normalized.dedup_key() {
            out.push(detected);
        }
    }
    out
}

/// Classify a bounded prefix into a [`DetectedShape`], if any.
pub fn classify(prefix: &[u8]) -> Option<DetectedShape> {
    if let Some(shape) = classify_magic(prefix) {
        return Some(shape);
    }
    classify_text(prefix)
}

fn classify_magic(prefix: &[u8]) -> Option<DetectedShape> {
    if prefix.starts_with(b"PK\x03\x04") || prefix.starts_with(b"PK\x05\x06") {
        return Some(DetectedShape::Zip);
    }
    if prefix.starts_with(b"%PDF-") {
        return Some(DetectedShape::Pdf);
    }
    if prefix.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some(DetectedShape::Png);
    }
    if prefix.starts_with(b"\xFF\xD8\xFF") {
        return Some(DetectedShape::Jpeg);
    }
    if prefix.starts_with(b"GIF87a") || prefix.starts_with(b"GIF89a") {
        return Some(DetectedShape::Gif);
    }
    if prefix.len() >= 12 && &prefix[..4] == b"RIFF" && &prefix[8..12] == b"WEBP" {
        return Some(DetectedShape::Webp);
    }
    if prefix.starts_with(b"BM") && prefix.len() >= 14 {
        return Some(DetectedShape::Bmp);
    }
    None
}

static RSS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<rss[\s>]").unwrap());
static ATOM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<feed[^>]*xmlns\s*=\s*["']http://www\.w3\.org/2005/Atom"#).unwrap()
});
static HTML_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^(<!doctype\s+html|<html[\s>])").unwrap());

fn classify_text(prefix: &[u8]) -> Option<DetectedShape> {
    // Binary content (NUL bytes) is not plausibly text.
    if prefix.is_empty() || prefix.contains(&0) {
        return None;
    }

    let trimmed = trim_leading(prefix);
    match trimmed.first() {
        Some(b'{') | Some(b'[') => return Some(DetectedShape::JsonLike),
        Some(b'<') => {
            if HTML_RE.is_match(trimmed) {
                return Some(DetectedShape::Html);
            }
            if trimmed.starts_with(b"<?xml") || trimmed.starts_with(b"<!") {
                if RSS_RE.is_match(prefix) {
                    return Some(DetectedShape::Rss);
                }
                if ATOM_RE.is_match(prefix) {
                    return Some(DetectedShape::Atom);
                }
                return Some(DetectedShape::Xml);
            }
            if RSS_RE.is_match(prefix) {
                return Some(DetectedShape::Rss);
            }
            if ATOM_RE.is_match(prefix) {
                return Some(DetectedShape::Atom);
            }
            // Other tag-leading content is ambiguous; don't guess.
            return None;
        }
        _ => {}
    }

    classify_delimited(prefix).map(DetectedShape::Delimited)
}

fn trim_leading(prefix: &[u8]) -> &[u8] {
    let mut rest = prefix;
    if rest.starts_with(b"\xEF\xBB\xBF") {
        rest = &rest[3..];
    }
    while let Some((b, tail)) = rest.split_first() {
        if b.is_ascii_whitespace() {
            rest = tail;
        } else {
            break;
        }
    }
    rest
}

/// Delimiter consistency: the same delimiter appearing the same non-zero
/// number of times on each of the first few non-empty lines. Tab beats
/// semicolon beats comma only through the declared order below — the first
/// consistent delimiter wins.
fn classify_delimited(prefix: &[u8]) -> Option<Delimiter> {
    const MAX_LINES: usize = 5;

    let text = std::str::from_utf8(prefix).ok()?;
    let mut lines = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(MAX_LINES + 1)
        .collect::<Vec<_>>();
    // The prefix may cut the last line mid-way; never judge a truncated line.
    if !text.ends_with('\n') && lines.len() > 1 {
        lines.pop();
    }
    if lines.len() < 2 {
        return None;
    }

    for (delim, ch) in [
        (Delimiter::Tab, '\t'),
        (Delimiter::Comma, ','),
        (Delimiter::Semicolon, ';'),
    ] {
        let counts: Vec<usize> = lines.iter().map(|l| l.matches(ch).count()).collect();
        if counts[0] > 0 && counts.iter().all(|&c| c == counts[0]) {
            return Some(delim);
        }
    }
    None
}
