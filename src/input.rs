//! Input resolution: normalise a user-supplied path or URL into a buffer
//! source plus descriptor hints.
//!
//! ## Why resolve before buffering?
//!
//! The disk buffer only understands byte streams; everything the origin
//! knows about the stream (file name, extension, the server's Content-Type)
//! must be harvested here, because it seeds the base descriptor that takes
//! precedence over content sniffing. Downloads honour the configured timeout
//! and stream the body into the disk buffer chunk-by-chunk, so the payload
//! is never held in memory and cancellation takes effect between chunks.

use crate::buffer::BufferSource;
use crate::cancel::CancelToken;
use crate::descriptor::{extension_of, StreamDescriptor};
use crate::error::ConvertError;
use futures::StreamExt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve an input string to a buffer source and its descriptor hints.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> Result<(BufferSource, StreamDescriptor), ConvertError> {
    if is_url(input) {
        download_url(input, timeout_secs, cancel).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(
    path_str: &str,
) -> Result<(BufferSource, StreamDescriptor), ConvertError> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(ConvertError::FileNotFound { path });
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConvertError::PermissionDenied { path });
        }
        Err(_) => return Err(ConvertError::FileNotFound { path }),
    };

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());
    let mut descriptor = StreamDescriptor::new().with_local_path(path_str);
    if let Some(name) = file_name {
        if let Some(ext) = extension_of(&name) {
            descriptor = descriptor.with_extension(ext);
        }
        descriptor = descriptor.with_file_name(name);
    }

    debug!("resolved local input: {}", path.display());
    Ok((BufferSource::File(file), descriptor))
}

async fn download_url(
    url: &str,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> Result<(BufferSource, StreamDescriptor), ConvertError> {
    cancel.check()?;
    info!("downloading input from: {url}");

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ConvertError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ConvertError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let mut descriptor = StreamDescriptor::new().with_url(url);
    if let Some((mime, charset)) = content_type_of(&response) {
        descriptor = descriptor.with_mime_type(mime);
        if let Some(cs) = charset {
            descriptor = descriptor.with_charset(cs);
        }
    }
    if let Some(name) = file_name_from_url(url) {
        if let Some(ext) = extension_of(&name) {
            descriptor = descriptor.with_extension(ext);
        }
        descriptor = descriptor.with_file_name(name);
    }

    // The body streams chunk-by-chunk into the disk buffer; the payload is
    // never held in memory, and the buffer's copy loop checks cancellation
    // between chunks.
    info!(
        "streaming {} from {url} into the disk buffer",
        response
            .content_length()
            .map_or_else(|| "body".to_string(), |n| format!("{n} bytes"))
    );
    let url_owned = url.to_string();
    let body = response.bytes_stream().map(move |item| {
        item.map(|bytes| bytes.to_vec()).map_err(|e| {
            if e.is_timeout() {
                ConvertError::DownloadTimeout {
                    url: url_owned.clone(),
                    secs: timeout_secs,
                }
            } else {
                ConvertError::DownloadFailed {
                    url: url_owned.clone(),
                    reason: e.to_string(),
                }
            }
        })
    });
    Ok((BufferSource::from_byte_stream(body), descriptor))
}

/// Extract `(mime, charset)` from the Content-Type header, if present.
fn content_type_of(response: &reqwest::Response) -> Option<(String, Option<String>)> {
    let header = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)?
        .to_str()
        .ok()?;
    let mut parts = header.split(';');
    let mime = parts.next()?.trim().to_ascii_lowercase();
    if mime.is_empty() {
        return None;
    }
    let charset = parts.find_map(|p| {
        let p = p.trim();
        p.strip_prefix("charset=")
            .map(|c| c.trim_matches('"').to_string())
    });
    Some((mime, charset))
}

/// Extract a reasonable file name from the URL path.
fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if !last.is_empty() && last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}
