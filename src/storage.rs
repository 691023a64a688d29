//! Pluggable storage backend contract for artifact persistence.
//!
//! The core never depends on a concrete backend (S3, blob store, ...); it
//! depends only on this narrow upload/delete interface. A workspace with no
//! backend writes straight to its local directory instead.

use async_trait::async_trait;
use std::path::Path;

/// Addressing information for one upload.
#[derive(Debug, Clone)]
pub struct BlobUpload {
    /// Backend-relative directory the blob goes under.
    pub directory: String,
    /// File name within `directory`.
    pub file_name: String,
    /// Resolved mime type of the content.
    pub mime_type: String,
}

/// What the backend reports back about a stored blob.
#[derive(Debug, Clone)]
pub struct BlobMetadata {
    /// Backend-addressable path or URL of the stored blob.
    pub path: String,
    /// Stored byte length.
    pub length: u64,
}

/// Error type for backend operations.
///
/// Backends are external collaborators; the core treats their failures as
/// opaque strings wrapped into [`crate::error::ConvertError`] where fatal.
pub type StorageError = Box<dyn std::error::Error + Send + Sync>;

/// A pluggable artifact store.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store a byte payload.
    async fn upload_bytes(
        &self,
        bytes: &[u8],
        upload: &BlobUpload,
    ) -> Result<BlobMetadata, StorageError>;

    /// Store a text payload (UTF-8).
    async fn upload_text(
        &self,
        text: &str,
        upload: &BlobUpload,
    ) -> Result<BlobMetadata, StorageError> {
        self.upload_bytes(text.as_bytes(), upload).await
    }

    /// Store the contents of a local file.
    async fn upload_file(
        &self,
        path: &Path,
        upload: &BlobUpload,
    ) -> Result<BlobMetadata, StorageError> {
        let bytes = tokio::fs::read(path).await?;
        self.upload_bytes(&bytes, upload).await
    }

    /// Recursively delete a backend-relative directory.
    async fn delete_directory(&self, path: &str) -> Result<(), StorageError>;

    /// Release backend resources. Called at most once by a workspace that
    /// owns its backend.
    async fn dispose(&self) {}
}
