//! Artifact workspaces: scoped storage for side-files of one conversion.
//!
//! A workspace receives everything a conversion produces besides the result
//! itself — extracted images, a copy of the source, the rendered Markdown —
//! and owns the storage lifecycle. It is backed either by a local directory
//! or by a pluggable [`StorageBackend`] (with a best-effort local mirror for
//! debuggability). Disposal follows the configured policy and is guarded by
//! a single-use exchange, so double-dispose is harmless.

use crate::descriptor::{resolve_mime, StreamDescriptor};
use crate::error::ConvertError;
use crate::storage::{BlobUpload, StorageBackend, StorageError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Generates a workspace name from the source descriptor.
pub type WorkspaceNameGenerator = Arc<dyn Fn(&StreamDescriptor) -> String + Send + Sync>;

/// Maps a workspace name to the backend-relative directory reported for it.
pub type DirectoryFormatter = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Constructs a storage backend for a named workspace.
pub type StorageFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn StorageBackend>, StorageError> + Send + Sync>;

/// How a workspace allocates and names its storage.
#[derive(Clone, Default)]
pub struct WorkspaceOptions {
    /// Explicit caller-provided directory. Honoured verbatim and never
    /// auto-deleted, regardless of the disposal policy.
    pub directory: Option<PathBuf>,
    /// Use a stable per-document folder instead of a random suffix.
    pub keep_directory: bool,
    /// Custom workspace name generator; sanitised stem + random suffix when
    /// absent.
    pub name_generator: Option<WorkspaceNameGenerator>,
    /// Custom backend directory scheme; `artifacts/<name>` when absent.
    pub directory_formatter: Option<DirectoryFormatter>,
    /// Root for auto-allocated local directories; system temp when absent.
    pub local_root: Option<PathBuf>,
}

impl std::fmt::Debug for WorkspaceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceOptions")
            .field("directory", &self.directory)
            .field("keep_directory", &self.keep_directory)
            .field("name_generator", &self.name_generator.as_ref().map(|_| "<fn>"))
            .field("directory_formatter", &self.directory_formatter.as_ref().map(|_| "<fn>"))
            .field("local_root", &self.local_root)
            .finish()
    }
}

/// Storage-side behaviour of a workspace.
#[derive(Clone)]
pub struct StorageOptions {
    /// Backend factory; local-only workspace when absent.
    pub factory: Option<StorageFactory>,
    /// Delete the workspace directory (backend and local) on dispose.
    pub delete_on_dispose: bool,
    /// The workspace owns the backend and disposes it exactly once.
    pub dispose_backend: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            factory: None,
            delete_on_dispose: true,
            dispose_backend: true,
        }
    }
}

impl std::fmt::Debug for StorageOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageOptions")
            .field("factory", &self.factory.as_ref().map(|_| "<fn>"))
            .field("delete_on_dispose", &self.delete_on_dispose)
            .field("dispose_backend", &self.dispose_backend)
            .finish()
    }
}

/// Scoped storage area for one conversion's side-files.
pub struct ArtifactWorkspace {
    name: String,
    local_dir: PathBuf,
    /// Caller supplied the directory; never auto-delete it.
    explicit_dir: bool,
    backend: Option<Arc<dyn StorageBackend>>,
    backend_dir: Option<String>,
    delete_on_dispose: bool,
    owns_backend: bool,
    disposed: AtomicBool,
}

impl ArtifactWorkspace {
    /// Create a workspace per the configured options.
    ///
    /// Resolution order: an explicit directory wins; otherwise a local
    /// directory named from the descriptor's sanitised stem (random suffix
    /// unless `keep_directory`); with a backend factory the backend is
    /// constructed eagerly and a local mirror directory is still allocated.
    pub async fn create(
        descriptor: &StreamDescriptor,
        workspace: &WorkspaceOptions,
        storage: &StorageOptions,
    ) -> Result<ArtifactWorkspace, ConvertError> {
        let name = match &workspace.name_generator {
            Some(generate) => generate(descriptor),
            None => format!("{}-{}", sanitize_stem(descriptor), random_suffix()),
        };

        // Backend first: a factory failure must not leave a local directory
        // behind.
        let (backend, backend_dir) = match &storage.factory {
            Some(factory) => {
                let backend = factory(&name).map_err(|e| ConvertError::WorkspaceFailed {
                    name: name.clone(),
                    detail: format!("storage backend construction failed: {e}"),
                })?;
                let dir = match &workspace.directory_formatter {
                    Some(format) => format(&name),
                    None => format!("artifacts/{name}"),
                };
                (Some(backend), Some(dir))
            }
            None => (None, None),
        };

        let (local_dir, explicit_dir) = match &workspace.directory {
            Some(dir) => (dir.clone(), true),
            None => {
                let root = workspace
                    .local_root
                    .clone()
                    .unwrap_or_else(std::env::temp_dir);
                let folder = if workspace.keep_directory {
                    sanitize_stem(descriptor)
                } else {
                    name.clone()
                };
                (root.join(folder), false)
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&local_dir).await {
            // An owned backend must not outlive a failed construction.
            if storage.dispose_backend {
                if let Some(backend) = &backend {
                    backend.dispose().await;
                }
            }
            return Err(ConvertError::WorkspaceFailed {
                name,
                detail: format!("could not create directory '{}': {e}", local_dir.display()),
            });
        }

        debug!(
            "workspace '{name}' ready (local: {}, backend: {})",
            local_dir.display(),
            backend_dir.as_deref().unwrap_or("-")
        );

        Ok(ArtifactWorkspace {
            name,
            local_dir,
            explicit_dir,
            backend,
            backend_dir,
            delete_on_dispose: storage.delete_on_dispose,
            owns_backend: storage.dispose_backend,
            disposed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local directory of this workspace (the mirror, when a backend exists).
    pub fn local_dir(&self) -> &Path {
        &self.local_dir
    }

    /// The addressable directory callers should report: backend-relative
    /// when a backend exists, else the local path.
    pub fn reported_directory(&self) -> String {
        self.backend_dir
            .clone()
            .unwrap_or_else(|| self.local_dir.to_string_lossy().into_owned())
    }

    /// Persist a byte payload; returns the addressable path of the artifact.
    ///
    /// With a backend configured, the backend write is authoritative and a
    /// local mirror copy is attempted best-effort. Without one, the bytes go
    /// straight to the local directory.
    pub async fn persist_binary(
        &self,
        bytes: &[u8],
        file_name: &str,
        mime_type: Option<&str>,
    ) -> Result<String, ConvertError> {
        let mime = resolve_mime(mime_type, file_name);
        if let (Some(backend), Some(dir)) = (&self.backend, &self.backend_dir) {
            let upload = BlobUpload {
                directory: dir.clone(),
                file_name: file_name.to_string(),
                mime_type: mime,
            };
            let meta = backend.upload_bytes(bytes, &upload).await.map_err(|e| {
                ConvertError::WorkspaceFailed {
                    name: self.name.clone(),
                    detail: format!("upload of '{file_name}' failed: {e}"),
                }
            })?;
            self.mirror_locally(file_name, bytes).await;
            Ok(meta.path)
        } else {
            let path = self.local_dir.join(file_name);
            tokio::fs::write(&path, bytes).await.map_err(|e| {
                ConvertError::WorkspaceFailed {
                    name: self.name.clone(),
                    detail: format!("write of '{file_name}' failed: {e}"),
                }
            })?;
            Ok(path.to_string_lossy().into_owned())
        }
    }

    /// Persist a UTF-8 text payload.
    pub async fn persist_text(
        &self,
        text: &str,
        file_name: &str,
        mime_type: Option<&str>,
    ) -> Result<String, ConvertError> {
        self.persist_binary(text.as_bytes(), file_name, mime_type)
            .await
    }

    /// Persist a copy of an existing local file.
    pub async fn persist_file(
        &self,
        source: &Path,
        file_name: &str,
        mime_type: Option<&str>,
    ) -> Result<String, ConvertError> {
        let bytes = tokio::fs::read(source)
            .await
            .map_err(|e| ConvertError::WorkspaceFailed {
                name: self.name.clone(),
                detail: format!("could not read '{}': {e}", source.display()),
            })?;
        self.persist_binary(&bytes, file_name, mime_type).await
    }

    // Mirror writes are debug aids; the backend copy is authoritative, so
    // failures here are logged and swallowed.
    async fn mirror_locally(&self, file_name: &str, bytes: &[u8]) {
        let path = self.local_dir.join(file_name);
        if let Err(e) = tokio::fs::write(&path, bytes).await {
            warn!("local mirror write of '{file_name}' failed (ignored): {e}");
        }
    }

    /// Tear the workspace down per policy.
    ///
    /// Idempotent. All removals are best-effort: I/O failures during cleanup
    /// are logged, never propagated. An explicit caller-provided directory is
    /// never deleted. An owned backend is disposed exactly once.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        if self.delete_on_dispose {
            if let (Some(backend), Some(dir)) = (&self.backend, &self.backend_dir) {
                if let Err(e) = backend.delete_directory(dir).await {
                    warn!("backend delete of '{dir}' failed (ignored): {e}");
                }
            }
            if !self.explicit_dir {
                if let Err(e) = tokio::fs::remove_dir_all(&self.local_dir).await {
                    warn!(
                        "removal of workspace directory '{}' failed (ignored): {e}",
                        self.local_dir.display()
                    );
                }
            }
        }

        if self.owns_backend {
            if let Some(backend) = &self.backend {
                backend.dispose().await;
            }
        }
    }
}

impl std::fmt::Debug for ArtifactWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactWorkspace")
            .field("name", &self.name)
            .field("local_dir", &self.local_dir)
            .field("backend_dir", &self.backend_dir)
            .field("delete_on_dispose", &self.delete_on_dispose)
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Sanitised stem of the descriptor's file name, path, or URL.
///
/// Keeps `[A-Za-z0-9._-]`, maps everything else to `_`, caps at 64 chars,
/// falls back to `"document"`.
pub fn sanitize_stem(descriptor: &StreamDescriptor) -> String {
    let raw = descriptor
        .file_name
        .as_deref()
        .or(descriptor.local_path.as_deref())
        .or(descriptor.url.as_deref())
        .unwrap_or("document");

    let base = raw
        .rsplit(['/', '\\'])
        .find(|s| !s.is_empty())
        .unwrap_or("document");
    let stem = base.rsplit_once('.').map(|(s, _)| s).unwrap_or(base);

    let mut out: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    if out.trim_matches(['_', '.']).is_empty() {
        out = "document".to_string();
    }
    out
}

fn random_suffix() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}
