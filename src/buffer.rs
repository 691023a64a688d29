//! Disk-backed rewindable buffering of an arbitrary source stream.
//!
//! ## Why buffer to disk?
//!
//! Dispatch tries many converters against the same bytes. A network or
//! in-memory stream can be read once; a disk file can hand out any number of
//! independent position-0 readers without holding the payload in memory.
//! [`DiskBuffer::from_stream`] materialises the source into a private file
//! inside its own temporary directory, and [`DiskBuffer::open_read`] opens a
//! fresh reader per converter probe. Readers never interfere: the backing
//! file is written once and read-only thereafter.

use crate::cancel::CancelToken;
use crate::error::ConvertError;
use futures::stream::{BoxStream, Stream, StreamExt};
use once_cell::sync::Lazy;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Copy chunk size bounds enforced by [`clamp_chunk_size`].
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Clamp a requested copy chunk size to the supported range.
pub fn clamp_chunk_size(requested: usize) -> usize {
    requested.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
}

/// Progress callback invoked after each chunk write with cumulative bytes.
pub type CopyProgress = dyn Fn(u64) + Send + Sync;

// Reusable copy chunks. Materialising N inputs should not allocate N fresh
// multi-megabyte buffers; a small pool is enough because copies are short.
const POOL_LIMIT: usize = 8;
static CHUNK_POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

fn acquire_chunk(size: usize) -> Vec<u8> {
    let mut chunk = CHUNK_POOL
        .lock()
        .map(|mut pool| pool.pop())
        .ok()
        .flatten()
        .unwrap_or_default();
    chunk.resize(size, 0);
    chunk
}

fn read_failed(e: std::io::Error) -> ConvertError {
    ConvertError::BufferFailed {
        detail: format!("read from source failed: {e}"),
    }
}

fn release_chunk(chunk: Vec<u8>) {
    if let Ok(mut pool) = CHUNK_POOL.lock() {
        if pool.len() < POOL_LIMIT {
            pool.push(chunk);
        }
    }
}

/// A source stream to be materialised into a [`DiskBuffer`].
///
/// Seekable variants are rewound to position 0 after the copy (best-effort)
/// so the caller can still read them independently.
pub enum BufferSource {
    /// In-memory payload.
    Memory(Cursor<Vec<u8>>),
    /// An already-open file.
    File(File),
    /// Any other async byte stream (pipe, decoder output). Not rewindable.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
    /// A chunked byte stream carrying its own typed errors (network body).
    /// Chunks go straight to the backing file; the whole payload is never
    /// held in memory. Not rewindable.
    Chunks {
        inner: BoxStream<'static, Result<Vec<u8>, ConvertError>>,
        pending: Vec<u8>,
        offset: usize,
    },
}

impl BufferSource {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        BufferSource::Memory(Cursor::new(bytes.into()))
    }

    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        BufferSource::Reader(Box::new(reader))
    }

    pub fn from_byte_stream(
        stream: impl Stream<Item = Result<Vec<u8>, ConvertError>> + Send + 'static,
    ) -> Self {
        BufferSource::Chunks {
            inner: stream.boxed(),
            pending: Vec::new(),
            offset: 0,
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ConvertError> {
        match self {
            BufferSource::Memory(c) => c.read(buf).await.map_err(read_failed),
            BufferSource::File(f) => f.read(buf).await.map_err(read_failed),
            BufferSource::Reader(r) => r.read(buf).await.map_err(read_failed),
            BufferSource::Chunks {
                inner,
                pending,
                offset,
            } => {
                while *offset >= pending.len() {
                    match inner.next().await {
                        Some(Ok(chunk)) => {
                            *pending = chunk;
                            *offset = 0;
                        }
                        Some(Err(e)) => return Err(e),
                        None => return Ok(0),
                    }
                }
                let n = buf.len().min(pending.len() - *offset);
                buf[..n].copy_from_slice(&pending[*offset..*offset + n]);
                *offset += n;
                Ok(n)
            }
        }
    }

    /// Best-effort rewind. Seek failures are swallowed: the buffer copy has
    /// already succeeded and the source is no longer load-bearing.
    async fn rewind(&mut self) {
        let result = match self {
            BufferSource::Memory(c) => c.rewind().await,
            BufferSource::File(f) => f.rewind().await,
            BufferSource::Reader(_) | BufferSource::Chunks { .. } => return,
        };
        if let Err(e) = result {
            debug!("source rewind failed (ignored): {e}");
        }
    }
}

/// Owns one immutable backing file inside a private temporary directory.
///
/// Invariants: `len()` is fixed at creation; [`Self::open_read`] may be
/// called any number of times and always yields an independent position-0
/// reader; [`Self::dispose`] is idempotent and removes both the file and its
/// directory.
pub struct DiskBuffer {
    dir: PathBuf,
    file_path: PathBuf,
    len: u64,
    disposed: AtomicBool,
}

impl DiskBuffer {
    /// Materialise `source` into a new disk buffer.
    ///
    /// * `extension_hint` — names the backing file (`buffer<ext>`) so tools
    ///   inspecting the temp directory see a meaningful name.
    /// * `chunk_size` — copy chunk size, clamped to [4 KiB, 4 MiB]; chunks
    ///   come from a shared pool rather than a fresh allocation per call.
    /// * `root` — parent for the private temp directory; system default when
    ///   `None`.
    /// * `progress` — invoked after each chunk write with cumulative bytes.
    ///
    /// On any copy failure the partially written file and its directory are
    /// removed before the error is returned. Cancellation is checked once
    /// per chunk.
    pub async fn from_stream(
        mut source: BufferSource,
        extension_hint: Option<&str>,
        chunk_size: usize,
        root: Option<&Path>,
        progress: Option<&CopyProgress>,
        cancel: &CancelToken,
    ) -> Result<DiskBuffer, ConvertError> {
        let temp = match root {
            Some(r) => tempfile::tempdir_in(r),
            None => tempfile::tempdir(),
        }
        .map_err(|e| ConvertError::BufferFailed {
            detail: format!("could not create buffer directory: {e}"),
        })?;
        // Ownership of the directory transfers to the DiskBuffer; disposal
        // is explicit (and idempotent) rather than drop-driven.
        let dir = temp.keep();

        let ext = extension_hint
            .and_then(crate::descriptor::normalize_extension)
            .unwrap_or_default();
        let file_path = dir.join(format!("buffer{ext}"));

        match copy_to(&mut source, &file_path, chunk_size, progress, cancel).await {
            Ok(len) => {
                source.rewind().await;
                debug!("buffered {len} bytes to {}", file_path.display());
                Ok(DiskBuffer {
                    dir,
                    file_path,
                    len,
                    disposed: AtomicBool::new(false),
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&file_path).await;
                let _ = tokio::fs::remove_dir_all(&dir).await;
                Err(e)
            }
        }
    }

    /// Fixed byte length of the buffered payload.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Path of the backing file. Read-only from the caller's perspective.
    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Open a fresh independent reader positioned at byte 0.
    pub async fn open_read(&self) -> std::io::Result<File> {
        File::open(&self.file_path).await
    }

    /// Read the first `max` bytes of the payload (for format sniffing).
    pub async fn read_prefix(&self, max: usize) -> std::io::Result<Vec<u8>> {
        let mut reader = self.open_read().await?;
        let mut buf = vec![0u8; max.min(self.len as usize)];
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    /// Delete the backing file and its directory.
    ///
    /// Idempotent: only the first call has effect. Removal failures are
    /// logged and swallowed; there is nothing a caller could do with them.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&self.file_path).await {
            warn!("failed to remove buffer file (ignored): {e}");
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!("failed to remove buffer directory (ignored): {e}");
        }
    }
}

impl std::fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferSource::Memory(c) => f
                .debug_tuple("Memory")
                .field(&format_args!("{} bytes", c.get_ref().len()))
                .finish(),
            BufferSource::File(_) => f.debug_tuple("File").finish(),
            BufferSource::Reader(_) => f.debug_tuple("Reader").finish(),
            BufferSource::Chunks { .. } => f.debug_tuple("Chunks").finish(),
        }
    }
}

impl std::fmt::Debug for DiskBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskBuffer")
            .field("file_path", &self.file_path)
            .field("len", &self.len)
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

async fn copy_to(
    source: &mut BufferSource,
    dest: &Path,
    chunk_size: usize,
    progress: Option<&CopyProgress>,
    cancel: &CancelToken,
) -> Result<u64, ConvertError> {
    let mut file = File::create(dest).await.map_err(|e| ConvertError::BufferFailed {
        detail: format!("could not create buffer file: {e}"),
    })?;

    let mut chunk = acquire_chunk(clamp_chunk_size(chunk_size));
    let mut total: u64 = 0;
    let result = loop {
        if cancel.is_cancelled() {
            break Err(ConvertError::Cancelled);
        }
        let n = match source.read(&mut chunk).await {
            Ok(0) => break Ok(total),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if let Err(e) = file.write_all(&chunk[..n]).await {
            break Err(ConvertError::BufferFailed {
                detail: format!("write to buffer failed: {e}"),
            });
        }
        total += n as u64;
        if let Some(cb) = progress {
            cb(total);
        }
    };
    release_chunk(chunk);

    if result.is_ok() {
        file.flush().await.map_err(|e| ConvertError::BufferFailed {
            detail: format!("flush failed: {e}"),
        })?;
    }
    result
}
