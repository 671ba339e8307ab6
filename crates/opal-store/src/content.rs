//! Filesystem layout and file operations for version content.
//!
//! Content files live under the data path in a two-level directory fan-out
//! derived from the object uuid: the uuid is rendered as 32 lowercase hex
//! digits and split as `XX/YY/<rest>`, suffixed with the version id. This
//! spreads files across directories so no single directory degrades under
//! load, and makes `(uuid, version_id)` pairs map to distinct paths.
//!
//! Writers append through an [`AppendHandle`], which enforces strictly
//! monotonic offsets: a chunk must start exactly where the previous one
//! ended, so a finished file can never contain holes.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// ContentStore
// ---------------------------------------------------------------------------

/// Filesystem store for version content, rooted at the data path.
///
/// The store only derives paths and manipulates files; which file belongs
/// to which version is the metadata store's business.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Create a content store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The content path for a version: `XX/YY/<rest>_<version_id>`.
    #[must_use]
    pub fn version_path(&self, object_uuid: Uuid, version_id: &str) -> PathBuf {
        let (first, second, rest) = fan_out(object_uuid);
        self.root
            .join(first)
            .join(second)
            .join(format!("{rest}_{version_id}"))
    }

    /// The content path for one part of a multipart upload:
    /// `XX/YY/<rest>.<part_number>`, keyed by the upload's uuid.
    #[must_use]
    pub fn part_path(&self, upload_uuid: Uuid, part_number: u32) -> PathBuf {
        let (first, second, rest) = fan_out(upload_uuid);
        self.root
            .join(first)
            .join(second)
            .join(format!("{rest}.{part_number}"))
    }

    /// Create the parent directories of `path`.
    pub async fn ensure_parent_dirs(&self, path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Exclusively create `path` for writing and return an append handle.
    ///
    /// Fails if the file already exists; version paths are unique per
    /// `(uuid, version_id)`, so an existing file means a duplicate writer.
    pub async fn open_for_append(&self, path: &Path) -> StoreResult<AppendHandle> {
        self.ensure_parent_dirs(path).await?;
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        trace!(path = %path.display(), "opened content file");
        Ok(AppendHandle {
            file,
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Remove `path`, returning whether a file was actually removed.
    ///
    /// A missing file is not an error; the garbage collector relies on this
    /// to stay idempotent across crashes.
    pub async fn remove(&self, path: &Path) -> StoreResult<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                trace!(path = %path.display(), "removed content file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List every regular file under the root, recursively.
    pub async fn list_regular_files(&self) -> StoreResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if file_type.is_file() {
                    files.push(entry.path());
                }
            }
        }

        Ok(files)
    }
}

/// Split a uuid into the `(XX, YY, rest)` path components.
fn fan_out(uuid: Uuid) -> (String, String, String) {
    let hex = uuid.simple().to_string();
    (
        hex[0..2].to_owned(),
        hex[2..4].to_owned(),
        hex[4..].to_owned(),
    )
}

/// Best-effort synchronous removal, for writer drop paths.
///
/// A missing file is silent; any other failure is logged and swallowed so
/// the row-level cleanup can still proceed.
pub(crate) fn remove_file_quiet(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove content file");
        }
    }
}

// ---------------------------------------------------------------------------
// AppendHandle
// ---------------------------------------------------------------------------

/// An open content file accepting appends at strictly monotonic offsets.
#[derive(Debug)]
pub struct AppendHandle {
    file: File,
    path: PathBuf,
    written: u64,
}

impl AppendHandle {
    /// Append `data` at `offset`.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] if `offset` is not exactly the
    /// current high watermark (no bytes are written in that case), or
    /// [`StoreError::Io`] if the write itself fails.
    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> StoreResult<()> {
        if offset != self.written {
            return Err(StoreError::invalid(format!(
                "write offset {offset} does not match high watermark {}",
                self.written
            )));
        }
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Flush file contents to stable storage.
    pub async fn sync_all(&mut self) -> StoreResult<()> {
        self.file.sync_all().await?;
        Ok(())
    }

    /// Total bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// The path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
