//! Multipart uploads and the per-part writer.
//!
//! An upload is registered in memory when the gateway initiates it; each
//! part streams through a [`MultipartPartWriter`] into a part-scoped file
//! keyed by the upload's uuid and the part number. Completing a part
//! records its size, etag, and checksum on the upload entry; assembling the
//! parts into a final committed version is the gateway's
//! `complete_multipart` flow and happens outside this writer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::checksums::StreamingChecksum;
use crate::content::{AppendHandle, ContentStore, remove_file_quiet};
use crate::error::{StoreError, StoreResult};

/// Largest part number accepted for a multipart upload.
const MAX_PART_NUMBER: u32 = 10_000;

// ---------------------------------------------------------------------------
// MultipartUpload / UploadPart
// ---------------------------------------------------------------------------

/// An in-progress multipart upload.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    /// Unique identifier for this upload (the simple-hex rendering of
    /// [`MultipartUpload::upload_uuid`]).
    pub upload_id: String,
    /// The uuid keying the upload's part files on disk.
    pub upload_uuid: Uuid,
    /// The bucket this upload targets.
    pub bucket_id: String,
    /// The object name this upload will create.
    pub key: String,
    /// When the upload was initiated.
    pub initiated: DateTime<Utc>,
    /// Parts uploaded so far, keyed by part number (1-based).
    pub parts: BTreeMap<u32, UploadPart>,
}

impl MultipartUpload {
    /// Register a new upload for `(bucket, key)`.
    #[must_use]
    pub(crate) fn new(bucket_id: impl Into<String>, key: impl Into<String>) -> Self {
        let upload_uuid = Uuid::new_v4();
        Self {
            upload_id: upload_uuid.simple().to_string(),
            upload_uuid,
            bucket_id: bucket_id.into(),
            key: key.into(),
            initiated: Utc::now(),
            parts: BTreeMap::new(),
        }
    }

    /// Get a part by its number.
    #[must_use]
    pub fn get_part(&self, part_number: u32) -> Option<&UploadPart> {
        self.parts.get(&part_number)
    }

    /// The number of parts uploaded so far.
    #[must_use]
    pub fn parts_count(&self) -> usize {
        self.parts.len()
    }

    /// The total size of all uploaded parts.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.parts.values().map(|p| p.size).sum()
    }
}

/// A single recorded part within a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    /// The part number (1-based, up to 10 000).
    pub part_number: u32,
    /// The entity tag recorded for this part.
    pub etag: String,
    /// Size of this part in bytes.
    pub size: u64,
    /// Hex MD5 of the part body as written.
    pub checksum: String,
    /// When this part was uploaded.
    pub last_modified: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// MultipartPartWriter
// ---------------------------------------------------------------------------

/// A handle streaming the body of one multipart part.
///
/// Mirrors the atomic writer's streaming contract (monotonic offsets,
/// poisoning on I/O failure, cleanup on drop), but publishes into the
/// upload's in-memory part table instead of the versions table.
pub struct MultipartPartWriter {
    uploads: Arc<DashMap<String, MultipartUpload>>,
    upload_id: String,
    part_number: u32,
    path: PathBuf,
    handle: Option<AppendHandle>,
    checksum: StreamingChecksum,
    io_failed: bool,
    finished: bool,
}

impl std::fmt::Debug for MultipartPartWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartPartWriter")
            .field("upload_id", &self.upload_id)
            .field("part_number", &self.part_number)
            .field("io_failed", &self.io_failed)
            .finish_non_exhaustive()
    }
}

impl MultipartPartWriter {
    /// Prepare a writer for `(upload, part_number)`.
    ///
    /// Re-uploading a part number replaces the previously written part
    /// file.
    ///
    /// # Errors
    ///
    /// [`StoreError::UploadNotFound`] if the upload is not registered;
    /// [`StoreError::InvalidArgument`] if the part number is out of range.
    pub(crate) async fn open(
        uploads: Arc<DashMap<String, MultipartUpload>>,
        content: &ContentStore,
        upload_id: &str,
        part_number: u32,
    ) -> StoreResult<Self> {
        if part_number == 0 || part_number > MAX_PART_NUMBER {
            return Err(StoreError::invalid(format!(
                "part number {part_number} out of range 1..={MAX_PART_NUMBER}"
            )));
        }
        let upload_uuid = uploads
            .get(upload_id)
            .map(|entry| entry.upload_uuid)
            .ok_or_else(|| StoreError::UploadNotFound {
                upload_id: upload_id.to_owned(),
            })?;

        let path = content.part_path(upload_uuid, part_number);
        // Replace semantics for repeated part numbers.
        content.remove(&path).await?;
        let handle = content.open_for_append(&path).await?;

        trace!(upload_id, part_number, "prepared multipart part writer");

        Ok(Self {
            uploads,
            upload_id: upload_id.to_owned(),
            part_number,
            path,
            handle: Some(handle),
            checksum: StreamingChecksum::new(),
            io_failed: false,
            finished: false,
        })
    }

    /// The part number this writer streams.
    #[must_use]
    pub fn part_number(&self) -> u32 {
        self.part_number
    }

    /// Bytes processed so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.handle.as_ref().map_or(0, AppendHandle::written)
    }

    /// Append `data` at `offset`; same contract as the atomic writer.
    pub async fn process(&mut self, data: &[u8], offset: u64) -> StoreResult<()> {
        if self.io_failed {
            return Err(StoreError::Io(std::io::Error::other(
                "writer unusable after an earlier I/O failure",
            )));
        }
        let handle = self.handle.as_mut().ok_or_else(|| {
            StoreError::invalid("process called on a completed writer")
        })?;
        match handle.write_at(offset, data).await {
            Ok(()) => {
                self.checksum.update(data);
                Ok(())
            }
            Err(e @ StoreError::InvalidArgument { .. }) => Err(e),
            Err(e) => {
                self.io_failed = true;
                Err(e)
            }
        }
    }

    /// Record the finished part on its upload.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] if `accounted_size` does not match
    /// the processed byte count; [`StoreError::UploadNotFound`] if the
    /// upload was aborted while the part was streaming.
    pub async fn complete(
        mut self,
        accounted_size: u64,
        etag: impl Into<String>,
    ) -> StoreResult<UploadPart> {
        if self.io_failed {
            return Err(StoreError::Io(std::io::Error::other(
                "writer unusable after an earlier I/O failure",
            )));
        }
        let mut handle = self
            .handle
            .take()
            .ok_or_else(|| StoreError::invalid("complete called twice"))?;

        if let Err(e) = handle.sync_all().await {
            self.io_failed = true;
            return Err(e);
        }
        let written = handle.written();
        drop(handle);

        if accounted_size != written {
            return Err(StoreError::invalid(format!(
                "accounted size {accounted_size} does not match {written} bytes written"
            )));
        }

        let part = UploadPart {
            part_number: self.part_number,
            etag: etag.into(),
            size: written,
            checksum: self.checksum.finalize_hex(),
            last_modified: Utc::now(),
        };

        let mut upload = self.uploads.get_mut(&self.upload_id).ok_or_else(|| {
            StoreError::UploadNotFound {
                upload_id: self.upload_id.clone(),
            }
        })?;
        upload.parts.insert(self.part_number, part.clone());
        drop(upload);

        self.finished = true;
        debug!(
            upload_id = %self.upload_id,
            part_number = self.part_number,
            size = written,
            "recorded multipart part"
        );
        Ok(part)
    }
}

impl Drop for MultipartPartWriter {
    fn drop(&mut self) {
        if !self.finished {
            remove_file_quiet(&self.path);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
