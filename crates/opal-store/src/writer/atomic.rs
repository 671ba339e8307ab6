//! The atomic writer: stages a PUT body and publishes it as a new
//! committed version.
//!
//! Opening the writer performs the prepare step: the object row for
//! `(bucket, name)` is resolved or created, a fresh version row is inserted
//! in state OPEN, and the content file is created exclusively at its
//! derived path. Because the version id is part of the path, concurrent
//! writers to the same name never touch each other's files; the order of
//! their commits decides which version ends up latest.
//!
//! Either `complete` publishes the full version (COMMITTED row plus fully
//! synced file), or the writer leaves the bucket unchanged on failure,
//! cancellation, or drop: the row transitions to DELETED and the partial
//! file is removed.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::checksums::StreamingChecksum;
use crate::content::{AppendHandle, ContentStore, remove_file_quiet};
use crate::error::{StoreError, StoreResult};
use crate::meta::MetaStore;
use crate::meta::versions::{CommitDecision, CommitRequest};
use crate::model::object::VersionedObject;

use super::{CompleteParams, Completion};

/// A handle staging one new object version.
pub struct AtomicWriter {
    meta: Arc<MetaStore>,
    bucket_id: String,
    key: String,
    object_uuid: Uuid,
    version_row_id: i64,
    version_id: String,
    path: PathBuf,
    handle: Option<AppendHandle>,
    checksum: StreamingChecksum,
    io_failed: bool,
    finished: bool,
}

impl std::fmt::Debug for AtomicWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicWriter")
            .field("bucket_id", &self.bucket_id)
            .field("key", &self.key)
            .field("version_id", &self.version_id)
            .field("io_failed", &self.io_failed)
            .finish_non_exhaustive()
    }
}

impl AtomicWriter {
    /// Prepare a writer for `(bucket, key)`.
    ///
    /// # Errors
    ///
    /// [`StoreError::BucketNotFound`] if the bucket does not exist or is
    /// tombstoned; database or I/O errors otherwise.
    pub(crate) async fn open(
        meta: Arc<MetaStore>,
        content: &ContentStore,
        bucket_id: &str,
        key: &str,
    ) -> StoreResult<Self> {
        let bucket = meta
            .buckets()
            .get(bucket_id)?
            .filter(|b| !b.deleted)
            .ok_or_else(|| StoreError::BucketNotFound {
                bucket: bucket_id.to_owned(),
            })?;

        let object = meta.objects().get_or_create(&bucket.bucket_id, key)?;
        let version_id = Uuid::new_v4().simple().to_string();
        let version_row_id = meta
            .versions()
            .insert(&VersionedObject::open(object.uuid, &version_id))?;

        let path = content.version_path(object.uuid, &version_id);
        let handle = content.open_for_append(&path).await?;

        debug!(
            bucket = %bucket.bucket_id,
            key,
            version_id = %version_id,
            "prepared atomic writer"
        );

        Ok(Self {
            meta,
            bucket_id: bucket.bucket_id,
            key: key.to_owned(),
            object_uuid: object.uuid,
            version_row_id,
            version_id,
            path,
            handle: Some(handle),
            checksum: StreamingChecksum::new(),
            io_failed: false,
            finished: false,
        })
    }

    /// The version id this writer will publish under.
    #[must_use]
    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// The uuid of the object being written.
    #[must_use]
    pub fn object_uuid(&self) -> Uuid {
        self.object_uuid
    }

    /// Bytes processed so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.handle.as_ref().map_or(0, AppendHandle::written)
    }

    /// Append `data` at `offset`.
    ///
    /// Offsets must be strictly monotonic: `offset` has to equal the number
    /// of bytes processed so far. An offset violation leaves the writer
    /// usable; an I/O failure poisons it, and every later call
    /// short-circuits until the writer is dropped.
    pub async fn process(&mut self, data: &[u8], offset: u64) -> StoreResult<()> {
        if self.io_failed {
            return Err(poisoned());
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

    /// Publish the staged version.
    ///
    /// The content file is synced and closed, the accounted size is
    /// verified against the processed total, and the `if_match` /
    /// `if_nomatch` preconditions are evaluated against the current latest
    /// committed version in the same transaction that flips the row to
    /// COMMITTED. On a failed precondition the staged version is discarded
    /// and [`Completion::Canceled`] is returned; the object's latest
    /// version is untouched.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] if `accounted_size` does not match
    /// the processed byte count; I/O or database errors otherwise. On any
    /// error the staged version is cleaned up when the writer drops.
    pub async fn complete(mut self, params: CompleteParams) -> StoreResult<Completion> {
        if self.io_failed {
            return Err(poisoned());
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

        if params.accounted_size != written {
            return Err(StoreError::invalid(format!(
                "accounted size {} does not match {} bytes written",
                params.accounted_size, written
            )));
        }

        let checksum = self.checksum.finalize_hex();
        let decision = self.meta.versions().commit(&CommitRequest {
            id: self.version_row_id,
            object_id: self.object_uuid,
            checksum: &checksum,
            size: written,
            etag: &params.etag,
            mtime: params.mtime,
            attrs: params.attrs.as_deref(),
            if_match: params.if_match.as_deref(),
            if_nomatch: params.if_nomatch.as_deref(),
        })?;

        match decision {
            CommitDecision::Committed(version) => {
                self.finished = true;
                debug!(
                    bucket = %self.bucket_id,
                    key = %self.key,
                    version_id = %self.version_id,
                    size = written,
                    "committed version"
                );
                Ok(Completion::Committed(version))
            }
            CommitDecision::PreconditionFailed => {
                // The row is already DELETED; drop the staged file as well.
                let _ = tokio::fs::remove_file(&self.path).await;
                self.finished = true;
                debug!(
                    bucket = %self.bucket_id,
                    key = %self.key,
                    version_id = %self.version_id,
                    "canceled commit on failed precondition"
                );
                Ok(Completion::Canceled)
            }
        }
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Abandoned before publication: retire the row and the partial file.
        match self.meta.versions().mark_deleted(self.version_row_id) {
            Ok(_) => {}
            Err(e) => warn!(
                version_id = %self.version_id,
                error = %e,
                "failed to retire abandoned version row"
            ),
        }
        remove_file_quiet(&self.path);
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other(
        "writer unusable after an earlier I/O failure",
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
