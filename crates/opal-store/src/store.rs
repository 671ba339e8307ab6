//! The storage backend facade.
//!
//! [`Store`] wires the metadata store, the content store, and the garbage
//! collector together and exposes the operations the S3 gateway dispatches
//! to: the user/bucket catalog, object create/read/delete, the writers, and
//! the multipart upload registry.

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::content::ContentStore;
use crate::error::{StoreError, StoreResult};
use crate::gc::GarbageCollector;
use crate::meta::MetaStore;
use crate::model::bucket::{Bucket, BucketFlags};
use crate::model::object::{Object, ObjectState, VersionedObject};
use crate::model::user::User;
use crate::writer::{AtomicWriter, MultipartPartWriter, MultipartUpload};

// ---------------------------------------------------------------------------
// BucketCreate / ObjectData
// ---------------------------------------------------------------------------

/// Result of [`Store::bucket_create`].
#[derive(Debug, Clone)]
pub struct BucketCreate {
    /// The created (or pre-existing) bucket.
    pub bucket: Bucket,
    /// Whether a bucket with this name already existed; if so, `bucket` is
    /// the existing one and nothing was created.
    pub existed: bool,
}

/// A readable, committed object version resolved by [`Store::object_read`].
///
/// The path was obtained under the metadata lookup; because committed
/// versions are immutable and the garbage collector only unlinks content of
/// rows already transitioned to DELETED, the file stays valid for the
/// lifetime of this handle's use by a committed reader.
#[derive(Debug, Clone)]
pub struct ObjectData {
    /// The object row.
    pub object: Object,
    /// The resolved committed version.
    pub version: VersionedObject,
    /// The content file path.
    pub path: PathBuf,
}

impl ObjectData {
    /// Open the content file for reading.
    pub async fn open(&self) -> StoreResult<tokio::fs::File> {
        Ok(tokio::fs::File::open(&self.path).await?)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The single-node object storage backend.
pub struct Store {
    config: StoreConfig,
    meta: Arc<MetaStore>,
    content: Arc<ContentStore>,
    gc: Arc<GarbageCollector>,
    uploads: Arc<DashMap<String, MultipartUpload>>,
    gc_task: JoinHandle<()>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("data_path", &self.config.data_path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the backend at the configured data path.
    ///
    /// Creates the data directory if needed, opens (and migrates) the
    /// metadata database, and starts the garbage-collector task.
    pub async fn open(config: StoreConfig) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&config.data_path).await?;
        let meta = Arc::new(MetaStore::open(&config.data_path)?);
        let content = Arc::new(ContentStore::new(&config.data_path));
        let gc = GarbageCollector::new(Arc::clone(&meta), Arc::clone(&content), &config);
        let gc_task = gc.spawn();

        info!(data_path = %config.data_path.display(), "opened object store");

        Ok(Self {
            config,
            meta,
            content,
            gc,
            uploads: Arc::new(DashMap::new()),
            gc_task,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The metadata store.
    #[must_use]
    pub fn metadata(&self) -> &MetaStore {
        &self.meta
    }

    /// The content store.
    #[must_use]
    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// The garbage collector.
    #[must_use]
    pub fn gc(&self) -> &GarbageCollector {
        &self.gc
    }

    // -----------------------------------------------------------------------
    // User catalog
    // -----------------------------------------------------------------------

    /// Load a user by id.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] if no such user exists.
    pub fn get_user(&self, user_id: &str) -> StoreResult<User> {
        self.meta
            .users()
            .get(user_id)?
            .ok_or_else(|| StoreError::UserNotFound {
                user_id: user_id.to_owned(),
            })
    }

    /// Load the user owning an access key.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] if the key is not registered.
    pub fn get_user_by_access_key(&self, access_key: &str) -> StoreResult<User> {
        self.meta
            .users()
            .get_by_access_key(access_key)?
            .ok_or_else(|| StoreError::UserNotFound {
                user_id: access_key.to_owned(),
            })
    }

    /// Store a user under optimistic concurrency; the first store writes
    /// version 1. Returns the stored record with the bumped version.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when the caller's read version is stale.
    pub fn store_user(&self, user: &User) -> StoreResult<User> {
        self.meta.users().store(user)
    }

    /// Remove a user.
    pub fn remove_user(&self, user_id: &str) -> StoreResult<()> {
        self.meta.users().remove(user_id)
    }

    /// Flush accumulated user stats. Not implemented by this backend.
    pub fn flush_user_stats(&self, _user_id: &str) -> StoreResult<()> {
        Err(StoreError::Unsupported {
            operation: "flush_user_stats",
        })
    }

    /// Read detailed usage stats. Not implemented by this backend.
    pub fn read_user_usage(&self, _user_id: &str) -> StoreResult<()> {
        Err(StoreError::Unsupported {
            operation: "read_user_usage",
        })
    }

    /// Verify an MFA one-time password.
    ///
    /// Always succeeds; MFA devices are stored as opaque metadata and not
    /// validated here.
    pub fn verify_mfa(&self, _user_id: &str, _otp: &str) -> StoreResult<bool> {
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Bucket catalog
    // -----------------------------------------------------------------------

    /// Create a bucket owned by `owner_id`.
    ///
    /// If a live bucket with this name already exists, it is returned with
    /// `existed = true` and nothing is created. Enabling object lock also
    /// enables versioning, matching S3 semantics.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] if the owner does not exist.
    pub fn bucket_create(
        &self,
        name: &str,
        owner_id: &str,
        object_lock_enabled: bool,
    ) -> StoreResult<BucketCreate> {
        self.get_user(owner_id)?;

        if let Some(existing) = self.meta.buckets().get_by_name(name)? {
            return Ok(BucketCreate {
                bucket: existing,
                existed: true,
            });
        }

        let bucket_id = Uuid::new_v4().to_string();
        let mut bucket = Bucket::new(bucket_id.clone(), name, owner_id);
        bucket.marker = Some(bucket_id);
        if object_lock_enabled {
            bucket.flags
                .insert(BucketFlags::VERSIONED | BucketFlags::OBJ_LOCK_ENABLED);
        }

        let stored = self.meta.buckets().store(&bucket)?;
        info!(bucket = %stored.bucket_name, bucket_id = %stored.bucket_id, "bucket created");
        Ok(BucketCreate {
            bucket: stored,
            existed: false,
        })
    }

    /// Whether a live bucket with this name exists.
    pub fn bucket_exists(&self, name: &str) -> StoreResult<bool> {
        self.meta.buckets().exists(name)
    }

    /// All live buckets, ordered by name.
    pub fn bucket_list(&self) -> StoreResult<Vec<Bucket>> {
        self.meta.buckets().list()
    }

    /// Live buckets of one owner within `(marker, end_marker)`, at most
    /// `max` of them.
    pub fn list_buckets(
        &self,
        owner_id: &str,
        marker: Option<&str>,
        end_marker: Option<&str>,
        max: Option<usize>,
    ) -> StoreResult<Vec<Bucket>> {
        self.meta
            .buckets()
            .list_by_owner(owner_id, marker, end_marker, max)
    }

    /// Store a bucket under optimistic concurrency.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] when the caller's read version is stale.
    pub fn store_bucket(&self, bucket: &Bucket) -> StoreResult<Bucket> {
        self.meta.buckets().store(bucket)
    }

    /// Logically delete a bucket.
    ///
    /// Appends a delete marker to every object and sets the tombstone; the
    /// garbage collector reclaims content and rows afterwards. New writes
    /// to the bucket are refused from this point on.
    pub fn bucket_delete(&self, bucket_id: &str) -> StoreResult<()> {
        self.meta.buckets().mark_deleted(bucket_id)?;
        info!(bucket_id, "bucket marked deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    /// Resolve or create the object row for `(bucket, key)`.
    ///
    /// # Errors
    ///
    /// [`StoreError::BucketNotFound`] if the bucket does not exist or is
    /// tombstoned.
    pub fn object_create(&self, bucket_id: &str, key: &str) -> StoreResult<Object> {
        let bucket = self.live_bucket(bucket_id)?;
        self.meta.objects().get_or_create(&bucket.bucket_id, key)
    }

    /// Resolve `(bucket, key[, version_id])` to a committed version and its
    /// content path.
    ///
    /// # Errors
    ///
    /// [`StoreError::ObjectNotFound`] if the object is absent or its latest
    /// version is a delete marker; [`StoreError::VersionNotFound`] if a
    /// requested version id does not resolve to a committed regular
    /// version.
    pub fn object_read(
        &self,
        bucket_id: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreResult<ObjectData> {
        let bucket = self.live_bucket(bucket_id)?;
        let object = self
            .meta
            .objects()
            .get_by_name(&bucket.bucket_id, key)?
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: bucket_id.to_owned(),
                key: key.to_owned(),
            })?;

        let version = match version_id {
            Some(version_id) => self
                .meta
                .versions()
                .get_by_version_id(object.uuid, version_id)?
                .filter(|v| v.is_committed() && !v.is_delete_marker())
                .ok_or_else(|| StoreError::VersionNotFound {
                    key: key.to_owned(),
                    version_id: version_id.to_owned(),
                })?,
            None => self
                .meta
                .versions()
                .get_last_committed(object.uuid)?
                .filter(|v| !v.is_delete_marker())
                .ok_or_else(|| StoreError::ObjectNotFound {
                    bucket: bucket_id.to_owned(),
                    key: key.to_owned(),
                })?,
        };

        let path = self.content.version_path(object.uuid, &version.version_id);
        Ok(ObjectData {
            object,
            version,
            path,
        })
    }

    /// Logically delete an object.
    ///
    /// On a versioned bucket this appends a committed delete marker; on an
    /// un-versioned bucket the latest committed version transitions to
    /// DELETED. Returns the marker or the deleted version.
    pub fn object_delete(&self, bucket_id: &str, key: &str) -> StoreResult<VersionedObject> {
        let bucket = self.live_bucket(bucket_id)?;
        let object = self
            .meta
            .objects()
            .get_by_name(&bucket.bucket_id, key)?
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: bucket_id.to_owned(),
                key: key.to_owned(),
            })?;

        if bucket.is_versioned() {
            let last = self
                .meta
                .versions()
                .get_last(object.uuid)?
                .ok_or_else(|| StoreError::ObjectNotFound {
                    bucket: bucket_id.to_owned(),
                    key: key.to_owned(),
                })?;
            let mut marker = last.delete_marker(ObjectState::Committed);
            marker.id = self.meta.versions().insert(&marker)?;
            Ok(marker)
        } else {
            let last = self
                .meta
                .versions()
                .get_last_committed(object.uuid)?
                .filter(|v| !v.is_delete_marker())
                .ok_or_else(|| StoreError::ObjectNotFound {
                    bucket: bucket_id.to_owned(),
                    key: key.to_owned(),
                })?;
            self.meta.versions().mark_deleted(last.id)?;
            self.meta
                .versions()
                .get(last.id)?
                .ok_or_else(|| StoreError::VersionNotFound {
                    key: key.to_owned(),
                    version_id: last.version_id.clone(),
                })
        }
    }

    // -----------------------------------------------------------------------
    // Writers
    // -----------------------------------------------------------------------

    /// Open an atomic writer for `(bucket, key)`.
    pub async fn writer_open_atomic(&self, bucket_id: &str, key: &str) -> StoreResult<AtomicWriter> {
        AtomicWriter::open(Arc::clone(&self.meta), &self.content, bucket_id, key).await
    }

    /// Register a multipart upload for `(bucket, key)` and return it.
    ///
    /// # Errors
    ///
    /// [`StoreError::BucketNotFound`] if the bucket does not exist or is
    /// tombstoned.
    pub fn multipart_create(&self, bucket_id: &str, key: &str) -> StoreResult<MultipartUpload> {
        let bucket = self.live_bucket(bucket_id)?;
        let upload = MultipartUpload::new(bucket.bucket_id, key);
        self.uploads.insert(upload.upload_id.clone(), upload.clone());
        Ok(upload)
    }

    /// Look up a multipart upload.
    pub fn multipart_get(&self, upload_id: &str) -> StoreResult<MultipartUpload> {
        self.uploads
            .get(upload_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| StoreError::UploadNotFound {
                upload_id: upload_id.to_owned(),
            })
    }

    /// Abort a multipart upload, removing its recorded part files.
    pub async fn multipart_abort(&self, upload_id: &str) -> StoreResult<()> {
        let (_, upload) =
            self.uploads
                .remove(upload_id)
                .ok_or_else(|| StoreError::UploadNotFound {
                    upload_id: upload_id.to_owned(),
                })?;
        for part_number in upload.parts.keys() {
            let path = self.content.part_path(upload.upload_uuid, *part_number);
            self.content.remove(&path).await?;
        }
        Ok(())
    }

    /// Open a writer for one part of a multipart upload.
    pub async fn writer_open_multipart_part(
        &self,
        upload_id: &str,
        part_number: u32,
    ) -> StoreResult<MultipartPartWriter> {
        MultipartPartWriter::open(
            Arc::clone(&self.uploads),
            &self.content,
            upload_id,
            part_number,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Load a bucket by id, refusing tombstoned ones.
    fn live_bucket(&self, bucket_id: &str) -> StoreResult<Bucket> {
        self.meta
            .buckets()
            .get(bucket_id)?
            .filter(|b| !b.deleted)
            .ok_or_else(|| StoreError::BucketNotFound {
                bucket: bucket_id.to_owned(),
            })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.gc.request_shutdown();
        self.gc_task.abort();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
