//! Bucket repository.
//!
//! `store` follows the same optimistic-concurrency contract as the user
//! repository. Bucket removal is two-phase: [`Buckets::mark_deleted`] sets
//! the tombstone and appends a delete marker to every object, then the
//! garbage collector removes content, versions, objects, and finally the
//! bucket row itself via [`Buckets::remove`].

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};

use crate::error::{StoreError, StoreResult};
use crate::model::bucket::{BUCKET_VERSION_TAG, Bucket, BucketFlags};
use crate::model::object::ObjectState;

use super::{MetaStore, objects, versions};

const BUCKET_COLUMNS: &str = "bucket_id, bucket_name, tenant, marker, owner_id, flags, \
     zone_group, quota, creation_time, placement_name, placement_storage_class, deleted, \
     bucket_attrs, object_lock, bucket_version, bucket_version_tag";

/// Repository handle for buckets.
#[derive(Debug)]
pub struct Buckets<'a> {
    store: &'a MetaStore,
}

impl<'a> Buckets<'a> {
    pub(crate) fn new(store: &'a MetaStore) -> Self {
        Self { store }
    }

    /// Look up a bucket by id, tombstoned or not.
    pub fn get(&self, bucket_id: &str) -> StoreResult<Option<Bucket>> {
        let bucket = self
            .store
            .lock()
            .query_row(
                &format!("SELECT {BUCKET_COLUMNS} FROM buckets WHERE bucket_id = ?1"),
                params![bucket_id],
                row_to_bucket,
            )
            .optional()?;
        Ok(bucket)
    }

    /// Look up a live bucket by name.
    pub fn get_by_name(&self, name: &str) -> StoreResult<Option<Bucket>> {
        let bucket = self
            .store
            .lock()
            .query_row(
                &format!(
                    "SELECT {BUCKET_COLUMNS} FROM buckets \
                     WHERE bucket_name = ?1 AND deleted = 0 LIMIT 1"
                ),
                params![name],
                row_to_bucket,
            )
            .optional()?;
        Ok(bucket)
    }

    /// Whether a live bucket with this name exists.
    pub fn exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.get_by_name(name)?.is_some())
    }

    /// Store a bucket under optimistic concurrency.
    ///
    /// Returns the stored record with the bumped version counter.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the bucket already exists and its stored
    /// version differs from `bucket.version`.
    pub fn store(&self, bucket: &Bucket) -> StoreResult<Bucket> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;

        let stored: Option<Option<u64>> = tx
            .query_row(
                "SELECT bucket_version FROM buckets WHERE bucket_id = ?1",
                params![bucket.bucket_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = stored {
            let stored = stored.unwrap_or(0);
            if stored != bucket.version {
                return Err(StoreError::Conflict {
                    entity: "bucket",
                    id: bucket.bucket_id.clone(),
                    stored,
                    read: bucket.version,
                });
            }
        }

        let new_version = bucket.version + 1;
        tx.execute(
            &format!(
                "INSERT INTO buckets ({BUCKET_COLUMNS}) VALUES (\
                 ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
                 ON CONFLICT (bucket_id) DO UPDATE SET \
                 bucket_name = excluded.bucket_name, tenant = excluded.tenant, \
                 marker = excluded.marker, owner_id = excluded.owner_id, \
                 flags = excluded.flags, zone_group = excluded.zone_group, \
                 quota = excluded.quota, creation_time = excluded.creation_time, \
                 placement_name = excluded.placement_name, \
                 placement_storage_class = excluded.placement_storage_class, \
                 deleted = excluded.deleted, bucket_attrs = excluded.bucket_attrs, \
                 object_lock = excluded.object_lock, \
                 bucket_version = excluded.bucket_version, \
                 bucket_version_tag = excluded.bucket_version_tag"
            ),
            params![
                bucket.bucket_id,
                bucket.bucket_name,
                bucket.tenant,
                bucket.marker,
                bucket.owner_id,
                bucket.flags.bits(),
                bucket.zone_group,
                bucket.quota,
                bucket.creation_time,
                bucket.placement_name,
                bucket.placement_storage_class,
                bucket.deleted,
                bucket.bucket_attrs,
                bucket.object_lock,
                new_version,
                BUCKET_VERSION_TAG,
            ],
        )?;
        tx.commit()?;

        let mut stored = bucket.clone();
        stored.version = new_version;
        stored.version_tag = Some(BUCKET_VERSION_TAG.to_owned());
        Ok(stored)
    }

    /// All live buckets, ordered by name.
    pub fn list(&self) -> StoreResult<Vec<Bucket>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE deleted = 0 ORDER BY bucket_name"
        ))?;
        let rows = stmt.query_map([], row_to_bucket)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Live buckets of one owner within `(marker, end_marker)`, ordered by
    /// name, at most `max` of them.
    pub fn list_by_owner(
        &self,
        owner_id: &str,
        marker: Option<&str>,
        end_marker: Option<&str>,
        max: Option<usize>,
    ) -> StoreResult<Vec<Bucket>> {
        let conn = self.store.lock();
        let limit = max.map_or(-1, |m| i64::try_from(m).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets \
             WHERE owner_id = ?1 AND deleted = 0 \
             AND (?2 IS NULL OR bucket_name > ?2) \
             AND (?3 IS NULL OR bucket_name < ?3) \
             ORDER BY bucket_name LIMIT ?4"
        ))?;
        let rows = stmt.query_map(params![owner_id, marker, end_marker, limit], row_to_bucket)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Buckets marked deleted, awaiting garbage collection.
    pub fn list_deleted(&self) -> StoreResult<Vec<Bucket>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BUCKET_COLUMNS} FROM buckets WHERE deleted = 1 ORDER BY bucket_id"
        ))?;
        let rows = stmt.query_map([], row_to_bucket)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Tombstone a bucket: append a delete-marker version to each of its
    /// objects and set `deleted = true`, all in one transaction.
    ///
    /// # Errors
    ///
    /// [`StoreError::BucketNotFound`] if the bucket does not exist or is
    /// already tombstoned.
    pub fn mark_deleted(&self, bucket_id: &str) -> StoreResult<()> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;

        let live: Option<bool> = tx
            .query_row(
                "SELECT deleted FROM buckets WHERE bucket_id = ?1",
                params![bucket_id],
                |row| row.get(0),
            )
            .optional()?;
        match live {
            Some(false) => {}
            _ => {
                return Err(StoreError::BucketNotFound {
                    bucket: bucket_id.to_owned(),
                });
            }
        }

        for object in objects::list_for_bucket(&tx, bucket_id)? {
            if let Some(last) = versions::last_for_object(&tx, object.uuid)? {
                let marker = last.delete_marker(ObjectState::Deleted);
                versions::insert(&tx, &marker)?;
            }
        }
        tx.execute(
            "UPDATE buckets SET deleted = 1 WHERE bucket_id = ?1",
            params![bucket_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a bucket row, returning whether a row existed.
    pub fn remove(&self, bucket_id: &str) -> StoreResult<bool> {
        let removed = self.store.lock().execute(
            "DELETE FROM buckets WHERE bucket_id = ?1",
            params![bucket_id],
        )?;
        Ok(removed > 0)
    }
}

fn row_to_bucket(row: &Row<'_>) -> rusqlite::Result<Bucket> {
    Ok(Bucket {
        bucket_id: row.get(0)?,
        bucket_name: row.get(1)?,
        tenant: row.get(2)?,
        marker: row.get(3)?,
        owner_id: row.get(4)?,
        flags: BucketFlags::from_bits(row.get::<_, Option<u32>>(5)?.unwrap_or(0)),
        zone_group: row.get(6)?,
        quota: row.get(7)?,
        creation_time: row
            .get::<_, Option<DateTime<Utc>>>(8)?
            .unwrap_or(DateTime::UNIX_EPOCH),
        placement_name: row.get(9)?,
        placement_storage_class: row.get(10)?,
        deleted: row.get::<_, Option<bool>>(11)?.unwrap_or(false),
        bucket_attrs: row.get(12)?,
        object_lock: row.get(13)?,
        version: row.get::<_, Option<u64>>(14)?.unwrap_or(0),
        version_tag: row.get(15)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
