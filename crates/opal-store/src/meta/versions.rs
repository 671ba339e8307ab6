//! Versioned-object repository.
//!
//! State transitions are authoritative here: a writer's commit runs in one
//! transaction that evaluates the caller's preconditions against the latest
//! committed version and flips the row, so concurrent committers are
//! linearized by the connection.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::object::{ObjectState, VersionType, VersionedObject};

use super::{MetaStore, uuid_from_column};

const VERSION_COLUMNS: &str = "id, object_id, checksum, size, create_time, delete_time, \
     commit_time, mtime, object_state, version_id, etag, attrs, version_type";

/// Parameters of a writer's commit step.
#[derive(Debug)]
pub(crate) struct CommitRequest<'a> {
    /// Surrogate id of the OPEN row being committed.
    pub id: i64,
    /// The owning object's uuid.
    pub object_id: Uuid,
    /// Hex MD5 of the written content.
    pub checksum: &'a str,
    /// Total bytes written.
    pub size: u64,
    /// The entity tag supplied by the caller.
    pub etag: &'a str,
    /// Modification time to record; now if absent.
    pub mtime: Option<DateTime<Utc>>,
    /// Opaque attribute blob.
    pub attrs: Option<&'a [u8]>,
    /// Required etag of the current latest committed version.
    pub if_match: Option<&'a str>,
    /// Forbidden etag of the current latest committed version; `"*"`
    /// forbids any committed version.
    pub if_nomatch: Option<&'a str>,
}

/// Outcome of a commit attempt.
#[derive(Debug)]
pub(crate) enum CommitDecision {
    /// The row is now COMMITTED; the published version is returned.
    Committed(VersionedObject),
    /// A precondition failed; the row was transitioned to DELETED.
    PreconditionFailed,
}

/// Repository handle for versioned objects.
#[derive(Debug)]
pub struct Versions<'a> {
    store: &'a MetaStore,
}

impl<'a> Versions<'a> {
    pub(crate) fn new(store: &'a MetaStore) -> Self {
        Self { store }
    }

    /// Insert a version row, returning its surrogate id.
    pub fn insert(&self, version: &VersionedObject) -> StoreResult<i64> {
        insert(&self.store.lock(), version)
    }

    /// Look up a version by surrogate id.
    pub fn get(&self, id: i64) -> StoreResult<Option<VersionedObject>> {
        get(&self.store.lock(), id)
    }

    /// Look up a version by `(object, version_id)`.
    pub fn get_by_version_id(
        &self,
        object_id: Uuid,
        version_id: &str,
    ) -> StoreResult<Option<VersionedObject>> {
        get_by_version_id(&self.store.lock(), object_id, version_id)
    }

    /// The version with the greatest surrogate id for an object.
    pub fn get_last(&self, object_id: Uuid) -> StoreResult<Option<VersionedObject>> {
        last_for_object(&self.store.lock(), object_id)
    }

    /// The latest committed version of an object: the COMMITTED row whose
    /// commit was persisted last.
    pub fn get_last_committed(&self, object_id: Uuid) -> StoreResult<Option<VersionedObject>> {
        last_committed(&self.store.lock(), object_id)
    }

    /// All versions of an object, oldest first.
    pub fn list_for_object(&self, object_id: Uuid) -> StoreResult<Vec<VersionedObject>> {
        list_for_object(&self.store.lock(), object_id)
    }

    /// Surrogate ids of all version rows, optionally without rows in state
    /// DELETED.
    pub fn list_ids(&self, include_deleted: bool) -> StoreResult<Vec<i64>> {
        let conn = self.store.lock();
        let sql = if include_deleted {
            "SELECT id FROM versioned_objects ORDER BY id".to_owned()
        } else {
            format!(
                "SELECT id FROM versioned_objects WHERE object_state != {} ORDER BY id",
                ObjectState::Deleted as i64
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Transition a row to DELETED, returning whether a row was updated.
    pub fn mark_deleted(&self, id: i64) -> StoreResult<bool> {
        mark_deleted(&self.store.lock(), id)
    }

    /// Remove a version row, returning whether a row existed.
    pub fn remove(&self, id: i64) -> StoreResult<bool> {
        remove(&self.store.lock(), id)
    }

    /// Commit an OPEN row, evaluating preconditions transactionally.
    ///
    /// If the row is no longer OPEN (for example its bucket was deleted
    /// while the writer was streaming) the commit is treated as a failed
    /// precondition.
    pub(crate) fn commit(&self, req: &CommitRequest<'_>) -> StoreResult<CommitDecision> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;

        let state: Option<ObjectState> = tx
            .query_row(
                "SELECT object_state FROM versioned_objects WHERE id = ?1",
                params![req.id],
                |row| row.get(0),
            )
            .optional()?;
        let latest = last_committed(&tx, req.object_id)?;

        let canceled = match state {
            Some(state) if state.can_transition_to(ObjectState::Committed) => {
                precondition_failed(latest.as_ref(), req)
            }
            _ => true,
        };

        if canceled {
            mark_deleted(&tx, req.id)?;
            tx.commit()?;
            return Ok(CommitDecision::PreconditionFailed);
        }

        let now = Utc::now();
        tx.execute(
            "UPDATE versioned_objects SET checksum = ?1, size = ?2, commit_time = ?3, \
             mtime = ?4, object_state = ?5, etag = ?6, attrs = ?7 WHERE id = ?8",
            params![
                req.checksum,
                req.size,
                now,
                req.mtime.unwrap_or(now),
                ObjectState::Committed,
                req.etag,
                req.attrs,
                req.id,
            ],
        )?;
        let committed = get(&tx, req.id)?.ok_or_else(|| {
            anyhow::anyhow!("version row {} vanished during commit", req.id)
        })?;
        tx.commit()?;
        Ok(CommitDecision::Committed(committed))
    }
}

/// Evaluate `if_match`/`if_nomatch` against the latest committed version.
fn precondition_failed(latest: Option<&VersionedObject>, req: &CommitRequest<'_>) -> bool {
    if let Some(required) = req.if_match {
        match latest {
            Some(current) if current.etag == required => {}
            _ => return true,
        }
    }
    if let Some(forbidden) = req.if_nomatch {
        if let Some(current) = latest {
            if forbidden == "*" || current.etag == forbidden {
                return true;
            }
        }
    }
    false
}

pub(crate) fn insert(conn: &Connection, version: &VersionedObject) -> StoreResult<i64> {
    conn.execute(
        "INSERT INTO versioned_objects (object_id, checksum, size, create_time, delete_time, \
         commit_time, mtime, object_state, version_id, etag, attrs, version_type) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            version.object_id.to_string(),
            version.checksum,
            version.size,
            version.create_time,
            version.delete_time,
            version.commit_time,
            version.mtime,
            version.object_state,
            version.version_id,
            version.etag,
            version.attrs,
            version.version_type,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get(conn: &Connection, id: i64) -> StoreResult<Option<VersionedObject>> {
    let version = conn
        .query_row(
            &format!("SELECT {VERSION_COLUMNS} FROM versioned_objects WHERE id = ?1"),
            params![id],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

pub(crate) fn get_by_version_id(
    conn: &Connection,
    object_id: Uuid,
    version_id: &str,
) -> StoreResult<Option<VersionedObject>> {
    let version = conn
        .query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM versioned_objects \
                 WHERE object_id = ?1 AND version_id = ?2"
            ),
            params![object_id.to_string(), version_id],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

pub(crate) fn last_for_object(
    conn: &Connection,
    object_id: Uuid,
) -> StoreResult<Option<VersionedObject>> {
    let version = conn
        .query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM versioned_objects \
                 WHERE object_id = ?1 ORDER BY id DESC LIMIT 1"
            ),
            params![object_id.to_string()],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

pub(crate) fn last_committed(
    conn: &Connection,
    object_id: Uuid,
) -> StoreResult<Option<VersionedObject>> {
    let version = conn
        .query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM versioned_objects \
                 WHERE object_id = ?1 AND object_state = ?2 \
                 ORDER BY commit_time DESC, id DESC LIMIT 1"
            ),
            params![object_id.to_string(), ObjectState::Committed],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

pub(crate) fn list_for_object(
    conn: &Connection,
    object_id: Uuid,
) -> StoreResult<Vec<VersionedObject>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VERSION_COLUMNS} FROM versioned_objects WHERE object_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt.query_map(params![object_id.to_string()], row_to_version)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn mark_deleted(conn: &Connection, id: i64) -> StoreResult<bool> {
    let updated = conn.execute(
        "UPDATE versioned_objects SET object_state = ?1, delete_time = ?2 WHERE id = ?3",
        params![ObjectState::Deleted, Utc::now(), id],
    )?;
    Ok(updated > 0)
}

pub(crate) fn remove(conn: &Connection, id: i64) -> StoreResult<bool> {
    let removed = conn.execute("DELETE FROM versioned_objects WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

fn row_to_version(row: &Row<'_>) -> rusqlite::Result<VersionedObject> {
    Ok(VersionedObject {
        id: row.get(0)?,
        object_id: uuid_from_column(row, 1)?,
        checksum: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        size: row.get::<_, Option<u64>>(3)?.unwrap_or(0),
        create_time: row
            .get::<_, Option<DateTime<Utc>>>(4)?
            .unwrap_or(DateTime::UNIX_EPOCH),
        delete_time: row.get(5)?,
        commit_time: row.get(6)?,
        mtime: row
            .get::<_, Option<DateTime<Utc>>>(7)?
            .unwrap_or(DateTime::UNIX_EPOCH),
        object_state: row.get(8)?,
        version_id: row.get(9)?,
        etag: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
        attrs: row.get(11)?,
        version_type: row.get::<_, Option<VersionType>>(12)?.unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
