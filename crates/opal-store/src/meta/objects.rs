//! Object repository.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::StoreResult;
use crate::model::object::Object;

use super::{MetaStore, uuid_from_column};
use uuid::Uuid;

/// Repository handle for objects.
#[derive(Debug)]
pub struct Objects<'a> {
    store: &'a MetaStore,
}

impl<'a> Objects<'a> {
    pub(crate) fn new(store: &'a MetaStore) -> Self {
        Self { store }
    }

    /// Look up an object by uuid.
    pub fn get(&self, uuid: Uuid) -> StoreResult<Option<Object>> {
        get(&self.store.lock(), uuid)
    }

    /// Look up an object by `(bucket, name)`.
    pub fn get_by_name(&self, bucket_id: &str, name: &str) -> StoreResult<Option<Object>> {
        get_by_name(&self.store.lock(), bucket_id, name)
    }

    /// Resolve the object row for `(bucket, name)`, creating it with a
    /// fresh uuid if absent.
    ///
    /// Runs in one transaction under the shared connection, so concurrent
    /// callers for the same name observe each other's insert.
    pub fn get_or_create(&self, bucket_id: &str, name: &str) -> StoreResult<Object> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        if let Some(existing) = get_by_name(&tx, bucket_id, name)? {
            return Ok(existing);
        }
        let object = Object::new(bucket_id, name);
        insert(&tx, &object)?;
        tx.commit()?;
        Ok(object)
    }

    /// Store an object row.
    pub fn store(&self, object: &Object) -> StoreResult<()> {
        insert(&self.store.lock(), object)
    }

    /// All objects of a bucket, ordered by name.
    pub fn list_for_bucket(&self, bucket_id: &str) -> StoreResult<Vec<Object>> {
        list_for_bucket(&self.store.lock(), bucket_id)
    }

    /// Remove an object row, returning whether a row existed.
    pub fn remove(&self, uuid: Uuid) -> StoreResult<bool> {
        remove(&self.store.lock(), uuid)
    }
}

pub(crate) fn get(conn: &Connection, uuid: Uuid) -> StoreResult<Option<Object>> {
    let object = conn
        .query_row(
            "SELECT uuid, bucket_id, name FROM objects WHERE uuid = ?1",
            params![uuid.to_string()],
            row_to_object,
        )
        .optional()?;
    Ok(object)
}

pub(crate) fn get_by_name(
    conn: &Connection,
    bucket_id: &str,
    name: &str,
) -> StoreResult<Option<Object>> {
    let object = conn
        .query_row(
            "SELECT uuid, bucket_id, name FROM objects WHERE bucket_id = ?1 AND name = ?2 LIMIT 1",
            params![bucket_id, name],
            row_to_object,
        )
        .optional()?;
    Ok(object)
}

pub(crate) fn insert(conn: &Connection, object: &Object) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO objects (uuid, bucket_id, name) VALUES (?1, ?2, ?3) \
         ON CONFLICT (uuid) DO UPDATE SET bucket_id = excluded.bucket_id, \
         name = excluded.name",
        params![object.uuid.to_string(), object.bucket_id, object.name],
    )?;
    Ok(())
}

pub(crate) fn list_for_bucket(conn: &Connection, bucket_id: &str) -> StoreResult<Vec<Object>> {
    let mut stmt = conn
        .prepare("SELECT uuid, bucket_id, name FROM objects WHERE bucket_id = ?1 ORDER BY name")?;
    let rows = stmt.query_map(params![bucket_id], row_to_object)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub(crate) fn remove(conn: &Connection, uuid: Uuid) -> StoreResult<bool> {
    let removed = conn.execute(
        "DELETE FROM objects WHERE uuid = ?1",
        params![uuid.to_string()],
    )?;
    Ok(removed > 0)
}

fn row_to_object(row: &Row<'_>) -> rusqlite::Result<Object> {
    Ok(Object {
        uuid: uuid_from_column(row, 0)?,
        bucket_id: row.get(1)?,
        name: row.get(2)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
