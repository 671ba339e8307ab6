//! Lifecycle head/entry repository.
//!
//! These rows are stored for the gateway's lifecycle machinery; the backend
//! never interprets them.

use rusqlite::{OptionalExtension, Row, params};

use crate::error::StoreResult;
use crate::model::lifecycle::{LcEntry, LcHead};

use super::MetaStore;

/// Repository handle for lifecycle rows.
#[derive(Debug)]
pub struct Lifecycle<'a> {
    store: &'a MetaStore,
}

impl<'a> Lifecycle<'a> {
    pub(crate) fn new(store: &'a MetaStore) -> Self {
        Self { store }
    }

    /// Look up the head row of a shard.
    pub fn get_head(&self, lc_index: &str) -> StoreResult<Option<LcHead>> {
        let head = self
            .store
            .lock()
            .query_row(
                "SELECT lc_index, marker, start_date FROM lc_head WHERE lc_index = ?1",
                params![lc_index],
                row_to_head,
            )
            .optional()?;
        Ok(head)
    }

    /// Store (insert or replace) a head row.
    pub fn store_head(&self, head: &LcHead) -> StoreResult<()> {
        self.store.lock().execute(
            "INSERT OR REPLACE INTO lc_head (lc_index, marker, start_date) VALUES (?1, ?2, ?3)",
            params![head.lc_index, head.marker, head.start_date],
        )?;
        Ok(())
    }

    /// Remove a head row, returning whether a row existed.
    pub fn remove_head(&self, lc_index: &str) -> StoreResult<bool> {
        let removed = self
            .store
            .lock()
            .execute("DELETE FROM lc_head WHERE lc_index = ?1", params![lc_index])?;
        Ok(removed > 0)
    }

    /// Look up one bucket's entry within a shard.
    pub fn get_entry(&self, lc_index: &str, bucket_name: &str) -> StoreResult<Option<LcEntry>> {
        let entry = self
            .store
            .lock()
            .query_row(
                "SELECT lc_index, bucket_name, start_time, status FROM lc_entries \
                 WHERE lc_index = ?1 AND bucket_name = ?2",
                params![lc_index, bucket_name],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Store (insert or replace) an entry.
    pub fn store_entry(&self, entry: &LcEntry) -> StoreResult<()> {
        self.store.lock().execute(
            "INSERT OR REPLACE INTO lc_entries (lc_index, bucket_name, start_time, status) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.lc_index,
                entry.bucket_name,
                entry.start_time,
                entry.status
            ],
        )?;
        Ok(())
    }

    /// Remove an entry, returning whether a row existed.
    pub fn remove_entry(&self, lc_index: &str, bucket_name: &str) -> StoreResult<bool> {
        let removed = self.store.lock().execute(
            "DELETE FROM lc_entries WHERE lc_index = ?1 AND bucket_name = ?2",
            params![lc_index, bucket_name],
        )?;
        Ok(removed > 0)
    }

    /// Entries of a shard after `marker`, ordered by bucket name.
    pub fn list_entries(
        &self,
        lc_index: &str,
        marker: Option<&str>,
        max: Option<usize>,
    ) -> StoreResult<Vec<LcEntry>> {
        let conn = self.store.lock();
        let limit = max.map_or(-1, |m| i64::try_from(m).unwrap_or(i64::MAX));
        let mut stmt = conn.prepare(
            "SELECT lc_index, bucket_name, start_time, status FROM lc_entries \
             WHERE lc_index = ?1 AND (?2 IS NULL OR bucket_name > ?2) \
             ORDER BY bucket_name LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![lc_index, marker, limit], row_to_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn row_to_head(row: &Row<'_>) -> rusqlite::Result<LcHead> {
    Ok(LcHead {
        lc_index: row.get(0)?,
        marker: row.get(1)?,
        start_date: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
    })
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LcEntry> {
    Ok(LcEntry {
        lc_index: row.get(0)?,
        bucket_name: row.get(1)?,
        start_time: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
        status: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
    })
}
