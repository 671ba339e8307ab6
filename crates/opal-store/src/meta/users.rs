//! User and access-key repository.
//!
//! `store` implements the optimistic-concurrency contract: the caller's
//! read version must match the stored `user_version` or the store fails
//! with a conflict. The first store of a user writes version 1. The
//! `access_keys` index table is rewritten in the same transaction so key
//! lookups always reflect the stored user.

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{StoreError, StoreResult};
use crate::model::user::{AccessKey, USER_VERSION_TAG, User};

use super::MetaStore;

const USER_COLUMNS: &str = "user_id, tenant, ns, display_name, user_email, access_keys, \
     swift_keys, sub_users, suspended, max_buckets, op_mask, user_caps, admin, system, \
     placement_name, placement_storage_class, placement_tags, bucket_quota, temp_url_keys, \
     user_quota, type, mfa_ids, assumed_role_arn, user_attrs, user_version, user_version_tag";

/// Same column list as [`USER_COLUMNS`], with `user_id` qualified by table name
/// for use in queries that join against another table which also has a
/// `user_id` column (otherwise SQLite rejects the column as ambiguous).
const USER_COLUMNS_JOIN: &str = "users.user_id, tenant, ns, display_name, user_email, \
     access_keys, swift_keys, sub_users, suspended, max_buckets, op_mask, user_caps, admin, \
     system, placement_name, placement_storage_class, placement_tags, bucket_quota, \
     temp_url_keys, user_quota, type, mfa_ids, assumed_role_arn, user_attrs, user_version, \
     user_version_tag";

/// Repository handle for users.
#[derive(Debug)]
pub struct Users<'a> {
    store: &'a MetaStore,
}

impl<'a> Users<'a> {
    pub(crate) fn new(store: &'a MetaStore) -> Self {
        Self { store }
    }

    /// Look up a user by id.
    pub fn get(&self, user_id: &str) -> StoreResult<Option<User>> {
        let conn = self.store.lock();
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
                row_to_user,
            )
            .optional()?;
        match user {
            Some(mut user) => {
                user.key_ids = key_ids(&conn, &user.user_id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Look up the user owning an access key.
    pub fn get_by_access_key(&self, access_key: &str) -> StoreResult<Option<User>> {
        let conn = self.store.lock();
        let user = conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS_JOIN} FROM users \
                     JOIN access_keys ON access_keys.user_id = users.user_id \
                     WHERE access_keys.access_key = ?1"
                ),
                params![access_key],
                row_to_user,
            )
            .optional()?;
        match user {
            Some(mut user) => {
                user.key_ids = key_ids(&conn, &user.user_id)?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Store a user under optimistic concurrency.
    ///
    /// Returns the stored record with the bumped version counter and the
    /// fixed version tag.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the user already exists and its stored
    /// version differs from `user.version`.
    pub fn store(&self, user: &User) -> StoreResult<User> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;

        let stored: Option<Option<u64>> = tx
            .query_row(
                "SELECT user_version FROM users WHERE user_id = ?1",
                params![user.user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(stored) = stored {
            let stored = stored.unwrap_or(0);
            if stored != user.version {
                return Err(StoreError::Conflict {
                    entity: "user",
                    id: user.user_id.clone(),
                    stored,
                    read: user.version,
                });
            }
        }

        let new_version = user.version + 1;
        tx.execute(
            &format!(
                "INSERT INTO users ({USER_COLUMNS}) VALUES (\
                 ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, \
                 ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26) \
                 ON CONFLICT (user_id) DO UPDATE SET \
                 tenant = excluded.tenant, ns = excluded.ns, \
                 display_name = excluded.display_name, user_email = excluded.user_email, \
                 access_keys = excluded.access_keys, swift_keys = excluded.swift_keys, \
                 sub_users = excluded.sub_users, suspended = excluded.suspended, \
                 max_buckets = excluded.max_buckets, op_mask = excluded.op_mask, \
                 user_caps = excluded.user_caps, admin = excluded.admin, \
                 system = excluded.system, placement_name = excluded.placement_name, \
                 placement_storage_class = excluded.placement_storage_class, \
                 placement_tags = excluded.placement_tags, \
                 bucket_quota = excluded.bucket_quota, \
                 temp_url_keys = excluded.temp_url_keys, user_quota = excluded.user_quota, \
                 type = excluded.type, mfa_ids = excluded.mfa_ids, \
                 assumed_role_arn = excluded.assumed_role_arn, \
                 user_attrs = excluded.user_attrs, user_version = excluded.user_version, \
                 user_version_tag = excluded.user_version_tag"
            ),
            params![
                user.user_id,
                user.tenant,
                user.ns,
                user.display_name,
                user.user_email,
                user.access_keys,
                user.swift_keys,
                user.sub_users,
                user.suspended,
                user.max_buckets,
                user.op_mask,
                user.user_caps,
                user.admin,
                user.system,
                user.placement_name,
                user.placement_storage_class,
                user.placement_tags,
                user.bucket_quota,
                user.temp_url_keys,
                user.user_quota,
                user.user_type,
                user.mfa_ids,
                user.assumed_role_arn,
                user.user_attrs,
                new_version,
                USER_VERSION_TAG,
            ],
        )?;

        tx.execute(
            "DELETE FROM access_keys WHERE user_id = ?1",
            params![user.user_id],
        )?;
        for key in &user.key_ids {
            tx.execute(
                "INSERT INTO access_keys (access_key, user_id) VALUES (?1, ?2)",
                params![key, user.user_id],
            )?;
        }

        tx.commit()?;

        let mut stored = user.clone();
        stored.version = new_version;
        stored.version_tag = Some(USER_VERSION_TAG.to_owned());
        Ok(stored)
    }

    /// The access-key index rows of a user, in insertion order.
    pub fn access_keys(&self, user_id: &str) -> StoreResult<Vec<AccessKey>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, access_key, user_id FROM access_keys WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            Ok(AccessKey {
                id: row.get(0)?,
                access_key: row.get(1)?,
                user_id: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Remove a user and their access keys.
    ///
    /// # Errors
    ///
    /// [`StoreError::UserNotFound`] if no such user exists.
    pub fn remove(&self, user_id: &str) -> StoreResult<()> {
        let mut conn = self.store.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM access_keys WHERE user_id = ?1",
            params![user_id],
        )?;
        let removed = tx.execute("DELETE FROM users WHERE user_id = ?1", params![user_id])?;
        if removed == 0 {
            return Err(StoreError::UserNotFound {
                user_id: user_id.to_owned(),
            });
        }
        tx.commit()?;
        Ok(())
    }
}

/// The access-key ids stored for a user, in insertion order.
fn key_ids(conn: &Connection, user_id: &str) -> StoreResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT access_key FROM access_keys WHERE user_id = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![user_id], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        tenant: row.get(1)?,
        ns: row.get(2)?,
        display_name: row.get(3)?,
        user_email: row.get(4)?,
        access_keys: row.get(5)?,
        swift_keys: row.get(6)?,
        sub_users: row.get(7)?,
        suspended: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
        max_buckets: row.get(9)?,
        op_mask: row.get(10)?,
        user_caps: row.get(11)?,
        admin: row.get::<_, Option<bool>>(12)?.unwrap_or(false),
        system: row.get::<_, Option<bool>>(13)?.unwrap_or(false),
        placement_name: row.get(14)?,
        placement_storage_class: row.get(15)?,
        placement_tags: row.get(16)?,
        bucket_quota: row.get(17)?,
        temp_url_keys: row.get(18)?,
        user_quota: row.get(19)?,
        user_type: row.get(20)?,
        mfa_ids: row.get(21)?,
        assumed_role_arn: row.get(22)?,
        user_attrs: row.get(23)?,
        version: row.get::<_, Option<u64>>(24)?.unwrap_or(0),
        version_tag: row.get(25)?,
        key_ids: Vec::new(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
