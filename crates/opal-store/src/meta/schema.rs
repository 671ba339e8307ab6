//! Declarative schema and in-place migration.
//!
//! Table, column, and index names are part of the on-disk format (the s3gw
//! layout) and must not change. Reconciliation on open creates missing
//! tables and indexes and adds missing columns with their declared
//! defaults; it never drops or rewrites anything, so it is idempotent and
//! safe to run on databases written by both older and newer builds. The
//! `buckets.deleted` tombstone is the canonical example of a column added
//! after the first release.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreResult;

/// One column of a declared table.
struct ColumnDef {
    name: &'static str,
    decl: &'static str,
}

/// One declared table: columns plus table-level constraints.
struct TableDef {
    name: &'static str,
    columns: &'static [ColumnDef],
    constraints: &'static [&'static str],
}

const fn col(name: &'static str, decl: &'static str) -> ColumnDef {
    ColumnDef { name, decl }
}

const USERS: TableDef = TableDef {
    name: "users",
    columns: &[
        col("user_id", "TEXT PRIMARY KEY NOT NULL"),
        col("tenant", "TEXT"),
        col("ns", "TEXT"),
        col("display_name", "TEXT"),
        col("user_email", "TEXT"),
        col("access_keys", "BLOB"),
        col("swift_keys", "BLOB"),
        col("sub_users", "BLOB"),
        col("suspended", "INTEGER"),
        col("max_buckets", "INTEGER"),
        col("op_mask", "INTEGER"),
        col("user_caps", "BLOB"),
        col("admin", "INTEGER"),
        col("system", "INTEGER"),
        col("placement_name", "TEXT"),
        col("placement_storage_class", "TEXT"),
        col("placement_tags", "BLOB"),
        col("bucket_quota", "BLOB"),
        col("temp_url_keys", "BLOB"),
        col("user_quota", "BLOB"),
        col("type", "INTEGER"),
        col("mfa_ids", "BLOB"),
        col("assumed_role_arn", "TEXT"),
        col("user_attrs", "BLOB"),
        col("user_version", "INTEGER"),
        col("user_version_tag", "TEXT"),
    ],
    constraints: &[],
};

const ACCESS_KEYS: TableDef = TableDef {
    name: "access_keys",
    columns: &[
        col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        col("access_key", "TEXT NOT NULL"),
        col("user_id", "TEXT NOT NULL"),
    ],
    constraints: &["FOREIGN KEY (user_id) REFERENCES users (user_id)"],
};

const BUCKETS: TableDef = TableDef {
    name: "buckets",
    columns: &[
        col("bucket_id", "TEXT PRIMARY KEY NOT NULL"),
        col("bucket_name", "TEXT NOT NULL"),
        col("tenant", "TEXT"),
        col("marker", "TEXT"),
        col("owner_id", "TEXT NOT NULL"),
        col("flags", "INTEGER"),
        col("zone_group", "TEXT"),
        col("quota", "BLOB"),
        col("creation_time", "TEXT"),
        col("placement_name", "TEXT"),
        col("placement_storage_class", "TEXT"),
        col("deleted", "INTEGER NOT NULL DEFAULT 0"),
        col("bucket_attrs", "BLOB"),
        col("object_lock", "BLOB"),
        col("bucket_version", "INTEGER"),
        col("bucket_version_tag", "TEXT"),
    ],
    constraints: &["FOREIGN KEY (owner_id) REFERENCES users (user_id)"],
};

const OBJECTS: TableDef = TableDef {
    name: "objects",
    columns: &[
        col("uuid", "TEXT PRIMARY KEY NOT NULL"),
        col("bucket_id", "TEXT NOT NULL"),
        col("name", "TEXT NOT NULL"),
    ],
    constraints: &["FOREIGN KEY (bucket_id) REFERENCES buckets (bucket_id)"],
};

const VERSIONED_OBJECTS: TableDef = TableDef {
    name: "versioned_objects",
    columns: &[
        col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        col("object_id", "TEXT NOT NULL"),
        col("checksum", "TEXT"),
        col("size", "INTEGER"),
        col("create_time", "TEXT"),
        col("delete_time", "TEXT"),
        col("commit_time", "TEXT"),
        col("mtime", "TEXT"),
        col("object_state", "INTEGER NOT NULL DEFAULT 0"),
        col("version_id", "TEXT NOT NULL"),
        col("etag", "TEXT"),
        col("attrs", "BLOB"),
        col("version_type", "INTEGER NOT NULL DEFAULT 0"),
    ],
    constraints: &["FOREIGN KEY (object_id) REFERENCES objects (uuid)"],
};

const LC_HEAD: TableDef = TableDef {
    name: "lc_head",
    columns: &[
        col("lc_index", "TEXT PRIMARY KEY NOT NULL"),
        col("marker", "TEXT"),
        col("start_date", "INTEGER"),
    ],
    constraints: &[],
};

const LC_ENTRIES: TableDef = TableDef {
    name: "lc_entries",
    columns: &[
        col("lc_index", "TEXT NOT NULL"),
        col("bucket_name", "TEXT NOT NULL"),
        col("start_time", "INTEGER"),
        col("status", "INTEGER"),
    ],
    constraints: &["PRIMARY KEY (lc_index, bucket_name)"],
};

const TABLES: &[&TableDef] = &[
    &USERS,
    &ACCESS_KEYS,
    &BUCKETS,
    &OBJECTS,
    &VERSIONED_OBJECTS,
    &LC_HEAD,
    &LC_ENTRIES,
];

const INDEXES: &str = "
    CREATE UNIQUE INDEX IF NOT EXISTS versioned_object_objid_vid_unique
        ON versioned_objects (object_id, version_id);
    CREATE INDEX IF NOT EXISTS bucket_ownerid_idx ON buckets (owner_id);
    CREATE INDEX IF NOT EXISTS bucket_name_idx ON buckets (bucket_name);
    CREATE INDEX IF NOT EXISTS objects_bucketid_idx ON objects (bucket_id);
    CREATE INDEX IF NOT EXISTS vobjs_versionid_idx ON versioned_objects (version_id);
    CREATE INDEX IF NOT EXISTS vobjs_object_id_idx ON versioned_objects (object_id);
    CREATE INDEX IF NOT EXISTS access_keys_key_idx ON access_keys (access_key);
";

/// Reconcile the on-disk schema with the declared one.
pub(crate) fn ensure_schema(conn: &Connection) -> StoreResult<()> {
    for table in TABLES {
        conn.execute_batch(&create_table_sql(table))?;
        add_missing_columns(conn, table)?;
    }
    conn.execute_batch(INDEXES)?;
    Ok(())
}

/// Render the `CREATE TABLE IF NOT EXISTS` statement for a table.
fn create_table_sql(table: &TableDef) -> String {
    let mut parts: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.decl))
        .collect();
    parts.extend(table.constraints.iter().map(ToString::to_string));
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.name,
        parts.join(", ")
    )
}

/// Add any declared column missing from the existing table.
fn add_missing_columns(conn: &Connection, table: &TableDef) -> StoreResult<()> {
    let existing = existing_columns(conn, table.name)?;
    for column in table.columns {
        if !existing.contains(column.name) {
            info!(
                table = table.name,
                column = column.name,
                "adding missing column to metadata schema"
            );
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table.name, column.name, column.decl
            ))?;
        }
    }
    Ok(())
}

/// The column names currently present in `table`.
fn existing_columns(conn: &Connection, table: &str) -> StoreResult<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = HashSet::new();
    for name in names {
        out.insert(name?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
