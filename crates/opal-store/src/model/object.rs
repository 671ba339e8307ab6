//! Objects, versions, and the version state machine.
//!
//! An [`Object`] gives a `(bucket, name)` pair a stable uuid identity; the
//! uuid determines the content path on disk independently of the
//! user-facing name. Each object has one or more [`VersionedObject`] rows,
//! immutable once committed.

use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ObjectState
// ---------------------------------------------------------------------------

/// Lifecycle state of a version.
///
/// ```text
///         ┌── complete ──► Committed ── delete ──► Deleted
/// Open ───┤                                           ▲
///         └── failure / cancel ───────────────────────┘
/// ```
///
/// Only `Committed` versions are user-visible. The integer codes are part
/// of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// A writer is streaming this version; not yet visible.
    Open = 0,
    /// Fully written and published.
    Committed = 1,
    /// Logically removed; awaiting garbage collection.
    Deleted = 2,
}

impl ObjectState {
    /// Decode the on-disk integer code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Open),
            1 => Some(Self::Committed),
            2 => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Whether the state machine permits a transition from `self` to `next`.
    ///
    /// `Open` may commit or be abandoned; `Committed` may only be deleted;
    /// `Deleted` is terminal.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Committed)
                | (Self::Open, Self::Deleted)
                | (Self::Committed, Self::Deleted)
        )
    }
}

impl ToSql for ObjectState {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for ObjectState {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

// ---------------------------------------------------------------------------
// VersionType
// ---------------------------------------------------------------------------

/// Whether a version row carries content or records a logical delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VersionType {
    /// A regular version with a content file.
    #[default]
    Regular = 0,
    /// A synthetic delete marker; no content file exists for it.
    DeleteMarker = 1,
}

impl VersionType {
    /// Decode the on-disk integer code.
    #[must_use]
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Regular),
            1 => Some(Self::DeleteMarker),
            _ => None,
        }
    }
}

impl ToSql for VersionType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(*self as i64))
    }
}

impl FromSql for VersionType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
    }
}

// ---------------------------------------------------------------------------
// Object
// ---------------------------------------------------------------------------

/// A named entity inside a bucket, identified internally by a uuid.
///
/// Objects are created on first PUT into `(bucket, name)` and never mutated
/// afterwards; they are destroyed by the garbage collector once no versions
/// remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Stable identity; determines the content path on disk.
    pub uuid: Uuid,
    /// The owning bucket id.
    pub bucket_id: String,
    /// The user-facing object name.
    pub name: String,
}

impl Object {
    /// Create a new object row value with a freshly allocated uuid.
    #[must_use]
    pub fn new(bucket_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            bucket_id: bucket_id.into(),
            name: name.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// VersionedObject
// ---------------------------------------------------------------------------

/// One version of an object: an immutable snapshot of its bytes plus
/// metadata at one commit point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedObject {
    /// Surrogate autoincrement id; 0 until the row has been inserted.
    pub id: i64,
    /// The owning object's uuid.
    pub object_id: Uuid,
    /// Hex MD5 of the content as written.
    pub checksum: String,
    /// Content length in bytes.
    pub size: u64,
    /// When the version row was created (writer prepare).
    pub create_time: DateTime<Utc>,
    /// When the version was logically deleted, if it was.
    pub delete_time: Option<DateTime<Utc>>,
    /// When the version was committed, if it was.
    pub commit_time: Option<DateTime<Utc>>,
    /// Modification time reported to clients.
    pub mtime: DateTime<Utc>,
    /// Lifecycle state.
    pub object_state: ObjectState,
    /// Version id, unique within the object.
    pub version_id: String,
    /// The entity tag supplied at commit.
    pub etag: String,
    /// Opaque attribute blob, stored verbatim.
    pub attrs: Option<Vec<u8>>,
    /// Regular content or delete marker.
    pub version_type: VersionType,
}

impl VersionedObject {
    /// Create a fresh OPEN version row value for a writer.
    #[must_use]
    pub fn open(object_id: Uuid, version_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            object_id,
            checksum: String::new(),
            size: 0,
            create_time: now,
            delete_time: None,
            commit_time: None,
            mtime: now,
            object_state: ObjectState::Open,
            version_id: version_id.into(),
            etag: String::new(),
            attrs: None,
            version_type: VersionType::Regular,
        }
    }

    /// Build the synthetic delete marker that logically deletes the object
    /// whose latest version is `self`.
    ///
    /// The marker's version id is derived from this version's id so it is
    /// unique within the object, and the marker carries no content.
    #[must_use]
    pub fn delete_marker(&self, state: ObjectState) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            object_id: self.object_id,
            checksum: String::new(),
            size: 0,
            create_time: now,
            delete_time: Some(now),
            commit_time: Some(now),
            mtime: now,
            object_state: state,
            version_id: format!("{}_next_{}", self.version_id, self.id),
            etag: String::new(),
            attrs: None,
            version_type: VersionType::DeleteMarker,
        }
    }

    /// Whether this version is a delete marker.
    #[must_use]
    pub fn is_delete_marker(&self) -> bool {
        self.version_type == VersionType::DeleteMarker
    }

    /// Whether this version is committed (user-visible).
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.object_state == ObjectState::Committed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
