//! Bucket records and flags.

use std::fmt;
use std::ops::BitOr;

use chrono::{DateTime, Utc};

/// Fixed tag written alongside the bucket version counter.
pub const BUCKET_VERSION_TAG: &str = "bucket_version_tag";

// ---------------------------------------------------------------------------
// BucketFlags
// ---------------------------------------------------------------------------

/// Bucket feature flags, stored as a bitset in the `flags` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketFlags(u32);

impl BucketFlags {
    /// Versioning is enabled for the bucket.
    pub const VERSIONED: Self = Self(1);
    /// Object lock is enabled for the bucket (implies versioning).
    pub const OBJ_LOCK_ENABLED: Self = Self(1 << 1);

    /// Construct from the raw on-disk bits.
    #[must_use]
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The raw on-disk bits.
    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set every bit of `other` in `self`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl BitOr for BucketFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for BucketFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Bucket
// ---------------------------------------------------------------------------

/// A named container of objects, owned by one user.
///
/// Buckets are destroyed in two phases: `deleted` is set first (no new
/// writes may target the bucket), then the garbage collector removes the
/// row once every object has been reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Primary key.
    pub bucket_id: String,
    /// User-facing bucket name.
    pub bucket_name: String,
    /// Tenant the bucket belongs to.
    pub tenant: Option<String>,
    /// Listing marker.
    pub marker: Option<String>,
    /// The owning user id.
    pub owner_id: String,
    /// Feature flags.
    pub flags: BucketFlags,
    /// Zone group the bucket was created in.
    pub zone_group: Option<String>,
    /// Serialized quota (opaque).
    pub quota: Option<Vec<u8>>,
    /// When the bucket was created.
    pub creation_time: DateTime<Utc>,
    /// Placement name.
    pub placement_name: Option<String>,
    /// Placement storage class.
    pub placement_storage_class: Option<String>,
    /// Tombstone: the bucket is logically removed and awaits GC.
    pub deleted: bool,
    /// Opaque attribute blob.
    pub bucket_attrs: Option<Vec<u8>>,
    /// Serialized object-lock configuration (opaque).
    pub object_lock: Option<Vec<u8>>,
    /// Version counter for optimistic concurrency; 0 = never stored.
    pub version: u64,
    /// Version tag; written as [`BUCKET_VERSION_TAG`] on every store.
    pub version_tag: Option<String>,
}

impl Bucket {
    /// Create a bucket record with defaults for the optional fields.
    #[must_use]
    pub fn new(
        bucket_id: impl Into<String>,
        bucket_name: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            bucket_name: bucket_name.into(),
            tenant: None,
            marker: None,
            owner_id: owner_id.into(),
            flags: BucketFlags::default(),
            zone_group: None,
            quota: None,
            creation_time: Utc::now(),
            placement_name: None,
            placement_storage_class: None,
            deleted: false,
            bucket_attrs: None,
            object_lock: None,
            version: 0,
            version_tag: None,
        }
    }

    /// Whether versioning is enabled.
    #[must_use]
    pub fn is_versioned(&self) -> bool {
        self.flags.contains(BucketFlags::VERSIONED)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
