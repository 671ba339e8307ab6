//! Lifecycle head and entry records.
//!
//! The backend stores these rows for the gateway's lifecycle machinery but
//! does not interpret them; rule evaluation happens outside the core.

/// Head row of one lifecycle processing shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcHead {
    /// Shard index (primary key).
    pub lc_index: String,
    /// Progress marker.
    pub marker: Option<String>,
    /// Start date of the current pass, seconds since the epoch.
    pub start_date: i64,
}

/// One bucket's entry within a lifecycle processing shard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LcEntry {
    /// Shard index (composite primary key with `bucket_name`).
    pub lc_index: String,
    /// Bucket the entry refers to.
    pub bucket_name: String,
    /// Start time of the bucket's pass, seconds since the epoch.
    pub start_time: i64,
    /// Processing status code.
    pub status: i64,
}
