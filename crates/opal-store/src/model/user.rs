//! User and access-key records.

/// Fixed tag written alongside the user version counter.
///
/// The original driver stores this literal on every write; nothing is known
/// to read it back.
pub const USER_VERSION_TAG: &str = "user_version_tag";

/// A user of the storage backend.
///
/// Most attributes are opaque blobs the gateway serializes; the backend
/// stores them verbatim. The `version` counter implements optimistic
/// concurrency on [`store_user`](crate::Store::store_user): a value of 0
/// means the user has never been stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// Unique user id.
    pub user_id: String,
    /// Tenant the user belongs to.
    pub tenant: Option<String>,
    /// Namespace within the tenant.
    pub ns: Option<String>,
    /// Display name.
    pub display_name: Option<String>,
    /// Email address.
    pub user_email: Option<String>,
    /// Serialized access keys (opaque).
    pub access_keys: Option<Vec<u8>>,
    /// Serialized swift keys (opaque).
    pub swift_keys: Option<Vec<u8>>,
    /// Serialized sub-users (opaque).
    pub sub_users: Option<Vec<u8>>,
    /// Whether the user is suspended.
    pub suspended: bool,
    /// Maximum number of buckets the user may own.
    pub max_buckets: Option<i64>,
    /// Operation mask.
    pub op_mask: Option<i64>,
    /// Serialized capabilities (opaque).
    pub user_caps: Option<Vec<u8>>,
    /// Whether the user is an administrator.
    pub admin: bool,
    /// Whether the user is a system user.
    pub system: bool,
    /// Default placement name.
    pub placement_name: Option<String>,
    /// Default placement storage class.
    pub placement_storage_class: Option<String>,
    /// Serialized placement tags (opaque).
    pub placement_tags: Option<Vec<u8>>,
    /// Serialized per-bucket quota (opaque).
    pub bucket_quota: Option<Vec<u8>>,
    /// Serialized temp-url keys (opaque).
    pub temp_url_keys: Option<Vec<u8>>,
    /// Serialized user quota (opaque).
    pub user_quota: Option<Vec<u8>>,
    /// User type discriminant (opaque to the backend).
    pub user_type: Option<i64>,
    /// Serialized MFA ids (opaque).
    pub mfa_ids: Option<Vec<u8>>,
    /// Assumed role ARN.
    pub assumed_role_arn: Option<String>,
    /// Opaque attribute blob.
    pub user_attrs: Option<Vec<u8>>,
    /// Version counter for optimistic concurrency; 0 = never stored.
    pub version: u64,
    /// Version tag; written as [`USER_VERSION_TAG`] on every store.
    pub version_tag: Option<String>,
    /// Plaintext access-key ids, maintained in the `access_keys` index
    /// table so the gateway can resolve a request's key to its user.
    pub key_ids: Vec<String>,
}

impl User {
    /// Create a user record with the given id and all other fields default.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

/// A row of the `access_keys` index table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey {
    /// Surrogate id.
    pub id: i64,
    /// The access key string.
    pub access_key: String,
    /// The owning user id.
    pub user_id: String,
}
