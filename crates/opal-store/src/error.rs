//! Error types for the storage backend.
//!
//! [`StoreError`] covers the failure kinds the backend reports to its
//! callers: missing entities, optimistic-concurrency conflicts, invalid
//! arguments, I/O and database failures, and operations this backend does
//! not implement.
//!
//! A failed `if_match`/`if_nomatch` precondition at commit time is *not* an
//! error: the atomic writer reports it through
//! [`Completion::Canceled`](crate::writer::Completion) and leaves the object
//! unchanged.

/// Storage backend error type.
///
/// `NotFound`-style variants are returned by reads and are part of normal
/// operation; they are never logged as errors. `Conflict` signals an
/// optimistic-concurrency version mismatch on a user or bucket store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    // -----------------------------------------------------------------------
    // Not-found errors
    // -----------------------------------------------------------------------
    /// The specified user does not exist.
    #[error("user does not exist: {user_id}")]
    UserNotFound {
        /// The user id that was not found.
        user_id: String,
    },

    /// The specified bucket does not exist (or is marked deleted).
    #[error("bucket does not exist: {bucket}")]
    BucketNotFound {
        /// The bucket id or name that was not found.
        bucket: String,
    },

    /// The specified object does not exist.
    #[error("object does not exist: {bucket}/{key}")]
    ObjectNotFound {
        /// The bucket id containing the object.
        bucket: String,
        /// The object name that was not found.
        key: String,
    },

    /// The specified object version does not exist.
    #[error("version does not exist: key={key}, version_id={version_id}")]
    VersionNotFound {
        /// The object name.
        key: String,
        /// The version id that was not found.
        version_id: String,
    },

    /// The specified multipart upload does not exist.
    #[error("multipart upload does not exist: {upload_id}")]
    UploadNotFound {
        /// The upload id that was not found.
        upload_id: String,
    },

    // -----------------------------------------------------------------------
    // Caller errors
    // -----------------------------------------------------------------------
    /// Optimistic-concurrency version mismatch on a store operation.
    #[error("version conflict storing {entity} {id}: stored version {stored}, read version {read}")]
    Conflict {
        /// The entity kind (`"user"` or `"bucket"`).
        entity: &'static str,
        /// The primary key of the row.
        id: String,
        /// The version currently stored.
        stored: u64,
        /// The stale version the caller read.
        read: u64,
    },

    /// An argument provided is invalid (non-monotonic write offset, size
    /// mismatch at complete, malformed input).
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    /// The requested operation is not implemented by this backend.
    #[error("operation not supported: {operation}")]
    Unsupported {
        /// The name of the unsupported operation.
        operation: &'static str,
    },

    // -----------------------------------------------------------------------
    // Environment errors
    // -----------------------------------------------------------------------
    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Underlying metadata database failure.
    #[error("metadata database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether this error reports a missing entity.
    ///
    /// Callers use this to distinguish "absent" (a normal outcome of reads)
    /// from actual failures.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::UserNotFound { .. }
                | Self::BucketNotFound { .. }
                | Self::ObjectNotFound { .. }
                | Self::VersionNotFound { .. }
                | Self::UploadNotFound { .. }
        )
    }

    /// Shorthand for an [`StoreError::InvalidArgument`] with the given message.
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

/// Convenience result type for storage backend operations.
pub type StoreResult<T> = Result<T, StoreError>;
