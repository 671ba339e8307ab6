//! Writers that stage bytes for new versions and publish them.
//!
//! Two variants exist: [`AtomicWriter`] publishes a whole object version,
//! [`MultipartPartWriter`] streams one part of a multipart upload. Each
//! owns its own state; both stream through the content store's append
//! handle and clean up after themselves when dropped before completion.

use chrono::{DateTime, Utc};
use typed_builder::TypedBuilder;

use crate::model::object::VersionedObject;

pub mod atomic;
pub mod multipart;

pub use atomic::AtomicWriter;
pub use multipart::{MultipartPartWriter, MultipartUpload, UploadPart};

/// Parameters of an atomic writer's `complete` step.
///
/// # Examples
///
/// ```
/// use opal_store::writer::CompleteParams;
///
/// let params = CompleteParams::builder()
///     .accounted_size(11)
///     .etag("\"abc\"".to_owned())
///     .build();
/// assert!(params.if_match.is_none());
/// ```
#[derive(Debug, Clone, TypedBuilder)]
pub struct CompleteParams {
    /// The byte count the caller accounted for; must equal the processed
    /// total.
    pub accounted_size: u64,
    /// The entity tag to publish.
    pub etag: String,
    /// Modification time to record; defaults to the commit time.
    #[builder(default)]
    pub mtime: Option<DateTime<Utc>>,
    /// Opaque attribute blob to store with the version.
    #[builder(default)]
    pub attrs: Option<Vec<u8>>,
    /// Commit only if the latest committed version carries this etag.
    #[builder(default)]
    pub if_match: Option<String>,
    /// Cancel if the latest committed version carries this etag; `"*"`
    /// cancels whenever any committed version exists.
    #[builder(default)]
    pub if_nomatch: Option<String>,
}

/// Outcome of an atomic writer's `complete` step.
///
/// A failed precondition is a normal outcome, not an error: the writer
/// reports it here and the object's latest version is left untouched.
#[derive(Debug)]
pub enum Completion {
    /// The version was published; the committed row is returned.
    Committed(VersionedObject),
    /// An `if_match`/`if_nomatch` precondition failed; the staged version
    /// was discarded.
    Canceled,
}

impl Completion {
    /// Whether the writer was canceled by a precondition.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// The committed row, if the version was published.
    #[must_use]
    pub fn committed(&self) -> Option<&VersionedObject> {
        match self {
            Self::Committed(version) => Some(version),
            Self::Canceled => None,
        }
    }
}
