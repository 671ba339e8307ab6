//! In-memory representations of the stored entities.
//!
//! These are plain records mirroring the metadata schema row for row. The
//! metadata store owns the authoritative state; values of these types are
//! transient views identified by their primary keys (user id, bucket id,
//! object uuid, version surrogate id).

pub mod bucket;
pub mod lifecycle;
pub mod object;
pub mod user;

pub use bucket::{Bucket, BucketFlags};
pub use lifecycle::{LcEntry, LcHead};
pub use object::{Object, ObjectState, VersionType, VersionedObject};
pub use user::{AccessKey, User};
