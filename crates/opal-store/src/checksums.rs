//! Checksum helpers for object content.
//!
//! The backend keeps an MD5 digest of every version body it writes; the
//! digest is stored in the `checksum` column of the versions table. ETags
//! are quoted hex MD5 digests.

use md5::{Digest, Md5};

/// Compute the MD5 digest of `data` as a lowercase hex string.
#[must_use]
pub fn compute_md5(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Wrap a hex digest in double quotes, producing an S3-style ETag.
#[must_use]
pub fn quoted_etag(hex_digest: &str) -> String {
    format!("\"{hex_digest}\"")
}

/// Incremental MD5 over a streamed body.
///
/// Writers feed each processed chunk into this and read the final hex
/// digest at commit time.
pub struct StreamingChecksum {
    hasher: Md5,
}

impl std::fmt::Debug for StreamingChecksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingChecksum").finish_non_exhaustive()
    }
}

impl Default for StreamingChecksum {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingChecksum {
    /// Create a new, empty checksum.
    #[must_use]
    pub fn new() -> Self {
        Self { hasher: Md5::new() }
    }

    /// Feed a chunk of body bytes.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Finish the digest and return it as a lowercase hex string.
    ///
    /// The checksum is reset to its initial state afterwards.
    pub fn finalize_hex(&mut self) -> String {
        hex::encode(self.hasher.finalize_reset())
    }
}
