//! Content digests.
//!
//! Implementation writes tag their staging file with a short digest of the
//! bytes being written; the in-memory git host names blobs, trees, and
//! commits the way git does, by hashing a `<kind> <len>\0` header followed
//! by the object body.

use sha2::{Digest, Sha256};

/// Hex characters kept in a staging tag.
pub const STAGING_TAG_LEN: usize = 12;

/// Full SHA-256 hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Short digest used to keep concurrent staging files for different
/// content apart.
pub fn staging_tag(content: &[u8]) -> String {
    let mut digest = sha256_hex(content);
    digest.truncate(STAGING_TAG_LEN);
    digest
}

/// Git-style object id: the digest of `<kind> <len>\0<body>`.
pub fn object_id(kind: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{kind} {}\0", body.len()).as_bytes());
    hasher.update(body);
    format!("{:x}", hasher.finalize())
}
