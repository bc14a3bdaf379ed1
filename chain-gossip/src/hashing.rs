//! Content addressing for blocks.
//!
//! A block's hash is SHA-256 over the record
//! `index ++ timestamp ++ content ++ prev_hash`, with the index written in
//! decimal and no separators, encoded as lower-case hex. The block's own
//! `hash` field is never part of the record.

use sha2::{Digest, Sha256};

/// Hashes the fields of a block in their fixed order.
pub fn calculate_hash(index: u64, timestamp: &str, content: &str, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    hasher.update(content.as_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}
