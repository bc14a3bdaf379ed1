//! A single hash-linked log entry.

use serde::{Deserialize, Serialize};

use crate::hashing::calculate_hash;

/// One entry of the chain.
///
/// Serialized with the field names `index`, `timestamp`, `content`, `hash`
/// and `prevHash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    pub timestamp: String,
    pub content: String,
    pub hash: String,
    pub prev_hash: String,
}

impl Block {
    /// Builds a block and fills in its hash from the other fields.
    pub fn new(index: u64, timestamp: String, content: String, prev_hash: String) -> Self {
        let hash = calculate_hash(index, &timestamp, &content, &prev_hash);
        Self {
            index,
            timestamp,
            content,
            hash,
            prev_hash,
        }
    }

    /// Builds the block that follows `self`. `None` once the index space
    /// is exhausted.
    pub fn successor(&self, timestamp: String, content: String) -> Option<Self> {
        let index = self.index.checked_add(1)?;
        Some(Self::new(index, timestamp, content, self.hash.clone()))
    }

    /// Recomputes the hash over the current fields.
    pub fn compute_hash(&self) -> String {
        calculate_hash(self.index, &self.timestamp, &self.content, &self.prev_hash)
    }

    pub fn has_valid_hash(&self) -> bool {
        self.compute_hash() == self.hash
    }

    /// Checks that `next` correctly extends `self`: consecutive index,
    /// matching back-link, and a hash that covers its own fields.
    pub fn is_valid_successor(&self, next: &Block) -> bool {
        self.index.checked_add(1) == Some(next.index)
            && next.prev_hash == self.hash
            && next.has_valid_hash()
    }
}
