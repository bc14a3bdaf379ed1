//! The append-only, hash-linked log and its conflict-resolution rule.
//!
//! Every operation here is a pure function over owned values: `append`
//! returns a new chain and `resolve` picks one of two chains. Callers that
//! share a chain between tasks apply these under their own lock (see
//! [`crate::state`]).

use chrono::Utc;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::block::Block;

/// Index of the first block.
pub const GENESIS_INDEX: u64 = 1;
/// Placeholder content of the first block.
pub const GENESIS_CONTENT: &str = "---Genesis---";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("a chain must contain at least one block")]
    Empty,
    #[error("block index space is exhausted")]
    IndexOverflow,
}

/// Ordered, never-empty sequence of blocks.
///
/// Construction goes through [`Chain::genesis`], [`Chain::append`], or the
/// fallible conversion from a `Vec<Block>`, so there is always a last block
/// to build on. Decoding an empty JSON array fails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<Block>")]
pub struct Chain {
    blocks: Vec<Block>,
}

impl Chain {
    /// One-block chain stamped with the current time.
    pub fn genesis() -> Self {
        Self::genesis_at(now())
    }

    pub fn genesis_at(timestamp: String) -> Self {
        let block = Block::new(
            GENESIS_INDEX,
            timestamp,
            GENESIS_CONTENT.to_string(),
            String::new(),
        );
        Self {
            blocks: vec![block],
        }
    }

    /// Returns a new chain with `content` appended as a block stamped now.
    pub fn append(&self, content: impl Into<String>) -> Result<Self, ChainError> {
        self.append_at(now(), content)
    }

    pub fn append_at(
        &self,
        timestamp: String,
        content: impl Into<String>,
    ) -> Result<Self, ChainError> {
        let next = self
            .head()
            .successor(timestamp, content.into())
            .ok_or(ChainError::IndexOverflow)?;
        let mut blocks = Vec::with_capacity(self.blocks.len() + 1);
        blocks.extend_from_slice(&self.blocks);
        blocks.push(next);
        Ok(Self { blocks })
    }

    /// Walks every adjacent pair and checks the links. The first block must
    /// sit at `GENESIS_INDEX` with an empty `prevHash` and hash to its own
    /// `hash` field.
    pub fn validate(&self) -> bool {
        let first = &self.blocks[0];
        first.index == GENESIS_INDEX
            && first.prev_hash.is_empty()
            && first.has_valid_hash()
            && self
                .blocks
                .windows(2)
                .all(|pair| pair[0].is_valid_successor(&pair[1]))
    }

    /// Applies the conflict-resolution rule and returns whichever chain wins.
    pub fn resolve(self, candidate: Chain, policy: AdoptionPolicy) -> Chain {
        match policy.decide(Some(&self), &candidate) {
            Resolution::Adopt => candidate,
            Resolution::Keep(_) => self,
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn head(&self) -> &Block {
        // Non-empty by construction.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

impl TryFrom<Vec<Block>> for Chain {
    type Error = ChainError;

    fn try_from(blocks: Vec<Block>) -> Result<Self, Self::Error> {
        if blocks.is_empty() {
            return Err(ChainError::Empty);
        }
        Ok(Self { blocks })
    }
}

impl Serialize for Chain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(&self.blocks)
    }
}

/// How a node decides whether a peer's chain replaces its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdoptionPolicy {
    /// Any strictly longer chain wins, links unchecked.
    LengthOnly,
    /// A strictly longer chain wins only if it also validates.
    #[default]
    ValidatedLength,
}

/// Outcome of comparing a candidate against the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Adopt,
    Keep(KeepReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    /// Candidate is not strictly longer than the local chain.
    NotLonger,
    /// Candidate is longer but its links do not verify.
    Invalid,
}

impl AdoptionPolicy {
    /// Compares `candidate` with `local`. A node with no chain yet treats
    /// its local length as zero.
    pub fn decide(self, local: Option<&Chain>, candidate: &Chain) -> Resolution {
        let local_len = local.map_or(0, Chain::len);
        if candidate.len() <= local_len {
            return Resolution::Keep(KeepReason::NotLonger);
        }
        if self == AdoptionPolicy::ValidatedLength && !candidate.validate() {
            return Resolution::Keep(KeepReason::Invalid);
        }
        Resolution::Adopt
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}
