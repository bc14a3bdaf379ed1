//! Peers gossiping a shared, append-only, hash-linked log.
//!
//! Every node holds one chain of blocks, each block bound to its
//! predecessor by a SHA-256 hash. Nodes exchange their full chain over
//! newline-delimited JSON streams and converge by adopting any strictly
//! longer chain they receive.
//!
//! - [`hashing`] computes the content address of a block.
//! - [`block`] and [`chain`] hold the data model, append, validation and
//!   the resolution rule.
//! - [`frame`] reads and writes one JSON document per line.
//! - [`state`] guards the node's chain behind a single lock and announces
//!   changes.
//! - [`session`] runs the broadcaster and listener for one peer stream.
//! - [`transport`] names hosts and opens negotiated TCP streams.
//! - [`console`] turns operator input into appends and renders updates.
//! - [`node`] ties a host, the shared chain and its sessions together.
//! - [`cli`] parses the command-line interface.

pub mod block;
pub mod chain;
pub mod cli;
pub mod console;
pub mod frame;
pub mod hashing;
pub mod node;
pub mod session;
pub mod state;
pub mod transport;
