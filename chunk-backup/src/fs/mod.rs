//! Filesystem-facing modules: snapshot model, namespace scanner, differ.

pub mod diff;
pub mod scanner;
pub mod snapshot;

pub use scanner::ChunkScanner;
pub use snapshot::{EntryMeta, ShardTree, Snapshot};
