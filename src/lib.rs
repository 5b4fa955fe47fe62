//! An in-memory ordered key-value index backed by a B+ tree of fixed
//! 4096-byte slotted pages.
//!
//! Single-threaded, no persistence: the tree lives entirely in process
//! memory and is torn down when the [`BTree`] is dropped. See [`BTree`] for
//! the public surface (`insert`, `lookup`, `remove`, `scan`).

mod eytzinger;
mod find_separator;
mod node;
mod tree;
mod util;

pub use tree::BTree;
