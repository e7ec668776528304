//! Ordered index: the B+-tree and the record codec it stores keys with.

pub mod btree;
pub mod codec;

pub use btree::{BPlusTree, RangeIter, TreeShape};
pub use codec::{KeyCodec, KeyRecord, OverflowResolver, OverflowStore};
