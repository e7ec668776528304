//! B+-tree index over the page cache.
//!
//! - `node`: in-memory node forms and their page layouts
//! - `tree`: search, insert, delete and rebalancing
//! - `iterator`: lazy range scans along the leaf chain
//! - `verify`: structural invariant checks

mod iterator;
mod node;
mod tree;
mod verify;

pub use iterator::RangeIter;
pub use node::{InternalNode, LeafNode, Node, NODE_HEADER_SIZE};
pub use tree::BPlusTree;
pub use verify::TreeShape;

use crate::index::codec::MAX_RECORD_SIZE;

/// Largest fanout whose fullest node fits in a page.
///
/// A full leaf holds `fanout - 1` entries of two worst-case records each,
/// after the node header.
pub fn max_fanout(page_size: usize) -> usize {
    (page_size - NODE_HEADER_SIZE) / (2 * MAX_RECORD_SIZE) + 1
}
