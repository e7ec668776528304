//! Structural checks over a whole tree.

use crate::common::{Error, PageId, Result};
use crate::index::btree::node::Node;
use crate::index::btree::tree::{min_children, min_leaf_entries, BPlusTree};
use crate::index::codec::KeyRecord;

/// Summary of a tree that passed [`BPlusTree::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeShape {
    pub height: usize,
    pub entries: usize,
    pub leaves: usize,
    pub internal_nodes: usize,
}

struct Verifier<'t> {
    tree: &'t BPlusTree,
    shape: TreeShape,
    leaf_depth: Option<usize>,
    /// Leaves in key order, with their recorded sibling.
    leaves: Vec<(PageId, Option<PageId>)>,
}

impl BPlusTree {
    /// Walk every node and check the tree's invariants:
    /// - keys strictly increase within a node and stay within the range
    ///   their ancestors' separators allow
    /// - every non-root node meets its minimum occupancy and no node
    ///   exceeds its maximum
    /// - all leaves sit at the same depth
    /// - the sibling chain visits the leaves in key order and ends at the
    ///   last one
    /// - every key and value decodes
    ///
    /// # Errors
    /// Returns `Error::Corrupted` describing the first violation found.
    pub fn verify(&self) -> Result<TreeShape> {
        let mut verifier = Verifier {
            tree: self,
            shape: TreeShape::default(),
            leaf_depth: None,
            leaves: Vec::new(),
        };
        verifier.walk(self.root(), 0, None, None)?;
        verifier.check_chain()?;

        let mut shape = verifier.shape;
        shape.height = verifier.leaf_depth.map_or(0, |depth| depth + 1);
        Ok(shape)
    }
}

impl Verifier<'_> {
    fn walk(&mut self, page_id: PageId, depth: usize, low: Option<&[u8]>, high: Option<&[u8]>) -> Result<()> {
        let fanout = self.tree.fanout();
        let is_root = depth == 0;

        match self.tree.load(page_id)? {
            Node::Leaf(leaf) => {
                let n = leaf.entries.len();
                if n >= fanout || (!is_root && n < min_leaf_entries(fanout)) {
                    return Err(violation(page_id, format!("leaf holds {} entries", n)));
                }
                match self.leaf_depth {
                    None => self.leaf_depth = Some(depth),
                    Some(d) if d != depth => {
                        return Err(violation(page_id, format!("leaf at depth {}, expected {}", depth, d)));
                    }
                    Some(_) => {}
                }

                let mut keys = Vec::with_capacity(n);
                for (key, value) in &leaf.entries {
                    keys.push(self.decode(key)?);
                    self.decode(value)?;
                }
                check_keys(page_id, &keys, low, high)?;

                self.leaves.push((page_id, leaf.next));
                self.shape.leaves += 1;
                self.shape.entries += n;
            }
            Node::Internal(node) => {
                let n = node.children.len();
                if n != node.keys.len() + 1 {
                    return Err(violation(page_id, "child count doesn't match key count"));
                }
                let min = if is_root { 2 } else { min_children(fanout) };
                if n > fanout || n < min {
                    return Err(violation(page_id, format!("internal node has {} children", n)));
                }

                let keys = node
                    .keys
                    .iter()
                    .map(|key| self.decode(key))
                    .collect::<Result<Vec<_>>>()?;
                check_keys(page_id, &keys, low, high)?;

                self.shape.internal_nodes += 1;
                for (i, &child) in node.children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(keys[i - 1].as_slice()) };
                    let child_high = keys.get(i).map(Vec::as_slice).or(high);
                    self.walk(child, depth + 1, child_low, child_high)?;
                }
            }
        }
        Ok(())
    }

    fn check_chain(&self) -> Result<()> {
        for pair in self.leaves.windows(2) {
            let ((page_id, next), (following, _)) = (pair[0], pair[1]);
            if next != Some(following) {
                return Err(violation(page_id, format!("sibling is {:?}, expected {}", next, following)));
            }
        }
        match self.leaves.last() {
            Some(&(page_id, Some(next))) => Err(violation(page_id, format!("last leaf links to {}", next))),
            _ => Ok(()),
        }
    }

    fn decode(&self, record: &KeyRecord) -> Result<Vec<u8>> {
        self.tree.codec().decode(record, self.tree.cache())
    }
}

/// Keys must strictly increase and lie within `[low, high)`.
fn check_keys(page_id: PageId, keys: &[Vec<u8>], low: Option<&[u8]>, high: Option<&[u8]>) -> Result<()> {
    if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(violation(page_id, "keys out of order"));
    }
    if let (Some(low), Some(first)) = (low, keys.first()) {
        if first.as_slice() < low {
            return Err(violation(page_id, "key below its separator"));
        }
    }
    if let (Some(high), Some(last)) = (high, keys.last()) {
        if last.as_slice() >= high {
            return Err(violation(page_id, "key at or above its upper separator"));
        }
    }
    Ok(())
}

fn violation(page_id: PageId, msg: impl AsRef<str>) -> Error {
    Error::corrupted(format!("{}: {}", page_id, msg.as_ref()))
}
