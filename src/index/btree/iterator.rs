//! Range scans over the leaf chain.

use std::cmp::Ordering;
use std::ops::Bound;
use std::vec;

use crate::common::{PageId, Result};
use crate::index::btree::node::Node;
use crate::index::btree::tree::BPlusTree;
use crate::index::codec::KeyRecord;

enum State {
    /// Not yet positioned; the descent happens on the first `next()`.
    Start,
    Leaf {
        entries: vec::IntoIter<(KeyRecord, KeyRecord)>,
        next: Option<PageId>,
    },
    Done,
}

/// Iterator over `(key, value)` pairs within a key range, in key order.
///
/// Each leaf is decoded into memory when the scan reaches it, so no page
/// stays pinned between calls. After an error the iterator is exhausted.
pub struct RangeIter<'t> {
    tree: &'t BPlusTree,
    low: Bound<Vec<u8>>,
    high: Bound<Vec<u8>>,
    past_low: bool,
    state: State,
}

impl<'t> RangeIter<'t> {
    pub(crate) fn new(tree: &'t BPlusTree, low: Bound<Vec<u8>>, high: Bound<Vec<u8>>) -> Self {
        Self {
            tree,
            low,
            high,
            past_low: false,
            state: State::Start,
        }
    }

    fn step(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        loop {
            let (key, value) = match &mut self.state {
                State::Done => return Ok(None),
                State::Start => {
                    self.state = self.seek()?;
                    continue;
                }
                State::Leaf { entries, next } => match entries.next() {
                    Some(entry) => entry,
                    None => match next.take() {
                        Some(page_id) => {
                            self.state = self.enter(page_id)?;
                            continue;
                        }
                        None => return Ok(None),
                    },
                },
            };

            if !self.past_low {
                if !self.above_low(&key)? {
                    continue;
                }
                self.past_low = true;
            }
            if !self.below_high(&key)? {
                return Ok(None);
            }

            let codec = self.tree.codec();
            let cache = self.tree.cache();
            return Ok(Some((codec.decode(&key, cache)?, codec.decode(&value, cache)?)));
        }
    }

    /// Descend to the leaf that would hold the lower bound.
    fn seek(&self) -> Result<State> {
        let (codec, cache) = (self.tree.codec(), self.tree.cache());
        let mut page_id = self.tree.root();
        loop {
            match self.tree.load(page_id)? {
                Node::Internal(node) => {
                    let i = match &self.low {
                        Bound::Included(low) | Bound::Excluded(low) => node.child_index(low, codec, cache)?,
                        Bound::Unbounded => 0,
                    };
                    page_id = node.children[i];
                }
                Node::Leaf(leaf) => {
                    return Ok(State::Leaf {
                        entries: leaf.entries.into_iter(),
                        next: leaf.next,
                    })
                }
            }
        }
    }

    fn enter(&self, page_id: PageId) -> Result<State> {
        let leaf = self.tree.load_leaf(page_id)?;
        Ok(State::Leaf {
            entries: leaf.entries.into_iter(),
            next: leaf.next,
        })
    }

    fn above_low(&self, key: &KeyRecord) -> Result<bool> {
        Ok(match &self.low {
            Bound::Unbounded => true,
            Bound::Included(low) => self.compare(key, low)? != Ordering::Less,
            Bound::Excluded(low) => self.compare(key, low)? == Ordering::Greater,
        })
    }

    fn below_high(&self, key: &KeyRecord) -> Result<bool> {
        Ok(match &self.high {
            Bound::Unbounded => true,
            Bound::Included(high) => self.compare(key, high)? != Ordering::Greater,
            Bound::Excluded(high) => self.compare(key, high)? == Ordering::Less,
        })
    }

    fn compare(&self, key: &KeyRecord, bound: &[u8]) -> Result<Ordering> {
        self.tree.codec().compare_key(key, bound, self.tree.cache())
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.state = State::Done;
                None
            }
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
