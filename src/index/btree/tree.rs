//! BPlusTree - an ordered index over cached pages.
//!
//! Reads decode nodes into memory and release their pages before moving on.
//! Mutations run in two phases through a [`Mutation`]:
//! 1. **Plan**: load and edit node copies, allocate every page and overflow
//!    chain the result needs, pin every page that will be rewritten, and
//!    render the new page images. Any error here undoes the allocations and
//!    leaves the tree as it was.
//! 2. **Commit**: copy the images into their pinned frames, publish the new
//!    root, unpin, then free the pages and overflow chains the mutation
//!    released.

use std::collections::HashMap;
use std::mem;
use std::ops::Bound;

use log::{debug, warn};

use crate::buffer::{LruCache, StatsSnapshot};
use crate::common::{Error, PageId, Result};
use crate::index::btree::iterator::RangeIter;
use crate::index::btree::node::{InternalNode, LeafNode, Node};
use crate::index::codec::{KeyCodec, KeyRecord};
use crate::storage::page::Page;

/// A B+-tree of byte-string keys and values.
///
/// Internal nodes hold at most `fanout` children and leaves at most
/// `fanout - 1` entries. Every node except the root holds at least
/// `⌈fanout/2⌉` children (internal) or `⌊fanout/2⌋` entries (leaf).
///
/// # Example
/// ```
/// use pagetree::{BPlusTree, LruCache, MemoryStorage, Pager};
///
/// let pager = Pager::create(MemoryStorage::new(), 4096, 4).unwrap();
/// let mut tree = BPlusTree::open(LruCache::new(16, pager), 8).unwrap();
///
/// tree.insert(b"k", b"v").unwrap();
/// assert_eq!(tree.search(b"k").unwrap(), Some(b"v".to_vec()));
/// ```
pub struct BPlusTree {
    cache: LruCache,
    codec: KeyCodec,
    fanout: usize,
    root: PageId,
}

impl BPlusTree {
    /// Attach to the tree recorded in the cache's header, creating an empty
    /// root leaf if there is none.
    ///
    /// # Errors
    /// - `Error::Corrupted` if the recorded root isn't a node page
    /// - errors from the cache while creating the root
    pub fn open(cache: LruCache, max_overflow_pages: usize) -> Result<Self> {
        let fanout = cache.fanout();
        let codec = KeyCodec::new(cache.page_size(), max_overflow_pages);

        let root = match cache.root() {
            Some(root) => {
                load_node(&cache, root)?;
                root
            }
            None => {
                let image = Node::Leaf(LeafNode::default()).to_page(cache.page_size())?;
                let root = {
                    let mut guard = cache.new_page()?;
                    guard.copy_from(&image);
                    guard.page_id()
                };
                cache.set_root(Some(root));
                debug!("created root leaf {}", root);
                root
            }
        };

        Ok(Self {
            cache,
            codec,
            fanout,
            root,
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Look up the value stored under `key`.
    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut page_id = self.root;
        loop {
            match self.load(page_id)? {
                Node::Internal(node) => {
                    page_id = node.children[node.child_index(key, &self.codec, &self.cache)?];
                }
                Node::Leaf(leaf) => {
                    return match leaf.search(key, &self.codec, &self.cache)? {
                        Ok(i) => Ok(Some(self.codec.decode(&leaf.entries[i].1, &self.cache)?)),
                        Err(_) => Ok(None),
                    };
                }
            }
        }
    }

    /// Iterate over the entries with keys within `(low, high)`, in key order.
    ///
    /// The iterator is lazy and holds no pins between items.
    pub fn range(&self, low: Bound<&[u8]>, high: Bound<&[u8]>) -> RangeIter<'_> {
        RangeIter::new(self, low.map(<[u8]>::to_vec), high.map(<[u8]>::to_vec))
    }

    /// Number of entries, counted by walking the leaf chain.
    pub fn len(&self) -> Result<usize> {
        let mut count = 0;
        let mut next = Some(self.leftmost_leaf()?);
        while let Some(page_id) = next {
            let leaf = self.load_leaf(page_id)?;
            count += leaf.entries.len();
            next = leaf.next;
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(matches!(self.load(self.root)?, Node::Leaf(leaf) if leaf.entries.is_empty()))
    }

    /// Number of levels; a lone root leaf has height 1.
    pub fn height(&self) -> Result<usize> {
        let mut height = 1;
        let mut page_id = self.root;
        while let Node::Internal(node) = self.load(page_id)? {
            page_id = node.children[0];
            height += 1;
        }
        Ok(height)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert or overwrite `key`.
    ///
    /// # Errors
    /// - `Error::KeyTooLong` / `Error::ValueTooLong`, checked before anything
    ///   is touched
    /// - cache and storage errors; the tree is unchanged whenever an error
    ///   is returned
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.codec.check_key_len(key.len())?;
        self.codec.check_value_len(value.len())?;

        let root = self.root;
        let mut mutation = Mutation::new(&self.cache, &self.codec, self.fanout);
        let planned = mutation.insert_from_root(root, key, value);
        let new_root = mutation.finish(planned)?;

        if let Some(root) = new_root {
            self.root = root;
        }
        Ok(())
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        if key.len() > self.codec.max_len() {
            return Ok(false);
        }

        let root = self.root;
        let mut mutation = Mutation::new(&self.cache, &self.codec, self.fanout);
        let mut found = false;
        let planned = mutation.delete_from_root(root, key).map(|removed| found = removed);
        let new_root = mutation.finish(planned)?;

        if let Some(root) = new_root {
            self.root = root;
        }
        Ok(found)
    }

    /// Write every dirty page and the header to storage.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush_all()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn codec(&self) -> &KeyCodec {
        &self.codec
    }

    pub fn cache(&self) -> &LruCache {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.cache.stats().snapshot()
    }

    /// Fewest entries a non-root leaf may hold.
    pub fn min_leaf_entries(&self) -> usize {
        min_leaf_entries(self.fanout)
    }

    /// Fewest children a non-root internal node may hold.
    pub fn min_children(&self) -> usize {
        min_children(self.fanout)
    }

    pub(crate) fn load(&self, page_id: PageId) -> Result<Node> {
        load_node(&self.cache, page_id)
    }

    pub(crate) fn load_leaf(&self, page_id: PageId) -> Result<LeafNode> {
        match self.load(page_id)? {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(Error::corrupted(format!("{} in the leaf chain is internal", page_id))),
        }
    }

    fn leftmost_leaf(&self) -> Result<PageId> {
        let mut page_id = self.root;
        while let Node::Internal(node) = self.load(page_id)? {
            page_id = node.children[0];
        }
        Ok(page_id)
    }
}

fn load_node(cache: &LruCache, page_id: PageId) -> Result<Node> {
    let guard = cache.fetch_page_read(page_id)?;
    Node::read_from(page_id, &guard)
}

pub(crate) fn min_leaf_entries(fanout: usize) -> usize {
    fanout / 2
}

pub(crate) fn min_children(fanout: usize) -> usize {
    fanout.div_ceil(2)
}

// ============================================================================
// Mutation
// ============================================================================

/// Outcome of deleting below a node.
enum Removal {
    NotFound,
    Removed { underfull: bool },
}

/// Working set of one insert or delete.
struct Mutation<'a> {
    cache: &'a LruCache,
    codec: &'a KeyCodec,
    fanout: usize,
    /// Latest copy of every node touched.
    nodes: HashMap<PageId, Node>,
    /// Nodes to rewrite, in first-touch order.
    dirty: Vec<PageId>,
    /// Pages pinned by [`Mutation::put`].
    pinned: Vec<PageId>,
    /// Node pages allocated by this mutation.
    allocated: Vec<PageId>,
    /// Long records encoded by this mutation.
    created: Vec<KeyRecord>,
    /// Pages to free after commit.
    dead_pages: Vec<PageId>,
    /// Records whose chains are freed after commit.
    dead_records: Vec<KeyRecord>,
    new_root: Option<PageId>,
}

impl<'a> Mutation<'a> {
    fn new(cache: &'a LruCache, codec: &'a KeyCodec, fanout: usize) -> Self {
        Self {
            cache,
            codec,
            fanout,
            nodes: HashMap::new(),
            dirty: Vec::new(),
            pinned: Vec::new(),
            allocated: Vec::new(),
            created: Vec::new(),
            dead_pages: Vec::new(),
            dead_records: Vec::new(),
            new_root: None,
        }
    }

    // ========================================================================
    // Working set
    // ========================================================================

    fn get(&mut self, page_id: PageId) -> Result<Node> {
        if let Some(node) = self.nodes.get(&page_id) {
            return Ok(node.clone());
        }
        let node = load_node(self.cache, page_id)?;
        self.nodes.insert(page_id, node.clone());
        Ok(node)
    }

    /// Stage a new version of a node, pinning its page until commit.
    fn put(&mut self, page_id: PageId, node: Node) -> Result<()> {
        if !self.pinned.contains(&page_id) {
            self.cache.pin(page_id)?;
            self.pinned.push(page_id);
        }
        if !self.dirty.contains(&page_id) {
            self.dirty.push(page_id);
        }
        self.nodes.insert(page_id, node);
        Ok(())
    }

    fn allocate(&mut self, node: Node) -> Result<PageId> {
        let page_id = self.cache.new_page()?.page_id();
        self.allocated.push(page_id);
        self.put(page_id, node)?;
        Ok(page_id)
    }

    fn release_page(&mut self, page_id: PageId) {
        self.dirty.retain(|&pid| pid != page_id);
        self.nodes.remove(&page_id);
        self.dead_pages.push(page_id);
    }

    fn track(&mut self, record: KeyRecord) -> KeyRecord {
        if record.is_long() {
            self.created.push(record.clone());
        }
        record
    }

    fn encode_key(&mut self, key: &[u8]) -> Result<KeyRecord> {
        let record = self.codec.encode(key, self.cache)?;
        Ok(self.track(record))
    }

    fn encode_value(&mut self, value: &[u8]) -> Result<KeyRecord> {
        let record = self.codec.encode_value(value, self.cache)?;
        Ok(self.track(record))
    }

    fn duplicate(&mut self, record: &KeyRecord) -> Result<KeyRecord> {
        let copy = self.codec.duplicate(record, self.cache)?;
        Ok(self.track(copy))
    }

    fn release_record(&mut self, record: KeyRecord) {
        if record.is_long() {
            self.dead_records.push(record);
        }
    }

    // ========================================================================
    // Finish
    // ========================================================================

    /// Commit if `planned` succeeded, otherwise roll back. Returns the new
    /// root, if the root moved.
    fn finish(mut self, planned: Result<()>) -> Result<Option<PageId>> {
        let images = match planned.and_then(|()| self.render()) {
            Ok(images) => images,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };

        // Every page in `images` is pinned, so each fetch is a cache hit.
        let committed: Result<()> = images.iter().try_for_each(|(page_id, image)| {
            let mut guard = self.cache.fetch_page_write(*page_id)?;
            guard.copy_from(image);
            Ok(())
        });
        self.unpin_all();
        committed?;

        if let Some(root) = self.new_root {
            self.cache.set_root(Some(root));
            debug!("root is now {}", root);
        }

        // The tree is committed from here on. A failed release leaks storage
        // but must not report the mutation as failed.
        for page_id in mem::take(&mut self.dead_pages) {
            if let Err(e) = self.cache.delete_page(page_id) {
                warn!("leaked {} after commit: {}", page_id, e);
            }
        }
        for record in mem::take(&mut self.dead_records) {
            if let Err(e) = self.codec.free(&record, self.cache) {
                warn!("leaked overflow chain after commit: {}", e);
            }
        }
        Ok(self.new_root)
    }

    fn render(&self) -> Result<Vec<(PageId, Page)>> {
        self.dirty
            .iter()
            .map(|&page_id| {
                let node = self
                    .nodes
                    .get(&page_id)
                    .ok_or_else(|| Error::corrupted(format!("no staged node for {}", page_id)))?;
                Ok((page_id, node.to_page(self.cache.page_size())?))
            })
            .collect()
    }

    fn abort(&mut self) {
        for record in mem::take(&mut self.created) {
            if let Err(e) = self.codec.free(&record, self.cache) {
                warn!("leaked overflow chain during rollback: {}", e);
            }
        }
        self.unpin_all();
        for page_id in mem::take(&mut self.allocated) {
            if let Err(e) = self.cache.delete_page(page_id) {
                warn!("leaked {} during rollback: {}", page_id, e);
            }
        }
    }

    fn unpin_all(&mut self) {
        for page_id in mem::take(&mut self.pinned) {
            if let Err(e) = self.cache.unpin(page_id) {
                warn!("unpin of {} failed: {}", page_id, e);
            }
        }
    }

    // ========================================================================
    // Insert
    // ========================================================================

    fn insert_from_root(&mut self, root: PageId, key: &[u8], value: &[u8]) -> Result<()> {
        let Some((separator, right)) = self.insert(root, key, value)? else {
            return Ok(());
        };
        let new_root = InternalNode {
            keys: vec![separator],
            children: vec![root, right],
        };
        let new_root = self.allocate(Node::Internal(new_root))?;
        debug!("root split: {} + {} under {}", root, right, new_root);
        self.new_root = Some(new_root);
        Ok(())
    }

    /// Insert below `page_id`. Returns the separator and new right sibling if
    /// the node split.
    fn insert(&mut self, page_id: PageId, key: &[u8], value: &[u8]) -> Result<Option<(KeyRecord, PageId)>> {
        match self.get(page_id)? {
            Node::Leaf(mut leaf) => match leaf.search(key, self.codec, self.cache)? {
                Ok(i) => {
                    let value = self.encode_value(value)?;
                    let old = mem::replace(&mut leaf.entries[i].1, value);
                    self.release_record(old);
                    self.put(page_id, Node::Leaf(leaf))?;
                    Ok(None)
                }
                Err(i) => {
                    let key = self.encode_key(key)?;
                    let value = self.encode_value(value)?;
                    leaf.entries.insert(i, (key, value));
                    if leaf.entries.len() < self.fanout {
                        self.put(page_id, Node::Leaf(leaf))?;
                        return Ok(None);
                    }
                    self.split_leaf(page_id, leaf).map(Some)
                }
            },
            Node::Internal(mut node) => {
                let i = node.child_index(key, self.codec, self.cache)?;
                let Some((separator, right)) = self.insert(node.children[i], key, value)? else {
                    return Ok(None);
                };
                node.keys.insert(i, separator);
                node.children.insert(i + 1, right);
                if node.children.len() <= self.fanout {
                    self.put(page_id, Node::Internal(node))?;
                    return Ok(None);
                }
                self.split_internal(page_id, node).map(Some)
            }
        }
    }

    /// Left keeps `⌊n/2⌋` entries; the right node's first key is copied up.
    fn split_leaf(&mut self, page_id: PageId, mut leaf: LeafNode) -> Result<(KeyRecord, PageId)> {
        let right = LeafNode {
            entries: leaf.entries.split_off(leaf.entries.len() / 2),
            next: leaf.next,
        };
        let separator = self.duplicate(&right.entries[0].0)?;
        let right_id = self.allocate(Node::Leaf(right))?;
        leaf.next = Some(right_id);
        self.put(page_id, Node::Leaf(leaf))?;
        debug!("split leaf {} into {}", page_id, right_id);
        Ok((separator, right_id))
    }

    /// The median key moves up; left keeps `⌈n/2⌉` children.
    fn split_internal(&mut self, page_id: PageId, mut node: InternalNode) -> Result<(KeyRecord, PageId)> {
        let mid = node.keys.len().div_ceil(2) - 1;
        let right = InternalNode {
            keys: node.keys.split_off(mid + 1),
            children: node.children.split_off(mid + 1),
        };
        let median = node
            .keys
            .pop()
            .ok_or_else(|| Error::corrupted(format!("split of {} found no median", page_id)))?;
        let right_id = self.allocate(Node::Internal(right))?;
        self.put(page_id, Node::Internal(node))?;
        debug!("split internal {} into {}", page_id, right_id);
        Ok((median, right_id))
    }

    // ========================================================================
    // Delete
    // ========================================================================

    fn delete_from_root(&mut self, root: PageId, key: &[u8]) -> Result<bool> {
        if let Removal::NotFound = self.delete(root, key)? {
            return Ok(false);
        }
        if let Node::Internal(node) = self.get(root)? {
            if node.children.len() == 1 {
                let child = node.children[0];
                self.release_page(root);
                self.new_root = Some(child);
                debug!("root {} collapsed into {}", root, child);
            }
        }
        Ok(true)
    }

    fn delete(&mut self, page_id: PageId, key: &[u8]) -> Result<Removal> {
        match self.get(page_id)? {
            Node::Leaf(mut leaf) => {
                let Ok(i) = leaf.search(key, self.codec, self.cache)? else {
                    return Ok(Removal::NotFound);
                };
                let (old_key, old_value) = leaf.entries.remove(i);
                self.release_record(old_key);
                self.release_record(old_value);
                let underfull = leaf.entries.len() < min_leaf_entries(self.fanout);
                self.put(page_id, Node::Leaf(leaf))?;
                Ok(Removal::Removed { underfull })
            }
            Node::Internal(mut node) => {
                let i = node.child_index(key, self.codec, self.cache)?;
                match self.delete(node.children[i], key)? {
                    Removal::Removed { underfull: true } => {
                        self.rebalance(&mut node, i)?;
                        let underfull = node.children.len() < min_children(self.fanout);
                        self.put(page_id, Node::Internal(node))?;
                        Ok(Removal::Removed { underfull })
                    }
                    other => Ok(other),
                }
            }
        }
    }

    fn can_lend(&self, node: &Node) -> bool {
        match node {
            Node::Leaf(leaf) => leaf.entries.len() > min_leaf_entries(self.fanout),
            Node::Internal(node) => node.children.len() > min_children(self.fanout),
        }
    }

    /// Fix underfull `parent.children[i]`: borrow from the right sibling, else
    /// the left, else merge with the right, else with the left.
    fn rebalance(&mut self, parent: &mut InternalNode, i: usize) -> Result<()> {
        let child = self.get(parent.children[i])?;
        let right = match parent.children.get(i + 1) {
            Some(&right_id) => Some(self.get(right_id)?),
            None => None,
        };

        if let Some(right) = right.as_ref().filter(|right| self.can_lend(right)) {
            return self.borrow_from_right(parent, i, child, right.clone());
        }
        let left = match i.checked_sub(1) {
            Some(left_i) => Some(self.get(parent.children[left_i])?),
            None => None,
        };
        if let Some(left) = left.as_ref().filter(|left| self.can_lend(left)) {
            return self.borrow_from_left(parent, i, left.clone(), child);
        }
        if let Some(right) = right {
            return self.merge(parent, i, child, right);
        }
        if let Some(left) = left {
            return self.merge(parent, i - 1, left, child);
        }
        Err(Error::corrupted("non-root internal node with a single child"))
    }

    fn borrow_from_right(&mut self, parent: &mut InternalNode, i: usize, child: Node, right: Node) -> Result<()> {
        let (child_id, right_id) = (parent.children[i], parent.children[i + 1]);
        match (child, right) {
            (Node::Leaf(mut child), Node::Leaf(mut right)) => {
                child.entries.push(right.entries.remove(0));
                let separator = self.duplicate(&right.entries[0].0)?;
                let old = mem::replace(&mut parent.keys[i], separator);
                self.release_record(old);
                self.put(child_id, Node::Leaf(child))?;
                self.put(right_id, Node::Leaf(right))?;
            }
            (Node::Internal(mut child), Node::Internal(mut right)) => {
                let separator = mem::replace(&mut parent.keys[i], right.keys.remove(0));
                child.keys.push(separator);
                child.children.push(right.children.remove(0));
                self.put(child_id, Node::Internal(child))?;
                self.put(right_id, Node::Internal(right))?;
            }
            _ => return Err(mixed_siblings(child_id, right_id)),
        }
        debug!("{} borrowed from right sibling {}", child_id, right_id);
        Ok(())
    }

    fn borrow_from_left(&mut self, parent: &mut InternalNode, i: usize, left: Node, child: Node) -> Result<()> {
        let (left_id, child_id) = (parent.children[i - 1], parent.children[i]);
        match (left, child) {
            (Node::Leaf(mut left), Node::Leaf(mut child)) => {
                let entry = left
                    .entries
                    .pop()
                    .ok_or_else(|| Error::corrupted(format!("lending leaf {} is empty", left_id)))?;
                child.entries.insert(0, entry);
                let separator = self.duplicate(&child.entries[0].0)?;
                let old = mem::replace(&mut parent.keys[i - 1], separator);
                self.release_record(old);
                self.put(left_id, Node::Leaf(left))?;
                self.put(child_id, Node::Leaf(child))?;
            }
            (Node::Internal(mut left), Node::Internal(mut child)) => {
                let (Some(key), Some(grandchild)) = (left.keys.pop(), left.children.pop()) else {
                    return Err(Error::corrupted(format!("lending node {} is empty", left_id)));
                };
                let separator = mem::replace(&mut parent.keys[i - 1], key);
                child.keys.insert(0, separator);
                child.children.insert(0, grandchild);
                self.put(left_id, Node::Internal(left))?;
                self.put(child_id, Node::Internal(child))?;
            }
            _ => return Err(mixed_siblings(left_id, child_id)),
        }
        debug!("{} borrowed from left sibling {}", child_id, left_id);
        Ok(())
    }

    /// Fold `parent.children[s + 1]` into `parent.children[s]`.
    fn merge(&mut self, parent: &mut InternalNode, s: usize, left: Node, right: Node) -> Result<()> {
        let (left_id, right_id) = (parent.children[s], parent.children[s + 1]);
        let separator = parent.keys.remove(s);
        parent.children.remove(s + 1);

        let merged = match (left, right) {
            (Node::Leaf(mut left), Node::Leaf(right)) => {
                left.entries.extend(right.entries);
                left.next = right.next;
                self.release_record(separator);
                Node::Leaf(left)
            }
            (Node::Internal(mut left), Node::Internal(right)) => {
                left.keys.push(separator);
                left.keys.extend(right.keys);
                left.children.extend(right.children);
                Node::Internal(left)
            }
            _ => return Err(mixed_siblings(left_id, right_id)),
        };
        self.put(left_id, merged)?;
        self.release_page(right_id);
        debug!("merged {} into {}", right_id, left_id);
        Ok(())
    }
}

fn mixed_siblings(a: PageId, b: PageId) -> Error {
    Error::corrupted(format!("siblings {} and {} are different node types", a, b))
}
