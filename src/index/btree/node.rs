//! B+-tree node layouts.
//!
//! Nodes are decoded once from their page into a [`Node`] and encoded back
//! into a fresh page image when modified.
//!
//! # Leaf page
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     PageHeader (type = BTreeLeaf)
//! 8       2     entry count
//! 10      4     next leaf (0 = last leaf)
//! 14      2     reserved
//! 16      ...   (key record, value record) pairs
//! ```
//!
//! # Internal page
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     PageHeader (type = BTreeInternal)
//! 8       2     key count
//! 10      6     reserved
//! 16      4     child 0
//! 20      ...   (key record, child u32) pairs
//! ```

use std::cmp::Ordering;

use crate::common::{Error, PageId, Result};
use crate::index::codec::{KeyCodec, KeyRecord, OverflowResolver};
use crate::storage::page::{get_u16, get_u32, put_u16, put_u32, Page, PageHeader, PageType};

const OFFSET_COUNT: usize = PageHeader::SIZE;
const OFFSET_NEXT_LEAF: usize = PageHeader::SIZE + 2;

/// First byte after the node header.
pub const NODE_HEADER_SIZE: usize = 16;

/// A leaf: sorted entries plus the link to the next leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    pub entries: Vec<(KeyRecord, KeyRecord)>,
    pub next: Option<PageId>,
}

/// An internal node: `children.len() == keys.len() + 1`.
///
/// Keys in `children[i]` are `< keys[i]`; keys in `children[i + 1]` are
/// `>= keys[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalNode {
    pub keys: Vec<KeyRecord>,
    pub children: Vec<PageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl LeafNode {
    /// Binary search for `key`: `Ok(i)` if found, `Err(i)` for the insert
    /// position.
    pub fn search<R: OverflowResolver + ?Sized>(
        &self,
        key: &[u8],
        codec: &KeyCodec,
        resolver: &R,
    ) -> Result<std::result::Result<usize, usize>> {
        let (mut lo, mut hi) = (0, self.entries.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match codec.compare_key(&self.entries[mid].0, key, resolver)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    fn write_body(&self, buf: &mut Vec<u8>) {
        for (key, value) in &self.entries {
            key.write_to(buf);
            value.write_to(buf);
        }
    }

    fn read_body(data: &[u8], count: usize) -> Result<Vec<(KeyRecord, KeyRecord)>> {
        let mut entries = Vec::with_capacity(count);
        let mut offset = NODE_HEADER_SIZE;
        for _ in 0..count {
            let (key, used) = KeyRecord::read_from(&data[offset..])?;
            offset += used;
            let (value, used) = KeyRecord::read_from(&data[offset..])?;
            offset += used;
            entries.push((key, value));
        }
        Ok(entries)
    }
}

impl InternalNode {
    /// Index of the child whose range holds `key`: the number of separators
    /// `<= key`.
    pub fn child_index<R: OverflowResolver + ?Sized>(
        &self,
        key: &[u8],
        codec: &KeyCodec,
        resolver: &R,
    ) -> Result<usize> {
        let (mut lo, mut hi) = (0, self.keys.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if codec.compare_key(&self.keys[mid], key, resolver)? == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        Ok(lo)
    }

    fn write_body(&self, buf: &mut Vec<u8>) {
        let mut children = self.children.iter();
        if let Some(first) = children.next() {
            buf.extend_from_slice(&first.0.to_le_bytes());
        }
        for (key, child) in self.keys.iter().zip(children) {
            key.write_to(buf);
            buf.extend_from_slice(&child.0.to_le_bytes());
        }
    }

    fn read_body(data: &[u8], count: usize) -> Result<Self> {
        let mut keys = Vec::with_capacity(count);
        let mut children = Vec::with_capacity(count + 1);
        let mut offset = NODE_HEADER_SIZE;

        children.push(read_child(data, offset)?);
        offset += 4;
        for _ in 0..count {
            let (key, used) = KeyRecord::read_from(&data[offset..])?;
            offset += used;
            keys.push(key);
            children.push(read_child(data, offset)?);
            offset += 4;
        }
        Ok(Self { keys, children })
    }
}

fn read_child(data: &[u8], offset: usize) -> Result<PageId> {
    if offset + 4 > data.len() {
        return Err(Error::corrupted("internal node truncated"));
    }
    PageId::from_disk(get_u32(data, offset)).ok_or_else(|| Error::corrupted("internal node has a null child"))
}

impl Node {
    /// Decode a node page.
    ///
    /// # Errors
    /// Returns `Error::Corrupted` if the page isn't a node or its records
    /// don't parse.
    pub fn read_from(page_id: PageId, page: &Page) -> Result<Self> {
        let data = page.as_slice();
        let count = get_u16(data, OFFSET_COUNT) as usize;
        match page.page_type() {
            PageType::BTreeLeaf => Ok(Node::Leaf(LeafNode {
                entries: LeafNode::read_body(data, count)?,
                next: PageId::from_disk(get_u32(data, OFFSET_NEXT_LEAF)),
            })),
            PageType::BTreeInternal => Ok(Node::Internal(InternalNode::read_body(data, count)?)),
            other => Err(Error::corrupted(format!("{} is a {:?} page, not a tree node", page_id, other))),
        }
    }

    /// Encode this node into a new page image (checksum left for the cache).
    ///
    /// # Errors
    /// Returns `Error::Corrupted` if the node doesn't fit in a page, which only
    /// happens if a node outgrew its fanout.
    pub fn to_page(&self, page_size: usize) -> Result<Page> {
        let mut buf = Vec::with_capacity(page_size);
        buf.resize(NODE_HEADER_SIZE, 0);

        let (page_type, count) = match self {
            Node::Leaf(leaf) => {
                put_u32(&mut buf, OFFSET_NEXT_LEAF, PageId::to_disk(leaf.next));
                leaf.write_body(&mut buf);
                (PageType::BTreeLeaf, leaf.entries.len())
            }
            Node::Internal(node) => {
                node.write_body(&mut buf);
                (PageType::BTreeInternal, node.keys.len())
            }
        };
        put_u16(&mut buf, OFFSET_COUNT, count as u16);
        PageHeader::new(page_type).write_to(&mut buf);

        if buf.len() > page_size {
            return Err(Error::corrupted(format!(
                "node of {} bytes overflows a {}-byte page",
                buf.len(),
                page_size
            )));
        }

        let mut page = Page::new(page_size);
        page.as_mut_slice()[..buf.len()].copy_from_slice(&buf);
        Ok(page)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }
}
