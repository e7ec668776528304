//! KeyCodec - packs variable-length keys and values into bounded records.
//!
//! # Record wire format
//! ```text
//! Short (1..=255 bytes):  [L: u8][L bytes]
//! Long  (> 255 bytes):    [0x00][overflow: u32][offset: u16][249 inline bytes]
//! Empty (0 bytes):        [0x00][0u32][0u16][249 zero bytes]
//! ```
//! A record is therefore never longer than [`MAX_RECORD_SIZE`] bytes.
//!
//! # Overflow chains
//! The bytes of a long record past its inline prefix live in a chain of
//! overflow pages owned by that record alone:
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     PageHeader (type = Overflow)
//! 8       4     next overflow page (0 = end)
//! 12      ...   data
//! ```
//! The data stream starts at the record's stored offset with a u32 remainder
//! length, followed by the remainder bytes, continuing at offset 12 of each
//! following page.

use std::cmp::Ordering;

use log::warn;

use crate::common::{Error, PageId, Result};
use crate::storage::page::{get_u16, get_u32, put_u32, PageHeader, PageType};

/// Longest key stored inline.
pub const SHORT_MAX: usize = 255;

/// Inline prefix carried by a long record.
pub const LONG_PREFIX: usize = 249;

/// Tag byte + overflow page + offset.
const LONG_HEADER: usize = 1 + 4 + 2;

/// Largest encoded record.
pub const MAX_RECORD_SIZE: usize = LONG_HEADER + LONG_PREFIX;

const OFFSET_NEXT_OVERFLOW: usize = PageHeader::SIZE;

/// First data byte of an overflow page.
pub const OVERFLOW_DATA_OFFSET: usize = PageHeader::SIZE + 4;

/// Size of the remainder-length prefix of a continuation stream.
const REMAINDER_LEN_SIZE: usize = 4;

// ============================================================================
// Overflow page access
// ============================================================================

/// Read access to overflow pages.
pub trait OverflowResolver {
    /// Run `f` over the bytes of overflow page `page_id`.
    fn read_overflow(&self, page_id: PageId, f: &mut dyn FnMut(&[u8])) -> Result<()>;
}

/// Allocation and release of overflow pages.
pub trait OverflowStore: OverflowResolver {
    /// Allocate a zeroed page, let `fill` write it, and return its number.
    fn allocate_overflow(&self, fill: &mut dyn FnMut(&mut [u8])) -> Result<PageId>;

    /// Release an overflow page.
    fn free_overflow(&self, page_id: PageId) -> Result<()>;
}

// ============================================================================
// KeyRecord
// ============================================================================

/// The in-page form of a key or value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRecord {
    /// 1..=255 bytes stored inline.
    Short(Vec<u8>),
    /// More than 255 bytes: an inline prefix plus an overflow chain.
    Long {
        prefix: Vec<u8>,
        overflow: PageId,
        offset: u16,
    },
    /// The zero-length key.
    Empty,
}

impl KeyRecord {
    /// Bytes this record occupies in a page.
    pub fn encoded_len(&self) -> usize {
        match self {
            KeyRecord::Short(bytes) => 1 + bytes.len(),
            KeyRecord::Long { .. } | KeyRecord::Empty => MAX_RECORD_SIZE,
        }
    }

    /// Append the wire form to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            KeyRecord::Short(bytes) => {
                buf.push(bytes.len() as u8);
                buf.extend_from_slice(bytes);
            }
            KeyRecord::Long {
                prefix,
                overflow,
                offset,
            } => {
                buf.push(0);
                buf.extend_from_slice(&overflow.0.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(prefix);
            }
            KeyRecord::Empty => {
                buf.push(0);
                buf.extend_from_slice(&[0u8; MAX_RECORD_SIZE - 1]);
            }
        }
    }

    /// Parse one record from the front of `buf`, returning it and its length.
    ///
    /// # Errors
    /// Returns `Error::Corrupted` if `buf` ends mid-record.
    pub fn read_from(buf: &[u8]) -> Result<(KeyRecord, usize)> {
        let tag = *buf
            .first()
            .ok_or_else(|| Error::corrupted("record truncated"))?;

        if tag != 0 {
            let len = 1 + tag as usize;
            let bytes = buf
                .get(1..len)
                .ok_or_else(|| Error::corrupted("short record truncated"))?;
            return Ok((KeyRecord::Short(bytes.to_vec()), len));
        }

        if buf.len() < MAX_RECORD_SIZE {
            return Err(Error::corrupted("long record truncated"));
        }
        let overflow = get_u32(buf, 1);
        let offset = get_u16(buf, 5);
        let record = match PageId::from_disk(overflow) {
            None => KeyRecord::Empty,
            Some(overflow) => KeyRecord::Long {
                prefix: buf[LONG_HEADER..MAX_RECORD_SIZE].to_vec(),
                overflow,
                offset,
            },
        };
        Ok((record, MAX_RECORD_SIZE))
    }

    /// Inline bytes, and whether they are the whole key.
    fn inline(&self) -> (&[u8], bool) {
        match self {
            KeyRecord::Short(bytes) => (bytes, true),
            KeyRecord::Long { prefix, .. } => (prefix, false),
            KeyRecord::Empty => (&[], true),
        }
    }

    #[inline]
    pub fn is_long(&self) -> bool {
        matches!(self, KeyRecord::Long { .. })
    }
}

// ============================================================================
// KeyCodec
// ============================================================================

/// Which length error to report.
#[derive(Debug, Clone, Copy)]
enum RecordKind {
    Key,
    Value,
}

/// Encodes and decodes records for one page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyCodec {
    page_size: usize,
    max_overflow_pages: usize,
}

impl KeyCodec {
    pub fn new(page_size: usize, max_overflow_pages: usize) -> Self {
        Self {
            page_size,
            max_overflow_pages,
        }
    }

    /// Data bytes per overflow page.
    #[inline]
    fn chunk_size(&self) -> usize {
        self.page_size - OVERFLOW_DATA_OFFSET
    }

    /// Longest encodable key or value.
    pub fn max_len(&self) -> usize {
        LONG_PREFIX + self.max_overflow_pages * self.chunk_size() - REMAINDER_LEN_SIZE
    }

    /// Encode a key, writing an overflow chain for long keys.
    ///
    /// # Errors
    /// - `Error::KeyTooLong` if `key` exceeds [`KeyCodec::max_len`]
    /// - errors from the store while writing the chain (nothing is left
    ///   allocated)
    pub fn encode<S: OverflowStore + ?Sized>(&self, key: &[u8], store: &S) -> Result<KeyRecord> {
        self.encode_as(key, store, RecordKind::Key)
    }

    /// Encode a value. Same as [`KeyCodec::encode`] but reports
    /// `Error::ValueTooLong`.
    pub fn encode_value<S: OverflowStore + ?Sized>(&self, value: &[u8], store: &S) -> Result<KeyRecord> {
        self.encode_as(value, store, RecordKind::Value)
    }

    /// Check a length without encoding anything.
    pub fn check_key_len(&self, len: usize) -> Result<()> {
        self.check_len(len, RecordKind::Key)
    }

    pub fn check_value_len(&self, len: usize) -> Result<()> {
        self.check_len(len, RecordKind::Value)
    }

    fn check_len(&self, len: usize, kind: RecordKind) -> Result<()> {
        let max = self.max_len();
        if len <= max {
            return Ok(());
        }
        Err(match kind {
            RecordKind::Key => Error::KeyTooLong { len, max },
            RecordKind::Value => Error::ValueTooLong { len, max },
        })
    }

    fn encode_as<S: OverflowStore + ?Sized>(&self, bytes: &[u8], store: &S, kind: RecordKind) -> Result<KeyRecord> {
        self.check_len(bytes.len(), kind)?;

        if bytes.is_empty() {
            return Ok(KeyRecord::Empty);
        }
        if bytes.len() <= SHORT_MAX {
            return Ok(KeyRecord::Short(bytes.to_vec()));
        }

        let overflow = self.write_chain(&bytes[LONG_PREFIX..], store)?;
        Ok(KeyRecord::Long {
            prefix: bytes[..LONG_PREFIX].to_vec(),
            overflow,
            offset: OVERFLOW_DATA_OFFSET as u16,
        })
    }

    /// Write `remainder` as a fresh chain, back to front so each page can
    /// point at its already-written successor.
    fn write_chain<S: OverflowStore + ?Sized>(&self, remainder: &[u8], store: &S) -> Result<PageId> {
        let mut stream = Vec::with_capacity(REMAINDER_LEN_SIZE + remainder.len());
        stream.extend_from_slice(&(remainder.len() as u32).to_le_bytes());
        stream.extend_from_slice(remainder);

        let chunks: Vec<&[u8]> = stream.chunks(self.chunk_size()).collect();
        let mut written: Vec<PageId> = Vec::with_capacity(chunks.len());
        let mut next: Option<PageId> = None;

        for chunk in chunks.iter().rev() {
            let mut fill = |page: &mut [u8]| {
                PageHeader::new(PageType::Overflow).write_to(page);
                put_u32(page, OFFSET_NEXT_OVERFLOW, PageId::to_disk(next));
                page[OVERFLOW_DATA_OFFSET..OVERFLOW_DATA_OFFSET + chunk.len()].copy_from_slice(chunk);
            };
            match store.allocate_overflow(&mut fill) {
                Ok(page_id) => {
                    written.push(page_id);
                    next = Some(page_id);
                }
                Err(e) => {
                    for &page_id in &written {
                        if let Err(free_err) = store.free_overflow(page_id) {
                            warn!("leaked overflow {} after failed encode: {}", page_id, free_err);
                        }
                    }
                    return Err(e);
                }
            }
        }

        next.ok_or_else(|| Error::corrupted("empty overflow chain"))
    }

    /// Reconstruct the original bytes of a record.
    ///
    /// # Errors
    /// Returns `Error::Corrupted` if the overflow chain is malformed.
    pub fn decode<R: OverflowResolver + ?Sized>(&self, record: &KeyRecord, resolver: &R) -> Result<Vec<u8>> {
        match record {
            KeyRecord::Short(bytes) => Ok(bytes.clone()),
            KeyRecord::Empty => Ok(Vec::new()),
            KeyRecord::Long {
                prefix,
                overflow,
                offset,
            } => {
                let mut out = prefix.clone();
                out.extend_from_slice(&self.read_chain(*overflow, *offset, resolver)?);
                Ok(out)
            }
        }
    }

    /// Read the remainder bytes stored in a chain.
    fn read_chain<R: OverflowResolver + ?Sized>(&self, first: PageId, offset: u16, resolver: &R) -> Result<Vec<u8>> {
        let offset = offset as usize;
        if offset < OVERFLOW_DATA_OFFSET || offset >= self.page_size {
            return Err(Error::corrupted(format!("overflow offset {} out of range", offset)));
        }

        let mut stream: Vec<u8> = Vec::new();
        let mut total: Option<usize> = None;
        let mut next = Some(first);
        let mut start = offset;

        for _ in 0..=self.max_overflow_pages {
            let Some(page_id) = next else {
                break;
            };
            let mut bad_type = false;
            resolver.read_overflow(page_id, &mut |page: &[u8]| {
                if PageHeader::from_bytes(page).page_type != PageType::Overflow {
                    bad_type = true;
                    return;
                }
                next = PageId::from_disk(get_u32(page, OFFSET_NEXT_OVERFLOW));
                stream.extend_from_slice(&page[start..]);
            })?;
            if bad_type {
                return Err(Error::corrupted(format!("{} is not an overflow page", page_id)));
            }
            start = OVERFLOW_DATA_OFFSET;

            if total.is_none() && stream.len() >= REMAINDER_LEN_SIZE {
                let remainder = get_u32(&stream, 0) as usize;
                if LONG_PREFIX + remainder > self.max_len() {
                    return Err(Error::corrupted(format!("overflow remainder of {} bytes", remainder)));
                }
                total = Some(REMAINDER_LEN_SIZE + remainder);
            }
            if let Some(total) = total {
                if stream.len() >= total {
                    stream.truncate(total);
                    stream.drain(..REMAINDER_LEN_SIZE);
                    return Ok(stream);
                }
            }
        }

        Err(Error::corrupted(format!("overflow chain from {} ends early", first)))
    }

    /// Order two records by their original bytes.
    ///
    /// Inline bytes decide whenever they can; overflow chains are read only
    /// when the inline parts tie and neither side is known to be shorter.
    pub fn compare<R: OverflowResolver + ?Sized>(&self, a: &KeyRecord, b: &KeyRecord, resolver: &R) -> Result<Ordering> {
        let (ia, complete_a) = a.inline();
        let (ib, complete_b) = b.inline();
        if let Some(ord) = compare_inline(ia, complete_a, ib, complete_b) {
            return Ok(ord);
        }
        let full_a = self.decode(a, resolver)?;
        let full_b = self.decode(b, resolver)?;
        Ok(full_a.cmp(&full_b))
    }

    /// Order a record against raw search key bytes.
    pub fn compare_key<R: OverflowResolver + ?Sized>(
        &self,
        record: &KeyRecord,
        key: &[u8],
        resolver: &R,
    ) -> Result<Ordering> {
        let (inline, complete) = record.inline();
        if let Some(ord) = compare_inline(inline, complete, key, true) {
            return Ok(ord);
        }
        Ok(self.decode(record, resolver)?.as_slice().cmp(key))
    }

    /// Release a record's overflow chain.
    pub fn free<S: OverflowStore + ?Sized>(&self, record: &KeyRecord, store: &S) -> Result<()> {
        let KeyRecord::Long { overflow, .. } = record else {
            return Ok(());
        };

        let mut next = Some(*overflow);
        for _ in 0..=self.max_overflow_pages {
            let Some(page_id) = next else {
                return Ok(());
            };
            store.read_overflow(page_id, &mut |page: &[u8]| {
                next = PageId::from_disk(get_u32(page, OFFSET_NEXT_OVERFLOW));
            })?;
            store.free_overflow(page_id)?;
        }
        Err(Error::corrupted(format!("overflow chain from {} is too long", overflow)))
    }

    /// Deep copy: long records get a chain of their own.
    pub fn duplicate<S: OverflowStore + ?Sized>(&self, record: &KeyRecord, store: &S) -> Result<KeyRecord> {
        match record {
            KeyRecord::Long { .. } => {
                let bytes = self.decode(record, store)?;
                self.encode(&bytes, store)
            }
            other => Ok(other.clone()),
        }
    }
}

/// Decide an ordering from inline bytes alone, if possible.
fn compare_inline(a: &[u8], complete_a: bool, b: &[u8], complete_b: bool) -> Option<Ordering> {
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal => {}
        ord => return Some(ord),
    }
    match (complete_a, complete_b) {
        (true, true) => Some(a.len().cmp(&b.len())),
        // a complete key that is a prefix of the other's inline bytes is shorter
        (true, false) if a.len() <= b.len() => Some(Ordering::Less),
        (false, true) if b.len() <= a.len() => Some(Ordering::Greater),
        _ => None,
    }
}
