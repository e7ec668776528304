//! File header - the contents of page 0.
//!
//! # Layout
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//! 0       8     PageHeader (type = Header, CRC32)
//! 8       8     magic "PGTREE\0\x01"
//! 16      4     page size
//! 20      4     page count (including page 0)
//! 24      4     root page (0 = no tree yet)
//! 28      4     free-list head (0 = empty)
//! 32      4     free-list length
//! 36      2     B+-tree fanout
//! ```

use crate::common::{Error, PageId, Result};
use crate::storage::page::{get_u16, get_u32, put_u16, put_u32, Page, PageHeader, PageType};

/// Metadata persisted in the header page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub page_size: u32,
    pub page_count: u32,
    pub root: Option<PageId>,
    pub free_head: Option<PageId>,
    pub free_count: u32,
    pub fanout: u16,
}

impl FileHeader {
    pub const MAGIC: [u8; 8] = *b"PGTREE\x00\x01";

    const OFFSET_MAGIC: usize = 8;
    const OFFSET_PAGE_SIZE: usize = 16;
    const OFFSET_PAGE_COUNT: usize = 20;
    const OFFSET_ROOT: usize = 24;
    const OFFSET_FREE_HEAD: usize = 28;
    const OFFSET_FREE_COUNT: usize = 32;
    const OFFSET_FANOUT: usize = 36;

    /// Bytes needed to find the magic and the page size.
    pub const PREFIX_SIZE: usize = 20;

    /// Header of a fresh file holding only page 0.
    pub fn new(page_size: usize, fanout: usize) -> Self {
        Self {
            page_size: page_size as u32,
            page_count: 1,
            root: None,
            free_head: None,
            free_count: 0,
            fanout: fanout as u16,
        }
    }

    /// Read the page size out of the first [`Self::PREFIX_SIZE`] bytes.
    ///
    /// # Errors
    /// Returns `Error::Corrupted` if the magic number doesn't match.
    pub fn peek_page_size(prefix: &[u8]) -> Result<usize> {
        if prefix[Self::OFFSET_MAGIC..Self::OFFSET_MAGIC + 8] != Self::MAGIC {
            return Err(Error::corrupted("bad magic number on header page"));
        }
        Ok(get_u32(prefix, Self::OFFSET_PAGE_SIZE) as usize)
    }

    /// Decode and verify a full header page.
    ///
    /// # Errors
    /// Returns `Error::Corrupted` on a bad magic number, page type or checksum.
    pub fn read_from(page: &Page) -> Result<Self> {
        let data = page.as_slice();
        Self::peek_page_size(data)?;

        if page.page_type() != PageType::Header {
            return Err(Error::corrupted("page 0 is not a header page"));
        }
        if !page.verify_checksum() {
            return Err(Error::corrupted("header page checksum mismatch"));
        }

        Ok(Self {
            page_size: get_u32(data, Self::OFFSET_PAGE_SIZE),
            page_count: get_u32(data, Self::OFFSET_PAGE_COUNT),
            root: PageId::from_disk(get_u32(data, Self::OFFSET_ROOT)),
            free_head: PageId::from_disk(get_u32(data, Self::OFFSET_FREE_HEAD)),
            free_count: get_u32(data, Self::OFFSET_FREE_COUNT),
            fanout: get_u16(data, Self::OFFSET_FANOUT),
        })
    }

    /// Encode into `page`, stamping type and checksum.
    pub fn write_to(&self, page: &mut Page) {
        page.reset();
        page.set_header(&PageHeader::new(PageType::Header));

        let data = page.as_mut_slice();
        data[Self::OFFSET_MAGIC..Self::OFFSET_MAGIC + 8].copy_from_slice(&Self::MAGIC);
        put_u32(data, Self::OFFSET_PAGE_SIZE, self.page_size);
        put_u32(data, Self::OFFSET_PAGE_COUNT, self.page_count);
        put_u32(data, Self::OFFSET_ROOT, PageId::to_disk(self.root));
        put_u32(data, Self::OFFSET_FREE_HEAD, PageId::to_disk(self.free_head));
        put_u32(data, Self::OFFSET_FREE_COUNT, self.free_count);
        put_u16(data, Self::OFFSET_FANOUT, self.fanout);

        page.update_checksum();
    }
}
