//! Page - the fixed-size unit of storage.
//!
//! A [`Page`] is a raw byte buffer of the database's page size that serves as
//! the unit of I/O between storage and memory. Pages are held in
//! [`Frame`](crate::buffer::Frame)s within the page cache.

use super::page_header::{PageHeader, PageType};

/// A page of data.
///
/// The size is fixed per database (see [`Config::page_size`](crate::Config)),
/// so the buffer is a boxed slice rather than an array.
///
/// # Clone
/// `Page` does NOT implement `Clone`: copying a page should be explicit, via
/// [`Page::copy_from`].
///
/// # Example
/// ```
/// use pagetree::storage::page::Page;
///
/// let mut page = Page::new(4096);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.size(), 4096);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Overwrite this page with the bytes of `other`.
    ///
    /// # Panics
    /// Panics if the pages differ in size.
    pub fn copy_from(&mut self, other: &Page) {
        self.data.copy_from_slice(&other.data);
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    #[inline]
    pub fn page_type(&self) -> PageType {
        PageType::from_u8(self.data[PageHeader::OFFSET_PAGE_TYPE])
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum. Untyped pages always pass.
    pub fn verify_checksum(&self) -> bool {
        let header = self.header();
        !header.page_type.is_checksummed() || header.verify_checksum(&self.data)
    }
}

/// Read a little-endian u16 at `offset`.
#[inline]
pub fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Read a little-endian u32 at `offset`.
#[inline]
pub fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

/// Write a little-endian u16 at `offset`.
#[inline]
pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write a little-endian u32 at `offset`.
#[inline]
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

// ============================================================================
// TESTS
// ============================================================================
