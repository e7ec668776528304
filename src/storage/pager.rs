//! Pager - page-granular I/O and free space management.
//!
//! The [`Pager`] is the only component that touches durable storage:
//! - Reading and writing pages by number
//! - Allocating pages (free list first, then growing the store)
//! - Freeing pages onto the free list
//! - Keeping the header page (page 0) current

use std::collections::HashSet;

use log::{debug, info};

use crate::common::config::validate_page_size;
use crate::common::{Error, PageId, Result};
use crate::index::btree::max_fanout;
use crate::storage::backend::Storage;
use crate::storage::header::FileHeader;
use crate::storage::page::{get_u32, put_u32, Page, PageHeader, PageType};

/// Byte offset of the next-free link inside a free page.
const OFFSET_NEXT_FREE: usize = PageHeader::SIZE;

/// Manages page I/O for a single page store.
///
/// # File Layout
/// ```text
/// ┌──────────┬─────────┬─────────┬─────────┬─────────┐
/// │ Page 0   │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (header) │         │         │         │         │
/// └──────────┴─────────┴─────────┴─────────┴─────────┘
/// Offset:  0    page_size  2×page_size  ...  N×page_size
/// ```
///
/// Free pages form a singly-linked list threaded through their first bytes;
/// the header records its head. The set of free page numbers is also kept in
/// memory so reads of freed pages are rejected without touching storage.
///
/// # Thread Safety
/// `Pager` is **single-threaded** (`&mut self` everywhere). The
/// [`LruCache`](crate::buffer::LruCache) serializes access to it.
///
/// # Durability
/// Every write is followed by a storage sync. The pager buffers nothing but the
/// header's root pointer, which is persisted with the next header write.
pub struct Pager {
    storage: Box<dyn Storage>,
    header: FileHeader,
    /// Page numbers currently on the free list.
    free_pages: HashSet<PageId>,
    page_size: usize,
    /// Set when the in-memory header differs from page 0.
    header_dirty: bool,
}

impl Pager {
    /// Initialize an empty store with a header page.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` for an unsupported page size or a non-empty store
    /// - I/O errors from the header write
    pub fn create<S: Storage + 'static>(storage: S, page_size: usize, fanout: usize) -> Result<Self> {
        validate_page_size(page_size)?;
        if storage.size()? != 0 {
            return Err(Error::InvalidConfig(
                "cannot create a database in non-empty storage".to_string(),
            ));
        }

        let mut pager = Self {
            storage: Box::new(storage),
            header: FileHeader::new(page_size, fanout),
            free_pages: HashSet::new(),
            page_size,
            header_dirty: true,
        };
        pager.write_header()?;

        info!("created page store: page_size={} fanout={}", page_size, fanout);
        Ok(pager)
    }

    /// Open an existing store and validate its header and free list.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the store was created with another page size
    /// - `Error::Corrupted` on a bad magic number, checksum, header field or
    ///   free list
    pub fn open<S: Storage + 'static>(mut storage: S, page_size: usize) -> Result<Self> {
        let file_size = storage.size()?;
        if file_size < FileHeader::PREFIX_SIZE as u64 {
            return Err(Error::corrupted("store too small to hold a header page"));
        }

        let mut prefix = [0u8; FileHeader::PREFIX_SIZE];
        storage.read_at(0, &mut prefix)?;
        let stored_page_size = FileHeader::peek_page_size(&prefix)?;
        if validate_page_size(stored_page_size).is_err() {
            return Err(Error::corrupted(format!(
                "header records unsupported page size {}",
                stored_page_size
            )));
        }
        if stored_page_size != page_size {
            return Err(Error::InvalidConfig(format!(
                "page size mismatch: store uses {}, requested {}",
                stored_page_size, page_size
            )));
        }
        if file_size % page_size as u64 != 0 {
            return Err(Error::corrupted("store size is not a multiple of the page size"));
        }

        let mut page = Page::new(page_size);
        storage.read_at(0, page.as_mut_slice())?;
        let header = FileHeader::read_from(&page)?;

        let pages_on_storage = file_size / page_size as u64;
        if header.page_count == 0 || u64::from(header.page_count) > pages_on_storage {
            return Err(Error::corrupted(format!(
                "header page count {} exceeds {} pages on storage",
                header.page_count, pages_on_storage
            )));
        }
        if let Some(root) = header.root {
            if root.is_header() || root.0 >= header.page_count {
                return Err(Error::corrupted(format!("root {} out of range", root)));
            }
        }
        let fanout = header.fanout as usize;
        if fanout < 3 || fanout > max_fanout(page_size) {
            return Err(Error::corrupted(format!("header records invalid fanout {}", fanout)));
        }

        let mut pager = Self {
            storage: Box::new(storage),
            header,
            free_pages: HashSet::new(),
            page_size,
            header_dirty: false,
        };
        pager.load_free_list()?;

        info!(
            "opened page store: pages={} free={} root={:?}",
            pager.header.page_count, pager.header.free_count, pager.header.root
        );
        Ok(pager)
    }

    /// Walk the on-disk free list, rejecting cycles and foreign pages.
    fn load_free_list(&mut self) -> Result<()> {
        let mut next = self.header.free_head;
        let mut page = Page::new(self.page_size);

        while let Some(pid) = next {
            if pid.is_header() || pid.0 >= self.header.page_count {
                return Err(Error::corrupted(format!("free list points outside the store: {}", pid)));
            }
            if !self.free_pages.insert(pid) {
                return Err(Error::corrupted(format!("free list cycle at {}", pid)));
            }
            self.read_raw(pid, &mut page)?;
            if page.page_type() != PageType::Free || !page.verify_checksum() {
                return Err(Error::corrupted(format!("{} on the free list is not a free page", pid)));
            }
            next = PageId::from_disk(get_u32(page.as_slice(), OFFSET_NEXT_FREE));
        }

        if self.free_pages.len() != self.header.free_count as usize {
            return Err(Error::corrupted(format!(
                "free list holds {} pages, header records {}",
                self.free_pages.len(),
                self.header.free_count
            )));
        }
        if let Some(root) = self.header.root {
            if self.free_pages.contains(&root) {
                return Err(Error::corrupted("root page is on the free list"));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Page I/O
    // ========================================================================

    /// Read a page.
    ///
    /// # Errors
    /// - `Error::InvalidPageNumber` if the page was never allocated, has been
    ///   freed, or is the header page
    /// - I/O errors from storage
    pub fn read(&mut self, page_id: PageId) -> Result<Page> {
        let mut page = Page::new(self.page_size);
        self.read_into(page_id, &mut page)?;
        Ok(page)
    }

    /// Read a page into an existing buffer.
    pub fn read_into(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        self.check_allocated(page_id)?;
        self.read_raw(page_id, page)
    }

    /// Write a page and sync it.
    ///
    /// # Panics
    /// Panics if `page` is not exactly one page long: partial writes are a
    /// programming error.
    ///
    /// # Errors
    /// - `Error::InvalidPageNumber` as for [`Pager::read`]
    /// - I/O errors from storage
    pub fn write(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        assert_eq!(page.size(), self.page_size, "partial page write");
        self.check_allocated(page_id)?;
        self.write_raw(page_id, page)
    }

    /// Allocate a page, reusing the free list before growing the store.
    ///
    /// The returned page is zeroed on storage.
    pub fn allocate(&mut self) -> Result<PageId> {
        let zeros = Page::new(self.page_size);

        let page_id = match self.header.free_head {
            Some(pid) => {
                let mut page = Page::new(self.page_size);
                self.read_raw(pid, &mut page)?;
                if page.page_type() != PageType::Free {
                    return Err(Error::corrupted(format!("free-list head {} is not a free page", pid)));
                }

                // Unlink first: a crash before zeroing leaks the page instead of
                // leaving a non-free page on the list.
                let mut header = self.header;
                header.free_head = PageId::from_disk(get_u32(page.as_slice(), OFFSET_NEXT_FREE));
                header.free_count -= 1;
                self.write_header_as(header)?;
                self.free_pages.remove(&pid);

                self.write_raw(pid, &zeros)?;
                pid
            }
            None => {
                if self.header.page_count == u32::MAX {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "page store is full",
                    )));
                }
                let pid = PageId::new(self.header.page_count);
                self.write_raw(pid, &zeros)?;
                let mut header = self.header;
                header.page_count += 1;
                self.write_header_as(header)?;
                pid
            }
        };

        debug!("allocated {}", page_id);
        Ok(page_id)
    }

    /// Return a page to the free list.
    ///
    /// # Errors
    /// - `Error::InvalidPageNumber` if the page isn't currently allocated
    pub fn free(&mut self, page_id: PageId) -> Result<()> {
        self.check_allocated(page_id)?;

        let mut page = Page::new(self.page_size);
        page.set_header(&PageHeader::new(PageType::Free));
        put_u32(page.as_mut_slice(), OFFSET_NEXT_FREE, PageId::to_disk(self.header.free_head));
        page.update_checksum();
        self.write_raw(page_id, &page)?;

        let mut header = self.header;
        header.free_head = Some(page_id);
        header.free_count += 1;
        self.write_header_as(header)?;
        self.free_pages.insert(page_id);

        debug!("freed {}", page_id);
        Ok(())
    }

    // ========================================================================
    // Header
    // ========================================================================

    /// Root page of the tree stored in this file, if any.
    #[inline]
    pub fn root(&self) -> Option<PageId> {
        self.header.root
    }

    /// Record a new root. Persisted by the next header write or [`Pager::flush`].
    pub fn set_root(&mut self, root: Option<PageId>) {
        if self.header.root != root {
            self.header.root = root;
            self.header_dirty = true;
        }
    }

    /// Fanout recorded at creation.
    #[inline]
    pub fn fanout(&self) -> usize {
        self.header.fanout as usize
    }

    /// Persist the header if it changed since the last write.
    pub fn flush(&mut self) -> Result<()> {
        if self.header_dirty {
            self.write_header()?;
        }
        Ok(())
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages in the store, including the header and free pages.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.header.page_count
    }

    /// Number of pages on the free list.
    #[inline]
    pub fn free_count(&self) -> u32 {
        self.header.free_count
    }

    /// Check whether `page_id` is a live, caller-visible page.
    pub fn is_allocated(&self, page_id: PageId) -> bool {
        !page_id.is_header() && page_id.0 < self.header.page_count && !self.free_pages.contains(&page_id)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn check_allocated(&self, page_id: PageId) -> Result<()> {
        if self.is_allocated(page_id) {
            Ok(())
        } else {
            Err(Error::InvalidPageNumber(page_id.0))
        }
    }

    #[inline]
    fn offset(&self, page_id: PageId) -> u64 {
        u64::from(page_id.0) * self.page_size as u64
    }

    fn read_raw(&mut self, page_id: PageId, page: &mut Page) -> Result<()> {
        let offset = self.offset(page_id);
        self.storage.read_at(offset, page.as_mut_slice())
    }

    fn write_raw(&mut self, page_id: PageId, page: &Page) -> Result<()> {
        let offset = self.offset(page_id);
        self.storage.write_at(offset, page.as_slice())?;
        self.storage.sync()
    }

    fn write_header(&mut self) -> Result<()> {
        self.write_header_as(self.header)
    }

    /// Write `header` and adopt it only once it's on storage.
    fn write_header_as(&mut self, header: FileHeader) -> Result<()> {
        let mut page = Page::new(self.page_size);
        header.write_to(&mut page);
        self.write_raw(PageId::HEADER, &page)?;
        self.header = header;
        self.header_dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{FileStorage, MemoryStorage};
    use tempfile::tempdir;

    const PAGE: usize = 4096;

    fn new_pager() -> Pager {
        Pager::create(MemoryStorage::new(), PAGE, 8).unwrap()
    }

    fn filled(byte: u8) -> Page {
        let mut page = Page::new(PAGE);
        page.as_mut_slice().fill(byte);
        page
    }

    #[test]
    fn test_create_writes_header() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let pager = Pager::create(storage, PAGE, 8).unwrap();

        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.free_count(), 0);
        assert_eq!(handle.len(), PAGE);
        assert_eq!(&handle.read(8, 8), &FileHeader::MAGIC);
    }

    #[test]
    fn test_create_rejects_non_empty_storage() {
        let mut storage = MemoryStorage::new();
        storage.write_at(0, &[1]).unwrap();
        assert!(matches!(
            Pager::create(storage, PAGE, 8),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_allocate_is_zeroed() {
        let mut pager = new_pager();

        let pid = pager.allocate().unwrap();
        assert_eq!(pid, PageId::new(1));
        assert!(pager.read(pid).unwrap().as_slice().iter().all(|&b| b == 0));

        pager.write(pid, &filled(0xFF)).unwrap();
        assert_eq!(pager.read(pid).unwrap().as_slice()[4095], 0xFF);
    }

    #[test]
    fn test_read_unallocated_page() {
        let mut pager = new_pager();
        assert!(matches!(pager.read(PageId::new(1)), Err(Error::InvalidPageNumber(1))));
        assert!(matches!(pager.read(PageId::HEADER), Err(Error::InvalidPageNumber(0))));
    }

    #[test]
    fn test_write_unallocated_page() {
        let mut pager = new_pager();
        assert!(matches!(
            pager.write(PageId::new(1), &filled(0)),
            Err(Error::InvalidPageNumber(1))
        ));
    }

    #[test]
    #[should_panic(expected = "partial page write")]
    fn test_short_write_panics() {
        let mut pager = new_pager();
        let pid = pager.allocate().unwrap();
        let _ = pager.write(pid, &Page::new(2048));
    }

    #[test]
    fn test_free_then_read_fails_until_reallocated() {
        let mut pager = new_pager();
        let pid = pager.allocate().unwrap();
        pager.write(pid, &filled(0x88)).unwrap();

        pager.free(pid).unwrap();
        assert_eq!(pager.free_count(), 1);
        assert!(matches!(pager.read(pid), Err(Error::InvalidPageNumber(_))));
        assert!(matches!(pager.free(pid), Err(Error::InvalidPageNumber(_))));

        // reuse comes back zeroed
        assert_eq!(pager.allocate().unwrap(), pid);
        assert_eq!(pager.free_count(), 0);
        assert!(pager.read(pid).unwrap().as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut pager = new_pager();
        let a = pager.allocate().unwrap();
        let b = pager.allocate().unwrap();
        let c = pager.allocate().unwrap();

        pager.free(a).unwrap();
        pager.free(c).unwrap();

        assert_eq!(pager.allocate().unwrap(), c);
        assert_eq!(pager.allocate().unwrap(), a);
        assert_eq!(pager.allocate().unwrap(), PageId::new(4));
        assert!(pager.is_allocated(b));
    }

    #[test]
    fn test_create_close_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut pager = Pager::create(FileStorage::create(&path).unwrap(), PAGE, 8).unwrap();
            let first = pager.allocate().unwrap();
            pager.write(first, &filled(0xAB)).unwrap();
            let second = pager.allocate().unwrap();
            pager.free(second).unwrap();
            pager.set_root(Some(first));
            pager.flush().unwrap();
        }

        let mut pager = Pager::open(FileStorage::open(&path).unwrap(), PAGE).unwrap();
        assert_eq!(pager.page_count(), 3);
        assert_eq!(pager.free_count(), 1);
        assert_eq!(pager.root(), Some(PageId::new(1)));
        assert_eq!(pager.fanout(), 8);
        assert_eq!(pager.read(PageId::new(1)).unwrap().as_slice()[0], 0xAB);
        assert!(matches!(pager.read(PageId::new(2)), Err(Error::InvalidPageNumber(2))));
    }

    #[test]
    fn test_open_page_size_mismatch() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        drop(Pager::create(storage, PAGE, 8).unwrap());

        let mut reopened = MemoryStorage::new();
        reopened.write_at(0, &handle.read(0, handle.len())).unwrap();
        assert!(matches!(Pager::open(reopened, 8192), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_open_detects_bad_magic() {
        let mut storage = MemoryStorage::new();
        storage.write_at(0, &vec![0u8; PAGE]).unwrap();
        assert!(matches!(Pager::open(storage, PAGE), Err(Error::Corrupted(_))));
    }

    #[test]
    fn test_open_detects_root_out_of_range() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let mut pager = Pager::create(storage, PAGE, 8).unwrap();
        pager.set_root(Some(PageId::new(40)));
        pager.flush().unwrap();
        drop(pager);

        let mut copy = MemoryStorage::new();
        copy.write_at(0, &handle.read(0, handle.len())).unwrap();
        let err = Pager::open(copy, PAGE).err().unwrap();
        assert!(err.to_string().contains("root"));
    }

    #[test]
    fn test_failed_free_leaves_page_allocated() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let mut pager = Pager::create(storage, PAGE, 8).unwrap();
        let a = pager.allocate().unwrap();
        let b = pager.allocate().unwrap();
        pager.free(b).unwrap();

        // the free-page write lands, the header write fails
        handle.fail_writes_after(1);
        assert!(matches!(pager.free(a), Err(Error::Io(_))));
        handle.fail_writes(false);

        assert!(pager.is_allocated(a));
        assert_eq!(pager.free_count(), 1);
        assert_eq!(pager.allocate().unwrap(), b);
        assert_ne!(pager.allocate().unwrap(), a);
    }

    #[test]
    fn test_failed_allocate_keeps_free_list() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let mut pager = Pager::create(storage, PAGE, 8).unwrap();
        let a = pager.allocate().unwrap();
        pager.free(a).unwrap();

        handle.fail_writes(true);
        assert!(matches!(pager.allocate(), Err(Error::Io(_))));
        handle.fail_writes(false);

        assert_eq!(pager.free_count(), 1);
        assert!(!pager.is_allocated(a));
        assert_eq!(pager.allocate().unwrap(), a);
        assert_eq!(pager.free_count(), 0);
    }

    #[test]
    fn test_failed_extend_keeps_page_count() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        let mut pager = Pager::create(storage, PAGE, 8).unwrap();

        handle.fail_writes_after(1);
        assert!(pager.allocate().is_err());
        handle.fail_writes(false);

        assert_eq!(pager.page_count(), 1);
        assert_eq!(pager.allocate().unwrap(), PageId::new(1));
    }
}
