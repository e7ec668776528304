//! Page identifier type.

use std::fmt;

/// Identifies a page in the page file.
///
/// Using `u32` allows for 4 billion pages. Page 0 is the header page, so the
/// on-disk value 0 doubles as "no page" in sibling, child, overflow and
/// free-list links. In memory those links are `Option<PageId>`.
///
/// # Example
/// ```
/// use pagetree::PageId;
///
/// let page_id = PageId::new(42);
/// assert!(!page_id.is_header());
/// assert_eq!(PageId::from_disk(0), None);
/// assert_eq!(PageId::to_disk(Some(page_id)), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(pub u32);

impl PageId {
    /// The reserved header page.
    pub const HEADER: PageId = PageId(0);

    /// Create a new PageId.
    #[inline]
    pub fn new(id: u32) -> Self {
        PageId(id)
    }

    /// Check if this is the reserved header page.
    #[inline]
    pub fn is_header(&self) -> bool {
        *self == Self::HEADER
    }

    /// Decode an on-disk link, where 0 means "no page".
    #[inline]
    pub fn from_disk(raw: u32) -> Option<PageId> {
        if raw == 0 {
            None
        } else {
            Some(PageId(raw))
        }
    }

    /// Encode a link for disk, writing 0 for "no page".
    #[inline]
    pub fn to_disk(page_id: Option<PageId>) -> u32 {
        page_id.map_or(0, |pid| pid.0)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({})", self.0)
    }
}
