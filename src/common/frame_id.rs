//! Frame identifier type.

use std::fmt;

/// Index of a slot in the page cache's frame array.
///
/// Frames are allocated once when the cache is built, so a `FrameId` stays
/// valid for the cache's lifetime while the page it holds changes.
///
/// # Example
/// ```
/// use pagetree::FrameId;
///
/// let frame_id = FrameId::new(5);
/// assert_eq!(frame_id.index(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl FrameId {
    #[inline]
    pub fn new(id: usize) -> Self {
        FrameId(id)
    }

    /// Position in the frame array.
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}
