//! Frame - a slot in the page cache.
//!
//! A [`Frame`] holds a [`Page`] plus metadata needed for cache management:
//! - Which page is loaded (if any)
//! - Pin count for reference counting
//! - Dirty flag for write-back tracking
//! - [`FrameState`] tag driving reuse

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::PageId;
use crate::storage::page::Page;

/// Lifecycle of a frame.
///
/// ```text
///            evict (clean)
///   Active ─────────────────────────▶ Free
///     │  ▲                              ▲
///     │  │ fetch (resurrect)            │ flush ok
///     ▼  │                              │
///   Graveyard ──────────────────────────┘
///    (evicted dirty, flush pending)
/// ```
///
/// Only `Free` frames are handed out for new pages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Holds a cached page visible to fetches.
    Active,
    /// Evicted while dirty; bytes kept until they reach storage.
    Graveyard,
    /// Empty and reusable.
    #[default]
    Free,
}

/// A frame in the page cache.
///
/// The cache allocates a fixed number of frames at startup; each can hold one
/// page.
///
/// # Thread Safety
/// All fields use interior mutability:
/// - `page`: `RwLock` for read/write synchronization
/// - `page_id`, `state`: `Mutex` for safe updates
/// - `pin_count`: `AtomicU32` for lock-free reference counting
/// - `is_dirty`: `AtomicBool` for lock-free dirty tracking
pub struct Frame {
    page: RwLock<Page>,
    page_id: Mutex<Option<PageId>>,
    state: Mutex<FrameState>,
    pin_count: AtomicU32,
    is_dirty: AtomicBool,
}

impl Frame {
    /// Create a new free frame holding a zeroed page of `page_size` bytes.
    pub fn new(page_size: usize) -> Self {
        Self {
            page: RwLock::new(Page::new(page_size)),
            page_id: Mutex::new(None),
            state: Mutex::new(FrameState::Free),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Page access (RwLock)
    // ========================================================================

    #[inline]
    pub fn page(&self) -> RwLockReadGuard<'_, Page> {
        self.page.read()
    }

    #[inline]
    pub fn page_mut(&self) -> RwLockWriteGuard<'_, Page> {
        self.page.write()
    }

    // ========================================================================
    // Identity and state
    // ========================================================================

    /// Page held by this frame, `None` when free.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        *self.page_id.lock()
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        *self.state.lock()
    }

    /// Bind this frame to `page_id` as an active entry.
    pub fn activate(&self, page_id: PageId) {
        *self.page_id.lock() = Some(page_id);
        *self.state.lock() = FrameState::Active;
    }

    /// Move an evicted dirty frame into the graveyard.
    ///
    /// # Panics
    /// Panics if the frame isn't active, unpinned and dirty.
    pub fn bury(&self) {
        let mut state = self.state.lock();
        assert_eq!(*state, FrameState::Active, "only active frames can be buried");
        assert!(!self.is_pinned(), "cannot bury a pinned frame");
        assert!(self.is_dirty(), "clean frames go straight to free");
        *state = FrameState::Graveyard;
    }

    /// Bring a graveyard frame back to active. Its bytes and dirty flag are kept.
    pub fn resurrect(&self) {
        let mut state = self.state.lock();
        assert_eq!(*state, FrameState::Graveyard, "only graveyard frames can be resurrected");
        *state = FrameState::Active;
    }

    /// Drop the cached page and mark the frame reusable.
    ///
    /// # Panics
    /// Panics if the frame is still pinned.
    pub fn release(&self) {
        assert!(!self.is_pinned(), "cannot release a pinned frame");
        *self.page_id.lock() = None;
        *self.state.lock() = FrameState::Free;
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    // ========================================================================
    // Pin count operations (Atomic)
    // ========================================================================

    /// Increment the pin count. Returns the new pin count.
    #[inline]
    pub fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement the pin count. Returns the new pin count.
    ///
    /// # Panics
    /// Panics if pin count is already 0.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let old = self.pin_count.fetch_sub(1, Ordering::Relaxed);
        assert!(old > 0, "pin count underflow");
        old - 1
    }

    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    // ========================================================================
    // Dirty flag operations (Atomic)
    // ========================================================================

    #[inline]
    pub fn mark_dirty(&self) {
        self.is_dirty.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear_dirty(&self) {
        self.is_dirty.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Relaxed)
    }

    /// Check if the frame can be evicted.
    #[inline]
    pub fn is_evictable(&self) -> bool {
        self.state() == FrameState::Active && !self.is_pinned()
    }
}
