//! Page cache.
//!
//! The cache sits between the B+-tree and the [`Pager`](crate::storage::Pager).
//! It manages a fixed pool of frames, each holding one page.
//!
//! # Components
//! - [`LruCache`] - The page cache with its graveyard
//! - [`Frame`] - A slot holding a page + metadata
//! - [`PageReadGuard`] / [`PageWriteGuard`] - RAII guards for page access
//! - [`CacheStats`] - Performance statistics
//! - [`replacer`] - LRU eviction policy

mod frame;
mod lru_cache;
mod page_guard;
pub mod replacer;
mod stats;

pub use frame::{Frame, FrameState};
pub use lru_cache::LruCache;
pub use page_guard::{PageReadGuard, PageWriteGuard};
pub use stats::{CacheStats, StatsSnapshot};
