//! pagetree - an embedded ordered key-value store: a paged B+-tree over an
//! LRU page cache.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Database                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Index Layer (index/)                      │   │
//! │  │     BPlusTree + RangeIter  ←→  KeyCodec (overflow)       │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                 Page Cache (buffer/)                     │   │
//! │  │   LruCache + Frame + graveyard for dirty victims         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Storage Layer (storage/)                  │   │
//! │  │   Pager + free list + header page  →  File | Memory      │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, FrameId, Error, Config)
//! - [`buffer`] - The LRU page cache
//! - [`storage`] - Storage backends, the pager and page formats
//! - [`index`] - The B+-tree and its record codec
//!
//! # Quick Start
//! ```no_run
//! use pagetree::{Config, Database};
//!
//! let mut db = Database::create("my_database.db", Config::default()).unwrap();
//! db.insert(b"key", b"value").unwrap();
//! db.close().unwrap();
//!
//! let db = Database::open("my_database.db", Config::default()).unwrap();
//! assert_eq!(db.search(b"key").unwrap(), Some(b"value".to_vec()));
//! ```

pub mod buffer;
pub mod common;
pub mod index;
pub mod storage;

mod db;

// Re-export commonly used items at crate root for convenience
pub use common::{min_cache_capacity, Config, Error, FrameId, PageId, Result};
pub use db::Database;

pub use buffer::{CacheStats, LruCache, StatsSnapshot};
pub use index::{BPlusTree, KeyCodec, KeyRecord, RangeIter, TreeShape};
pub use storage::page::{Page, PageHeader, PageType};
pub use storage::{FileStorage, MemoryHandle, MemoryStorage, Pager, Storage};
