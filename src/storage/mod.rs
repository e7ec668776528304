//! Storage layer - durable I/O and page formats.
//!
//! This module handles persistent storage:
//! - [`Storage`] - Byte-addressed backends (file, memory)
//! - [`Pager`] - Page allocation, I/O and the free list
//! - [`FileHeader`] - The header page layout
//! - [`page`] - Page types and layouts

mod backend;
mod header;
pub mod page;
mod pager;

pub use backend::{FileStorage, MemoryHandle, MemoryStorage, Storage};
pub use header::FileHeader;
pub use pager::Pager;
