//! Configuration constants and the engine [`Config`].

use crate::common::{Error, Result};
use crate::index::btree::max_fanout;

/// Default size of a page in bytes (4KB).
///
/// Matches the OS page size on most systems. Each database file records its
/// page size in the header page and must be reopened with the same value.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest supported page size.
///
/// A page must hold a leaf with at least two worst-case entries (two 256-byte
/// records each) for the minimum fanout of 3.
pub const MIN_PAGE_SIZE: usize = 2048;

/// Largest supported page size.
///
/// Long records address their overflow data with a 2-byte in-page offset.
pub const MAX_PAGE_SIZE: usize = 65536;

/// Default B+-tree fanout (the largest that fits a 4KB page).
pub const DEFAULT_FANOUT: usize = 8;

/// Smallest B+-tree fanout.
pub const MIN_FANOUT: usize = 3;

/// Default number of frames in the page cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Smallest accepted cache for any fanout. See [`min_cache_capacity`].
pub const MIN_CACHE_CAPACITY: usize = 8;

/// Default cap on the overflow chain of a single record.
pub const DEFAULT_MAX_OVERFLOW_PAGES: usize = 64;

/// Maximum number of pages with a u32 page number.
pub const MAX_PAGES: u64 = (u32::MAX as u64) + 1;

/// Smallest cache that can hold every pin a tree of `fanout` takes.
///
/// A mutation pins every node it rewrites until it commits: up to two nodes
/// per level plus a new root. Two more frames cover the page being loaded and
/// an overflow page being written while those pins are held. The height is
/// that of the tallest tree the page number space allows, with a two-child
/// root and every other internal node at its `⌈fanout/2⌉` minimum.
pub fn min_cache_capacity(fanout: usize) -> usize {
    let min_children = fanout.div_ceil(2).max(2) as u64;

    let mut height = 1;
    let mut leaves: u64 = 1;
    loop {
        let next = if height == 1 { 2 } else { leaves.saturating_mul(min_children) };
        if next > MAX_PAGES {
            break;
        }
        leaves = next;
        height += 1;
    }

    (2 * height + 3).max(MIN_CACHE_CAPACITY)
}

/// Tunables for a database instance.
///
/// # Example
/// ```
/// use pagetree::Config;
///
/// let config = Config::default().with_fanout(4).with_cache_capacity(128);
/// assert!(config.validate().is_ok());
/// assert!(config.with_cache_capacity(32).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bytes per page; fixed for the lifetime of a database file.
    pub page_size: usize,
    /// Maximum children of an internal node (leaves hold `fanout - 1` entries).
    pub fanout: usize,
    /// Number of frames in the page cache.
    pub cache_capacity: usize,
    /// Longest overflow chain a single key or value may use.
    pub max_overflow_pages: usize,
}

impl Config {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    pub fn with_cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.cache_capacity = cache_capacity;
        self
    }

    pub fn with_max_overflow_pages(mut self, max_overflow_pages: usize) -> Self {
        self.max_overflow_pages = max_overflow_pages;
        self
    }

    /// Check every field against the supported ranges.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)?;

        let max = max_fanout(self.page_size);
        if self.fanout < MIN_FANOUT || self.fanout > max {
            return Err(Error::InvalidConfig(format!(
                "fanout {} outside {}..={} for {}-byte pages",
                self.fanout, MIN_FANOUT, max, self.page_size
            )));
        }

        let min_capacity = min_cache_capacity(self.fanout);
        if self.cache_capacity < min_capacity {
            return Err(Error::InvalidConfig(format!(
                "cache capacity {} below minimum {} for fanout {}",
                self.cache_capacity, min_capacity, self.fanout
            )));
        }

        if self.max_overflow_pages == 0 {
            return Err(Error::InvalidConfig(
                "max_overflow_pages must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fanout: DEFAULT_FANOUT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_overflow_pages: DEFAULT_MAX_OVERFLOW_PAGES,
        }
    }
}

/// Check that `page_size` is a power of two within the supported range.
pub fn validate_page_size(page_size: usize) -> Result<()> {
    if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(Error::InvalidConfig(format!(
            "page size {} must be a power of two in {}..={}",
            page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
        )));
    }
    Ok(())
}
