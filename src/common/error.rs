//! Error types for pagetree.

use thiserror::Error;

/// Convenient Result type alias.
///
/// Instead of writing `Result<T, Error>` everywhere, we can write `Result<T>`.
/// This is a common Rust pattern (see `std::io::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in pagetree.
///
/// Every layer (pager, cache, codec, tree) reports through this one enum so
/// callers only match on a single type.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the storage backend.
    ///
    /// Never retried internally; retry policy belongs to the caller.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A page number that was never allocated, has been freed, or is the
    /// reserved header page.
    #[error("invalid page number: {0}")]
    InvalidPageNumber(u32),

    /// Key is longer than the longest encodable record.
    #[error("key too long: {len} bytes (max {max})")]
    KeyTooLong { len: usize, max: usize },

    /// Value is longer than the longest encodable record.
    #[error("value too long: {len} bytes (max {max})")]
    ValueTooLong { len: usize, max: usize },

    /// Every frame in the cache is pinned.
    ///
    /// This indicates a bug in the caller's pin/unpin discipline.
    #[error("cache exhausted: all {capacity} frames are pinned")]
    CacheExhausted { capacity: usize },

    /// Attempted to unpin (or dirty) a page that wasn't pinned.
    #[error("page {0} is not pinned")]
    PageNotPinned(u32),

    /// Attempted to delete a page that is still pinned.
    #[error("page {0} is pinned")]
    PagePinned(u32),

    /// On-disk state failed validation (magic, checksum, header fields,
    /// page types, tree invariants).
    #[error("corrupted database: {0}")]
    Corrupted(String),

    /// Rejected configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Shorthand for building a [`Error::Corrupted`].
    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Error::Corrupted(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidPageNumber(42);
        assert_eq!(format!("{}", err), "invalid page number: 42");

        let err = Error::CacheExhausted { capacity: 8 };
        assert_eq!(format!("{}", err), "cache exhausted: all 8 frames are pinned");

        let err = Error::PagePinned(3);
        assert_eq!(format!("{}", err), "page 3 is pinned");

        let err = Error::KeyTooLong { len: 10, max: 5 };
        assert_eq!(format!("{}", err), "key too long: 10 bytes (max 5)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();

        match err {
            Error::Io(_) => {} // Success
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_io_error_has_source() {
        use std::error::Error as _;

        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
        assert!(Error::PageNotPinned(3).source().is_none());
    }

    #[test]
    fn test_result_type_alias() {
        fn might_fail() -> Result<u32> {
            Ok(42)
        }

        assert_eq!(might_fail().unwrap(), 42);
    }
}
