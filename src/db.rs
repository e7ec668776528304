//! Database - the public facade over pager, cache and tree.

use std::ops::Bound;
use std::path::Path;

use log::{info, warn};

use crate::buffer::{LruCache, StatsSnapshot};
use crate::common::{Config, Result};
use crate::index::{BPlusTree, RangeIter, TreeShape};
use crate::storage::{FileStorage, MemoryStorage, Pager, Storage};

/// An ordered key-value store in a single page file.
///
/// Owns the whole stack: storage, [`Pager`], [`LruCache`] and [`BPlusTree`].
/// Several databases can be open in one process.
///
/// # Example
/// ```
/// use pagetree::{Config, Database};
/// use std::ops::Bound;
///
/// let mut db = Database::in_memory(Config::default()).unwrap();
/// db.insert(b"apple", b"red").unwrap();
/// db.insert(b"banana", b"yellow").unwrap();
///
/// assert_eq!(db.search(b"apple").unwrap(), Some(b"red".to_vec()));
/// assert_eq!(db.range(Bound::Unbounded, Bound::Unbounded).count(), 2);
/// assert!(db.delete(b"apple").unwrap());
/// ```
pub struct Database {
    tree: BPlusTree,
    config: Config,
}

impl Database {
    /// Create a new database file at `path`.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `config` doesn't validate
    /// - `Error::Io` if the file exists or can't be written
    pub fn create<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let db = Self::create_in(FileStorage::create(&path)?, config)?;
        info!("created database {}", path.as_ref().display());
        Ok(db)
    }

    /// Open an existing database file.
    ///
    /// The fanout recorded in the file wins over `config.fanout`.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` on a page size mismatch
    /// - `Error::Corrupted` if the header or root fails validation
    pub fn open<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        config.validate()?;
        let db = Self::open_in(FileStorage::open(&path)?, config)?;
        info!("opened database {}", path.as_ref().display());
        Ok(db)
    }

    /// Create a database that lives only in memory.
    pub fn in_memory(config: Config) -> Result<Self> {
        Self::create_in(MemoryStorage::new(), config)
    }

    /// Create a database in empty `storage`.
    pub fn create_in<S: Storage + 'static>(storage: S, config: Config) -> Result<Self> {
        config.validate()?;
        let pager = Pager::create(storage, config.page_size, config.fanout)?;
        let db = Self::attach(pager, config)?;
        db.flush()?;
        Ok(db)
    }

    /// Open the database held in `storage`.
    pub fn open_in<S: Storage + 'static>(storage: S, mut config: Config) -> Result<Self> {
        config.validate()?;
        let pager = Pager::open(storage, config.page_size)?;
        if pager.fanout() != config.fanout {
            info!(
                "using stored fanout {} instead of configured {}",
                pager.fanout(),
                config.fanout
            );
            config.fanout = pager.fanout();
            config.validate()?;
        }
        Self::attach(pager, config)
    }

    fn attach(pager: Pager, config: Config) -> Result<Self> {
        let cache = LruCache::new(config.cache_capacity, pager);
        let tree = BPlusTree::open(cache, config.max_overflow_pages)?;
        info!(
            "database ready: page_size={} fanout={} cache_capacity={}",
            config.page_size, config.fanout, config.cache_capacity
        );
        Ok(Self { tree, config })
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.tree.search(key)
    }

    /// Insert or overwrite `key`.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.insert(key, value)
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.tree.delete(key)
    }

    /// Entries with keys within `(low, high)`, in key order.
    pub fn range(&self, low: Bound<&[u8]>, high: Bound<&[u8]>) -> RangeIter<'_> {
        self.tree.range(low, high)
    }

    pub fn len(&self) -> Result<usize> {
        self.tree.len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.tree.is_empty()
    }

    pub fn height(&self) -> Result<usize> {
        self.tree.height()
    }

    /// Check every tree invariant. See [`BPlusTree::verify`].
    pub fn verify(&self) -> Result<TreeShape> {
        self.tree.verify()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Write every dirty page and the header to storage.
    pub fn flush(&self) -> Result<()> {
        self.tree.flush()
    }

    /// Flush and close, reporting any flush error.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!("closed database: {}", self.stats());
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.tree.stats()
    }

    /// Effective configuration (fanout as recorded in the file).
    pub fn config(&self) -> Config {
        self.config
    }

    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.tree.flush() {
            warn!("flush on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{min_cache_capacity, Error};
    use crate::storage::MemoryStorage;

    fn config() -> Config {
        Config::default().with_fanout(4).with_cache_capacity(min_cache_capacity(4))
    }

    #[test]
    fn test_in_memory_basic() {
        let mut db = Database::in_memory(config()).unwrap();
        assert!(db.is_empty().unwrap());

        db.insert(b"a", b"1").unwrap();
        db.insert(b"b", b"2").unwrap();
        assert_eq!(db.search(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(db.len().unwrap(), 2);
        assert!(db.delete(b"a").unwrap());
        assert!(!db.delete(b"a").unwrap());
        assert_eq!(db.len().unwrap(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Database::in_memory(config().with_fanout(2));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_reopen_uses_stored_fanout() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        {
            let mut db = Database::create_in(storage, config()).unwrap();
            for i in 0..20u8 {
                db.insert(&[i], &[i]).unwrap();
            }
            db.close().unwrap();
        }

        let db = Database::open_in(handle.storage(), config().with_fanout(8)).unwrap();
        assert_eq!(db.config().fanout, 4);
        assert_eq!(db.tree().fanout(), 4);
        assert_eq!(db.verify().unwrap().entries, 20);
    }

    #[test]
    fn test_create_in_non_empty_storage_fails() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        Database::create_in(storage, config()).unwrap();

        assert!(Database::create_in(handle.storage(), config()).is_err());
    }

    #[test]
    fn test_drop_flushes() {
        let storage = MemoryStorage::new();
        let handle = storage.handle();
        {
            let mut db = Database::create_in(storage, config()).unwrap();
            db.insert(b"kept", b"yes").unwrap();
        }

        let db = Database::open_in(handle.storage(), config()).unwrap();
        assert_eq!(db.search(b"kept").unwrap(), Some(b"yes".to_vec()));
    }
}
