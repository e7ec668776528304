//! Integration tests for the page cache.
//!
//! These tests verify eviction order and write-back safety across the cache,
//! pager and storage backends.

use pagetree::{Error, FileStorage, LruCache, MemoryHandle, MemoryStorage, PageId, Pager};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const PAGE: usize = 4096;
const DATA: usize = 100;

fn create_cache(capacity: usize) -> (LruCache, MemoryHandle) {
    let storage = MemoryStorage::new();
    let handle = storage.handle();
    let pager = Pager::create(storage, PAGE, 8).unwrap();
    (LruCache::new(capacity, pager), handle)
}

fn new_filled(cache: &LruCache, byte: u8) -> PageId {
    let mut guard = cache.new_page().unwrap();
    guard.as_mut_slice()[DATA] = byte;
    guard.page_id()
}

fn stored_byte(handle: &MemoryHandle, page_id: PageId) -> u8 {
    handle.read(page_id.0 as u64 * PAGE as u64 + DATA as u64, 1)[0]
}

/// Inserting N+1 pages into a cache of N evicts exactly the LRU page.
#[test]
fn test_lru_victim_is_least_recently_used() {
    let (cache, _handle) = create_cache(4);
    let pages: Vec<PageId> = (0..4).map(|i| new_filled(&cache, i)).collect();

    let extra = new_filled(&cache, 4);

    assert!(!cache.is_cached(pages[0]));
    for &pid in &pages[1..] {
        assert!(cache.is_cached(pid));
    }
    assert!(cache.is_cached(extra));
    assert_eq!(cache.stats().snapshot().evictions, 1);
}

/// Re-getting a page makes it most recently used.
#[test]
fn test_reaccess_makes_page_mru() {
    let (cache, _handle) = create_cache(4);
    let pages: Vec<PageId> = (0..4).map(|i| new_filled(&cache, i)).collect();

    drop(cache.fetch_page_read(pages[0]).unwrap());
    new_filled(&cache, 4);

    assert!(cache.is_cached(pages[0]));
    assert!(!cache.is_cached(pages[1]));
}

/// Pinned pages are never chosen as victims.
#[test]
fn test_pinned_pages_survive_eviction() {
    let (cache, _handle) = create_cache(2);
    let a = new_filled(&cache, 1);
    cache.pin(a).unwrap();

    for i in 0..5 {
        new_filled(&cache, i);
    }
    assert!(cache.is_cached(a));

    cache.unpin(a).unwrap();
    assert!(matches!(cache.unpin(a), Err(Error::PageNotPinned(_))));
}

/// A failed write-back leaves storage holding the old page while the cached
/// copy survives and is written once storage recovers.
#[test]
fn test_failed_write_back_keeps_old_page_on_storage() {
    let (cache, handle) = create_cache(2);
    let a = new_filled(&cache, 0x11);
    let b = new_filled(&cache, 0x22);
    cache.flush_all().unwrap();

    cache.fetch_page_write(a).unwrap().as_mut_slice()[DATA] = 0x33;
    drop(cache.fetch_page_read(b).unwrap());

    handle.fail_writes(true);
    let err = new_filled_fallible(&cache).unwrap_err();
    assert!(matches!(err, Error::Io(_)));

    // storage has the old bytes, the cache the new ones
    assert_eq!(stored_byte(&handle, a), 0x11);
    assert!(cache.is_buried(a));
    assert_eq!(cache.fetch_page_read(a).unwrap().as_slice()[DATA], 0x33);

    handle.fail_writes(false);
    cache.flush_all().unwrap();
    assert_eq!(stored_byte(&handle, a), 0x33);
}

fn new_filled_fallible(cache: &LruCache) -> pagetree::Result<PageId> {
    Ok(cache.new_page()?.page_id())
}

/// Data persists across many eviction cycles.
#[test]
fn test_data_persistence_across_evictions() {
    let (cache, _handle) = create_cache(8);

    let page_ids: Vec<PageId> = (0u8..40).map(|i| new_filled(&cache, i)).collect();

    for (i, &pid) in page_ids.iter().enumerate() {
        let guard = cache.fetch_page_read(pid).unwrap();
        assert_eq!(guard.as_slice()[DATA], i as u8);
    }
    assert!(cache.stats().snapshot().pages_written >= 32);
}

/// Flush, then reopen the file with a fresh cache.
#[test]
fn test_flush_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    let pid = {
        let pager = Pager::create(FileStorage::create(&path).unwrap(), PAGE, 8).unwrap();
        let cache = LruCache::new(8, pager);
        let pid = new_filled(&cache, 0x5A);
        cache.flush_all().unwrap();
        pid
    };

    let pager = Pager::open(FileStorage::open(&path).unwrap(), PAGE).unwrap();
    let cache = LruCache::new(8, pager);
    assert_eq!(cache.fetch_page_read(pid).unwrap().as_slice()[DATA], 0x5A);
    assert_eq!(cache.stats().snapshot().cache_misses, 1);
}

/// Concurrent readers of different pages share the cache.
#[test]
fn test_concurrent_readers() {
    let (cache, _handle) = create_cache(16);
    let cache = Arc::new(cache);
    let page_ids: Vec<PageId> = (0u8..8).map(|i| new_filled(&cache, i)).collect();

    let handles: Vec<_> = page_ids
        .iter()
        .enumerate()
        .map(|(i, &pid)| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..50 {
                    assert_eq!(cache.fetch_page_read(pid).unwrap().as_slice()[DATA], i as u8);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(cache.stats().snapshot().cache_hits >= 400);
}
