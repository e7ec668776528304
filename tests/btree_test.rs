//! End-to-end tests of the B+-tree through [`Database`].

use pagetree::{min_cache_capacity, Config, Database, Error, MemoryHandle, MemoryStorage, PageType};
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use tempfile::tempdir;

const PAGE: usize = 4096;

fn key(i: u32) -> Vec<u8> {
    i.to_be_bytes().to_vec()
}

fn memory_db(config: Config) -> (Database, MemoryHandle) {
    let storage = MemoryStorage::new();
    let handle = storage.handle();
    (Database::create_in(storage, config).unwrap(), handle)
}

fn collect(db: &Database, low: Bound<&[u8]>, high: Bound<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
    db.range(low, high).map(Result::unwrap).collect()
}

/// Count stored pages of the given type.
fn pages_of_type(handle: &MemoryHandle, page_type: PageType) -> usize {
    (0..handle.len() / PAGE)
        .filter(|&n| handle.read((n * PAGE) as u64, 1)[0] == page_type as u8)
        .count()
}

#[test]
fn test_fanout_four_sequential_inserts() {
    let (mut db, _) = memory_db(Config::default().with_fanout(4).with_cache_capacity(min_cache_capacity(4)));

    let mut root_splits = 0;
    let mut height = db.height().unwrap();
    for i in 1..=10 {
        db.insert(&key(i), &key(i * 100)).unwrap();
        let h = db.height().unwrap();
        if h > height {
            root_splits += 1;
            height = h;
        }
    }

    assert_eq!(root_splits, 2);
    assert_eq!(db.height().unwrap(), 3);

    let (low, high) = (key(3), key(7));
    let found: Vec<u32> = collect(&db, Included(low.as_slice()), Included(high.as_slice()))
        .into_iter()
        .map(|(k, v)| {
            let k = u32::from_be_bytes(k.try_into().unwrap());
            assert_eq!(v, key(k * 100));
            k
        })
        .collect();
    assert_eq!(found, vec![3, 4, 5, 6, 7]);

    let shape = db.verify().unwrap();
    assert_eq!(shape.entries, 10);
    assert_eq!(shape.height, 3);
}

#[test]
fn test_smallest_accepted_cache_runs_deep_tree() {
    let config = Config::default().with_fanout(3).with_cache_capacity(min_cache_capacity(3));
    let (mut db, _) = memory_db(config);
    let long = |i: u32| [vec![0xEE; 300], key(i)].concat();

    for i in 0..2000 {
        db.insert(&key(i), &key(i)).unwrap();
    }
    for i in 0..200 {
        db.insert(&long(i), b"long").unwrap();
    }
    assert!(db.height().unwrap() >= 8);
    assert!(db.stats().evictions > 0);

    for i in (0..2000).step_by(2) {
        assert!(db.delete(&key(i)).unwrap());
    }
    for i in (0..200).rev() {
        assert!(db.delete(&long(i)).unwrap());
    }

    let shape = db.verify().unwrap();
    assert_eq!(shape.entries, 1000);
    assert_eq!(db.search(&key(1)).unwrap(), Some(key(1)));
    assert_eq!(db.search(&key(2)).unwrap(), None);
}

#[test]
fn test_long_key_survives_eviction() {
    let config = Config::default();
    let (mut db, handle) = memory_db(config.with_cache_capacity(min_cache_capacity(config.fanout)));
    let long_key = vec![0x7F; 300];

    db.insert(&long_key, b"long").unwrap();
    db.flush().unwrap();
    assert_eq!(pages_of_type(&handle, PageType::Overflow), 1);

    // push everything else through the cache
    for i in 0..400 {
        db.insert(&key(i), &[0xAA; 64]).unwrap();
    }
    assert!(db.stats().evictions > 0);

    assert_eq!(db.search(&long_key).unwrap(), Some(b"long".to_vec()));
    assert_eq!(db.search(&long_key[..299]).unwrap(), None);
}

#[test]
fn test_insert_then_delete_leaves_empty_root() {
    let (mut db, _) = memory_db(Config::default());

    db.insert(b"only", b"one").unwrap();
    assert!(db.delete(b"only").unwrap());

    assert!(db.is_empty().unwrap());
    assert_eq!(db.height().unwrap(), 1);
    assert_eq!(db.search(b"only").unwrap(), None);
    assert_eq!(collect(&db, Unbounded, Unbounded), vec![]);
}

#[test]
fn test_empty_and_boundary_lengths() {
    let config = Config::default().with_max_overflow_pages(2);
    let (mut db, _) = memory_db(config);
    let max = db.tree().codec().max_len();

    let keys = [vec![], vec![1], vec![2; 255], vec![3; 256], vec![4; max]];
    for k in &keys {
        db.insert(k, k).unwrap();
    }
    for k in &keys {
        assert_eq!(db.search(k).unwrap().as_ref(), Some(k));
    }

    assert!(matches!(
        db.insert(&vec![5; max + 1], b"v"),
        Err(Error::KeyTooLong { .. })
    ));
    assert!(matches!(
        db.insert(b"k", &vec![5; max + 1]),
        Err(Error::ValueTooLong { .. })
    ));

    // the empty key sorts first
    let first = db.range(Unbounded, Unbounded).next().unwrap().unwrap();
    assert_eq!(first.0, Vec::<u8>::new());
    assert_eq!(db.verify().unwrap().entries, keys.len());
}

#[test]
fn test_range_excluded_bounds() {
    let (mut db, _) = memory_db(Config::default().with_fanout(5).with_cache_capacity(min_cache_capacity(5)));
    for i in 0..100 {
        db.insert(&key(i), b"").unwrap();
    }

    let (low, high) = (key(10), key(20));
    let found = collect(&db, Excluded(low.as_slice()), Excluded(high.as_slice()));
    assert_eq!(found.len(), 9);
    assert_eq!(found[0].0, key(11));
    assert_eq!(found[8].0, key(19));
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.db");
    let config = Config::default().with_fanout(6).with_cache_capacity(64);

    {
        let mut db = Database::create(&path, config).unwrap();
        for i in 0..500 {
            db.insert(&key(i), &key(i ^ 0xFFFF)).unwrap();
        }
        for i in (0..500).step_by(3) {
            db.delete(&key(i)).unwrap();
        }
        db.close().unwrap();
    }

    let db = Database::open(&path, config).unwrap();
    let shape = db.verify().unwrap();
    assert_eq!(shape.entries, 500 - 167);
    assert_eq!(db.search(&key(1)).unwrap(), Some(key(1 ^ 0xFFFF)));
    assert_eq!(db.search(&key(3)).unwrap(), None);
}

#[test]
fn test_open_takes_fanout_from_header() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.db");

    Database::create(&path, Config::default().with_fanout(3))
        .unwrap()
        .close()
        .unwrap();

    let db = Database::open(&path, Config::default()).unwrap();
    assert_eq!(db.config().fanout, 3);
}

#[test]
fn test_page_size_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tree.db");
    Database::create(&path, Config::default()).unwrap().close().unwrap();

    let config = Config::default().with_page_size(8192);
    assert!(matches!(
        Database::open(&path, config),
        Err(Error::InvalidConfig(_))
    ));
}

#[test]
fn test_corrupted_root_detected_on_open() {
    let storage = MemoryStorage::new();
    let handle = storage.handle();
    {
        let mut db = Database::create_in(storage, Config::default()).unwrap();
        db.insert(b"key", b"value").unwrap();
        db.close().unwrap();
    }

    // flip a byte inside the root leaf's entries
    let offset = PAGE as u64 + 20;
    let byte = handle.read(offset, 1)[0];
    handle.corrupt(offset, &[byte ^ 0xFF]);

    assert!(matches!(
        Database::open_in(handle.storage(), Config::default()),
        Err(Error::Corrupted(_))
    ));
}

#[test]
fn test_open_missing_file_fails() {
    let dir = tempdir().unwrap();
    let result = Database::open(dir.path().join("missing.db"), Config::default());
    assert!(matches!(result, Err(Error::Io(_))));
}
