//! Cross-component scenarios: the B+ tree driven through the buffer pool,
//! under concurrency and across restarts.

use std::thread;

use granite_common::types::{PageId, RecordId};
use granite_storage::buffer::{BufferPoolConfig, BufferPoolManager};
use granite_storage::disk::DiskManager;
use granite_storage::index::{BPlusTree, Transaction};
use rand::seq::SliceRandom;
use tempfile::tempdir;

fn make_pool(dir: &tempfile::TempDir, num_frames: usize) -> BufferPoolManager {
    let disk = DiskManager::open(dir.path().join("test.db")).unwrap();
    BufferPoolManager::new(BufferPoolConfig::new(num_frames), disk).unwrap()
}

fn scan_keys(tree: &BPlusTree<u64, u64>) -> Vec<u64> {
    tree.iter()
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect()
}

#[test]
fn concurrent_disjoint_inserts() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 64);
    let tree: BPlusTree<u64, u64> = BPlusTree::new("concurrent", pool, 8, 8).unwrap();

    thread::scope(|s| {
        for range in [1..=1000u64, 1001..=2000u64] {
            let tree = &tree;
            s.spawn(move || {
                for key in range {
                    let mut txn = Transaction::new();
                    assert!(tree.insert(key, key, &mut txn).unwrap());
                }
            });
        }
    });

    for key in 1..=2000u64 {
        assert_eq!(tree.get(&key).unwrap(), Some(key), "key {key}");
    }
    assert_eq!(scan_keys(&tree), (1..=2000).collect::<Vec<u64>>());
}

#[test]
fn concurrent_disjoint_removes() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 64);
    let tree: BPlusTree<u64, u64> = BPlusTree::new("removes", pool, 8, 8).unwrap();

    for key in 1..=2000u64 {
        tree.insert(key, key, &mut Transaction::new()).unwrap();
    }

    thread::scope(|s| {
        for range in [1..=1000u64, 1001..=2000u64] {
            let tree = &tree;
            s.spawn(move || {
                for key in range {
                    tree.remove(&key, &mut Transaction::new()).unwrap();
                }
            });
        }
    });

    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), PageId::INVALID);
}

#[test]
fn concurrent_readers_and_writers() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 64);
    let tree: BPlusTree<u64, u64> = BPlusTree::new("mixed", pool, 8, 8).unwrap();

    for key in (0..1000u64).map(|k| k * 2) {
        tree.insert(key, key, &mut Transaction::new()).unwrap();
    }

    thread::scope(|s| {
        // Writers fill in the odd keys.
        for writer in 0..2u64 {
            let tree = &tree;
            s.spawn(move || {
                for i in 0..500u64 {
                    let key = (i * 2 + writer * 1000) * 2 + 1;
                    tree.insert(key, key, &mut Transaction::new()).unwrap();
                }
            });
        }
        // Readers hammer keys that are guaranteed present.
        for reader in 0..2u64 {
            let tree = &tree;
            s.spawn(move || {
                for i in 0..1000u64 {
                    let key = ((i + reader * 37) % 1000) * 2;
                    assert_eq!(tree.get(&key).unwrap(), Some(key));
                }
            });
        }
    });

    for key in (0..1000u64).map(|k| k * 2) {
        assert_eq!(tree.get(&key).unwrap(), Some(key));
    }
}

#[test]
fn iterator_races_concurrent_inserts() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 64);
    let tree: BPlusTree<u64, u64> = BPlusTree::new("iter_race", pool, 8, 8).unwrap();

    // Even keys are present before the iterator starts.
    for key in (2..=1000u64).step_by(2) {
        tree.insert(key, key, &mut Transaction::new()).unwrap();
    }

    let seen = thread::scope(|s| {
        let writer = {
            let tree = &tree;
            s.spawn(move || {
                for key in (1..=999u64).step_by(2) {
                    tree.insert(key, key, &mut Transaction::new()).unwrap();
                }
            })
        };

        let seen: Vec<u64> = scan_keys(&tree);
        writer.join().unwrap();
        seen
    });

    // The scan must be strictly ascending (no key yielded twice) and must
    // contain every key that existed before it started. Odd keys may or
    // may not appear depending on timing.
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "scan not ascending");
    let evens: Vec<u64> = seen.iter().copied().filter(|k| k % 2 == 0).collect();
    assert_eq!(evens, (2..=1000).step_by(2).collect::<Vec<u64>>());
}

#[test]
fn shuffled_permutation_scans_in_order() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 64);
    let tree: BPlusTree<u64, u64> = BPlusTree::new("shuffled", pool, 4, 4).unwrap();

    let mut keys: Vec<u64> = (1..=500).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &key in &keys {
        assert!(tree.insert(key, key * 3, &mut Transaction::new()).unwrap());
    }

    let scanned: Vec<(u64, u64)> = tree.iter().unwrap().map(|e| e.unwrap()).collect();
    assert_eq!(scanned.len(), 500);
    for (i, &(key, value)) in scanned.iter().enumerate() {
        assert_eq!(key, i as u64 + 1);
        assert_eq!(value, key * 3);
    }
}

#[test]
fn tree_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    {
        let disk = DiskManager::open(&path).unwrap();
        let pool = BufferPoolManager::new(BufferPoolConfig::new(32), disk).unwrap();
        let tree: BPlusTree<u64, u64> = BPlusTree::new("restart", pool.clone(), 8, 8).unwrap();
        for key in 1..=300u64 {
            tree.insert(key, key + 7, &mut Transaction::new()).unwrap();
        }
        pool.flush_all().unwrap();
    }

    let disk = DiskManager::open(&path).unwrap();
    let pool = BufferPoolManager::new(BufferPoolConfig::new(32), disk).unwrap();
    let tree: BPlusTree<u64, u64> = BPlusTree::new("restart", pool, 8, 8).unwrap();

    assert!(!tree.is_empty());
    for key in 1..=300u64 {
        assert_eq!(tree.get(&key).unwrap(), Some(key + 7));
    }
    let keys: Vec<u64> = tree.iter().unwrap().map(|e| e.unwrap().0).collect();
    assert_eq!(keys, (1..=300).collect::<Vec<u64>>());
}

#[test]
fn empty_then_restart_reports_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");

    {
        let disk = DiskManager::open(&path).unwrap();
        let pool = BufferPoolManager::new(BufferPoolConfig::new(32), disk).unwrap();
        let tree: BPlusTree<u64, u64> = BPlusTree::new("drained", pool.clone(), 4, 4).unwrap();
        for key in 1..=50u64 {
            tree.insert(key, key, &mut Transaction::new()).unwrap();
        }
        for key in 1..=50u64 {
            tree.remove(&key, &mut Transaction::new()).unwrap();
        }
        assert!(tree.is_empty());
        pool.flush_all().unwrap();
    }

    // The header page must have recorded the INVALID root.
    let disk = DiskManager::open(&path).unwrap();
    let pool = BufferPoolManager::new(BufferPoolConfig::new(32), disk).unwrap();
    let tree: BPlusTree<u64, u64> = BPlusTree::new("drained", pool, 4, 4).unwrap();
    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), PageId::INVALID);
}

#[test]
fn record_id_values() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 32);
    let tree: BPlusTree<u64, RecordId> = BPlusTree::new("heap_pk", pool, 16, 16).unwrap();

    for key in 1..=200u64 {
        let rid = RecordId::new(PageId::new(key / 10), (key % 10) as u32);
        assert!(tree.insert(key, rid, &mut Transaction::new()).unwrap());
    }
    for key in 1..=200u64 {
        let rid = tree.get(&key).unwrap().unwrap();
        assert_eq!(rid.page_id(), PageId::new(key / 10));
        assert_eq!(rid.slot(), (key % 10) as u32);
    }
}

#[test]
fn two_indexes_share_one_pool() {
    let dir = tempdir().unwrap();
    let pool = make_pool(&dir, 64);
    let orders: BPlusTree<u64, u64> = BPlusTree::new("orders_pk", pool.clone(), 8, 8).unwrap();
    let users: BPlusTree<u64, u64> = BPlusTree::new("users_pk", pool, 8, 8).unwrap();

    for key in 1..=100u64 {
        orders.insert(key, key, &mut Transaction::new()).unwrap();
        users.insert(key, key * 2, &mut Transaction::new()).unwrap();
    }
    for key in 1..=100u64 {
        assert_eq!(orders.get(&key).unwrap(), Some(key));
        assert_eq!(users.get(&key).unwrap(), Some(key * 2));
    }
    assert_ne!(orders.root_page_id(), users.root_page_id());
}
