use std::sync::Arc;
use std::thread;

use petra::buffer::BufferPoolManager;
use petra::common::{PageId, RecordId, SlotId};
use petra::index::{BPlusTree, IntegerComparator};
use petra::storage::disk::DiskManager;

use rand::seq::SliceRandom;
use rand::thread_rng;
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let disk_manager = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk_manager));
    (bpm, temp_file)
}

fn key(v: u64) -> [u8; 8] {
    v.to_le_bytes()
}

/// The rid is derived from the key, so a reader can verify it got a row
/// that actually belongs to the key it asked for.
fn rid_of(v: u64) -> RecordId {
    RecordId::new(PageId::new(v as u32), SlotId::new((v % 100) as u16))
}

// Concurrent readers and one writer: 8 threads issue point lookups for
// preloaded keys in random order while a writer inserts a disjoint range.
// Every lookup must return the row derived from its key - a mismatch would
// mean a torn or misrouted page read.
#[test]
fn test_concurrent_readers_and_one_writer() {
    let (bpm, _temp) = create_bpm(256);
    let tree = Arc::new(
        BPlusTree::with_max_sizes(
            "conc",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            16,
            16,
        )
        .unwrap(),
    );

    for v in 1..=1000 {
        assert!(tree.insert(&key(v), rid_of(v)).unwrap());
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for v in 1001..=2000 {
                assert!(tree.insert(&key(v), rid_of(v)).unwrap());
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..8 {
        let tree = Arc::clone(&tree);
        readers.push(thread::spawn(move || {
            let mut keys: Vec<u64> = (1..=1000).collect();
            keys.shuffle(&mut thread_rng());
            for v in keys {
                let got = tree.get(&key(v)).unwrap();
                assert_eq!(got, Some(rid_of(v)), "reader saw wrong row for key {}", v);
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for v in 1..=2000 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid_of(v)));
    }
}

#[test]
fn test_concurrent_disjoint_inserters() {
    let (bpm, _temp) = create_bpm(256);
    let tree = Arc::new(
        BPlusTree::with_max_sizes(
            "multi_writer",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            8,
            8,
        )
        .unwrap(),
    );

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut keys: Vec<u64> = (t * 500..(t + 1) * 500).collect();
            keys.shuffle(&mut thread_rng());
            for v in keys {
                assert!(tree.insert(&key(v), rid_of(v)).unwrap());
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let collected: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(collected, (0..2000).collect::<Vec<u64>>());
}

#[test]
fn test_concurrent_inserters_racing_on_same_keys() {
    let (bpm, _temp) = create_bpm(256);
    let tree = Arc::new(
        BPlusTree::with_max_sizes(
            "racing",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            8,
            8,
        )
        .unwrap(),
    );

    // Every thread tries the same keys; exactly one insert per key may win.
    let mut handles = Vec::new();
    for _ in 0..4 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut wins = 0u32;
            let mut keys: Vec<u64> = (0..500).collect();
            keys.shuffle(&mut thread_rng());
            for v in keys {
                if tree.insert(&key(v), rid_of(v)).unwrap() {
                    wins += 1;
                }
            }
            wins
        }));
    }

    let total_wins: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total_wins, 500);
    assert_eq!(tree.iter().unwrap().count(), 500);
}

#[test]
fn test_concurrent_inserts_and_deletes_disjoint_ranges() {
    let (bpm, _temp) = create_bpm(256);
    let tree = Arc::new(
        BPlusTree::with_max_sizes(
            "mixed",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            8,
            8,
        )
        .unwrap(),
    );

    // Preload the range the deleters will drain
    for v in 0..1000 {
        tree.insert(&key(v), rid_of(v)).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..2u64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut keys: Vec<u64> = (1000 + t * 500..1000 + (t + 1) * 500).collect();
            keys.shuffle(&mut thread_rng());
            for v in keys {
                assert!(tree.insert(&key(v), rid_of(v)).unwrap());
            }
        }));
    }
    for t in 0..2u64 {
        let tree = Arc::clone(&tree);
        handles.push(thread::spawn(move || {
            let mut keys: Vec<u64> = (t * 500..(t + 1) * 500).collect();
            keys.shuffle(&mut thread_rng());
            for v in keys {
                tree.remove(&key(v)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for v in 0..1000 {
        assert_eq!(tree.get(&key(v)).unwrap(), None, "key {} should be gone", v);
    }
    for v in 1000..2000 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid_of(v)), "key {} missing", v);
    }
}
