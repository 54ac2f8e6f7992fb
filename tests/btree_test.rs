use std::sync::Arc;

use petra::buffer::BufferPoolManager;
use petra::common::{PageId, RecordId, SlotId};
use petra::index::{BPlusTree, BTreeNodeRef, IntegerComparator};
use petra::storage::disk::DiskManager;

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

fn rid(v: u64) -> RecordId {
    RecordId::new(PageId::new(v as u32), SlotId::new((v % 100) as u16))
}

fn small_tree(bpm: &Arc<BufferPoolManager>) -> BPlusTree {
    BPlusTree::with_max_sizes(
        "test_index",
        Arc::clone(bpm),
        Arc::new(IntegerComparator),
        4,
        4,
    )
    .unwrap()
}

fn tree_height(bpm: &BufferPoolManager, root: PageId) -> u32 {
    let mut height = 1;
    let mut pid = root;
    loop {
        let guard = bpm.read_page(pid).unwrap();
        let view = BTreeNodeRef::new(guard.data());
        if view.is_leaf() {
            return height;
        }
        pid = view.child_at(0);
        height += 1;
    }
}

/// Walks the leaf chain from the leftmost leaf, returning all keys in chain
/// order and the number of leaves visited.
fn collect_leaf_chain(bpm: &BufferPoolManager, root: PageId) -> (Vec<u64>, usize) {
    let mut pid = root;
    loop {
        let next = {
            let guard = bpm.read_page(pid).unwrap();
            let view = BTreeNodeRef::new(guard.data());
            if view.is_leaf() {
                break;
            }
            view.child_at(0)
        };
        pid = next;
    }

    let mut keys = Vec::new();
    let mut leaves = 0;
    let mut current = Some(pid);
    while let Some(leaf_pid) = current {
        let guard = bpm.read_page(leaf_pid).unwrap();
        let view = BTreeNodeRef::new(guard.data());
        leaves += 1;
        for i in 0..view.size() as usize {
            keys.push(u64::from_le_bytes(view.key_at(i)));
        }
        current = view.next_page_id();
    }
    (keys, leaves)
}

#[test]
fn test_empty_tree() {
    let (bpm, _temp) = create_bpm(16);
    let tree = small_tree(&bpm);

    assert!(tree.is_empty());
    assert_eq!(tree.get(&key(1)).unwrap(), None);
    assert_eq!(tree.iter().unwrap().count(), 0);
    // removing from an empty tree is a no-op
    tree.remove(&key(1)).unwrap();
}

#[test]
fn test_insert_and_get() {
    let (bpm, _temp) = create_bpm(16);
    let tree = small_tree(&bpm);

    assert!(tree.insert(&key(10), rid(10)).unwrap());
    assert!(tree.insert(&key(20), rid(20)).unwrap());
    assert!(tree.insert(&key(30), rid(30)).unwrap());

    assert_eq!(tree.get(&key(10)).unwrap(), Some(rid(10)));
    assert_eq!(tree.get(&key(20)).unwrap(), Some(rid(20)));
    assert_eq!(tree.get(&key(30)).unwrap(), Some(rid(30)));
    assert_eq!(tree.get(&key(40)).unwrap(), None);
}

#[test]
fn test_duplicate_insert_rejected_and_tree_unchanged() {
    let (bpm, _temp) = create_bpm(16);
    let tree = small_tree(&bpm);

    for v in 1..=8 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }

    let (before, _) = collect_leaf_chain(&bpm, tree.root_page_id());
    for v in 1..=8 {
        assert!(!tree.insert(&key(v), rid(999)).unwrap());
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }
    let (after, _) = collect_leaf_chain(&bpm, tree.root_page_id());
    assert_eq!(before, after);
}

// Split propagation: leaf_max_size = 4, internal_max_size = 4, keys 1..10
// in order. The tree reaches height 3, the root has 2 children, and the
// root separator is 5.
#[test]
fn test_split_propagation() {
    let (bpm, _temp) = create_bpm(32);
    let tree = small_tree(&bpm);

    for v in 1..=10 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }

    let root = tree.root_page_id();
    assert_eq!(tree_height(&bpm, root), 3);

    {
        let guard = bpm.read_page(root).unwrap();
        let view = BTreeNodeRef::new(guard.data());
        assert!(!view.is_leaf());
        assert_eq!(view.size(), 2);
        assert_eq!(u64::from_le_bytes(view.key_at(1)), 5);
    }

    for v in 1..=10 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }
    assert_eq!(tree.get(&key(0)).unwrap(), None);
    assert_eq!(tree.get(&key(11)).unwrap(), None);
}

// Merge cascade: after the split-propagation tree, deleting 10,9,8,7,6
// collapses the height to 2 and leaves exactly the keys 1..5 on the chain.
#[test]
fn test_merge_cascade() {
    let (bpm, _temp) = create_bpm(32);
    let tree = small_tree(&bpm);

    for v in 1..=10 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    for v in (6..=10).rev() {
        tree.remove(&key(v)).unwrap();
    }

    let root = tree.root_page_id();
    assert_eq!(tree_height(&bpm, root), 2);

    {
        let guard = bpm.read_page(root).unwrap();
        let view = BTreeNodeRef::new(guard.data());
        assert_eq!(view.size(), 2);
    }

    let collected: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(collected, vec![1, 2, 3, 4, 5]);

    for v in 1..=5 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }
    for v in 6..=10 {
        assert_eq!(tree.get(&key(v)).unwrap(), None);
    }
}

#[test]
fn test_delete_everything_empties_tree() {
    let (bpm, _temp) = create_bpm(32);
    let tree = small_tree(&bpm);

    for v in 1..=10 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    for v in 1..=10 {
        tree.remove(&key(v)).unwrap();
    }

    assert!(tree.is_empty());
    assert_eq!(tree.iter().unwrap().count(), 0);
    for v in 1..=10 {
        assert_eq!(tree.get(&key(v)).unwrap(), None);
    }

    // The tree grows again from empty
    tree.insert(&key(42), rid(42)).unwrap();
    assert_eq!(tree.get(&key(42)).unwrap(), Some(rid(42)));
}

#[test]
fn test_remove_absent_key_is_noop() {
    let (bpm, _temp) = create_bpm(32);
    let tree = small_tree(&bpm);

    for v in [2, 4, 6, 8] {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    tree.remove(&key(5)).unwrap();
    tree.remove(&key(100)).unwrap();

    let collected: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(collected, vec![2, 4, 6, 8]);
}

#[test]
fn test_leaf_chain_visits_every_key_once() {
    let (bpm, _temp) = create_bpm(64);
    let tree = small_tree(&bpm);

    for v in 1..=100 {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    let (keys, leaves) = collect_leaf_chain(&bpm, tree.root_page_id());
    assert_eq!(keys, (1..=100).collect::<Vec<u64>>());
    assert!(leaves >= 34, "leaves hold at most 3 live entries each");
}

#[test]
fn test_iterator_ascending_after_random_inserts() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(128);
    let tree = small_tree(&bpm);

    let mut keys: Vec<u64> = (0..500).collect();
    keys.shuffle(&mut thread_rng());

    for &v in &keys {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }

    let collected: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(collected, (0..500).collect::<Vec<u64>>());

    for &v in &keys {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }
}

#[test]
fn test_iter_from_positions_at_first_key_geq() {
    let (bpm, _temp) = create_bpm(64);
    let tree = small_tree(&bpm);

    for v in (10..=100).step_by(10) {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    // Exact hit
    let from_50: Vec<u64> = tree
        .iter_from(&key(50))
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(from_50, vec![50, 60, 70, 80, 90, 100]);

    // Between keys
    let from_55: Vec<u64> = tree
        .iter_from(&key(55))
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(from_55, vec![60, 70, 80, 90, 100]);

    // Past the end
    assert_eq!(tree.iter_from(&key(500)).unwrap().count(), 0);
}

#[test]
fn test_random_insert_delete_roundtrip() {
    use rand::seq::SliceRandom;
    use rand::thread_rng;

    let (bpm, _temp) = create_bpm(128);
    let tree = small_tree(&bpm);

    let mut keys: Vec<u64> = (0..300).collect();
    keys.shuffle(&mut thread_rng());
    for &v in &keys {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    // Delete a random half, keep the rest
    keys.shuffle(&mut thread_rng());
    let (gone, kept) = keys.split_at(150);
    for &v in gone {
        tree.remove(&key(v)).unwrap();
    }

    for &v in gone {
        assert_eq!(tree.get(&key(v)).unwrap(), None, "key {} not deleted", v);
    }
    for &v in kept {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)), "key {} lost", v);
    }

    let mut expected: Vec<u64> = kept.to_vec();
    expected.sort();
    let collected: Vec<u64> = tree
        .iter()
        .unwrap()
        .map(|r| u64::from_le_bytes(r.unwrap().0))
        .collect();
    assert_eq!(collected, expected);

    // Drain the remainder in random order: the tree must end up empty
    let mut rest: Vec<u64> = kept.to_vec();
    rest.shuffle(&mut thread_rng());
    for &v in &rest {
        tree.remove(&key(v)).unwrap();
    }
    assert!(tree.is_empty());
}

#[test]
fn test_reopen_from_header_page() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, disk_manager));
        let tree = BPlusTree::with_max_sizes(
            "orders_pk",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            4,
            4,
        )
        .unwrap();

        for v in 1..=50 {
            tree.insert(&key(v), rid(v)).unwrap();
        }
        bpm.flush_all_pages().unwrap();
    }

    {
        let disk_manager = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(32, disk_manager));
        let tree = BPlusTree::with_max_sizes(
            "orders_pk",
            Arc::clone(&bpm),
            Arc::new(IntegerComparator),
            4,
            4,
        )
        .unwrap();

        assert!(!tree.is_empty());
        for v in 1..=50 {
            assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)), "key {} after reopen", v);
        }
    }
}

#[test]
fn test_two_indexes_share_header_page() {
    let (bpm, _temp) = create_bpm(64);

    let a = BPlusTree::with_max_sizes("idx_a", Arc::clone(&bpm), Arc::new(IntegerComparator), 4, 4)
        .unwrap();
    let b = BPlusTree::with_max_sizes("idx_b", Arc::clone(&bpm), Arc::new(IntegerComparator), 4, 4)
        .unwrap();

    for v in 1..=20 {
        a.insert(&key(v), rid(v)).unwrap();
        b.insert(&key(v * 1000), rid(v)).unwrap();
    }

    assert_ne!(a.root_page_id(), b.root_page_id());
    for v in 1..=20 {
        assert_eq!(a.get(&key(v)).unwrap(), Some(rid(v)));
        assert_eq!(a.get(&key(v * 1000)).unwrap(), None);
        assert_eq!(b.get(&key(v * 1000)).unwrap(), Some(rid(v)));
    }
}

#[test]
fn test_default_capacity_tree_bulk() {
    let (bpm, _temp) = create_bpm(64);
    let tree = BPlusTree::new("bulk", Arc::clone(&bpm), Arc::new(IntegerComparator)).unwrap();

    for v in 0..2000 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }
    for v in 0..2000 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }
    assert_eq!(tree.iter().unwrap().count(), 2000);
}
