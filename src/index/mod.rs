pub mod btree;
pub mod btree_iterator;
pub mod btree_page;
pub mod key_comparator;

pub use btree::BPlusTree;
pub use btree_iterator::TreeIterator;
pub use btree_page::{BTreeNode, BTreeNodeRef, IndexKey, INTERNAL_CAPACITY, LEAF_CAPACITY};
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
