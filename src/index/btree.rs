use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    PageId, PetraError, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID, KEY_LEN,
};
use crate::storage::page::{HeaderPage, HeaderPageRef};

use super::btree_page::{BTreeNode, BTreeNodeRef, IndexKey, INTERNAL_CAPACITY, LEAF_CAPACITY};
use super::btree_iterator::TreeIterator;
use super::KeyComparator;

/// Write operations crab differently: reads go through the separate
/// read-latched descent and are always safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Delete,
}

/// While descending for a write operation, the latch on `root_page_id` is
/// carried as an Option and dropped the moment a safe node is reached.
type RootGuard<'a> = Option<MutexGuard<'a, PageId>>;

/// A concurrent B+tree index layered on the buffer pool.
///
/// All structural work happens over pinned, latched pages obtained through
/// page guards. Writers crab from the root: ancestor latches accumulate in a
/// call-scoped held set and are released oldest-first as soon as the current
/// node is safe for the operation.
pub struct BPlusTree {
    index_name: String,
    bpm: Arc<BufferPoolManager>,
    comparator: Arc<dyn KeyComparator>,
    leaf_max_size: u32,
    internal_max_size: u32,
    /// Root page id, INVALID_PAGE_ID while the tree is empty. The mutex is
    /// the root latch: it serializes root replacement against concurrent
    /// traversals.
    root_page_id: Mutex<PageId>,
}

impl BPlusTree {
    /// Opens (or creates) the named index with the structural default node
    /// capacities. An existing root is picked up from the header page.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
    ) -> Result<Self> {
        Self::with_max_sizes(name, bpm, comparator, LEAF_CAPACITY, INTERNAL_CAPACITY)
    }

    /// Opens (or creates) the named index with explicit node capacities.
    /// Splits trigger at `size >= max_size`; one slot stays in reserve.
    pub fn with_max_sizes(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: Arc<dyn KeyComparator>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self> {
        let index_name = name.into();

        let root_page_id = {
            let guard = bpm.read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data())
                .get_root_id(&index_name)
                .unwrap_or(INVALID_PAGE_ID)
        };

        Ok(Self {
            index_name,
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            root_page_id: Mutex::new(root_page_id),
        })
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point query.
    pub fn get(&self, key: &[u8]) -> Result<Option<RecordId>> {
        assert_eq!(key.len(), KEY_LEN);

        match self.find_leaf_read(Some(key))? {
            Some(leaf) => {
                Ok(BTreeNodeRef::new(leaf.data()).leaf_lookup(key, &*self.comparator))
            }
            None => Ok(None),
        }
    }

    /// Inserts a unique key. Returns false if the key already exists.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> Result<bool> {
        assert_eq!(key.len(), KEY_LEN);

        let root_latch_guard = self.root_page_id.lock();
        let root_pid = *root_latch_guard;
        let mut root_latch: RootGuard<'_> = Some(root_latch_guard);

        if root_pid == INVALID_PAGE_ID {
            self.start_new_tree(key, rid, &mut root_latch)?;
            return Ok(true);
        }

        let mut held: Vec<WritePageGuard> = Vec::new();
        let mut leaf =
            self.find_leaf_write(root_pid, key, Operation::Insert, &mut root_latch, &mut held)?;

        if BTreeNodeRef::new(leaf.data())
            .leaf_lookup(key, &*self.comparator)
            .is_some()
        {
            // Duplicate key: every guard and the root latch drop on return
            return Ok(false);
        }

        let needs_split = {
            let mut node = BTreeNode::new(leaf.data_mut());
            node.leaf_insert(key, rid, &*self.comparator);
            node.as_ref().size() >= node.as_ref().max_size()
        };

        if needs_split {
            self.split_leaf(&mut leaf, &mut root_latch, &mut held)?;
        }

        Ok(true)
    }

    /// Deletes a key; a no-op if the key is absent.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        assert_eq!(key.len(), KEY_LEN);

        let root_latch_guard = self.root_page_id.lock();
        let root_pid = *root_latch_guard;
        if root_pid == INVALID_PAGE_ID {
            return Ok(());
        }
        let mut root_latch: RootGuard<'_> = Some(root_latch_guard);

        let mut held: Vec<WritePageGuard> = Vec::new();
        let leaf =
            self.find_leaf_write(root_pid, key, Operation::Delete, &mut root_latch, &mut held)?;

        if BTreeNodeRef::new(leaf.data())
            .leaf_lookup(key, &*self.comparator)
            .is_none()
        {
            return Ok(());
        }

        let mut deleted_pages: Vec<PageId> = Vec::new();
        let mut node_guard = leaf;
        BTreeNode::new(node_guard.data_mut()).leaf_remove(key, &*self.comparator);

        // Walk structural repairs up the tree. At each level the node and
        // its sibling are released before ascending; the parent chain stays
        // latched in the held set.
        loop {
            let (is_root, size, min_size) = {
                let view = BTreeNodeRef::new(node_guard.data());
                (view.is_root(), view.size(), view.min_size())
            };

            if is_root {
                self.adjust_root(&mut node_guard, &mut root_latch, &mut deleted_pages)?;
                held.clear();
                break;
            }

            if size >= min_size {
                root_latch.take();
                held.clear();
                break;
            }

            let mut parent = held
                .pop()
                .expect("parent latch is held while a child underflows");
            let node_pid = node_guard.page_id();

            let (index, sibling_pid) = {
                let parent_view = BTreeNodeRef::new(parent.data());
                let index = parent_view
                    .value_index(node_pid)
                    .expect("underflowing child must appear in its parent");
                let sibling_index = if index == 0 { 1 } else { index - 1 };
                (index, parent_view.child_at(sibling_index))
            };
            let mut sibling = self.bpm.write_page(sibling_pid)?;

            let combined = BTreeNodeRef::new(node_guard.data()).size()
                + BTreeNodeRef::new(sibling.data()).size();
            let max_size = BTreeNodeRef::new(node_guard.data()).max_size();

            if combined < max_size {
                // Coalesce into the earlier of the two pages
                let key_index = if index == 0 { 1 } else { index };
                let middle_key = BTreeNodeRef::new(parent.data()).key_at(key_index);

                let victim_pid = if index == 0 { sibling_pid } else { node_pid };
                let (recipient_pid, moved_children) = {
                    let (mut recipient, mut victim) = if index == 0 {
                        (
                            BTreeNode::new(node_guard.data_mut()),
                            BTreeNode::new(sibling.data_mut()),
                        )
                    } else {
                        (
                            BTreeNode::new(sibling.data_mut()),
                            BTreeNode::new(node_guard.data_mut()),
                        )
                    };

                    let moved = if victim.as_ref().is_leaf() {
                        victim.leaf_move_all_to(&mut recipient);
                        Vec::new()
                    } else {
                        victim.internal_move_all_to(&middle_key, &mut recipient)
                    };
                    (recipient.as_ref().page_id(), moved)
                };

                // Adopt the moved children. None of them is latched by this
                // thread: the level below was fully released before
                // ascending, and leaves have no children.
                for child_pid in moved_children {
                    let mut child = self.bpm.write_page(child_pid)?;
                    BTreeNode::new(child.data_mut()).set_parent_page_id(Some(recipient_pid));
                }

                BTreeNode::new(parent.data_mut()).internal_remove_at(key_index);
                deleted_pages.push(victim_pid);

                drop(sibling);
                node_guard = parent;
                continue;
            }

            // Redistribute one entry across and patch the separator
            self.redistribute(&mut node_guard, &mut sibling, &mut parent, index)?;
            root_latch.take();
            held.clear();
            break;
        }

        drop(node_guard);
        held.clear();
        root_latch.take();

        for page_id in deleted_pages {
            if !self.bpm.delete_page(page_id)? {
                log::warn!("deferred delete of {} skipped: still pinned", page_id);
            }
        }

        Ok(())
    }

    /// Iterator over all entries in ascending key order.
    pub fn iter(&self) -> Result<TreeIterator> {
        let leaf = self.find_leaf_read(None)?;
        Ok(TreeIterator::new(Arc::clone(&self.bpm), leaf, 0))
    }

    /// Iterator positioned at the first entry with key >= the given key.
    pub fn iter_from(&self, key: &[u8]) -> Result<TreeIterator> {
        assert_eq!(key.len(), KEY_LEN);

        match self.find_leaf_read(Some(key))? {
            Some(leaf) => {
                let index = BTreeNodeRef::new(leaf.data()).key_index(key, &*self.comparator);
                Ok(TreeIterator::new(Arc::clone(&self.bpm), Some(leaf), index))
            }
            None => Ok(TreeIterator::new(Arc::clone(&self.bpm), None, 0)),
        }
    }

    /*
     * Traversal
     */

    /// Read-crabs to the leaf for `key`, or to the leftmost leaf when no key
    /// is given. Returns None when the tree is empty.
    fn find_leaf_read(&self, key: Option<&[u8]>) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_page_id.lock();
        let root_pid = *root_latch;
        if root_pid == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut page = self.bpm.read_page(root_pid)?;
        // Reads never restructure: the root latch can go as soon as the
        // root page latch is held.
        drop(root_latch);

        loop {
            let child = {
                let view = BTreeNodeRef::new(page.data());
                if view.is_leaf() {
                    None
                } else {
                    Some(match key {
                        Some(k) => view.internal_lookup(k, &*self.comparator),
                        None => view.child_at(0),
                    })
                }
            };

            match child {
                None => return Ok(Some(page)),
                Some(child_pid) => {
                    // Latch the child before the parent guard is dropped
                    let child_guard = self.bpm.read_page(child_pid)?;
                    page = child_guard;
                }
            }
        }
    }

    /// Write-crabs to the leaf for `key`. Ancestors that might be touched by
    /// a structural change stay write-latched in `held`; the root latch and
    /// the held set drain whenever the current node is safe for `op`.
    fn find_leaf_write<'a>(
        &'a self,
        root_pid: PageId,
        key: &[u8],
        op: Operation,
        root_latch: &mut RootGuard<'a>,
        held: &mut Vec<WritePageGuard>,
    ) -> Result<WritePageGuard> {
        let mut page = self.bpm.write_page(root_pid)?;
        if Self::is_safe(&BTreeNodeRef::new(page.data()), op) {
            root_latch.take();
        }

        loop {
            let child = {
                let view = BTreeNodeRef::new(page.data());
                if view.is_leaf() {
                    None
                } else {
                    Some(view.internal_lookup(key, &*self.comparator))
                }
            };

            let Some(child_pid) = child else {
                return Ok(page);
            };

            let child_guard = self.bpm.write_page(child_pid)?;
            held.push(page);
            page = child_guard;

            if Self::is_safe(&BTreeNodeRef::new(page.data()), op) {
                root_latch.take();
                // Ancestors drain oldest-first
                held.clear();
            }
        }
    }

    /// A node is safe when the operation cannot propagate a structural
    /// change above it.
    fn is_safe(view: &BTreeNodeRef<'_>, op: Operation) -> bool {
        match op {
            Operation::Insert => view.size() < view.max_size() - 1,
            Operation::Delete => {
                if view.is_root() {
                    // A root that may collapse (leaf emptying, internal
                    // falling to one child) still needs the root latch.
                    if view.is_leaf() {
                        view.size() > 1
                    } else {
                        view.size() > 2
                    }
                } else {
                    view.size() > view.min_size()
                }
            }
        }
    }

    /*
     * Insertion internals
     */

    fn start_new_tree(
        &self,
        key: &[u8],
        rid: RecordId,
        root_latch: &mut RootGuard<'_>,
    ) -> Result<()> {
        let (page_id, mut page) = self.bpm.new_page()?;

        let mut node = BTreeNode::new(page.data_mut());
        node.init_leaf(page_id, None, self.leaf_max_size);
        node.leaf_insert(key, rid, &*self.comparator);

        if let Some(guard) = root_latch.as_mut() {
            **guard = page_id;
        }
        self.update_root_record(page_id)?;
        log::debug!("index {} rooted at {}", self.index_name, page_id);
        Ok(())
    }

    fn split_leaf(
        &self,
        leaf: &mut WritePageGuard,
        root_latch: &mut RootGuard<'_>,
        held: &mut Vec<WritePageGuard>,
    ) -> Result<()> {
        let (new_pid, mut new_leaf) = self.bpm.new_page()?;

        let separator: IndexKey = {
            let (parent, next) = {
                let view = BTreeNodeRef::new(leaf.data());
                (view.parent_page_id(), view.next_page_id())
            };

            let mut new_node = BTreeNode::new(new_leaf.data_mut());
            new_node.init_leaf(new_pid, parent, self.leaf_max_size);

            let mut old_node = BTreeNode::new(leaf.data_mut());
            old_node.leaf_move_half_to(&mut new_node);

            // Splice into the leaf chain
            new_node.set_next_page_id(next);
            old_node.set_next_page_id(Some(new_pid));

            new_node.as_ref().key_at(0)
        };

        self.insert_into_parent(leaf, &separator, &mut new_leaf, root_latch, held)
    }

    /// Hooks `new` (the upper half of a split) into the tree to the right of
    /// `old`, splitting ancestors as needed.
    fn insert_into_parent(
        &self,
        old: &mut WritePageGuard,
        key: &[u8],
        new: &mut WritePageGuard,
        root_latch: &mut RootGuard<'_>,
        held: &mut Vec<WritePageGuard>,
    ) -> Result<()> {
        let old_parent = BTreeNodeRef::new(old.data()).parent_page_id();

        if old_parent.is_none() {
            // The split reached the root: grow the tree by one level
            let (root_pid, mut root_page) = self.bpm.new_page()?;
            {
                let mut root_node = BTreeNode::new(root_page.data_mut());
                root_node.init_internal(root_pid, None, self.internal_max_size);
                root_node.populate_new_root(old.page_id(), key, new.page_id());
            }
            BTreeNode::new(old.data_mut()).set_parent_page_id(Some(root_pid));
            BTreeNode::new(new.data_mut()).set_parent_page_id(Some(root_pid));

            {
                let guard = root_latch
                    .as_mut()
                    .expect("root latch is held across a root split");
                **guard = root_pid;
            }
            self.update_root_record(root_pid)?;
            log::debug!("index {} grew, new root {}", self.index_name, root_pid);

            root_latch.take();
            held.clear();
            return Ok(());
        }

        let mut parent = held
            .pop()
            .expect("parent latch is held while a child splits");

        let parent_full = {
            let mut parent_node = BTreeNode::new(parent.data_mut());
            parent_node.insert_node_after(old.page_id(), key, new.page_id());
            parent_node.as_ref().size() >= parent_node.as_ref().max_size()
        };

        if !parent_full {
            root_latch.take();
            held.clear();
            return Ok(());
        }

        // Split the parent and recurse on the grandparent
        let (new_parent_pid, mut new_parent) = self.bpm.new_page()?;
        let (separator, moved_children) = {
            let grandparent = BTreeNodeRef::new(parent.data()).parent_page_id();

            let mut new_parent_node = BTreeNode::new(new_parent.data_mut());
            new_parent_node.init_internal(new_parent_pid, grandparent, self.internal_max_size);

            let mut parent_node = BTreeNode::new(parent.data_mut());
            let moved = parent_node.internal_move_half_to(&mut new_parent_node);

            (new_parent_node.as_ref().key_at(0), moved)
        };

        // The moved children follow their entries to the new parent. `old`
        // and `new` may be among them and are already write-latched here;
        // everything else is reachable only through the latched parent.
        for child_pid in moved_children {
            if child_pid == old.page_id() {
                BTreeNode::new(old.data_mut()).set_parent_page_id(Some(new_parent_pid));
            } else if child_pid == new.page_id() {
                BTreeNode::new(new.data_mut()).set_parent_page_id(Some(new_parent_pid));
            } else {
                let mut child = self.bpm.write_page(child_pid)?;
                BTreeNode::new(child.data_mut()).set_parent_page_id(Some(new_parent_pid));
            }
        }

        self.insert_into_parent(&mut parent, &separator, &mut new_parent, root_latch, held)
    }

    /*
     * Deletion internals
     */

    /// Moves one entry from the sibling into `node` and fixes the parent's
    /// separator key so subtree bounds stay correct.
    fn redistribute(
        &self,
        node: &mut WritePageGuard,
        sibling: &mut WritePageGuard,
        parent: &mut WritePageGuard,
        index: usize,
    ) -> Result<()> {
        let is_leaf = BTreeNodeRef::new(node.data()).is_leaf();
        let node_pid = node.page_id();

        if index == 0 {
            // Sibling is the successor: take its first entry
            let middle_key = BTreeNodeRef::new(parent.data()).key_at(1);

            let moved_child = {
                let mut sibling_node = BTreeNode::new(sibling.data_mut());
                let mut node_node = BTreeNode::new(node.data_mut());
                if is_leaf {
                    sibling_node.leaf_move_first_to_end_of(&mut node_node);
                    None
                } else {
                    Some(sibling_node.internal_move_first_to_end_of(&middle_key, &mut node_node))
                }
            };

            if let Some(child_pid) = moved_child {
                let mut child = self.bpm.write_page(child_pid)?;
                BTreeNode::new(child.data_mut()).set_parent_page_id(Some(node_pid));
            }

            let new_separator = BTreeNodeRef::new(sibling.data()).key_at(0);
            BTreeNode::new(parent.data_mut()).set_key_at(1, &new_separator);
        } else {
            // Sibling is the predecessor: take its last entry
            let middle_key = BTreeNodeRef::new(parent.data()).key_at(index);

            let moved_child = {
                let mut sibling_node = BTreeNode::new(sibling.data_mut());
                let mut node_node = BTreeNode::new(node.data_mut());
                if is_leaf {
                    sibling_node.leaf_move_last_to_front_of(&mut node_node);
                    None
                } else {
                    Some(sibling_node.internal_move_last_to_front_of(&middle_key, &mut node_node))
                }
            };

            if let Some(child_pid) = moved_child {
                let mut child = self.bpm.write_page(child_pid)?;
                BTreeNode::new(child.data_mut()).set_parent_page_id(Some(node_pid));
            }

            let new_separator = BTreeNodeRef::new(node.data()).key_at(0);
            BTreeNode::new(parent.data_mut()).set_key_at(index, &new_separator);
        }

        Ok(())
    }

    /// Shrinks the tree when deletion has drained the root.
    fn adjust_root(
        &self,
        root: &mut WritePageGuard,
        root_latch: &mut RootGuard<'_>,
        deleted_pages: &mut Vec<PageId>,
    ) -> Result<()> {
        let (is_leaf, size) = {
            let view = BTreeNodeRef::new(root.data());
            (view.is_leaf(), view.size())
        };

        if !is_leaf && size == 1 {
            // Internal root with one remaining child: promote the child
            let child_pid = BTreeNode::new(root.data_mut()).remove_and_return_only_child();

            {
                let guard = root_latch
                    .as_mut()
                    .expect("root latch is held across a root collapse");
                **guard = child_pid;
            }
            self.update_root_record(child_pid)?;

            let mut child = self.bpm.write_page(child_pid)?;
            BTreeNode::new(child.data_mut()).set_parent_page_id(None);

            deleted_pages.push(root.page_id());
            log::debug!("index {} shrank, new root {}", self.index_name, child_pid);
        } else if is_leaf && size == 0 {
            // Last entry gone: the tree is empty again
            {
                let guard = root_latch
                    .as_mut()
                    .expect("root latch is held across a root collapse");
                **guard = INVALID_PAGE_ID;
            }
            self.update_root_record(INVALID_PAGE_ID)?;
            deleted_pages.push(root.page_id());
            log::debug!("index {} is empty", self.index_name);
        }

        root_latch.take();
        Ok(())
    }

    /// Persists the root page id into the header-page directory.
    fn update_root_record(&self, root_pid: PageId) -> Result<()> {
        let mut guard = self.bpm.write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.update_record(&self.index_name, root_pid)
            && !header.insert_record(&self.index_name, root_pid)
        {
            return Err(PetraError::HeaderPageFull);
        }
        Ok(())
    }
}
