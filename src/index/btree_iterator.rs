use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result};

use super::btree_page::{BTreeNodeRef, IndexKey};

/// Ordered iterator over the leaf chain of a B+tree.
///
/// The iterator owns exactly one pinned, read-latched leaf at a time. When a
/// leaf is exhausted it latches the next leaf in the chain before releasing
/// the current one, then continues from slot 0. An empty tree yields an
/// iterator that is immediately exhausted.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl TreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: Option<ReadPageGuard>, index: usize) -> Self {
        Self { bpm, leaf, index }
    }
}

impl Iterator for TreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (item, next_page_id) = {
                let guard = self.leaf.as_ref()?;
                let view = BTreeNodeRef::new(guard.data());

                if self.index < view.size() as usize {
                    (
                        Some((view.key_at(self.index), view.rid_at(self.index))),
                        None,
                    )
                } else {
                    (None, view.next_page_id())
                }
            };

            if let Some(item) = item {
                self.index += 1;
                return Some(Ok(item));
            }

            match next_page_id {
                None => {
                    self.leaf = None;
                    return None;
                }
                Some(page_id) => {
                    // Latch the next leaf before the current one is released
                    match self.bpm.read_page(page_id) {
                        Ok(next_guard) => {
                            self.leaf = Some(next_guard);
                            self.index = 0;
                        }
                        Err(e) => {
                            self.leaf = None;
                            return Some(Err(e));
                        }
                    }
                }
            }
        }
    }
}
