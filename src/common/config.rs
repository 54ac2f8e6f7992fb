use std::time::Duration;

use super::types::{FrameId, PageId};

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Width of a B+tree index key in bytes
pub const KEY_LEN: usize = 8;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// Invalid frame ID constant
pub const INVALID_FRAME_ID: FrameId = FrameId(u32::MAX);

/// Page 0 is reserved for the index-name -> root-page-id directory
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// How often the deadlock detector rebuilds the wait-for graph
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);
