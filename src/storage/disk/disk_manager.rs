use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::common::{PageId, Result, PAGE_SIZE};

/// DiskManager is responsible for reading and writing pages to/from disk.
/// The database is a single flat file addressed in PAGE_SIZE units; page 0
/// is reserved for the header page and is created together with the file.
pub struct DiskManager {
    /// Database file handle. The mutex ensures exclusive access to the cursor.
    db_file: Mutex<File>,
    /// Path of the database file
    db_path: PathBuf,
    /// Number of pages allocated so far
    num_pages: AtomicU32,
    /// Number of disk reads performed
    num_reads: AtomicU32,
    /// Number of disk writes performed
    num_writes: AtomicU32,
}

impl DiskManager {
    /// Opens (or creates) the database file at the given path.
    /// A fresh file is initialized with a zeroed header page at page 0.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&db_path)?;

        let file_size = file.metadata()?.len();
        let pages_in_file = (file_size / PAGE_SIZE as u64) as u32;

        let dm = Self {
            db_file: Mutex::new(file),
            db_path,
            num_pages: AtomicU32::new(pages_in_file),
            num_reads: AtomicU32::new(0),
            num_writes: AtomicU32::new(0),
        };

        if pages_in_file == 0 {
            dm.init_header_page()?;
        }

        Ok(dm)
    }

    fn init_header_page(&self) -> Result<()> {
        let zeros = [0u8; PAGE_SIZE];
        self.num_pages.store(1, Ordering::SeqCst);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&zeros)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads a page from disk into the provided buffer.
    /// Reads past the current end of file are zero-filled.
    pub fn read_page(&self, page_id: PageId, data: &mut [u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let byte_offset = (page_id.as_u32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;

        let bytes_read = file.read(data)?;
        if bytes_read < PAGE_SIZE {
            data[bytes_read..].fill(0);
        }

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes a page to disk from the provided buffer.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), PAGE_SIZE, "Buffer must be PAGE_SIZE bytes");

        let byte_offset = (page_id.as_u32() as u64) * (PAGE_SIZE as u64);

        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(byte_offset))?;
        file.write_all(data)?;
        file.flush()?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a new page on disk and returns its page ID.
    /// Allocation is dense: pages are numbered 1, 2, 3, ... after the header.
    pub fn allocate_page(&self) -> Result<PageId> {
        let page_id = PageId::new(self.num_pages.fetch_add(1, Ordering::SeqCst));

        let zeros = [0u8; PAGE_SIZE];
        self.write_page(page_id, &zeros)?;

        Ok(page_id)
    }

    /// Deallocates a page. The flat file keeps its slot; reclamation is the
    /// job of an allocator layer outside this crate.
    pub fn deallocate_page(&self, _page_id: PageId) -> Result<()> {
        Ok(())
    }

    pub fn get_num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Relaxed)
    }

    pub fn get_num_reads(&self) -> u32 {
        self.num_reads.load(Ordering::Relaxed)
    }

    pub fn get_num_writes(&self) -> u32 {
        self.num_writes.load(Ordering::Relaxed)
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn sync(&self) -> Result<()> {
        let file = self.db_file.lock();
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let file = self.db_file.get_mut();
        let _ = file.sync_all();
    }
}
