//! Synchronous disk manager.
//!
//! The database is a single file of `PAGE_SIZE` blocks; page id `n` lives at
//! byte offset `n * PAGE_SIZE`. The manager also owns page id allocation: a
//! monotonic next-id counter plus a free list of deallocated ids.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use granite_common::constants::PAGE_SIZE;
use granite_common::types::PageId;
use parking_lot::Mutex;
use tracing::debug;

use super::error::{IoError, IoResult};

/// Page-granular disk manager for a single database file.
///
/// All operations are synchronous; the underlying file handle is shared
/// behind a mutex. Reads past the end of the file yield zeroed bytes, so a
/// page that was allocated but never written reads back as all zeroes.
pub struct DiskManager {
    /// The database file, seek-positioned per operation.
    file: Mutex<File>,
    /// The file path.
    path: PathBuf,
    /// Next page id to hand out. Page 0 is reserved for the header page.
    next_page_id: AtomicU64,
    /// Deallocated page ids available for reuse.
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Opens (or creates) the database file at `path`.
    ///
    /// On reopen the next-id counter resumes past the highest page the file
    /// contains, so previously allocated ids are never reissued.
    pub fn open(path: impl AsRef<Path>) -> IoResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| IoError::open(&path, e))?;

        let len = file.metadata().map_err(|e| IoError::open(&path, e))?.len();
        let pages_on_disk = len / PAGE_SIZE as u64;
        let next_page_id = pages_on_disk.max(1);

        debug!(path = %path.display(), next_page_id, "opened database file");

        Ok(Self {
            file: Mutex::new(file),
            path,
            next_page_id: AtomicU64::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the page at `page_id` into `buf`.
    ///
    /// A read past the current end of file fills the remainder of `buf`
    /// with zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id.as_u64() * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < PAGE_SIZE {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        buf[filled..].fill(0);
        Ok(())
    }

    /// Writes `buf` to the page at `page_id`, extending the file as needed.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> IoResult<()> {
        let offset = page_id.as_u64() * PAGE_SIZE as u64;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Allocates a fresh page id.
    ///
    /// Prefers reusing a deallocated id; otherwise advances the monotonic
    /// counter.
    pub fn allocate_page(&self) -> PageId {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return page_id;
        }
        PageId::new(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns `page_id` to the free list for reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        debug_assert!(page_id.is_valid());
        self.free_pages.lock().push(page_id);
    }

    /// Flushes file contents and metadata to stable storage.
    pub fn sync(&self) -> IoResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    /// Returns the number of page ids handed out so far (header page
    /// included). Ids on the free list still count.
    pub fn num_allocated_pages(&self) -> u64 {
        self.next_page_id.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for DiskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskManager")
            .field("path", &self.path)
            .field("next_page_id", &self.num_allocated_pages())
            .finish()
    }
}
