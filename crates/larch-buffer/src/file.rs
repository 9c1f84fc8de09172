//! Page-granular file I/O.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use larch_common::{LarchError, PageId, Result, PAGE_SIZE};

/// Process-unique identifier for an open file handle.
///
/// The buffer manager keys frames by `(FileId, PageId)`, so two handles to
/// the same path never alias each other's cached pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u64);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Next FileId to hand out.
static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(1);

/// A file addressed as a sequence of fixed-size pages.
///
/// Pages are numbered from 1; page `n` lives at byte offset
/// `(n - 1) * PAGE_SIZE`. Page number 0 is the invalid sentinel and is
/// never stored.
pub struct PageFile {
    file_id: FileId,
    path: PathBuf,
    inner: Mutex<FileInner>,
}

struct FileInner {
    file: File,
    num_pages: u32,
}

impl PageFile {
    /// Creates a new, empty page file.
    ///
    /// Fails with [`LarchError::FileExists`] if the path already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => LarchError::FileExists {
                    path: path.display().to_string(),
                },
                _ => LarchError::Io(e),
            })?;

        Ok(Self {
            file_id: FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)),
            path,
            inner: Mutex::new(FileInner { file, num_pages: 0 }),
        })
    }

    /// Opens an existing page file.
    ///
    /// Fails with [`LarchError::FileNotFound`] if the path does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => LarchError::FileNotFound {
                    path: path.display().to_string(),
                },
                _ => LarchError::Io(e),
            })?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self {
            file_id: FileId(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed)),
            path,
            inner: Mutex::new(FileInner { file, num_pages }),
        })
    }

    /// Removes a page file from disk.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::remove_file(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => LarchError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => LarchError::Io(e),
        })
    }

    /// Returns this handle's unique identifier.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Returns the path this file was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of pages in the file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Appends a zeroed page to the file and returns its page number.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let page_no = PageId(inner.num_pages + 1);

        let offset = (page_no.as_u32() as u64 - 1) * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        inner.num_pages += 1;

        Ok(page_no)
    }

    /// Reads a page into the provided buffer.
    pub fn read_page(&self, page_no: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_bounds(&inner, page_no)?;

        let offset = (page_no.as_u32() as u64 - 1) * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes a page back to the file.
    pub fn write_page(&self, page_no: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        self.check_bounds(&inner, page_no)?;

        let offset = (page_no.as_u32() as u64 - 1) * PAGE_SIZE as u64;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(buf)?;
        Ok(())
    }

    /// Forces all written data to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    fn check_bounds(&self, inner: &FileInner, page_no: PageId) -> Result<()> {
        if !page_no.is_valid() || page_no.as_u32() > inner.num_pages {
            return Err(LarchError::PageNotFound {
                path: self.path.display().to_string(),
                page_no: page_no.as_u32(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("file_id", &self.file_id)
            .field("path", &self.path)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
