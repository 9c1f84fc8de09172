//! Append-only relation writer.

use crate::heap::HeapPage;
use std::path::Path;
use std::sync::Arc;
use larch_buffer::{BufferManager, PageFile};
use larch_common::{PageId, RecordId, Result};

/// Builds a heap relation by appending records through the buffer manager.
///
/// Records land in the current page until it cannot fit the next one, then
/// a fresh page is allocated. No record ever spans pages.
pub struct RelationWriter {
    file: Arc<PageFile>,
    buffer: Arc<BufferManager>,
    current_page: Option<PageId>,
}

impl RelationWriter {
    /// Creates a new relation file at the given path.
    pub fn create(path: impl AsRef<Path>, buffer: &Arc<BufferManager>) -> Result<Self> {
        let file = Arc::new(PageFile::create(path)?);
        Ok(Self {
            file,
            buffer: Arc::clone(buffer),
            current_page: None,
        })
    }

    /// Returns the underlying page file.
    pub fn file(&self) -> &Arc<PageFile> {
        &self.file
    }

    /// Appends a record and returns where it landed.
    pub fn append(&mut self, record: &[u8]) -> Result<RecordId> {
        if let Some(page_no) = self.current_page {
            let guard = self.buffer.read_page(&self.file, page_no)?;
            let fits = HeapPage::new(&**guard.data()).can_fit(record.len());
            if fits {
                let mut data = guard.data_mut();
                let slot_no = HeapPage::new(&mut **data).insert_record(record)?;
                return Ok(RecordId::new(page_no, slot_no));
            }
        }

        // Start a new page; a record too large for an empty page propagates
        // InsufficientSpace.
        let (page_no, guard) = self.buffer.allocate_page(&self.file)?;
        let mut data = guard.data_mut();
        let slot_no = HeapPage::new(&mut **data).insert_record(record)?;
        self.current_page = Some(page_no);
        Ok(RecordId::new(page_no, slot_no))
    }

    /// Flushes the relation to disk and returns the file handle.
    pub fn finish(self) -> Result<Arc<PageFile>> {
        self.buffer.flush_file(&self.file)?;
        Ok(self.file)
    }
}
