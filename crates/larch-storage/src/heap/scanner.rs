//! Sequential record scanner over a heap relation.

use crate::heap::HeapPage;
use std::path::Path;
use std::sync::Arc;
use larch_buffer::{BufferManager, PageFile, PageGuard};
use larch_common::{LarchError, PageId, RecordId, Result};

/// Streams every record of a relation in page/slot order.
///
/// Holds at most one heap page pinned at a time. End of stream is signaled
/// with [`LarchError::EndOfFile`].
pub struct FileScanner {
    file: Arc<PageFile>,
    buffer: Arc<BufferManager>,
    /// Next page to visit once the current one is exhausted.
    next_page_no: u32,
    /// Next slot in the current page.
    next_slot_no: u16,
    /// Pinned page currently being scanned.
    current: Option<PageGuard>,
}

impl FileScanner {
    /// Opens a scanner over the relation at the given path.
    ///
    /// Fails with [`LarchError::FileNotFound`] if the relation does not
    /// exist.
    pub fn open(path: impl AsRef<Path>, buffer: &Arc<BufferManager>) -> Result<Self> {
        let file = Arc::new(PageFile::open(path)?);
        Ok(Self {
            file,
            buffer: Arc::clone(buffer),
            next_page_no: 1,
            next_slot_no: 0,
            current: None,
        })
    }

    /// Returns the next record and its locator.
    ///
    /// Fails with [`LarchError::EndOfFile`] once the relation is exhausted.
    pub fn scan_next(&mut self) -> Result<(RecordId, Vec<u8>)> {
        loop {
            if self.current.is_none() {
                if self.next_page_no > self.file.num_pages() {
                    return Err(LarchError::EndOfFile);
                }
                let guard = self.buffer.read_page(&self.file, PageId(self.next_page_no))?;
                self.current = Some(guard);
                self.next_slot_no = 0;
            }

            if let Some(guard) = &self.current {
                let data = guard.data();
                let page = HeapPage::new(&**data);
                if self.next_slot_no < page.num_records() {
                    let slot_no = self.next_slot_no;
                    let record = page.record(slot_no)?.to_vec();
                    let rid = RecordId::new(guard.page_no(), slot_no);
                    self.next_slot_no += 1;
                    return Ok((rid, record));
                }
            }

            // Page exhausted: release the pin and move on
            self.current = None;
            self.next_page_no += 1;
        }
    }
}
