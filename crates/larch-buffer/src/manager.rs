//! Buffer manager.

use crate::file::{FileId, PageFile};
use crate::frame::{Frame, FrameId, PageTag};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use larch_common::{LarchError, PageId, Result, PAGE_SIZE};

/// Configuration for the buffer manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

/// Buffer manager.
///
/// Caches fixed-size pages from any number of [`PageFile`]s in a fixed pool
/// of frames, with:
/// - `(file, page)` to frame mapping
/// - Free frame list for new pages
/// - Clock replacement for eviction, writing dirty victims back to their
///   owning file
/// - Pin counting so resident pages in use are never evicted
///
/// Pages are handed out as [`PageGuard`]s; dropping a guard releases the
/// pin and records whether the page was mutated, so pins are balanced on
/// every control path including error propagation.
pub struct BufferManager {
    /// Configuration.
    config: BufferConfig,
    /// Array of buffer frames.
    frames: Vec<Frame>,
    /// `(file, page)` to frame mapping.
    page_table: PageTable,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
    /// Files with pages in the pool, kept for eviction write-back.
    files: Mutex<HashMap<FileId, Arc<PageFile>>>,
}

impl BufferManager {
    /// Creates a new buffer manager.
    pub fn new(config: BufferConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| Frame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, file: &PageFile, page_no: PageId) -> bool {
        self.page_table.contains(PageTag::new(file.file_id(), page_no))
    }

    /// Remembers the file handle so evicted pages can be written back.
    fn register_file(&self, file: &Arc<PageFile>) {
        self.files
            .lock()
            .entry(file.file_id())
            .or_insert_with(|| Arc::clone(file));
    }

    /// Claims a frame for a new resident page.
    ///
    /// Tries the free list first, then evicts an unpinned victim, writing
    /// it back to its owning file if dirty.
    fn allocate_frame(&self) -> Result<FrameId> {
        {
            let mut free_list = self.free_list.lock();
            if let Some(frame_id) = free_list.pop() {
                return Ok(frame_id);
            }
        }

        let victim = self.replacer.evict(&|fid| {
            let frame = &self.frames[fid.0 as usize];
            !frame.is_empty() && frame.pin_count() == 0
        });

        let Some(victim) = victim else {
            return Err(LarchError::BufferPoolFull);
        };

        let frame = &self.frames[victim.0 as usize];
        let tag = frame.tag().ok_or_else(|| {
            LarchError::Internal("evicted frame has no page identity".to_string())
        })?;

        if frame.is_dirty() {
            let file = self.files.lock().get(&tag.file).cloned().ok_or_else(|| {
                LarchError::Internal(format!("no registered file for {}", tag.file))
            })?;
            file.write_page(tag.page_no, &frame.read_data())?;
            frame.set_dirty(false);
            tracing::trace!(
                target: "larch_buffer::evict",
                file = tag.file.0,
                page = tag.page_no.as_u32(),
                "wrote back dirty victim"
            );
        }

        self.page_table.remove(tag);
        frame.set_tag(None);

        Ok(victim)
    }

    /// Allocates a fresh page in the file and pins it.
    pub fn allocate_page(
        self: &Arc<Self>,
        file: &Arc<PageFile>,
    ) -> Result<(PageId, PageGuard)> {
        self.register_file(file);
        let page_no = file.allocate_page()?;

        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        let tag = PageTag::new(file.file_id(), page_no);

        frame.write_data().fill(0);
        frame.set_tag(Some(tag));
        frame.set_dirty(false);
        frame.pin();
        self.page_table.insert(tag, frame_id);
        self.replacer.record_access(frame_id);

        Ok((page_no, PageGuard::new(Arc::clone(self), frame_id, page_no)))
    }

    /// Reads an existing page and pins it.
    pub fn read_page(
        self: &Arc<Self>,
        file: &Arc<PageFile>,
        page_no: PageId,
    ) -> Result<PageGuard> {
        self.register_file(file);
        let tag = PageTag::new(file.file_id(), page_no);

        // Hit: pin the resident frame
        if let Some(frame_id) = self.page_table.get(tag) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok(PageGuard::new(Arc::clone(self), frame_id, page_no));
        }

        // Miss: claim a frame and fill it from disk
        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];

        if let Err(e) = file.read_page(page_no, &mut frame.write_data()) {
            self.free_list.lock().push(frame_id);
            return Err(e);
        }

        frame.set_tag(Some(tag));
        frame.set_dirty(false);
        frame.pin();
        self.page_table.insert(tag, frame_id);
        self.replacer.record_access(frame_id);

        Ok(PageGuard::new(Arc::clone(self), frame_id, page_no))
    }

    /// Releases one pin on a frame, recording dirtiness.
    fn unpin_frame(&self, frame_id: FrameId, dirty: bool) {
        let frame = &self.frames[frame_id.0 as usize];
        if dirty {
            frame.set_dirty(true);
        }
        frame.unpin();
    }

    /// Writes all dirty pages of a file back and syncs it.
    ///
    /// Fails with [`LarchError::PagePinned`] if any page of the file is
    /// still pinned; nothing is written in that case.
    pub fn flush_file(&self, file: &PageFile) -> Result<()> {
        let file_id = file.file_id();

        for frame in &self.frames {
            if let Some(tag) = frame.tag() {
                if tag.file == file_id && frame.is_pinned() {
                    return Err(LarchError::PagePinned {
                        page_no: tag.page_no.as_u32(),
                    });
                }
            }
        }

        for frame in &self.frames {
            if let Some(tag) = frame.tag() {
                if tag.file == file_id && frame.is_dirty() {
                    file.write_page(tag.page_no, &frame.read_data())?;
                    frame.set_dirty(false);
                }
            }
        }

        file.sync()
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> BufferStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;

        for frame in &self.frames {
            if frame.is_empty() {
                continue;
            }
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }

        BufferStats {
            total_frames: self.config.num_frames,
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// RAII pin on a resident page.
///
/// Holds the page in the pool for as long as it lives. `data_mut` marks the
/// guard dirty; dropping releases the pin with the recorded dirtiness.
pub struct PageGuard {
    mgr: Arc<BufferManager>,
    frame_id: FrameId,
    page_no: PageId,
    dirty: Cell<bool>,
}

impl PageGuard {
    fn new(mgr: Arc<BufferManager>, frame_id: FrameId, page_no: PageId) -> Self {
        Self {
            mgr,
            frame_id,
            page_no,
            dirty: Cell::new(false),
        }
    }

    /// Returns the page number this guard pins.
    pub fn page_no(&self) -> PageId {
        self.page_no
    }

    /// Returns read access to the page bytes.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.mgr.frames[self.frame_id.0 as usize].read_data()
    }

    /// Returns write access to the page bytes and marks the guard dirty.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.dirty.set(true);
        self.mgr.frames[self.frame_id.0 as usize].write_data()
    }

    /// Marks the guard dirty without touching the bytes.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        self.mgr.unpin_frame(self.frame_id, self.dirty.get());
    }
}

impl std::fmt::Debug for PageGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_no", &self.page_no)
            .field("frame_id", &self.frame_id)
            .field("dirty", &self.dirty.get())
            .finish()
    }
}
