//! Buffer frame management.

use crate::file::FileId;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use larch_common::{PageId, PAGE_SIZE};

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Identity of the page held in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTag {
    /// Owning file handle.
    pub file: FileId,
    /// Page number within that file.
    pub page_no: PageId,
}

impl PageTag {
    /// Creates a new page tag.
    pub fn new(file: FileId, page_no: PageId) -> Self {
        Self { file, page_no }
    }
}

/// A frame in the buffer pool holding a single page.
///
/// Each frame contains the page bytes plus the metadata the buffer manager
/// needs: which page is loaded, how many users hold a pin, and whether the
/// copy in memory is newer than the copy on disk.
pub struct Frame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame, if any.
    tag: Mutex<Option<PageTag>>,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of users currently accessing this page.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was loaded.
    is_dirty: AtomicBool,
}

impl Frame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            tag: Mutex::new(None),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the identity of the page held in this frame.
    #[inline]
    pub fn tag(&self) -> Option<PageTag> {
        *self.tag.lock()
    }

    /// Sets the identity of the page held in this frame.
    #[inline]
    pub fn set_tag(&self, tag: Option<PageTag>) {
        *self.tag.lock() = tag;
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Increments the pin count.
    #[inline]
    pub fn pin(&self) {
        self.pin_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the pin count, saturating at zero.
    #[inline]
    pub fn unpin(&self) -> u32 {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            // Underflow protection: restore to 0
            self.pin_count.store(0, Ordering::Release);
            return 0;
        }
        prev - 1
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count.load(Ordering::Acquire) > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Marks this frame dirty or clean.
    #[inline]
    pub fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns true if no page is loaded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tag.lock().is_none()
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Resets the frame to its empty state.
    pub fn reset(&self) {
        *self.tag.lock() = None;
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("frame_id", &self.frame_id)
            .field("tag", &self.tag())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .finish()
    }
}
