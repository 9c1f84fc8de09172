//! Page table mapping resident pages to buffer frames.

use crate::frame::{FrameId, PageTag};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Maps `(file, page)` identities to the frames that hold them.
///
/// Index workloads touch many small files, so the table is a plain hashed
/// map rather than a direct-indexed array over one data file.
pub struct PageTable {
    entries: Mutex<HashMap<PageTag, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up the frame holding a page, if resident.
    pub fn get(&self, tag: PageTag) -> Option<FrameId> {
        self.entries.lock().get(&tag).copied()
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, tag: PageTag) -> bool {
        self.entries.lock().contains_key(&tag)
    }

    /// Inserts or replaces a mapping.
    pub fn insert(&self, tag: PageTag, frame_id: FrameId) {
        self.entries.lock().insert(tag, frame_id);
    }

    /// Removes a mapping, returning the frame it pointed at.
    pub fn remove(&self, tag: PageTag) -> Option<FrameId> {
        self.entries.lock().remove(&tag)
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
