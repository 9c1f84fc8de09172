//! Page addressing for LarchDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (8 KB).
pub const PAGE_SIZE: usize = 8 * 1024;

/// Identifier for a page within a file.
///
/// Pages are numbered from 1; page number 0 is reserved as the invalid
/// sentinel. The first page of an index file (page 1) holds the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Reserved sentinel meaning "no page".
    pub const INVALID: PageId = PageId(0);

    /// Returns true if this is a valid page number.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Returns the page number as a u32 for on-disk storage.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}
