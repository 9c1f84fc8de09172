//! Node capacity constants.

use larch_common::{RecordId, KEY_SIZE, PAGE_SIZE};

/// On-disk size of a child page pointer.
pub(crate) const CHILD_SIZE: usize = 4;

/// On-disk size of the internal node's level field.
pub(crate) const LEVEL_SIZE: usize = 4;

/// Header format version written to the meta page.
pub const META_FORMAT_VERSION: u32 = 1;

/// Number of `(key, rid)` pairs a leaf holds.
///
/// Derived from the page size: the page carries the key array, the parallel
/// rid array, and the right-sibling pointer. Unit tests and the
/// `small-nodes` feature shrink this to 4 so splits happen constantly.
#[cfg(not(any(test, feature = "small-nodes")))]
pub const LEAF_NUM_KEYS: usize = (PAGE_SIZE - CHILD_SIZE) / (KEY_SIZE + RecordId::SIZE);

#[cfg(any(test, feature = "small-nodes"))]
pub const LEAF_NUM_KEYS: usize = 4;

/// Number of router keys an internal node holds (plus one extra child).
#[cfg(not(any(test, feature = "small-nodes")))]
pub const NON_LEAF_NUM_KEYS: usize =
    (PAGE_SIZE - LEVEL_SIZE - CHILD_SIZE) / (KEY_SIZE + CHILD_SIZE);

#[cfg(any(test, feature = "small-nodes"))]
pub const NON_LEAF_NUM_KEYS: usize = 4;

// Layouts must fit in a page.
const _: () = assert!(LEAF_NUM_KEYS * (KEY_SIZE + RecordId::SIZE) + CHILD_SIZE <= PAGE_SIZE);
const _: () = assert!(
    LEVEL_SIZE + NON_LEAF_NUM_KEYS * KEY_SIZE + (NON_LEAF_NUM_KEYS + 1) * CHILD_SIZE <= PAGE_SIZE
);
// The internal-split promotion shifts one slot past the node's midpoint.
const _: () = assert!(LEAF_NUM_KEYS >= 2 && NON_LEAF_NUM_KEYS >= 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_capacities() {
        // cfg(test) builds run with tiny nodes for split coverage
        assert_eq!(LEAF_NUM_KEYS, 4);
        assert_eq!(NON_LEAF_NUM_KEYS, 4);
    }
}
