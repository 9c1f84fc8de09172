//! Filtered range scans over the index.

use super::index::PrefixIndex;
use super::node::{Internal, Leaf};
use std::sync::Arc;
use larch_buffer::{BufferManager, PageFile, PageGuard};
use larch_common::{Key, LarchError, PageId, RecordId, Result};

/// Scan comparison operators.
///
/// Only `GT`/`GTE` are accepted as the low bound and `LT`/`LTE` as the
/// high bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Less than.
    LT,
    /// Less than or equal to.
    LTE,
    /// Greater than or equal to.
    GTE,
    /// Greater than.
    GT,
}

/// The range predicate of an active scan.
pub(super) struct ScanRange {
    low: Key,
    high: Key,
    low_op: Operator,
    high_op: Operator,
}

impl ScanRange {
    /// True if `key` falls inside the scan range.
    fn matches(&self, key: Key) -> bool {
        let low_ok = match self.low_op {
            Operator::GT => key > self.low,
            _ => key >= self.low,
        };
        let high_ok = match self.high_op {
            Operator::LT => key < self.high,
            _ => key <= self.high,
        };
        low_ok && high_ok
    }

    fn high(&self) -> Key {
        self.high
    }

    fn low(&self) -> Key {
        self.low
    }

    fn low_op(&self) -> Operator {
        self.low_op
    }
}

/// Cursor position of an active scan.
pub(super) enum ScanPos {
    /// Standing on an entry of a pinned leaf.
    Positioned {
        leaf: PageGuard,
        next_entry: usize,
    },
    /// Ran off the right end of the sibling chain.
    Exhausted,
}

/// State of the single active scan.
pub(super) struct ScanState {
    pub(super) range: ScanRange,
    pub(super) pos: ScanPos,
}

impl PrefixIndex {
    /// Begins a filtered scan of the index.
    ///
    /// An already-active scan is ended first. Validates the range and the
    /// operator pair, then descends to the first leaf that could hold a
    /// match and positions the cursor on the first matching entry.
    ///
    /// Fails with `BadScanrange` if `low > high`, `BadOpcodes` for an
    /// illegal operator pair, and `NoSuchKeyFound` if no entry in the
    /// index matches the range.
    pub fn start_scan(
        &mut self,
        low: Key,
        low_op: Operator,
        high: Key,
        high_op: Operator,
    ) -> Result<()> {
        if self.scan.is_some() {
            self.end_scan()?;
        }

        if low > high {
            return Err(LarchError::BadScanrange);
        }
        if !matches!(low_op, Operator::GT | Operator::GTE) {
            return Err(LarchError::BadOpcodes);
        }
        if !matches!(high_op, Operator::LT | Operator::LTE) {
            return Err(LarchError::BadOpcodes);
        }

        let range = ScanRange {
            low,
            high,
            low_op,
            high_op,
        };

        if !self.root_page_no.is_valid() {
            // Empty tree: nothing can match.
            return Err(LarchError::NoSuchKeyFound);
        }

        let leaf_no = Self::find_start_leaf(&self.buffer, &self.file, self.root_page_no, &range)?;
        match Self::find_first_match(&self.buffer, &self.file, leaf_no, &range)? {
            Some(pos) => {
                self.scan = Some(ScanState { range, pos });
                Ok(())
            }
            None => Err(LarchError::NoSuchKeyFound),
        }
    }

    /// Descends from the root to the leaf where the scan begins.
    ///
    /// This is a lower-bound search on the low key, not the insert
    /// descent. For `GTE`, a router key equal to the low value at any
    /// position but the last sends the search one child further right,
    /// because equal keys live in the right subtree; at the last position
    /// the plain greater-than rule applies.
    fn find_start_leaf(
        buffer: &Arc<BufferManager>,
        file: &Arc<PageFile>,
        root: PageId,
        range: &ScanRange,
    ) -> Result<PageId> {
        let mut current = root;
        loop {
            let guard = buffer.read_page(file, current)?;
            let data = guard.data();
            let node = Internal::new(&**data);
            let n = node.len();
            let low = range.low();

            let mut i = 0;
            while i < n {
                let k = node.key(i);
                match range.low_op() {
                    Operator::GT => {
                        if k > low {
                            break;
                        }
                    }
                    _ => {
                        if i == n - 1 {
                            if k > low {
                                break;
                            }
                        } else if k == low {
                            i += 1;
                            break;
                        } else if k > low {
                            break;
                        }
                    }
                }
                i += 1;
            }

            let level = node.level();
            let child = node.child(i);
            drop(data);
            drop(guard);

            if level == 1 {
                return Ok(child);
            }
            current = child;
        }
    }

    /// Walks the sibling chain from `leaf_no` to the first matching entry.
    ///
    /// Returns the positioned cursor, or None if a key past the high bound
    /// (or the end of the chain) is reached first. Holds one leaf pinned
    /// at a time.
    fn find_first_match(
        buffer: &Arc<BufferManager>,
        file: &Arc<PageFile>,
        leaf_no: PageId,
        range: &ScanRange,
    ) -> Result<Option<ScanPos>> {
        let mut guard = buffer.read_page(file, leaf_no)?;
        loop {
            let next = {
                let data = guard.data();
                let leaf = Leaf::new(&**data);
                let n = leaf.len();

                let mut found = None;
                for idx in 0..n {
                    let k = leaf.key(idx);
                    if range.matches(k) {
                        found = Some(idx);
                        break;
                    }
                    if k > range.high() {
                        // Past the high bound with no match: give up.
                        return Ok(None);
                    }
                }

                match found {
                    Some(idx) => {
                        drop(data);
                        return Ok(Some(ScanPos::Positioned {
                            leaf: guard,
                            next_entry: idx,
                        }));
                    }
                    None => leaf.right_sibling(),
                }
            };

            if !next.is_valid() {
                return Ok(None);
            }
            // Release the exhausted leaf before pinning its sibling.
            drop(guard);
            guard = buffer.read_page(file, next)?;
        }
    }

    /// Returns the record id of the next entry matching the scan.
    ///
    /// Fails with `ScanNotInitialized` if no scan is active, and with
    /// `IndexScanCompleted` (ending the scan) once the range is exhausted.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let emitted = match self.scan.as_mut() {
            None => return Err(LarchError::ScanNotInitialized),
            Some(state) => Self::emit_and_advance(&self.buffer, &self.file, state)?,
        };
        match emitted {
            Some(rid) => Ok(rid),
            None => {
                self.end_scan()?;
                Err(LarchError::IndexScanCompleted)
            }
        }
    }

    /// Emits the entry under the cursor if it matches, then advances.
    ///
    /// Returns None when the cursor is exhausted or the current entry
    /// falls outside the range.
    fn emit_and_advance(
        buffer: &Arc<BufferManager>,
        file: &Arc<PageFile>,
        state: &mut ScanState,
    ) -> Result<Option<RecordId>> {
        let (key, rid, len, sibling) = match &state.pos {
            ScanPos::Exhausted => return Ok(None),
            ScanPos::Positioned { leaf, next_entry } => {
                let data = leaf.data();
                let lf = Leaf::new(&**data);
                (
                    lf.key(*next_entry),
                    lf.rid(*next_entry),
                    lf.len(),
                    lf.right_sibling(),
                )
            }
        };

        if !state.range.matches(key) {
            return Ok(None);
        }

        let at_leaf_end = match &state.pos {
            ScanPos::Positioned { next_entry, .. } => *next_entry + 1 >= len,
            ScanPos::Exhausted => true,
        };

        if at_leaf_end {
            // Unpin the current leaf, then pin the sibling (if any).
            state.pos = ScanPos::Exhausted;
            if sibling.is_valid() {
                let guard = buffer.read_page(file, sibling)?;
                state.pos = ScanPos::Positioned {
                    leaf: guard,
                    next_entry: 0,
                };
            }
        } else if let ScanPos::Positioned { next_entry, .. } = &mut state.pos {
            *next_entry += 1;
        }

        Ok(Some(rid))
    }

    /// Terminates the current scan, releasing its leaf pin.
    ///
    /// Fails with `ScanNotInitialized` if no scan is active.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan.take() {
            Some(_state) => Ok(()), // dropping the state unpins the leaf
            None => Err(LarchError::ScanNotInitialized),
        }
    }
}
