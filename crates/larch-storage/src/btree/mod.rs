//! Disk-resident B+Tree index over a string-prefix attribute.
//!
//! The index maps a fixed 10-byte key prefix, extracted from records of an
//! external heap relation, to the record's locator. Every node is one
//! page; the tree reaches pages exclusively through the buffer manager,
//! with each pin matched by exactly one release.
//!
//! ```text
//!                    +-------------------+
//!                    | meta (page 1)     |  relation, offset, root
//!                    +-------------------+
//!                             |
//!                    +-------------------+
//!                    | internal, level 2 |  router keys + child pages
//!                    +-------------------+
//!                     /                 \
//!          +-------------------+  +-------------------+
//!          | internal, level 1 |  | internal, level 1 |
//!          +-------------------+  +-------------------+
//!            /        \                    ...
//!     +---------+  +---------+
//!     | leaf    |->| leaf    |-> ...   (key, rid) pairs, threaded
//!     +---------+  +---------+         left-to-right by right sibling
//! ```
//!
//! Leaves hold `(key, rid)` pairs in ascending key order and form a singly
//! linked list for range scans. Internal nodes route: keys in child `i`'s
//! subtree are `< keys[i]` and keys in child `i+1`'s are `>= keys[i]`. A
//! full node splits on insert, promoting a separator to its parent (copied
//! up from leaves, moved up from internals); a root split grows the tree
//! by one level and rewrites the header.

pub mod constants;
mod index;
mod node;
mod print;
mod scan;

pub use constants::{LEAF_NUM_KEYS, NON_LEAF_NUM_KEYS};
pub use index::PrefixIndex;
pub use node::{Internal, Leaf, Meta};
pub use scan::Operator;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::RelationWriter;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use larch_buffer::{BufferConfig, BufferManager};
    use larch_common::{Key, LarchError, PageId, RecordId};

    fn key(i: i32) -> Key {
        Key::from_bytes(format!("{:05} string record", i).as_bytes())
    }

    fn rid(i: u32) -> RecordId {
        RecordId::new(PageId(100 + i), (i % 7) as u16)
    }

    /// Empty relation + fresh index, so tests drive inserts directly.
    fn setup() -> (TempDir, PathBuf, Arc<BufferManager>, PrefixIndex) {
        let dir = tempdir().unwrap();
        let buffer = Arc::new(BufferManager::new(BufferConfig { num_frames: 256 }));
        let rel = dir.path().join("relA");
        RelationWriter::create(&rel, &buffer)
            .unwrap()
            .finish()
            .unwrap();
        let index = PrefixIndex::open(&rel, &buffer, 0).unwrap();
        (dir, rel, buffer, index)
    }

    /// Runs a scan to completion, returning the emitted rids.
    fn collect_scan(
        index: &mut PrefixIndex,
        low: Key,
        low_op: Operator,
        high: Key,
        high_op: Operator,
    ) -> Result<Vec<RecordId>, LarchError> {
        index.start_scan(low, low_op, high, high_op)?;
        let mut out = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => out.push(rid),
                Err(LarchError::IndexScanCompleted) => return Ok(out),
                Err(e) => return Err(e),
            }
        }
    }

    fn full_scan(index: &mut PrefixIndex, upper: i32) -> Vec<RecordId> {
        collect_scan(index, key(0), Operator::GTE, key(upper), Operator::LT).unwrap()
    }

    #[test]
    fn test_index_name_derivation() {
        let (_dir, rel, _buffer, index) = setup();
        assert_eq!(
            index.index_name(),
            format!("{}.0", rel.display())
        );
    }

    #[test]
    fn test_bootstrap_leaves_left_leaf_empty() {
        let (_dir, _rel, _buffer, mut index) = setup();
        index.insert(key(7), rid(7)).unwrap();

        let dump = index.dump().unwrap();
        assert!(dump.contains("***NON-LEAF***"));
        assert!(dump.contains("(empty)"));

        let hits = collect_scan(&mut index, key(7), Operator::GTE, key(7), Operator::LTE).unwrap();
        assert_eq!(hits, vec![rid(7)]);
    }

    #[test]
    fn test_insert_below_first_key_lands_in_left_leaf() {
        let (_dir, _rel, _buffer, mut index) = setup();
        index.insert(key(5), rid(5)).unwrap();
        index.insert(key(3), rid(3)).unwrap();

        assert_eq!(full_scan(&mut index, 100), vec![rid(3), rid(5)]);
    }

    #[test]
    fn test_ascending_inserts() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..60 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let hits = full_scan(&mut index, 60);
        let expected: Vec<_> = (0..60).map(rid).collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_descending_inserts() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in (0..60).rev() {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let hits = full_scan(&mut index, 60);
        let expected: Vec<_> = (0..60).map(rid).collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_random_inserts_deep_tree() {
        let (_dir, _rel, _buffer, mut index) = setup();
        let mut values: Vec<i32> = (0..300).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0xB7EE);
        values.shuffle(&mut rng);

        for &i in &values {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let hits = full_scan(&mut index, 300);
        let expected: Vec<_> = (0..300).map(rid).collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_duplicate_key_prefixes() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..10 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }
        // Three records share the prefix of key 4
        index.insert(key(4), rid(100)).unwrap();
        index.insert(key(4), rid(101)).unwrap();

        let mut hits =
            collect_scan(&mut index, key(4), Operator::GTE, key(4), Operator::LTE).unwrap();
        hits.sort_by_key(|r| r.page_no.as_u32());
        assert_eq!(hits, vec![rid(4), rid(100), rid(101)]);
    }

    #[test]
    fn test_scan_operator_boundaries() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..20 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let gt_lt = collect_scan(&mut index, key(5), Operator::GT, key(15), Operator::LT).unwrap();
        assert_eq!(gt_lt.len(), 9); // 6..=14

        let gte_lt =
            collect_scan(&mut index, key(5), Operator::GTE, key(15), Operator::LT).unwrap();
        assert_eq!(gte_lt.len(), 10); // 5..=14

        let gte_lte =
            collect_scan(&mut index, key(5), Operator::GTE, key(15), Operator::LTE).unwrap();
        assert_eq!(gte_lte.len(), 11); // 5..=15

        let point = collect_scan(&mut index, key(10), Operator::GTE, key(10), Operator::LTE)
            .unwrap();
        assert_eq!(point, vec![rid(10)]);
    }

    #[test]
    fn test_scan_range_below_all_keys() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..10 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        // "-0003..." sorts before "00000..."
        let hits =
            collect_scan(&mut index, key(-3), Operator::GT, key(3), Operator::LT).unwrap();
        assert_eq!(hits, vec![rid(0), rid(1), rid(2)]);
    }

    #[test]
    fn test_bad_scan_range() {
        let (_dir, _rel, _buffer, mut index) = setup();
        index.insert(key(1), rid(1)).unwrap();

        let result = index.start_scan(key(10), Operator::GT, key(5), Operator::LT);
        assert!(matches!(result, Err(LarchError::BadScanrange)));
        // No scan state was left behind
        assert!(matches!(
            index.scan_next(),
            Err(LarchError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_bad_opcodes() {
        let (_dir, _rel, _buffer, mut index) = setup();
        index.insert(key(1), rid(1)).unwrap();

        let result = index.start_scan(key(1), Operator::LT, key(5), Operator::LT);
        assert!(matches!(result, Err(LarchError::BadOpcodes)));

        let result = index.start_scan(key(1), Operator::GT, key(5), Operator::GTE);
        assert!(matches!(result, Err(LarchError::BadOpcodes)));
    }

    #[test]
    fn test_no_such_key_found() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..5 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        // Nothing strictly between two adjacent keys
        let result = index.start_scan(key(0), Operator::GT, key(1), Operator::LT);
        assert!(matches!(result, Err(LarchError::NoSuchKeyFound)));
    }

    #[test]
    fn test_scan_on_empty_index() {
        let (_dir, _rel, _buffer, mut index) = setup();
        let result = index.start_scan(key(0), Operator::GTE, key(10), Operator::LTE);
        assert!(matches!(result, Err(LarchError::NoSuchKeyFound)));
    }

    #[test]
    fn test_scan_lifecycle_errors() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..5 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        assert!(matches!(
            index.scan_next(),
            Err(LarchError::ScanNotInitialized)
        ));
        assert!(matches!(
            index.end_scan(),
            Err(LarchError::ScanNotInitialized)
        ));

        // Completing a scan ends it implicitly
        let hits = collect_scan(&mut index, key(0), Operator::GTE, key(5), Operator::LT).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(matches!(
            index.end_scan(),
            Err(LarchError::ScanNotInitialized)
        ));
    }

    #[test]
    fn test_start_scan_ends_previous_scan() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..10 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        index
            .start_scan(key(0), Operator::GTE, key(10), Operator::LT)
            .unwrap();
        index.scan_next().unwrap();

        // Restarting mid-scan transparently ends the first scan
        index
            .start_scan(key(0), Operator::GTE, key(10), Operator::LT)
            .unwrap();
        let mut count = 0;
        while index.scan_next().is_ok() {
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_pin_balance_after_operations() {
        let (_dir, _rel, buffer, mut index) = setup();
        for i in 0..100 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }
        let _ = full_scan(&mut index, 100);
        let _ = index.dump().unwrap();

        // An interrupted scan holds exactly one leaf pin until ended
        index
            .start_scan(key(0), Operator::GTE, key(100), Operator::LT)
            .unwrap();
        index.scan_next().unwrap();
        assert_eq!(buffer.stats().pinned_frames, 1);
        index.end_scan().unwrap();

        assert_eq!(buffer.stats().pinned_frames, 0);
    }

    /// Descends along child(0) to the leftmost leaf.
    fn leftmost_leaf(index: &PrefixIndex) -> PageId {
        let mut current = index.root_page_no;
        loop {
            let guard = index.buffer.read_page(&index.file, current).unwrap();
            let data = guard.data();
            let node = Internal::new(&**data);
            let level = node.level();
            let child = node.child(0);
            drop(data);
            if level == 1 {
                return child;
            }
            current = child;
        }
    }

    #[test]
    fn test_sibling_chain_is_sorted_and_complete() {
        let (_dir, _rel, _buffer, mut index) = setup();
        let mut values: Vec<i32> = (0..200).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        values.shuffle(&mut rng);
        for &i in &values {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let mut current = leftmost_leaf(&index);
        let mut keys = Vec::new();
        let mut leaves = 0;
        while current.is_valid() {
            leaves += 1;
            assert!(leaves <= 400, "sibling chain does not terminate");
            let guard = index.buffer.read_page(&index.file, current).unwrap();
            let data = guard.data();
            let leaf = Leaf::new(&**data);
            for i in 0..leaf.len() {
                keys.push(leaf.key(i));
            }
            current = leaf.right_sibling();
        }

        assert_eq!(keys.len(), 200);
        assert!(keys.windows(2).all(|w| w[0] <= w[1]), "chain out of order");
    }

    /// Collects the depth of every leaf below `page_no`.
    fn leaf_depths(index: &PrefixIndex, page_no: PageId, depth: u32, out: &mut Vec<u32>) {
        let guard = index.buffer.read_page(&index.file, page_no).unwrap();
        let data = guard.data();
        let node = Internal::new(&**data);
        let n = node.len();
        for i in 0..=n {
            if node.level() == 1 {
                out.push(depth + 1);
            } else {
                leaf_depths(index, node.child(i), depth + 1, out);
            }
        }
    }

    #[test]
    fn test_tree_is_height_balanced() {
        let (_dir, _rel, _buffer, mut index) = setup();
        let mut values: Vec<i32> = (0..250).collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(99);
        values.shuffle(&mut rng);
        for &i in &values {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let mut depths = Vec::new();
        leaf_depths(&index, index.root_page_no, 0, &mut depths);
        assert!(depths.len() > 10, "expected a multi-leaf tree");
        assert!(
            depths.windows(2).all(|w| w[0] == w[1]),
            "leaves at unequal depths: {:?}",
            depths
        );
        // Capacity-4 nodes force a tree of at least three levels here
        assert!(depths[0] >= 3);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let (_dir, rel, buffer, mut index) = setup();
        for i in 0..80 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }
        let before = full_scan(&mut index, 80);
        drop(index); // flushes

        let mut reopened = PrefixIndex::open(&rel, &buffer, 0).unwrap();
        let after = full_scan(&mut reopened, 80);
        assert_eq!(before, after);
    }

    #[test]
    fn test_reopen_rejects_tampered_version() {
        let (_dir, rel, buffer, mut index) = setup();
        index.insert(key(1), rid(1)).unwrap();
        let index_name = index.index_name().to_string();
        drop(index);

        // Corrupt the version field in the header (bytes 28..32 of page 1)
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .open(&index_name)
                .unwrap();
            f.seek(SeekFrom::Start(28)).unwrap();
            f.write_all(&99u32.to_le_bytes()).unwrap();
        }

        // A fresh buffer manager so the tampered page is read from disk
        let buffer2 = Arc::new(BufferManager::new(BufferConfig { num_frames: 64 }));
        let result = PrefixIndex::open(&rel, &buffer2, 0);
        assert!(matches!(result, Err(LarchError::BadIndexInfo(_))));
        drop(buffer);
    }

    #[test]
    fn test_dump_renders_every_level() {
        let (_dir, _rel, _buffer, mut index) = setup();
        for i in 0..30 {
            index.insert(key(i), rid(i as u32)).unwrap();
        }

        let dump = index.dump().unwrap();
        assert!(dump.starts_with("====BEGIN TREE DUMP===="));
        assert!(dump.trim_end().ends_with("====END TREE DUMP===="));
        assert!(dump.contains("***NON-LEAF***"));
        assert!(dump.contains("***LEAF***"));
        assert!(dump.contains("00015 stri"));
    }

    #[test]
    fn test_empty_tree_dump() {
        let (_dir, _rel, _buffer, index) = setup();
        let dump = index.dump().unwrap();
        assert!(dump.contains("(empty tree)"));
    }
}
