//! String-prefix B+Tree index over a heap relation.

use super::constants::{LEAF_NUM_KEYS, META_FORMAT_VERSION, NON_LEAF_NUM_KEYS};
use super::node::{Internal, Leaf, Meta};
use super::scan::ScanState;
use crate::heap::FileScanner;
use std::path::Path;
use std::sync::Arc;
use larch_buffer::{BufferManager, PageFile};
use larch_common::{Key, LarchError, PageId, RecordId, Result};

/// A key/child pair bubbled up from a split.
pub(super) struct SplitEntry {
    pub key: Key,
    pub page_no: PageId,
}

/// Disk-resident B+Tree index on a single string-prefix attribute.
///
/// The index file is derived from the relation path and the attribute
/// offset; page 1 is the header, the rest are tree nodes. Opening an
/// existing file verifies the header against the caller's parameters;
/// opening a missing one builds the tree by streaming every record of the
/// relation. At most one scan is active at a time.
pub struct PrefixIndex {
    pub(super) file: Arc<PageFile>,
    pub(super) buffer: Arc<BufferManager>,
    index_name: String,
    header_page_no: PageId,
    pub(super) root_page_no: PageId,
    attr_byte_offset: usize,
    pub(super) scan: Option<ScanState>,
}

impl PrefixIndex {
    /// Opens the index for `(relation, attr_byte_offset)`, creating and
    /// bulk-building it if the index file does not exist yet.
    ///
    /// The index file name is derived as `"{relation}.{attr_byte_offset}"`.
    pub fn open(
        relation_path: impl AsRef<Path>,
        buffer: &Arc<BufferManager>,
        attr_byte_offset: usize,
    ) -> Result<Self> {
        let relation_path = relation_path.as_ref();
        let relation_name = relation_path.display().to_string();
        let index_name = format!("{}.{}", relation_name, attr_byte_offset);

        match PageFile::open(&index_name) {
            Ok(file) => Self::load(
                Arc::new(file),
                buffer,
                index_name,
                &relation_name,
                attr_byte_offset,
            ),
            Err(LarchError::FileNotFound { .. }) => Self::build(
                buffer,
                index_name,
                relation_path,
                &relation_name,
                attr_byte_offset,
            ),
            Err(e) => Err(e),
        }
    }

    /// Returns the derived index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Adopts an existing index file after verifying its header.
    fn load(
        file: Arc<PageFile>,
        buffer: &Arc<BufferManager>,
        index_name: String,
        relation_name: &str,
        attr_byte_offset: usize,
    ) -> Result<Self> {
        let header_page_no = PageId(1);
        let guard = buffer.read_page(&file, header_page_no)?;
        let data = guard.data();
        let meta = Meta::new(&**data);

        let mut expected_name = relation_name.as_bytes().to_vec();
        expected_name.truncate(super::node::RELATION_NAME_LEN);
        if meta.relation_name().as_bytes() != expected_name {
            return Err(LarchError::BadIndexInfo(
                "relation name of existing index file does not match".to_string(),
            ));
        }
        if meta.attr_byte_offset() as usize != attr_byte_offset {
            return Err(LarchError::BadIndexInfo(
                "attribute byte offset of existing index file does not match".to_string(),
            ));
        }
        if meta.version() != META_FORMAT_VERSION {
            return Err(LarchError::BadIndexInfo(format!(
                "index file format version {} is not supported",
                meta.version()
            )));
        }
        if meta.leaf_capacity() as usize != LEAF_NUM_KEYS
            || meta.internal_capacity() as usize != NON_LEAF_NUM_KEYS
        {
            return Err(LarchError::BadIndexInfo(format!(
                "index file was written with node capacities {}/{}",
                meta.leaf_capacity(),
                meta.internal_capacity()
            )));
        }

        let root_page_no = meta.root_page_no();
        tracing::debug!(
            target: "larch_storage::btree",
            index = %index_name,
            root = root_page_no.as_u32(),
            "opened existing index"
        );

        Ok(Self {
            file: Arc::clone(&file),
            buffer: Arc::clone(buffer),
            index_name,
            header_page_no,
            root_page_no,
            attr_byte_offset,
            scan: None,
        })
    }

    /// Creates the index file and inserts an entry for every record of the
    /// relation.
    fn build(
        buffer: &Arc<BufferManager>,
        index_name: String,
        relation_path: &Path,
        relation_name: &str,
        attr_byte_offset: usize,
    ) -> Result<Self> {
        let file = Arc::new(PageFile::create(&index_name)?);

        // A missing relation fails before any header page is written.
        let mut scanner = FileScanner::open(relation_path, buffer)?;

        let (header_page_no, header_guard) = buffer.allocate_page(&file)?;
        {
            let mut data = header_guard.data_mut();
            let mut meta = Meta::new(&mut **data);
            meta.set_relation_name(relation_name);
            meta.set_attr_byte_offset(attr_byte_offset as u32);
            meta.set_root_page_no(PageId::INVALID);
            meta.set_format(
                META_FORMAT_VERSION,
                LEAF_NUM_KEYS as u32,
                NON_LEAF_NUM_KEYS as u32,
            );
        }

        let mut index = Self {
            file,
            buffer: Arc::clone(buffer),
            index_name,
            header_page_no,
            root_page_no: PageId::INVALID,
            attr_byte_offset,
            scan: None,
        };

        // The header stays pinned for the duration of the build, exactly
        // one unpin (dirty) when the guard drops below.
        let mut records = 0u64;
        loop {
            match scanner.scan_next() {
                Ok((rid, record)) => {
                    let key_bytes = record.get(index.attr_byte_offset..).ok_or_else(|| {
                        LarchError::Internal(format!(
                            "attribute offset {} past record end ({} bytes)",
                            index.attr_byte_offset,
                            record.len()
                        ))
                    })?;
                    index.insert(Key::from_bytes(key_bytes), rid)?;
                    records += 1;
                }
                Err(LarchError::EndOfFile) => break,
                Err(e) => return Err(e),
            }
        }
        drop(header_guard);

        tracing::debug!(
            target: "larch_storage::btree",
            index = %index.index_name,
            records,
            "bulk build complete"
        );

        Ok(index)
    }

    /// Rewrites the header's root pointer; called whenever the root moves.
    fn write_root_to_meta(&self, root_page_no: PageId) -> Result<()> {
        let guard = self.buffer.read_page(&self.file, self.header_page_no)?;
        let mut data = guard.data_mut();
        Meta::new(&mut **data).set_root_page_no(root_page_no);
        Ok(())
    }

    /// Inserts a `(key, rid)` entry.
    ///
    /// Descends from the root to the target leaf; a full leaf splits,
    /// which may cascade splits all the way up and grow a new root.
    pub fn insert(&mut self, key: Key, rid: RecordId) -> Result<()> {
        if !self.root_page_no.is_valid() {
            return self.bootstrap(key, rid);
        }
        let split = self.insert_subtree(key, rid, self.root_page_no)?;
        debug_assert!(split.is_none(), "root split is resolved internally");
        Ok(())
    }

    /// First insert: builds a level-1 root over two leaves.
    ///
    /// The first key lands only in the right leaf; the left leaf stays
    /// empty until a smaller key arrives. This is the shape the descent
    /// rule expects.
    fn bootstrap(&mut self, key: Key, rid: RecordId) -> Result<()> {
        let (root_no, root_guard) = self.buffer.allocate_page(&self.file)?;
        let (left_no, left_guard) = self.buffer.allocate_page(&self.file)?;
        let (right_no, right_guard) = self.buffer.allocate_page(&self.file)?;

        {
            let mut data = root_guard.data_mut();
            let mut root = Internal::new(&mut **data);
            root.set_level(1);
            root.set_key(0, key);
            root.set_child(0, left_no);
            root.set_child(1, right_no);
        }
        {
            let mut data = left_guard.data_mut();
            Leaf::new(&mut **data).set_right_sibling(right_no);
        }
        {
            let mut data = right_guard.data_mut();
            let mut right = Leaf::new(&mut **data);
            right.set_key(0, key);
            right.set_rid(0, rid);
        }

        self.root_page_no = root_no;
        self.write_root_to_meta(root_no)?;

        tracing::trace!(
            target: "larch_storage::btree",
            root = root_no.as_u32(),
            left = left_no.as_u32(),
            right = right_no.as_u32(),
            "bootstrapped tree"
        );
        Ok(())
    }

    /// Recursive insert through an internal node.
    ///
    /// Returns the entry to add to the parent if this node split.
    fn insert_subtree(
        &mut self,
        key: Key,
        rid: RecordId,
        page_no: PageId,
    ) -> Result<Option<SplitEntry>> {
        let guard = self.buffer.read_page(&self.file, page_no)?;

        let (level, child_no) = {
            let data = guard.data();
            let node = Internal::new(&**data);
            let n = node.len();
            let child_idx = if key < node.key(0) {
                0
            } else if key >= node.key(n - 1) {
                n
            } else {
                (0..n - 1)
                    .find(|&i| node.key(i) <= key && key < node.key(i + 1))
                    .map_or(n, |i| i + 1)
            };
            (node.level(), node.child(child_idx))
        };

        // The current node stays pinned while the child is processed.
        let split = if level == 1 {
            self.insert_leaf(key, rid, child_no)?
        } else {
            self.insert_subtree(key, rid, child_no)?
        };

        let Some(entry) = split else {
            return Ok(None);
        };

        {
            let mut data = guard.data_mut();
            let mut node = Internal::new(&mut **data);
            if !node.is_full() {
                node.insert(entry.key, entry.page_no);
                return Ok(None);
            }
        }

        self.split_internal(page_no, &guard, entry)
    }

    /// Splits the full internal node held by `guard` to absorb `entry`.
    ///
    /// The upper half moves to a new right sibling, then the promoted
    /// middle key is chosen by one of two asymmetric branches depending on
    /// which side receives the entry.
    fn split_internal(
        &mut self,
        page_no: PageId,
        guard: &larch_buffer::PageGuard,
        entry: SplitEntry,
    ) -> Result<Option<SplitEntry>> {
        let (new_no, new_guard) = self.buffer.allocate_page(&self.file)?;

        let mid_key: Key;
        let level;
        {
            let mut cur_data = guard.data_mut();
            let mut new_data = new_guard.data_mut();
            let mut cur = Internal::new(&mut **cur_data);
            let mut new = Internal::new(&mut **new_data);

            level = cur.level();
            new.set_level(level);

            // Move keys[half..] and their right-hand children to the new
            // node. cur's child at `half` is copied into new.child(0) but
            // stays in place as cur's trailing child; whichever branch
            // below runs must resolve that duplication.
            let half = NON_LEAF_NUM_KEYS / 2;
            let mut carry = cur.child(half);
            for i in half..NON_LEAF_NUM_KEYS {
                new.set_key(i - half, cur.key(i));
                new.set_child(i - half, carry);
                cur.set_key(i, Key::ZERO);
                carry = cur.child(i + 1);
                cur.set_child(i + 1, PageId::INVALID);
            }
            new.set_child(NON_LEAF_NUM_KEYS - half, carry);

            mid_key = if entry.key < new.key(0) {
                promote_from_left(&mut cur, &mut new, &entry)
            } else {
                promote_from_right(&mut new, &entry)
            };
        }

        tracing::trace!(
            target: "larch_storage::btree",
            page = page_no.as_u32(),
            new_page = new_no.as_u32(),
            level,
            "split internal node"
        );

        if page_no == self.root_page_no {
            // The root itself split: grow the tree by one level.
            let (new_root_no, root_guard) = self.buffer.allocate_page(&self.file)?;
            {
                let mut data = root_guard.data_mut();
                let mut root = Internal::new(&mut **data);
                root.set_level(level + 1);
                root.set_key(0, mid_key);
                root.set_child(0, page_no);
                root.set_child(1, new_no);
            }
            self.root_page_no = new_root_no;
            self.write_root_to_meta(new_root_no)?;
            tracing::trace!(
                target: "larch_storage::btree",
                root = new_root_no.as_u32(),
                level = level + 1,
                "grew new root"
            );
            Ok(None)
        } else {
            Ok(Some(SplitEntry {
                key: mid_key,
                page_no: new_no,
            }))
        }
    }

    /// Insert at the leaf level, splitting if the leaf is full.
    fn insert_leaf(
        &mut self,
        key: Key,
        rid: RecordId,
        page_no: PageId,
    ) -> Result<Option<SplitEntry>> {
        let guard = self.buffer.read_page(&self.file, page_no)?;

        {
            let mut data = guard.data_mut();
            let mut leaf = Leaf::new(&mut **data);
            if !leaf.is_full() {
                leaf.insert(key, rid);
                return Ok(None);
            }
        }

        // Full: move the upper half into a new right sibling, route the
        // incoming entry by the new leaf's first key, and thread the
        // sibling chain.
        let (new_no, new_guard) = self.buffer.allocate_page(&self.file)?;
        let split_key;
        {
            let mut cur_data = guard.data_mut();
            let mut new_data = new_guard.data_mut();
            let mut cur = Leaf::new(&mut **cur_data);
            let mut new = Leaf::new(&mut **new_data);

            let half = LEAF_NUM_KEYS / 2;
            for i in half..LEAF_NUM_KEYS {
                new.set_key(i - half, cur.key(i));
                new.set_rid(i - half, cur.rid(i));
                cur.clear_slot(i);
            }

            if key < new.key(0) {
                cur.insert(key, rid);
            } else {
                new.insert(key, rid);
            }

            new.set_right_sibling(cur.right_sibling());
            cur.set_right_sibling(new_no);

            // Copy-up: the parent routes on the new leaf's first key.
            split_key = new.key(0);
        }

        tracing::trace!(
            target: "larch_storage::btree",
            page = page_no.as_u32(),
            new_page = new_no.as_u32(),
            "split leaf"
        );

        Ok(Some(SplitEntry {
            key: split_key,
            page_no: new_no,
        }))
    }
}

/// Absorbs the bubbled-up entry on the left side of an internal split and
/// returns the key to promote.
///
/// The entry sorts below the new node's first key, so it goes into `cur`,
/// which has room after the redistribution. The middle key is then `cur`'s
/// last key, removed from `cur`; `cur`'s trailing child pointer moves into
/// `new.child(0)`, resolving the duplicated boundary child.
fn promote_from_left<B: AsRef<[u8]> + AsMut<[u8]>>(
    cur: &mut Internal<B>,
    new: &mut Internal<B>,
    entry: &SplitEntry,
) -> Key {
    cur.insert(entry.key, entry.page_no);
    let cur_len = cur.len();
    let mid_key = cur.key(cur_len - 1);
    cur.set_key(cur_len - 1, Key::ZERO);
    new.set_child(0, cur.child(cur_len));
    cur.set_child(cur_len, PageId::INVALID);
    mid_key
}

/// Absorbs the bubbled-up entry on the right side of an internal split and
/// returns the key to promote.
///
/// The entry goes into `new`; the middle key is then `new`'s first key,
/// removed by shifting the node one slot left. The shift discards
/// `new.child(0)`, which `cur` still owns as its trailing child.
fn promote_from_right<B: AsRef<[u8]> + AsMut<[u8]>>(
    new: &mut Internal<B>,
    entry: &SplitEntry,
) -> Key {
    new.insert(entry.key, entry.page_no);
    let mid_key = new.key(0);
    let new_len = new.len();
    for i in 0..new_len {
        new.set_key(i, new.key(i + 1));
        new.set_child(i, new.child(i + 1));
    }
    new.set_key(new_len - 1, Key::ZERO);
    new.set_child(new_len, PageId::INVALID);
    mid_key
}

impl Drop for PrefixIndex {
    fn drop(&mut self) {
        // End any live scan so its leaf pin is released before the flush.
        if self.scan.is_some() {
            self.scan = None;
        }
        if let Err(e) = self.buffer.flush_file(&self.file) {
            tracing::warn!(
                target: "larch_storage::btree",
                index = %self.index_name,
                error = %e,
                "failed to flush index file on close"
            );
        }
    }
}
