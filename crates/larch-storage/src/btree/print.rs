//! Tree pretty-printer for debugging.

use super::index::PrefixIndex;
use super::node::{Internal, Leaf};
use std::fmt::Write;
use larch_common::{PageId, Result};

impl PrefixIndex {
    /// Renders the whole tree into a string, one node per section.
    ///
    /// Read-only: every page visited is read and released symmetrically.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        out.push_str("====BEGIN TREE DUMP====\n");
        if !self.root_page_no.is_valid() {
            out.push_str("\t(empty tree)\n");
        } else {
            self.dump_subtree(self.root_page_no, &mut out)?;
        }
        out.push_str("====END TREE DUMP====\n");
        Ok(out)
    }

    fn dump_subtree(&self, page_no: PageId, out: &mut String) -> Result<()> {
        let guard = self.buffer.read_page(&self.file, page_no)?;
        let (level, children) = {
            let data = guard.data();
            let node = Internal::new(&**data);
            let n = node.len();

            let _ = writeln!(
                out,
                "***NON-LEAF***\tlevel: {}, page: {}, length: {}",
                node.level(),
                page_no.as_u32(),
                n
            );
            for i in 0..n {
                let _ = write!(out, " {{{}}} | ({}) | ", node.child(i).as_u32(), node.key(i));
            }
            let _ = writeln!(out, "{{{}}}", node.child(n).as_u32());

            let children: Vec<PageId> = (0..=n).map(|i| node.child(i)).collect();
            (node.level(), children)
        };

        // The parent stays pinned while its subtree prints.
        for child in children {
            if level == 1 {
                self.dump_leaf(child, out)?;
            } else {
                self.dump_subtree(child, out)?;
            }
        }
        Ok(())
    }

    fn dump_leaf(&self, page_no: PageId, out: &mut String) -> Result<()> {
        let guard = self.buffer.read_page(&self.file, page_no)?;
        let data = guard.data();
        let leaf = Leaf::new(&**data);
        let n = leaf.len();

        let _ = writeln!(
            out,
            "\t***LEAF***\tpage: {}, right_sib: {}, length: {}",
            page_no.as_u32(),
            leaf.right_sibling().as_u32(),
            n
        );
        if n == 0 {
            out.push_str("\t(empty)\n");
        } else {
            out.push('\t');
            for i in 0..n {
                let _ = write!(out, "({}, {}) | ", leaf.key(i), leaf.rid(i));
            }
            out.push('\n');
        }
        Ok(())
    }
}
