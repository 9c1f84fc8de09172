//! Storage layer for LarchDB.
//!
//! This crate provides:
//! - Slotted heap pages and an append-only relation writer
//! - A file scanner streaming every record of a relation
//! - The string-prefix B+Tree index over a heap relation

pub mod btree;
pub mod heap;

pub use btree::{Operator, PrefixIndex, LEAF_NUM_KEYS, NON_LEAF_NUM_KEYS};
pub use heap::{FileScanner, HeapPage, RelationWriter};
