//! Storage engine for ferrite.
//!
//! This crate provides:
//! - Disk manager for named page files
//! - Buffer manager combining the frame cache with disk I/O
//! - Heap files for opaque record storage, with a sequential scanner
//! - A disk-backed B+Tree secondary index over an integer attribute

mod btree;
mod cache;
mod disk;
mod heap;
mod rid;

pub use btree::{BTreeIndex, NodeGeometry, RangeOp};
pub use cache::{BufferManager, PageGuard};
pub use disk::DiskManager;
pub use heap::{HeapFile, HeapScan};
pub use rid::RecordId;
