//! Page-frame cache for the ferrite storage engine.
//!
//! This crate provides in-memory page caching:
//! - Fixed-size pool of page frames with pin counting
//! - Clock eviction policy
//! - Dirty tracking with evicted-page hand-back for write-back
//!
//! The pool performs no disk I/O itself. Faulting pages in and writing
//! dirty pages out is the caller's job; eviction surfaces the victim's
//! image as an [`EvictedPage`] so nothing dirty is ever dropped silently.

mod frame;
mod page_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{BufferPool, BufferPoolStats, EvictedPage};
pub use replacer::{ClockReplacer, Replacer};
