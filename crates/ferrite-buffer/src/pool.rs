//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use ferrite_common::page::{PageId, PAGE_SIZE};
use ferrite_common::{FerriteError, Result};
use parking_lot::Mutex;
use sysinfo::System;

/// A dirty page that was evicted from the pool.
///
/// The caller must write it to disk; the pool itself performs no I/O.
#[derive(Debug)]
pub struct EvictedPage {
    pub page_id: PageId,
    pub data: Box<[u8; PAGE_SIZE]>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with a page table for
/// residency lookup, a free list for untouched frames, clock replacement
/// for eviction, and per-frame pin counting. A frame is evictable exactly
/// when its pin count is zero.
pub struct BufferPool {
    frames: Vec<BufferFrame>,
    page_table: PageTable,
    free_list: Mutex<Vec<FrameId>>,
    replacer: ClockReplacer,
}

impl BufferPool {
    /// Creates a new buffer pool with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        // Pop order does not matter; all frames start free.
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            page_table: PageTable::new(num_frames),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM,
    /// with a floor of 1,000 frames.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let num_frames = (available_bytes / 4 / PAGE_SIZE).max(1_000);
        Self::new(num_frames)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of resident pages.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Returns true if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains(page_id)
    }

    /// Fetches a resident page, pinning its frame. Returns None on a miss.
    #[inline]
    pub fn fetch_page(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Returns the frame of a resident page without touching its pin count.
    ///
    /// For access to pages the caller already holds a pin on (e.g. an
    /// active scan cursor).
    #[inline]
    pub fn resident_frame(&self, page_id: PageId) -> Option<&BufferFrame> {
        let frame_id = self.page_table.get(page_id)?;
        Some(&self.frames[frame_id.0 as usize])
    }

    /// Allocates a frame, evicting if no free frame exists.
    fn allocate_frame(&self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok((frame_id, None));
        }

        let victim_id = self
            .replacer
            .evict(&|fid| self.frames[fid.0 as usize].pin_count() == 0)
            .ok_or(FerriteError::BufferPoolFull)?;

        let frame = &self.frames[victim_id.0 as usize];

        let evicted = match (frame.is_dirty(), frame.page_id()) {
            (true, Some(page_id)) => {
                let guard = frame.read_data();
                let mut data = Box::new([0u8; PAGE_SIZE]);
                data.copy_from_slice(&**guard);
                drop(guard);
                Some(EvictedPage { page_id, data })
            }
            _ => None,
        };

        if let Some(old_page_id) = frame.page_id() {
            self.page_table.remove(old_page_id);
        }

        Ok((victim_id, evicted))
    }

    /// Installs a page in the pool with a zeroed image, pinned.
    ///
    /// If the page is already resident its existing frame is pinned and
    /// returned. The second element is a dirty page evicted to make room,
    /// which the caller must write to disk.
    pub fn new_page(&self, page_id: PageId) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        if let Some(frame_id) = self.page_table.get(page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            frame.pin();
            self.replacer.record_access(frame_id);
            return Ok((frame, None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.replacer.record_access(frame_id);
        self.page_table.insert(page_id, frame_id);

        Ok((frame, evicted))
    }

    /// Installs a page read from disk, pinned.
    pub fn load_page(
        &self,
        page_id: PageId,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(page_id)?;
        frame.copy_from(data);
        Ok((frame, evicted))
    }

    /// Releases one pin on a page, marking the frame dirty if `dirty`.
    ///
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) -> bool {
        match self.page_table.get(page_id) {
            Some(frame_id) => {
                let frame = &self.frames[frame_id.0 as usize];
                if dirty {
                    frame.set_dirty(true);
                }
                frame.unpin();
                true
            }
            None => false,
        }
    }

    /// Writes back every dirty resident page accepted by `filter`.
    ///
    /// The sink receives the page ID and its image; on success the frame is
    /// marked clean. Returns the number of pages written.
    pub fn flush_matching<P, F>(&self, filter: P, mut sink: F) -> Result<usize>
    where
        P: Fn(PageId) -> bool,
        F: FnMut(PageId, &[u8]) -> Result<()>,
    {
        let mut candidates = Vec::new();
        self.page_table.for_each(|page_id, frame_id| {
            if filter(page_id) {
                candidates.push((page_id, frame_id));
            }
        });

        let mut flushed = 0;
        for (page_id, frame_id) in candidates {
            let frame = &self.frames[frame_id.0 as usize];
            if !frame.is_dirty() {
                continue;
            }
            {
                let data = frame.read_data();
                sink(page_id, &**data)?;
            }
            frame.set_dirty(false);
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Returns statistics about the pool.
    pub fn stats(&self) -> BufferPoolStats {
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        let mut pin_count_total = 0;

        self.page_table.for_each(|_, frame_id| {
            let frame = &self.frames[frame_id.0 as usize];
            let pins = frame.pin_count();
            if pins > 0 {
                pinned_frames += 1;
            }
            pin_count_total += pins as usize;
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        });

        BufferPoolStats {
            total_frames: self.frames.len(),
            free_frames: self.free_count(),
            used_frames: self.page_table.len(),
            pinned_frames,
            dirty_frames,
            pin_count_total,
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of frames with at least one pin.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Sum of all pin counts.
    pub pin_count_total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pool() {
        let pool = BufferPool::new(10);
        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_new_page_pins() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        let (frame, evicted) = pool.new_page(page_id).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
        assert_eq!(pool.free_count(), 9);
        assert!(pool.contains(page_id));
    }

    #[test]
    fn test_fetch_existing() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, false);

        let frame = pool.fetch_page(page_id).unwrap();
        assert_eq!(frame.page_id(), Some(page_id));
        assert!(frame.is_pinned());
    }

    #[test]
    fn test_fetch_miss() {
        let pool = BufferPool::new(10);
        assert!(pool.fetch_page(PageId::new(0, 1)).is_none());
    }

    #[test]
    fn test_resident_frame_does_not_pin() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);
        pool.new_page(page_id).unwrap();

        let frame = pool.resident_frame(page_id).unwrap();
        assert_eq!(frame.pin_count(), 1);
    }

    #[test]
    fn test_unpin_and_dirty_tracking() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        pool.unpin_page(page_id, true);
        assert!(!frame.is_pinned());
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_eviction_of_clean_page() {
        let pool = BufferPool::new(2);
        for i in 1..=2 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            pool.unpin_page(page_id, false);
        }

        let (_, evicted) = pool.new_page(PageId::new(0, 99)).unwrap();
        assert!(evicted.is_none());
        assert_eq!(pool.page_count(), 2);
        assert!(pool.contains(PageId::new(0, 99)));
    }

    #[test]
    fn test_eviction_returns_dirty_page() {
        let pool = BufferPool::new(1);
        let first = PageId::new(0, 1);

        let (frame, _) = pool.new_page(first).unwrap();
        frame.write_data()[0] = 0xAB;
        pool.unpin_page(first, true);

        let (_, evicted) = pool.new_page(PageId::new(0, 2)).unwrap();
        let evicted = evicted.expect("dirty victim must be handed back");
        assert_eq!(evicted.page_id, first);
        assert_eq!(evicted.data[0], 0xAB);
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let pool = BufferPool::new(2);
        pool.new_page(PageId::new(0, 1)).unwrap();
        pool.new_page(PageId::new(0, 2)).unwrap();

        let result = pool.new_page(PageId::new(0, 3));
        assert!(matches!(result, Err(FerriteError::BufferPoolFull)));
    }

    #[test]
    fn test_load_page_copies_data() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);
        let mut data = [0u8; PAGE_SIZE];
        data[100] = 0xCD;

        let (frame, _) = pool.load_page(page_id, &data).unwrap();
        assert_eq!(frame.read_data()[100], 0xCD);
    }

    #[test]
    fn test_flush_matching_filters_by_file() {
        let pool = BufferPool::new(10);
        for file_id in 0..2 {
            for page_num in 1..=3 {
                let page_id = PageId::new(file_id, page_num);
                pool.new_page(page_id).unwrap();
                pool.unpin_page(page_id, true);
            }
        }

        let mut flushed_pages = vec![];
        let count = pool
            .flush_matching(
                |pid| pid.file_id == 1,
                |pid, _| {
                    flushed_pages.push(pid);
                    Ok(())
                },
            )
            .unwrap();

        assert_eq!(count, 3);
        assert!(flushed_pages.iter().all(|p| p.file_id == 1));

        // Flushed frames are clean now; a second flush writes nothing.
        let count = pool.flush_matching(|pid| pid.file_id == 1, |_, _| Ok(())).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_stats() {
        let pool = BufferPool::new(10);
        for i in 1..=4 {
            let page_id = PageId::new(0, i);
            pool.new_page(page_id).unwrap();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true);
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.used_frames, 4);
        assert_eq!(stats.pinned_frames, 2);
        assert_eq!(stats.dirty_frames, 2);
        assert_eq!(stats.pin_count_total, 2);
    }

    #[test]
    fn test_duplicate_new_page_returns_existing() {
        let pool = BufferPool::new(10);
        let page_id = PageId::new(0, 1);

        let (frame, _) = pool.new_page(page_id).unwrap();
        frame.write_data()[0] = 0x11;
        pool.unpin_page(page_id, false);

        let (frame, evicted) = pool.new_page(page_id).unwrap();
        assert!(evicted.is_none());
        assert_eq!(frame.read_data()[0], 0x11);
        assert_eq!(pool.page_count(), 1);
    }
}
