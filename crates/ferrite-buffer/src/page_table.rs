//! Page table mapping resident pages to their frames.

use crate::frame::FrameId;
use ferrite_common::page::PageId;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Maps PageId to the frame currently holding that page.
pub struct PageTable {
    map: Mutex<HashMap<PageId, FrameId>>,
}

impl PageTable {
    /// Creates a new page table sized for the given frame count.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Looks up the frame holding a page.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.map.lock().get(&page_id).copied()
    }

    /// Inserts or updates a mapping.
    pub fn insert(&self, page_id: PageId, frame_id: FrameId) {
        self.map.lock().insert(page_id, frame_id);
    }

    /// Removes a mapping, returning the frame it pointed at.
    pub fn remove(&self, page_id: PageId) -> Option<FrameId> {
        self.map.lock().remove(&page_id)
    }

    /// Returns true if the page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.map.lock().contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Returns true if no pages are resident.
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Calls `f` for every mapping. Iterates over a snapshot so the callback
    /// may call back into the pool.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId),
    {
        let snapshot: Vec<(PageId, FrameId)> =
            self.map.lock().iter().map(|(p, fr)| (*p, *fr)).collect();
        for (page_id, frame_id) in snapshot {
            f(page_id, frame_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 42);

        table.insert(page_id, FrameId(7));
        assert_eq!(table.get(page_id), Some(FrameId(7)));
        assert!(table.contains(page_id));

        assert_eq!(table.remove(page_id), Some(FrameId(7)));
        assert_eq!(table.get(page_id), None);
    }

    #[test]
    fn test_update_existing() {
        let table = PageTable::new(16);
        let page_id = PageId::new(0, 42);

        table.insert(page_id, FrameId(1));
        table.insert(page_id, FrameId(2));
        assert_eq!(table.get(page_id), Some(FrameId(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_len_and_for_each() {
        let table = PageTable::new(16);
        table.insert(PageId::new(0, 1), FrameId(1));
        table.insert(PageId::new(1, 1), FrameId(2));
        assert_eq!(table.len(), 2);
        assert!(!table.is_empty());

        let mut seen = 0;
        table.for_each(|_, _| seen += 1);
        assert_eq!(seen, 2);
    }
}
