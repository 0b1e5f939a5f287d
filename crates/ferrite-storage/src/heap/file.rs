//! Heap file manager.

use super::page::{HeapPage, HeapPageMut, MAX_RECORD_SIZE, SLOT_SIZE};
use crate::cache::BufferManager;
use crate::rid::RecordId;
use ferrite_common::page::PageId;
use ferrite_common::{FerriteError, Result};
use std::sync::Arc;

/// An append-only heap relation backed by slotted pages.
pub struct HeapFile {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    name: String,
}

impl HeapFile {
    /// Creates a new heap relation. Fails with `FileExists` if one of this
    /// name already exists.
    pub fn create(bufmgr: Arc<BufferManager>, name: &str) -> Result<Self> {
        let file_id = bufmgr.disk().create_file(name)?;
        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
        })
    }

    /// Opens an existing heap relation.
    pub fn open(bufmgr: Arc<BufferManager>, name: &str) -> Result<Self> {
        let file_id = bufmgr.disk().open_file(name)?;
        Ok(Self {
            bufmgr,
            file_id,
            name: name.to_string(),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the file ID backing this relation.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of heap pages.
    pub fn num_pages(&self) -> Result<u32> {
        self.bufmgr.disk().num_pages(self.file_id)
    }

    /// Appends a record, returning its record ID.
    pub fn append(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(FerriteError::RecordTooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        let num_pages = self.num_pages()?;
        if num_pages > 0 {
            let page_id = PageId::new(self.file_id, num_pages);
            let guard = self.bufmgr.read_guard(page_id)?;
            let fits = guard.with(|data| {
                HeapPage::new(data).free_space() >= record.len() + SLOT_SIZE
            })?;
            if fits {
                let slot = guard.with_mut(|data| HeapPageMut::new(data).push(record))?;
                let slot = slot.ok_or_else(|| {
                    FerriteError::Internal("heap page rejected a fitting record".to_string())
                })?;
                return Ok(RecordId::new(num_pages, slot));
            }
        }

        // Last page full (or file empty): start a fresh page.
        let guard = self.bufmgr.alloc_guard(self.file_id)?;
        let page_num = guard.page_id().page_num;
        let slot = guard.with_mut(|data| HeapPageMut::new(data).push(record))?;
        let slot = slot.ok_or_else(|| {
            FerriteError::Internal("empty heap page rejected a record".to_string())
        })?;
        Ok(RecordId::new(page_num, slot))
    }

    /// Flushes the relation's dirty pages to disk.
    pub fn flush(&self) -> Result<()> {
        self.bufmgr.flush_file(self.file_id)
    }

    pub(crate) fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.bufmgr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use ferrite_buffer::BufferPool;
    use ferrite_common::StorageConfig;
    use tempfile::tempdir;

    fn test_env() -> (Arc<BufferManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            ..Default::default()
        };
        let disk = Arc::new(DiskManager::new(&config).unwrap());
        let bufmgr = Arc::new(BufferManager::new(BufferPool::new(64), disk));
        (bufmgr, dir)
    }

    #[test]
    fn test_create_and_append() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr, "rel").unwrap();

        let rid1 = heap.append(b"first").unwrap();
        let rid2 = heap.append(b"second").unwrap();

        assert_eq!(rid1, RecordId::new(1, 1));
        assert_eq!(rid2, RecordId::new(1, 2));
        assert!(rid1.is_valid());
    }

    #[test]
    fn test_create_twice_fails() {
        let (bufmgr, _dir) = test_env();
        HeapFile::create(bufmgr.clone(), "rel").unwrap();
        assert!(matches!(
            HeapFile::create(bufmgr, "rel"),
            Err(FerriteError::FileExists(_))
        ));
    }

    #[test]
    fn test_append_spills_to_new_page() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr, "rel").unwrap();

        let record = vec![0u8; 4000];
        let mut last_rid = RecordId::EMPTY;
        for _ in 0..8 {
            last_rid = heap.append(&record).unwrap();
        }
        assert!(heap.num_pages().unwrap() > 1);
        assert!(last_rid.page_num > 1);
        // Slots restart on each fresh page.
        assert!(last_rid.slot >= 1);
    }

    #[test]
    fn test_record_too_large() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr, "rel").unwrap();
        let record = vec![0u8; MAX_RECORD_SIZE + 1];
        assert!(matches!(
            heap.append(&record),
            Err(FerriteError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_append_leaves_no_pins() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr.clone(), "rel").unwrap();
        for i in 0..100u32 {
            heap.append(&i.to_le_bytes()).unwrap();
        }
        assert_eq!(bufmgr.pinned_frames(), 0);
    }
}
