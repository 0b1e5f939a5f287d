//! Sequential heap scan.

use super::file::HeapFile;
use super::page::HeapPage;
use crate::cache::BufferManager;
use crate::rid::RecordId;
use bytes::Bytes;
use ferrite_common::page::PageId;
use ferrite_common::{FerriteError, Result};
use std::sync::Arc;

/// Cursor over every record of a heap relation, in page/slot order.
///
/// `scan_next` copies the record out under a short-lived pin, so the scan
/// holds no buffer pins between calls.
pub struct HeapScan {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    page_count: u32,
    current_page: u32,
    current_slot: u16,
    current: Option<Bytes>,
}

impl HeapScan {
    /// Starts a scan over the relation as it exists right now.
    pub fn new(heap: &HeapFile) -> Result<Self> {
        Ok(Self {
            bufmgr: heap.buffer_manager().clone(),
            file_id: heap.file_id(),
            page_count: heap.num_pages()?,
            current_page: 0,
            current_slot: 0,
            current: None,
        })
    }

    /// Advances to the next record, returning its ID.
    ///
    /// Fails with `EndOfFile` once the relation is exhausted.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        loop {
            if self.current_page == 0 {
                self.current_page = 1;
                self.current_slot = 0;
            }
            if self.current_page > self.page_count {
                self.current = None;
                return Err(FerriteError::EndOfFile);
            }

            let page_id = PageId::new(self.file_id, self.current_page);
            let guard = self.bufmgr.read_guard(page_id)?;
            let next_slot = self.current_slot + 1;
            let record = guard.with(|data| {
                HeapPage::new(data)
                    .record(next_slot)
                    .map(Bytes::copy_from_slice)
            })?;

            match record {
                Some(bytes) => {
                    self.current_slot = next_slot;
                    self.current = Some(bytes);
                    return Ok(RecordId::new(self.current_page, next_slot));
                }
                None => {
                    self.current_page += 1;
                    self.current_slot = 0;
                }
            }
        }
    }

    /// Returns the bytes of the record `scan_next` last positioned on.
    pub fn get_record(&self) -> Result<Bytes> {
        self.current
            .clone()
            .ok_or_else(|| FerriteError::Internal("heap scan has no current record".to_string()))
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
    fn test_scan_visits_all_records_in_order() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr, "rel").unwrap();

        let mut rids = Vec::new();
        for i in 0..500u32 {
            // Big enough records to span several pages.
            let mut record = vec![0u8; 100];
            record[..4].copy_from_slice(&i.to_le_bytes());
            rids.push(heap.append(&record).unwrap());
        }

        let mut scan = HeapScan::new(&heap).unwrap();
        for (i, expected_rid) in rids.iter().enumerate() {
            let rid = scan.scan_next().unwrap();
            assert_eq!(rid, *expected_rid);
            let record = scan.get_record().unwrap();
            let value = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            assert_eq!(value as usize, i);
        }
        assert!(matches!(scan.scan_next(), Err(FerriteError::EndOfFile)));
    }

    #[test]
    fn test_scan_empty_relation() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr, "rel").unwrap();
        let mut scan = HeapScan::new(&heap).unwrap();
        assert!(matches!(scan.scan_next(), Err(FerriteError::EndOfFile)));
        assert!(scan.get_record().is_err());
    }

    #[test]
    fn test_scan_holds_no_pins_between_calls() {
        let (bufmgr, _dir) = test_env();
        let heap = HeapFile::create(bufmgr.clone(), "rel").unwrap();
        for i in 0..10u32 {
            heap.append(&i.to_le_bytes()).unwrap();
        }

        let mut scan = HeapScan::new(&heap).unwrap();
        while scan.scan_next().is_ok() {
            assert_eq!(bufmgr.pinned_frames(), 0);
        }
    }
}
