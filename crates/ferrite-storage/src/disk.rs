//! Disk manager for named page files.
//!
//! Every relation and index lives in its own file under one data
//! directory, addressed by a file ID handed out at create/open time.
//! Pages are fixed-size and numbered from 1; page number 0 never names
//! a real page.

use ferrite_common::page::{PageId, PAGE_SIZE};
use ferrite_common::{FerriteError, Result, StorageConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Handle for an open page file.
struct FileHandle {
    file: File,
    name: String,
    /// Number of allocated pages; page numbers run 1..=num_pages.
    num_pages: u32,
}

struct DiskInner {
    files: HashMap<u32, FileHandle>,
    by_name: HashMap<String, u32>,
    next_file_id: u32,
}

/// Manages reading and writing pages of named files.
pub struct DiskManager {
    data_dir: PathBuf,
    fsync_enabled: bool,
    inner: Mutex<DiskInner>,
}

impl DiskManager {
    /// Creates a disk manager over the configured data directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
            inner: Mutex::new(DiskInner {
                files: HashMap::new(),
                by_name: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn register(
        inner: &mut DiskInner,
        file: File,
        name: &str,
        num_pages: u32,
    ) -> u32 {
        let file_id = inner.next_file_id;
        inner.next_file_id += 1;
        inner.files.insert(
            file_id,
            FileHandle {
                file,
                name: name.to_string(),
                num_pages,
            },
        );
        inner.by_name.insert(name.to_string(), file_id);
        file_id
    }

    /// Creates a new page file. Fails with `FileExists` if a file of this
    /// name is already on disk.
    pub fn create_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();
        let path = self.file_path(name);
        if inner.by_name.contains_key(name) || path.exists() {
            return Err(FerriteError::FileExists(name.to_string()));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        log::debug!("created page file {:?}", path);
        Ok(Self::register(&mut inner, file, name, 0))
    }

    /// Opens an existing page file. Fails with `FileNotFound` if it does
    /// not exist. Reopening an already-open file returns its existing ID.
    pub fn open_file(&self, name: &str) -> Result<u32> {
        let mut inner = self.inner.lock();
        if let Some(&file_id) = inner.by_name.get(name) {
            return Ok(file_id);
        }
        let path = self.file_path(name);
        if !path.exists() {
            return Err(FerriteError::FileNotFound(name.to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;
        Ok(Self::register(&mut inner, file, name, num_pages))
    }

    fn byte_offset(page_num: u32) -> u64 {
        (page_num as u64 - 1) * PAGE_SIZE as u64
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(FerriteError::PageNotFound(page_id))?;

        if page_id.page_num == 0 || page_id.page_num > handle.num_pages {
            return Err(FerriteError::PageNotFound(page_id));
        }

        handle
            .file
            .seek(SeekFrom::Start(Self::byte_offset(page_id.page_num)))?;
        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&page_id.file_id)
            .ok_or(FerriteError::PageNotFound(page_id))?;

        if page_id.page_num == 0 || page_id.page_num > handle.num_pages {
            return Err(FerriteError::PageNotFound(page_id));
        }

        handle
            .file
            .seek(SeekFrom::Start(Self::byte_offset(page_id.page_num)))?;
        handle.file.write_all(data)?;
        if self.fsync_enabled {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Allocates a new zeroed page at the end of the file.
    ///
    /// The first allocation in a file yields page number 1.
    pub fn allocate_page(&self, file_id: u32) -> Result<PageId> {
        let mut inner = self.inner.lock();
        let handle = inner
            .files
            .get_mut(&file_id)
            .ok_or(FerriteError::PageNotFound(PageId::new(file_id, 0)))?;

        let page_num = handle.num_pages + 1;
        handle
            .file
            .seek(SeekFrom::Start(Self::byte_offset(page_num)))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.fsync_enabled {
            handle.file.sync_all()?;
        }
        handle.num_pages = page_num;

        Ok(PageId::new(file_id, page_num))
    }

    /// Returns the number of allocated pages in a file.
    pub fn num_pages(&self, file_id: u32) -> Result<u32> {
        let inner = self.inner.lock();
        inner
            .files
            .get(&file_id)
            .map(|h| h.num_pages)
            .ok_or(FerriteError::PageNotFound(PageId::new(file_id, 0)))
    }

    /// Syncs a file's pending writes to disk.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let inner = self.inner.lock();
        if let Some(handle) = inner.files.get(&file_id) {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a file, syncing it first.
    pub fn close_file(&self, file_id: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(handle) = inner.files.remove(&file_id) {
            inner.by_name.remove(&handle.name);
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Closes a file and removes it from disk.
    pub fn delete_file(&self, file_id: u32) -> Result<()> {
        let name = {
            let inner = self.inner.lock();
            inner.files.get(&file_id).map(|h| h.name.clone())
        };
        self.close_file(file_id)?;
        if let Some(name) = name {
            let path = self.file_path(&name);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Closes all open files.
    pub fn close_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.by_name.clear();
        for (_, handle) in inner.files.drain() {
            handle.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}
