//! B+Tree index: build, insert with splits, range scans, lifecycle.

use super::geometry::{NodeGeometry, INITIAL_ROOT_PAGE_NUM, META_PAGE_NUM};
use super::node::{
    encode_relation_name, InteriorView, InteriorViewMut, LeafView, LeafViewMut, MetaView,
    MetaViewMut,
};
use super::scan::{RangeOp, ScanCursor};
use crate::cache::{BufferManager, PageGuard};
use crate::heap::{HeapFile, HeapScan};
use crate::rid::RecordId;
use ferrite_common::page::PageId;
use ferrite_common::{AttrType, FerriteError, Result};
use std::sync::Arc;

/// Disk-backed B+Tree secondary index over one integer attribute of a
/// heap relation.
///
/// At most one operation runs at a time and at most one range scan is
/// active per index. Entries are append-only: a slot, once written, moves
/// only through splits.
pub struct BTreeIndex {
    bufmgr: Arc<BufferManager>,
    file_id: u32,
    index_name: String,
    attr_byte_offset: usize,
    attr_type: AttrType,
    geometry: NodeGeometry,
    root_page_num: u32,
    scan: Option<ScanCursor>,
}

impl BTreeIndex {
    /// Opens the index for `relation_name` over the attribute at
    /// `attr_byte_offset`, creating and bulk-building it from the relation
    /// if the index file does not exist yet.
    ///
    /// Returns the index and its file name, `"<relation>.<offset>"`. On
    /// reopen, the meta page must agree with every argument
    /// (`BadIndexInfo` otherwise).
    pub fn open(
        bufmgr: Arc<BufferManager>,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<(Self, String)> {
        Self::open_with_geometry(
            bufmgr,
            relation_name,
            attr_byte_offset,
            attr_type,
            NodeGeometry::default(),
        )
    }

    /// Same as [`BTreeIndex::open`] with explicit node capacities.
    ///
    /// Capacities are not recorded in the file; reopening must use the
    /// geometry the file was built with.
    pub fn open_with_geometry(
        bufmgr: Arc<BufferManager>,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        geometry: NodeGeometry,
    ) -> Result<(Self, String)> {
        if attr_type != AttrType::Integer {
            return Err(FerriteError::UnsupportedType(attr_type.to_string()));
        }

        let index_name = format!("{}.{}", relation_name, attr_byte_offset);
        match bufmgr.disk().create_file(&index_name) {
            Ok(file_id) => {
                let index = Self::build(
                    bufmgr,
                    file_id,
                    &index_name,
                    relation_name,
                    attr_byte_offset,
                    attr_type,
                    geometry,
                )?;
                Ok((index, index_name))
            }
            Err(FerriteError::FileExists(_)) => {
                let index = Self::reopen(
                    bufmgr,
                    &index_name,
                    relation_name,
                    attr_byte_offset,
                    attr_type,
                    geometry,
                )?;
                Ok((index, index_name))
            }
            Err(e) => Err(e),
        }
    }

    /// Creates the meta page and root leaf, then bulk-builds from a full
    /// scan of the relation.
    fn build(
        bufmgr: Arc<BufferManager>,
        file_id: u32,
        index_name: &str,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        geometry: NodeGeometry,
    ) -> Result<Self> {
        log::debug!("creating index file {}", index_name);

        {
            let meta = bufmgr.alloc_guard(file_id)?;
            debug_assert_eq!(meta.page_id().page_num, META_PAGE_NUM);
            meta.with_mut(|data| {
                MetaViewMut::new(data).init(
                    relation_name,
                    attr_byte_offset as i32,
                    attr_type,
                    INITIAL_ROOT_PAGE_NUM,
                )
            })?;
        }
        {
            // The initial root: a zeroed page already is an empty leaf.
            let root = bufmgr.alloc_guard(file_id)?;
            debug_assert_eq!(root.page_id().page_num, INITIAL_ROOT_PAGE_NUM);
        }

        let mut index = Self {
            bufmgr: bufmgr.clone(),
            file_id,
            index_name: index_name.to_string(),
            attr_byte_offset,
            attr_type,
            geometry,
            root_page_num: INITIAL_ROOT_PAGE_NUM,
            scan: None,
        };

        let heap = HeapFile::open(bufmgr.clone(), relation_name)?;
        let mut heap_scan = HeapScan::new(&heap)?;
        let mut inserted = 0u64;
        loop {
            let rid = match heap_scan.scan_next() {
                Ok(rid) => rid,
                Err(FerriteError::EndOfFile) => break,
                Err(e) => return Err(e),
            };
            let record = heap_scan.get_record()?;
            let key = extract_key(&record, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
            inserted += 1;
        }
        bufmgr.flush_file(file_id)?;
        log::debug!("built index {} from {} records", index_name, inserted);

        Ok(index)
    }

    /// Opens an existing index file, validating its meta page against the
    /// caller's arguments and adopting the persisted root.
    fn reopen(
        bufmgr: Arc<BufferManager>,
        index_name: &str,
        relation_name: &str,
        attr_byte_offset: usize,
        attr_type: AttrType,
        geometry: NodeGeometry,
    ) -> Result<Self> {
        let file_id = bufmgr.disk().open_file(index_name)?;

        let (stored_name, stored_offset, stored_type, root_page_num) = {
            let meta = bufmgr.read_guard(PageId::new(file_id, META_PAGE_NUM))?;
            meta.with(|data| {
                let meta = MetaView::new(data);
                (
                    meta.relation_name(),
                    meta.attr_byte_offset(),
                    meta.attr_type_code(),
                    meta.root_page_num(),
                )
            })?
        };

        if stored_name != encode_relation_name(relation_name) {
            return Err(FerriteError::BadIndexInfo(format!(
                "index {} was built over a different relation",
                index_name
            )));
        }
        if stored_offset != attr_byte_offset as i32 {
            return Err(FerriteError::BadIndexInfo(format!(
                "attribute byte offset {} != {}",
                stored_offset, attr_byte_offset
            )));
        }
        if AttrType::from_code(stored_type) != Some(attr_type) {
            return Err(FerriteError::BadIndexInfo(format!(
                "attribute type code {} != {}",
                stored_type,
                attr_type.code()
            )));
        }

        log::debug!("opened index {} with root page {}", index_name, root_page_num);
        Ok(Self {
            bufmgr,
            file_id,
            index_name: index_name.to_string(),
            attr_byte_offset,
            attr_type,
            geometry,
            root_page_num,
            scan: None,
        })
    }

    /// Returns the index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Returns the current root page number.
    pub fn root_page_num(&self) -> u32 {
        self.root_page_num
    }

    /// Returns the attribute type the index is declared over.
    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    /// Returns the byte offset of the indexed attribute inside a record.
    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    fn page(&self, page_num: u32) -> PageId {
        PageId::new(self.file_id, page_num)
    }

    /// The root is a leaf exactly while it still sits on the initial root
    /// page; the first split above the root moves it elsewhere.
    fn root_is_leaf(&self) -> bool {
        self.root_page_num == INITIAL_ROOT_PAGE_NUM
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Inserts one `(key, rid)` entry.
    ///
    /// Descends from the root; a full leaf splits, and the promoted
    /// separator cascades upward, possibly splitting interiors and
    /// finally the root itself.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        let root = self.root_page_num;
        let root_is_leaf = self.root_is_leaf();
        if let Some((sibling, separator)) = self.insert_rec(key, rid, root, root_is_leaf)? {
            self.promote_root(sibling, separator)?;
        }
        Ok(())
    }

    /// Recursive descent. Returns the `(new sibling, separator)` pair a
    /// split promoted, or None when the subtree absorbed the entry.
    ///
    /// The current page stays pinned across the recursion and is unpinned
    /// on the single exit (guard drop), dirty iff its image was mutated.
    fn insert_rec(
        &self,
        key: i32,
        rid: RecordId,
        page_num: u32,
        is_leaf: bool,
    ) -> Result<Option<(u32, i32)>> {
        let geo = self.geometry;
        let guard = self.bufmgr.read_guard(self.page(page_num))?;

        if is_leaf {
            let full = guard.with(|data| LeafView::new(data, geo).is_full())?;
            if !full {
                guard.with_mut(|data| LeafViewMut::new(data, geo).insert(key, rid))?;
                return Ok(None);
            }
            return self.split_leaf(&guard, key, rid).map(Some);
        }

        let (child, child_is_leaf) = guard.with(|data| {
            let node = InteriorView::new(data, geo);
            (node.find_child(key), node.level() == 1)
        })?;

        match self.insert_rec(key, rid, child, child_is_leaf)? {
            None => Ok(None),
            Some((new_child, separator)) => {
                let full = guard.with(|data| InteriorView::new(data, geo).is_full())?;
                if !full {
                    guard.with_mut(|data| {
                        InteriorViewMut::new(data, geo).insert_separator(separator, new_child)
                    })?;
                    return Ok(None);
                }
                self.split_interior(&guard, separator, new_child).map(Some)
            }
        }
    }

    /// Splits a full leaf: the upper half moves to a fresh sibling, the
    /// sibling is spliced into the leaf chain, the new entry lands on the
    /// correct side, and the sibling's first key is promoted.
    fn split_leaf(&self, left: &PageGuard<'_>, key: i32, rid: RecordId) -> Result<(u32, i32)> {
        let geo = self.geometry;
        let half = geo.leaf_cap / 2;

        let sibling = self.bufmgr.alloc_guard(self.file_id)?;
        let sibling_num = sibling.page_id().page_num;

        let (moved, old_right) = left.with(|data| {
            let leaf = LeafView::new(data, geo);
            let moved: Vec<(i32, RecordId)> =
                (half..geo.leaf_cap).map(|i| (leaf.key(i), leaf.rid(i))).collect();
            (moved, leaf.right_sibling())
        })?;

        sibling.with_mut(|data| {
            let mut leaf = LeafViewMut::new(data, geo);
            for (slot, (k, r)) in moved.iter().enumerate() {
                leaf.set_entry(slot, *k, *r);
            }
            leaf.set_right_sibling(old_right);
        })?;

        left.with_mut(|data| {
            let mut leaf = LeafViewMut::new(data, geo);
            for i in half..geo.leaf_cap {
                leaf.clear_entry(i);
            }
            leaf.set_right_sibling(sibling_num);
        })?;

        let separator = moved[0].0;
        if key < separator {
            left.with_mut(|data| LeafViewMut::new(data, geo).insert(key, rid))?;
        } else {
            sibling.with_mut(|data| LeafViewMut::new(data, geo).insert(key, rid))?;
        }

        Ok((sibling_num, separator))
    }

    /// Splits a full interior: keys above the middle and their children
    /// move to a fresh sibling, the middle key is promoted (retained in
    /// neither side), and the incoming separator lands on the correct
    /// side.
    fn split_interior(
        &self,
        left: &PageGuard<'_>,
        separator: i32,
        new_child: u32,
    ) -> Result<(u32, i32)> {
        let geo = self.geometry;
        let cap = geo.inner_cap;
        let half = cap / 2;

        let sibling = self.bufmgr.alloc_guard(self.file_id)?;
        let sibling_num = sibling.page_id().page_num;

        let (level, moved_keys, moved_children, middle) = left.with(|data| {
            let node = InteriorView::new(data, geo);
            let moved_keys: Vec<i32> = (half + 1..cap).map(|i| node.key(i)).collect();
            let moved_children: Vec<u32> = (half + 1..=cap).map(|i| node.child(i)).collect();
            (node.level(), moved_keys, moved_children, node.key(half))
        })?;

        sibling.with_mut(|data| {
            let mut node = InteriorViewMut::new(data, geo);
            node.set_level(level);
            for (slot, k) in moved_keys.iter().enumerate() {
                node.set_key(slot, *k);
            }
            for (slot, c) in moved_children.iter().enumerate() {
                node.set_child(slot, *c);
            }
        })?;

        left.with_mut(|data| {
            let mut node = InteriorViewMut::new(data, geo);
            for i in half + 1..cap {
                node.clear_key(i);
            }
            for i in half + 1..=cap {
                node.clear_child(i);
            }
            // The middle key moves up, retained in neither sibling.
            node.clear_key(half);
        })?;

        // With tiny geometries the sibling can start keyless; the promoted
        // middle key is then the side-selection pivot.
        let pivot = moved_keys.first().copied().unwrap_or(middle);
        if separator < pivot {
            left.with_mut(|data| {
                InteriorViewMut::new(data, geo).insert_separator(separator, new_child)
            })?;
        } else {
            sibling.with_mut(|data| {
                InteriorViewMut::new(data, geo).insert_separator(separator, new_child)
            })?;
        }

        Ok((sibling_num, middle))
    }

    /// Installs a new root above a split root and records it in the meta
    /// page.
    fn promote_root(&mut self, sibling: u32, separator: i32) -> Result<()> {
        let geo = self.geometry;
        let old_root = self.root_page_num;
        let level = if self.root_is_leaf() { 1 } else { 0 };

        let new_root_num = {
            let new_root = self.bufmgr.alloc_guard(self.file_id)?;
            new_root.with_mut(|data| {
                let mut node = InteriorViewMut::new(data, geo);
                node.set_level(level);
                node.seed(old_root, sibling, separator);
            })?;
            new_root.page_id().page_num
        };

        {
            let meta = self.bufmgr.read_guard(self.page(META_PAGE_NUM))?;
            meta.with_mut(|data| MetaViewMut::new(data).set_root_page_num(new_root_num))?;
        }

        self.root_page_num = new_root_num;
        log::debug!("index {}: root promoted to page {}", self.index_name, new_root_num);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Range scans
    // -----------------------------------------------------------------------

    /// Begins a range scan and positions on the first satisfying entry,
    /// leaving that leaf pinned.
    ///
    /// Fails with `BadOperator` on an invalid operator pair, `BadRange`
    /// when `low > high`, and `NoSuchKey` when nothing satisfies the
    /// predicate (leaving zero pins and no active scan). An already-active
    /// scan is terminated first.
    pub fn start_scan(
        &mut self,
        low: i32,
        low_op: RangeOp,
        high: i32,
        high_op: RangeOp,
    ) -> Result<()> {
        let mut cursor = ScanCursor::new(low, low_op, high, high_op)?;
        if self.scan.is_some() {
            self.end_scan()?;
        }

        let geo = self.geometry;

        // Descend toward the leaf whose range contains the low bound.
        let mut page_num = self.root_page_num;
        let mut is_leaf = self.root_is_leaf();
        while !is_leaf {
            let guard = self.bufmgr.read_guard(self.page(page_num))?;
            let (child, next_is_leaf) = guard.with(|data| {
                let node = InteriorView::new(data, geo);
                (node.find_child(low), node.level() == 1)
            })?;
            page_num = child;
            is_leaf = next_is_leaf;
        }

        // Walk the leaf chain to the first satisfying entry. Keys below
        // the low bound are skipped; a key past the high bound proves
        // nothing further can match.
        let mut leaf_num = page_num;
        self.bufmgr.read_page(self.page(leaf_num))?;
        loop {
            let (found, past_high, next) = self.bufmgr.with_page(self.page(leaf_num), |data| {
                let leaf = LeafView::new(data, geo);
                for slot in 0..leaf.entry_count() {
                    let key = leaf.key(slot);
                    if cursor.matches(key) {
                        return (Some(slot), false, 0);
                    }
                    if !cursor.below_high(key) {
                        return (None, true, 0);
                    }
                }
                (None, false, leaf.right_sibling())
            })?;

            if let Some(slot) = found {
                cursor.current_page = leaf_num;
                cursor.next_slot = slot;
                self.scan = Some(cursor);
                return Ok(());
            }

            self.bufmgr.unpin_page(self.page(leaf_num), false);
            if past_high || next == 0 {
                return Err(FerriteError::NoSuchKey);
            }
            leaf_num = next;
            self.bufmgr.read_page(self.page(leaf_num))?;
        }
    }

    /// Returns the record ID of the next entry satisfying the scan.
    ///
    /// Hops to the right sibling when the current leaf is exhausted
    /// (unpinning the old leaf, pinning the new). Fails with `ScanDone`
    /// once the predicate fails or the chain ends; the current pin is
    /// released before surfacing.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let geo = self.geometry;
        let mut cursor = self.scan.ok_or(FerriteError::ScanNotActive)?;
        if cursor.current_page == 0 {
            return Err(FerriteError::ScanDone);
        }

        let (exhausted, right) = self
            .bufmgr
            .with_page(self.page(cursor.current_page), |data| {
                let leaf = LeafView::new(data, geo);
                let exhausted = cursor.next_slot >= geo.leaf_cap
                    || !leaf.rid(cursor.next_slot).is_valid();
                (exhausted, leaf.right_sibling())
            })?;

        if exhausted {
            self.bufmgr.unpin_page(self.page(cursor.current_page), false);
            if right == 0 {
                cursor.current_page = 0;
                self.scan = Some(cursor);
                return Err(FerriteError::ScanDone);
            }
            self.bufmgr.read_page(self.page(right))?;
            cursor.current_page = right;
            cursor.next_slot = 0;
            self.scan = Some(cursor);
        }

        let (key, rid) = self
            .bufmgr
            .with_page(self.page(cursor.current_page), |data| {
                let leaf = LeafView::new(data, geo);
                (leaf.key(cursor.next_slot), leaf.rid(cursor.next_slot))
            })?;

        if cursor.below_high(key) {
            cursor.next_slot += 1;
            self.scan = Some(cursor);
            Ok(rid)
        } else {
            self.bufmgr.unpin_page(self.page(cursor.current_page), false);
            cursor.current_page = 0;
            self.scan = Some(cursor);
            Err(FerriteError::ScanDone)
        }
    }

    /// Terminates the active scan, releasing its pin if still held.
    ///
    /// Fails with `ScanNotActive` when no scan is active.
    pub fn end_scan(&mut self) -> Result<()> {
        let cursor = self.scan.take().ok_or(FerriteError::ScanNotActive)?;
        if cursor.current_page != 0 {
            self.bufmgr.unpin_page(self.page(cursor.current_page), false);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Walks the leaf chain from the leftmost leaf and returns every
    /// entry in order. Debug/verification helper.
    pub fn all_entries(&self) -> Result<Vec<(i32, RecordId)>> {
        let geo = self.geometry;

        let mut page_num = self.root_page_num;
        let mut is_leaf = self.root_is_leaf();
        while !is_leaf {
            let guard = self.bufmgr.read_guard(self.page(page_num))?;
            let (child, next_is_leaf) = guard.with(|data| {
                let node = InteriorView::new(data, geo);
                (node.child(0), node.level() == 1)
            })?;
            page_num = child;
            is_leaf = next_is_leaf;
        }

        let mut entries = Vec::new();
        loop {
            let guard = self.bufmgr.read_guard(self.page(page_num))?;
            let next = guard.with(|data| {
                let leaf = LeafView::new(data, geo);
                for slot in 0..leaf.entry_count() {
                    entries.push((leaf.key(slot), leaf.rid(slot)));
                }
                leaf.right_sibling()
            })?;
            drop(guard);
            if next == 0 {
                return Ok(entries);
            }
            page_num = next;
        }
    }
}

impl Drop for BTreeIndex {
    /// Ends any live scan, flushes the file, and closes it. Never
    /// propagates an error.
    fn drop(&mut self) {
        if let Some(cursor) = self.scan.take() {
            if cursor.current_page != 0 {
                self.bufmgr.unpin_page(self.page(cursor.current_page), false);
            }
        }
        if let Err(e) = self.bufmgr.flush_file(self.file_id) {
            log::warn!("failed to flush index {}: {}", self.index_name, e);
        }
        if let Err(e) = self.bufmgr.disk().close_file(self.file_id) {
            log::warn!("failed to close index {}: {}", self.index_name, e);
        }
    }
}

/// Reads the i32 key at `offset` inside an opaque record.
fn extract_key(record: &[u8], offset: usize) -> Result<i32> {
    if record.len() < offset + 4 {
        return Err(FerriteError::RecordTooShort {
            len: record.len(),
            offset,
        });
    }
    Ok(i32::from_le_bytes([
        record[offset],
        record[offset + 1],
        record[offset + 2],
        record[offset + 3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_key_at_offsets() {
        let mut record = [0u8; 12];
        record[0..4].copy_from_slice(&7i32.to_le_bytes());
        record[4..8].copy_from_slice(&(-9i32).to_le_bytes());

        assert_eq!(extract_key(&record, 0).unwrap(), 7);
        assert_eq!(extract_key(&record, 4).unwrap(), -9);
    }

    #[test]
    fn test_extract_key_too_short() {
        let record = [0u8; 6];
        assert!(matches!(
            extract_key(&record, 4),
            Err(FerriteError::RecordTooShort { len: 6, offset: 4 })
        ));
    }
}
