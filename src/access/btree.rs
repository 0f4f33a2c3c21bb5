pub mod error;
pub mod scan;

use crate::access::heap::RelationHeap;
use crate::access::rid::RecordId;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::page::internal_page::{self, InternalNode};
use crate::storage::page::leaf_page::{self, LeafNode};
use crate::storage::page::meta_page::{self, MetaPage};
use crate::storage::page::{PageId, kind};
use crate::storage::{BufferPool, DiskManager};
use anyhow::{Context, Result, bail, ensure};
use log::{debug, warn};
use std::path::Path;

pub use error::IndexError;
pub use scan::ScanOp;
use scan::ScanState;

const META_PAGE_ID: PageId = PageId(0);

/// Attribute types an index can be built over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrType {
    Int32,
}

impl AttrType {
    fn tag(self) -> u8 {
        match self {
            AttrType::Int32 => 1,
        }
    }
}

/// A disk-resident B+Tree over one integer attribute of a relation, mapping
/// keys to record ids. Built by scanning the relation once, extended by
/// single-entry inserts, and read through ranged scans.
///
/// The index file is named `"{relation}.{attr_byte_offset}"`. Page 0 is the
/// header; the root starts out as a single empty leaf and grows upward as
/// splits propagate.
pub struct BTreeIndex {
    buffer_pool: BufferPool,
    root_page_id: PageId,
    scan: Option<ScanState>,
    file_name: String,
    attr_byte_offset: usize,
    attr_type: AttrType,
}

impl std::fmt::Debug for BTreeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeIndex")
            .field("root_page_id", &self.root_page_id)
            .field("file_name", &self.file_name)
            .field("attr_byte_offset", &self.attr_byte_offset)
            .field("attr_type", &self.attr_type)
            .finish()
    }
}

impl BTreeIndex {
    /// The file name an index over `relation` at `attr_byte_offset` uses.
    pub fn index_file_name(relation: &str, attr_byte_offset: usize) -> String {
        format!("{}.{}", relation, attr_byte_offset)
    }

    /// Open the index for `relation` over the attribute at
    /// `attr_byte_offset`, or build it if the index file does not exist yet.
    /// An existing file whose header disagrees with the arguments fails with
    /// [`IndexError::BadIndexInfo`].
    pub fn open(
        dir: &Path,
        relation: &RelationHeap,
        attr_byte_offset: usize,
        attr_type: AttrType,
        pool_frames: usize,
    ) -> Result<Self> {
        let file_name = Self::index_file_name(relation.name(), attr_byte_offset);
        let path = dir.join(&file_name);

        match DiskManager::open(&path) {
            Ok(disk) => {
                let buffer_pool =
                    BufferPool::new(disk, Box::new(LruReplacer::new(pool_frames)), pool_frames);
                Self::open_existing(buffer_pool, file_name, relation, attr_byte_offset, attr_type)
            }
            Err(err) if is_not_found(&err) => {
                let disk = DiskManager::create(&path)?;
                let buffer_pool =
                    BufferPool::new(disk, Box::new(LruReplacer::new(pool_frames)), pool_frames);
                Self::build(buffer_pool, file_name, relation, attr_byte_offset, attr_type)
            }
            Err(err) => Err(err),
        }
    }

    fn open_existing(
        buffer_pool: BufferPool,
        file_name: String,
        relation: &RelationHeap,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let meta_guard = buffer_pool.fetch_page(META_PAGE_ID)?;
        if meta_guard[0] != kind::META {
            return Err(IndexError::BadIndexInfo(file_name).into());
        }
        let meta = MetaPage::from_bytes(&meta_guard);
        drop(meta_guard);

        // The header stores at most 19 name bytes; compare like for like.
        let stored_name = meta.relation_name();
        let given_name: String = relation.name().chars().take(19).collect();
        if stored_name != given_name
            || meta.attr_byte_offset() != attr_byte_offset
            || meta.attr_type_tag() != attr_type.tag()
        {
            return Err(IndexError::BadIndexInfo(file_name).into());
        }

        debug!("opened index {} with root {}", file_name, meta.root_page_id());
        Ok(Self {
            buffer_pool,
            root_page_id: meta.root_page_id(),
            scan: None,
            file_name,
            attr_byte_offset,
            attr_type,
        })
    }

    /// Initialize a fresh index file and bulk load it from the relation.
    fn build(
        buffer_pool: BufferPool,
        file_name: String,
        relation: &RelationHeap,
        attr_byte_offset: usize,
        attr_type: AttrType,
    ) -> Result<Self> {
        let (meta_id, mut meta_guard) = buffer_pool.new_page()?;
        debug_assert_eq!(meta_id, META_PAGE_ID);
        let (root_id, mut root_guard) = buffer_pool.new_page()?;

        let meta = MetaPage::new(relation.name(), attr_byte_offset, attr_type.tag(), root_id);
        meta_guard.copy_from_slice(meta.data());
        root_guard.copy_from_slice(LeafNode::new().data());
        drop(root_guard);
        drop(meta_guard);

        let mut index = Self {
            buffer_pool,
            root_page_id: root_id,
            scan: None,
            file_name,
            attr_byte_offset,
            attr_type,
        };

        let mut loaded = 0usize;
        for item in relation.scan()? {
            let (rid, record) = item?;
            let key = read_attr(&record, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
            loaded += 1;
        }
        index.flush()?;
        debug!("built index {} over {} records", index.file_name, loaded);

        Ok(index)
    }

    /// Name of the backing index file.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn attr_byte_offset(&self) -> usize {
        self.attr_byte_offset
    }

    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id
    }

    /// Levels in the tree, counting the root level and the leaf level.
    pub fn height(&self) -> Result<u32> {
        let mut levels = 1;
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            if guard[0] == kind::LEAF {
                return Ok(levels);
            }
            let child = internal_page::read_child(&guard, 0);
            drop(guard);
            page_id = child;
            levels += 1;
        }
    }

    /// Number of pages the index currently holds pinned. Zero between public
    /// operations, one while a scan is positioned on a leaf.
    pub fn pinned_pages(&self) -> usize {
        self.buffer_pool.pinned_frames()
    }

    /// Insert one `(key, rid)` entry.
    pub fn insert_entry(&mut self, key: i32, rid: RecordId) -> Result<()> {
        if let Some((separator, right)) = self.insert_rec(self.root_page_id, key, rid)? {
            self.grow_root(separator, right)?;
        }
        Ok(())
    }

    /// Recursive descent for insert. Returns the pushed-up
    /// `(separator, new right page)` pair when the visited node split.
    fn insert_rec(
        &mut self,
        page_id: PageId,
        key: i32,
        rid: RecordId,
    ) -> Result<Option<(i32, PageId)>> {
        let guard = self.buffer_pool.fetch_page(page_id)?;

        if guard[0] == kind::LEAF {
            let mut leaf = LeafNode::from_bytes(&guard);
            drop(guard);

            if !leaf.is_full() {
                leaf.insert(key, rid);
                let mut write_guard = self.buffer_pool.fetch_page_write(page_id)?;
                write_guard.copy_from_slice(leaf.data());
                return Ok(None);
            }

            let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
            let mut right = leaf.split(key, rid);
            right.set_right_sibling(leaf.right_sibling());
            leaf.set_right_sibling(Some(new_page_id));
            let separator = right.key(0);

            let mut write_guard = self.buffer_pool.fetch_page_write(page_id)?;
            write_guard.copy_from_slice(leaf.data());
            new_guard.copy_from_slice(right.data());
            debug!("leaf {} split, right sibling now {}", page_id, new_page_id);
            return Ok(Some((separator, new_page_id)));
        }

        let child = internal_page::select_child(&guard, key);
        drop(guard);

        let Some((separator, new_child)) = self.insert_rec(child, key, rid)? else {
            return Ok(None);
        };

        let guard = self.buffer_pool.fetch_page(page_id)?;
        let mut node = InternalNode::from_bytes(&guard);
        drop(guard);

        if !node.is_full() {
            node.insert(separator, new_child);
            let mut write_guard = self.buffer_pool.fetch_page_write(page_id)?;
            write_guard.copy_from_slice(node.data());
            return Ok(None);
        }

        let (new_page_id, mut new_guard) = self.buffer_pool.new_page()?;
        let (promoted, right) = node.split(separator, new_child);
        let mut write_guard = self.buffer_pool.fetch_page_write(page_id)?;
        write_guard.copy_from_slice(node.data());
        new_guard.copy_from_slice(right.data());
        debug!(
            "internal {} split, promoted {} with right {}",
            page_id, promoted, new_page_id
        );
        Ok(Some((promoted, new_page_id)))
    }

    /// A split reached the root: put a new internal root over the old root
    /// and the pushed-up sibling, and rewrite the header to match.
    fn grow_root(&mut self, separator: i32, right: PageId) -> Result<()> {
        let old_root = self.root_page_id;
        let (new_root_id, mut guard) = self.buffer_pool.new_page()?;
        guard.copy_from_slice(InternalNode::new_root(separator, old_root, right).data());
        drop(guard);

        let mut meta_guard = self.buffer_pool.fetch_page_write(META_PAGE_ID)?;
        meta_page::write_root_page_id(&mut meta_guard, new_root_id);
        drop(meta_guard);

        self.root_page_id = new_root_id;
        debug!("root grew to {} over {} and {}", new_root_id, old_root, right);
        Ok(())
    }

    /// Write all dirty index pages back and sync the file.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_all()
    }

    /// Walk the whole tree and check its structural invariants: sorted keys
    /// in every node, separator bounds on every subtree, a sibling chain that
    /// reaches every leaf in key order, and the header agreeing on the root.
    pub fn validate(&self) -> Result<()> {
        let meta_guard = self.buffer_pool.fetch_page(META_PAGE_ID)?;
        let on_disk_root = meta_page::read_root_page_id(&meta_guard);
        drop(meta_guard);
        ensure!(
            on_disk_root == self.root_page_id,
            "header root {} does not match in-memory root {}",
            on_disk_root,
            self.root_page_id
        );

        let mut reachable_leaves = 0usize;
        self.check_subtree(self.root_page_id, i64::MIN, i64::MAX, &mut reachable_leaves)?;

        let mut chained_leaves = 0usize;
        let mut prev = i64::MIN;
        let mut page_id = self.leftmost_leaf()?;
        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            ensure!(guard[0] == kind::LEAF, "chained page {} is not a leaf", page_id);
            for index in 0..leaf_page::read_occupancy(&guard) {
                let key = leaf_page::read_key(&guard, index) as i64;
                ensure!(key >= prev, "leaf chain goes backwards at {}", page_id);
                prev = key;
            }
            chained_leaves += 1;
            let sibling = leaf_page::read_right_sibling(&guard);
            drop(guard);
            match sibling {
                Some(next) => page_id = next,
                None => break,
            }
        }
        ensure!(
            chained_leaves == reachable_leaves,
            "chain visits {} leaves, tree has {}",
            chained_leaves,
            reachable_leaves
        );
        Ok(())
    }

    /// Check one subtree against its key bounds: every key in it must be in
    /// `[low, high)`. Equal keys live on the right of their separator, so the
    /// lower bound is inclusive.
    fn check_subtree(
        &self,
        page_id: PageId,
        low: i64,
        high: i64,
        leaves: &mut usize,
    ) -> Result<()> {
        let guard = self.buffer_pool.fetch_page(page_id)?;
        match guard[0] {
            kind::LEAF => {
                let mut prev = low;
                for index in 0..leaf_page::read_occupancy(&guard) {
                    let key = leaf_page::read_key(&guard, index) as i64;
                    ensure!(
                        key >= prev && key < high,
                        "leaf {} key {} outside [{}, {})",
                        page_id,
                        key,
                        low,
                        high
                    );
                    prev = key;
                }
                *leaves += 1;
                Ok(())
            }
            kind::INTERNAL => {
                let count = internal_page::read_key_count(&guard);
                ensure!(count > 0, "internal {} has no separators", page_id);

                let mut separators = Vec::with_capacity(count);
                let mut children = Vec::with_capacity(count + 1);
                for index in 0..count {
                    separators.push(internal_page::read_key(&guard, index) as i64);
                    children.push(internal_page::read_child(&guard, index));
                }
                children.push(internal_page::read_child(&guard, count));
                drop(guard);

                let mut prev = low;
                for &separator in &separators {
                    ensure!(
                        separator >= prev && separator < high,
                        "internal {} separator {} outside [{}, {})",
                        page_id,
                        separator,
                        low,
                        high
                    );
                    prev = separator;
                }

                for (index, &child) in children.iter().enumerate() {
                    let child_low = if index == 0 { low } else { separators[index - 1] };
                    let child_high = if index == count { high } else { separators[index] };
                    self.check_subtree(child, child_low, child_high, leaves)?;
                }
                Ok(())
            }
            other => bail!("page {} has unexpected kind {:#04x}", page_id, other),
        }
    }

    fn leftmost_leaf(&self) -> Result<PageId> {
        let mut page_id = self.root_page_id;
        loop {
            let guard = self.buffer_pool.fetch_page(page_id)?;
            match guard[0] {
                kind::LEAF => return Ok(page_id),
                kind::INTERNAL => {
                    let child = internal_page::read_child(&guard, 0);
                    drop(guard);
                    page_id = child;
                }
                other => bail!("page {} has unexpected kind {:#04x}", page_id, other),
            }
        }
    }
}

impl Drop for BTreeIndex {
    fn drop(&mut self) {
        self.scan = None;
        if let Err(err) = self.buffer_pool.flush_all() {
            warn!("flush on close of {} failed: {}", self.file_name, err);
        }
    }
}

/// Read the indexed attribute out of a raw record.
fn read_attr(record: &[u8], attr_byte_offset: usize) -> Result<i32> {
    let bytes = record
        .get(attr_byte_offset..attr_byte_offset + 4)
        .with_context(|| {
            format!(
                "Record of {} bytes has no i32 attribute at offset {}",
                record.len(),
                attr_byte_offset
            )
        })?;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.root_cause()
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    // Test records are [pad u32 | key i32], indexed at offset 4.
    const RECORD_LEN: usize = 8;
    const ATTR_OFFSET: usize = 4;

    fn record(key: i32) -> Vec<u8> {
        let mut bytes = 0xfeedbeefu32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&key.to_le_bytes());
        bytes
    }

    fn empty_relation(dir: &TempDir) -> Result<RelationHeap> {
        RelationHeap::create(dir.path(), "emps", RECORD_LEN, 16)
    }

    fn scan_all(index: &mut BTreeIndex) -> Result<Vec<RecordId>> {
        index.start_scan(i32::MIN, ScanOp::Gte, i32::MAX, ScanOp::Lte)?;
        let mut rids = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => rids.push(rid),
                Err(err)
                    if err.downcast_ref::<IndexError>() == Some(&IndexError::ScanCompleted) =>
                {
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        index.end_scan()?;
        Ok(rids)
    }

    #[test]
    fn test_index_file_name() {
        assert_eq!(BTreeIndex::index_file_name("emps", 4), "emps.4");
    }

    #[test]
    fn test_bulk_load_matches_relation() -> Result<()> {
        let dir = tempdir()?;
        let relation = empty_relation(&dir)?;
        let mut expected = Vec::new();
        for key in [5, 3, 8, 1, 9] {
            expected.push((key, relation.append(&record(key))?));
        }
        expected.sort();

        let mut index = BTreeIndex::open(dir.path(), &relation, ATTR_OFFSET, AttrType::Int32, 16)?;
        index.validate()?;

        let rids = scan_all(&mut index)?;
        let expected_rids: Vec<RecordId> = expected.iter().map(|&(_, rid)| rid).collect();
        assert_eq!(rids, expected_rids);
        assert_eq!(index.pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_reopen_validates_header() -> Result<()> {
        let dir = tempdir()?;
        let relation = empty_relation(&dir)?;
        relation.append(&record(1))?;

        {
            BTreeIndex::open(dir.path(), &relation, ATTR_OFFSET, AttrType::Int32, 16)?;
        }

        // Same arguments reopen cleanly.
        let index = BTreeIndex::open(dir.path(), &relation, ATTR_OFFSET, AttrType::Int32, 16)?;
        assert_eq!(index.file_name(), "emps.4");
        drop(index);

        // A different relation producing the same file name is rejected.
        let other_dir = tempdir()?;
        let other = RelationHeap::create(other_dir.path(), "emps.4", RECORD_LEN, 16)?;
        std::fs::copy(dir.path().join("emps.4"), other_dir.path().join("emps.4.4"))?;
        let err =
            BTreeIndex::open(other_dir.path(), &other, ATTR_OFFSET, AttrType::Int32, 16).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::BadIndexInfo(_))
        ));

        Ok(())
    }

    #[test]
    fn test_insert_after_build() -> Result<()> {
        let dir = tempdir()?;
        let relation = empty_relation(&dir)?;
        let mut index = BTreeIndex::open(dir.path(), &relation, ATTR_OFFSET, AttrType::Int32, 16)?;

        index.insert_entry(2, RecordId::new(9, 0))?;
        index.insert_entry(1, RecordId::new(9, 1))?;
        index.insert_entry(3, RecordId::new(9, 2))?;
        assert_eq!(index.pinned_pages(), 0);

        let rids = scan_all(&mut index)?;
        assert_eq!(
            rids,
            vec![RecordId::new(9, 1), RecordId::new(9, 0), RecordId::new(9, 2)]
        );

        Ok(())
    }

    #[test]
    fn test_empty_index_scan_finds_nothing() -> Result<()> {
        let dir = tempdir()?;
        let relation = empty_relation(&dir)?;
        let mut index = BTreeIndex::open(dir.path(), &relation, ATTR_OFFSET, AttrType::Int32, 16)?;

        let err = index.start_scan(0, ScanOp::Gte, 100, ScanOp::Lte).unwrap_err();
        assert_eq!(
            err.downcast_ref::<IndexError>(),
            Some(&IndexError::NoSuchKey)
        );
        assert_eq!(index.pinned_pages(), 0);

        Ok(())
    }

    #[test]
    fn test_record_too_short_for_attribute() {
        assert!(read_attr(&[0u8; 6], 4).is_err());
        assert_eq!(read_attr(&record(77), 4).unwrap(), 77);
    }

    #[test]
    fn test_leaf_split_keeps_order_and_header() -> Result<()> {
        let dir = tempdir()?;
        let relation = empty_relation(&dir)?;
        let mut index = BTreeIndex::open(dir.path(), &relation, ATTR_OFFSET, AttrType::Int32, 16)?;

        // Enough inserts to split leaves several times and grow the root.
        let total = leaf_page::LEAF_CAPACITY as i32 * 4;
        for key in (0..total).rev() {
            index.insert_entry(key, RecordId::new(1, (key % 1000) as u16))?;
        }
        assert_eq!(index.pinned_pages(), 0);
        index.validate()?;

        // The root is internal now and recorded in the header.
        let root_guard = index.buffer_pool.fetch_page(index.root_page_id())?;
        assert_eq!(root_guard[0], kind::INTERNAL);
        drop(root_guard);

        let rids = scan_all(&mut index)?;
        assert_eq!(rids.len(), total as usize);

        Ok(())
    }
}
