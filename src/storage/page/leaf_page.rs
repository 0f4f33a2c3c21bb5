use crate::access::rid::RecordId;
use crate::storage::page::{PageId, kind};
use crate::storage::PAGE_SIZE;

// Byte layout (little-endian):
//   0      kind (0x02)
//   2..4   occupancy (entry count)
//   4..8   right sibling page id, 0 = none
//   16..   entries, 10 bytes each: key i32 | rid page u32 | rid slot u16
const OCCUPANCY_POS: usize = 2;
const SIBLING_POS: usize = 4;
const HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 10;

/// Number of `(key, rid)` slots in one leaf page.
pub const LEAF_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / ENTRY_SIZE;

fn entry_pos(index: usize) -> usize {
    HEADER_SIZE + index * ENTRY_SIZE
}

/// Entry count, read straight off a pinned page.
pub fn read_occupancy(data: &[u8; PAGE_SIZE]) -> usize {
    u16::from_le_bytes(data[OCCUPANCY_POS..OCCUPANCY_POS + 2].try_into().unwrap()) as usize
}

pub fn read_key(data: &[u8; PAGE_SIZE], index: usize) -> i32 {
    let pos = entry_pos(index);
    i32::from_le_bytes(data[pos..pos + 4].try_into().unwrap())
}

pub fn read_rid(data: &[u8; PAGE_SIZE], index: usize) -> RecordId {
    let pos = entry_pos(index);
    RecordId::new(
        u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap()),
        u16::from_le_bytes(data[pos + 8..pos + 10].try_into().unwrap()),
    )
}

pub fn read_right_sibling(data: &[u8; PAGE_SIZE]) -> Option<PageId> {
    let raw = u32::from_le_bytes(data[SIBLING_POS..SIBLING_POS + 4].try_into().unwrap());
    if raw == 0 { None } else { Some(PageId(raw)) }
}

/// An owned leaf node image. Mutating paths copy the pinned page in, edit,
/// and copy back through a write guard; read-only paths use the `read_*`
/// accessors directly on the guard.
pub struct LeafNode {
    data: [u8; PAGE_SIZE],
}

impl LeafNode {
    pub fn new() -> Self {
        let mut node = Self {
            data: [0; PAGE_SIZE],
        };
        node.data[0] = kind::LEAF;
        node
    }

    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Self {
        debug_assert_eq!(bytes[0], kind::LEAF);
        Self { data: *bytes }
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn occupancy(&self) -> usize {
        read_occupancy(&self.data)
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() == LEAF_CAPACITY
    }

    pub fn key(&self, index: usize) -> i32 {
        debug_assert!(index < self.occupancy());
        read_key(&self.data, index)
    }

    pub fn rid(&self, index: usize) -> RecordId {
        debug_assert!(index < self.occupancy());
        read_rid(&self.data, index)
    }

    pub fn right_sibling(&self) -> Option<PageId> {
        read_right_sibling(&self.data)
    }

    pub fn set_right_sibling(&mut self, sibling: Option<PageId>) {
        let raw = sibling.map(|p| p.0).unwrap_or(0);
        self.data[SIBLING_POS..SIBLING_POS + 4].copy_from_slice(&raw.to_le_bytes());
    }

    fn set_occupancy(&mut self, count: usize) {
        self.data[OCCUPANCY_POS..OCCUPANCY_POS + 2]
            .copy_from_slice(&(count as u16).to_le_bytes());
    }

    fn write_entry(&mut self, index: usize, entry_key: i32, rid: RecordId) {
        let pos = entry_pos(index);
        self.data[pos..pos + 4].copy_from_slice(&entry_key.to_le_bytes());
        self.data[pos + 4..pos + 8].copy_from_slice(&rid.page_number.to_le_bytes());
        self.data[pos + 8..pos + 10].copy_from_slice(&rid.slot_number.to_le_bytes());
    }

    /// Insert into a non-full leaf, keeping keys non-decreasing. Entries with
    /// strictly greater keys shift one slot right, so equal keys stay in
    /// arrival order.
    pub fn insert(&mut self, entry_key: i32, rid: RecordId) {
        let count = self.occupancy();
        debug_assert!(count < LEAF_CAPACITY);

        let mut index = count;
        while index > 0 && read_key(&self.data, index - 1) > entry_key {
            index -= 1;
        }
        if index < count {
            self.data
                .copy_within(entry_pos(index)..entry_pos(count), entry_pos(index + 1));
        }
        self.write_entry(index, entry_key, rid);
        self.set_occupancy(count + 1);
    }

    /// Split a full leaf. The upper half moves into the returned right node,
    /// vacated slots are zeroed, and the incoming entry lands in whichever
    /// half covers its key. The caller threads the sibling chain and pushes
    /// `(right.key(0), right page id)` up to the parent.
    pub fn split(&mut self, entry_key: i32, rid: RecordId) -> LeafNode {
        debug_assert!(self.is_full());

        let mut mid = LEAF_CAPACITY / 2;
        if LEAF_CAPACITY % 2 == 1 && self.key(mid) < entry_key {
            mid += 1;
        }

        let mut right = LeafNode::new();
        right.data[entry_pos(0)..entry_pos(LEAF_CAPACITY - mid)]
            .copy_from_slice(&self.data[entry_pos(mid)..entry_pos(LEAF_CAPACITY)]);
        right.set_occupancy(LEAF_CAPACITY - mid);

        self.data[entry_pos(mid)..entry_pos(LEAF_CAPACITY)].fill(0);
        self.set_occupancy(mid);

        if self.key(mid - 1) < entry_key {
            right.insert(entry_key, rid);
        } else {
            self.insert(entry_key, rid);
        }
        right
    }
}

impl Default for LeafNode {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u32) -> RecordId {
        RecordId::new(n, 0)
    }

    #[test]
    fn test_new_leaf_is_empty() {
        let leaf = LeafNode::new();
        assert_eq!(leaf.data()[0], kind::LEAF);
        assert_eq!(leaf.occupancy(), 0);
        assert_eq!(leaf.right_sibling(), None);
        assert!(!leaf.is_full());
    }

    #[test]
    fn test_insert_keeps_sorted_order() {
        let mut leaf = LeafNode::new();
        for key in [5, 3, 8, 1, 4] {
            leaf.insert(key, rid(key as u32));
        }

        let keys: Vec<i32> = (0..leaf.occupancy()).map(|i| leaf.key(i)).collect();
        assert_eq!(keys, vec![1, 3, 4, 5, 8]);
        for i in 0..leaf.occupancy() {
            assert_eq!(leaf.rid(i).page_number, leaf.key(i) as u32);
        }
    }

    #[test]
    fn test_duplicates_keep_arrival_order() {
        let mut leaf = LeafNode::new();
        leaf.insert(7, RecordId::new(1, 0));
        leaf.insert(7, RecordId::new(1, 1));
        leaf.insert(3, RecordId::new(1, 9));
        leaf.insert(7, RecordId::new(1, 2));

        assert_eq!(leaf.key(0), 3);
        for (index, slot) in [(1, 0), (2, 1), (3, 2)] {
            assert_eq!(leaf.key(index), 7);
            assert_eq!(leaf.rid(index).slot_number, slot);
        }
    }

    #[test]
    fn test_sibling_pointer() {
        let mut leaf = LeafNode::new();
        leaf.set_right_sibling(Some(PageId(12)));
        assert_eq!(leaf.right_sibling(), Some(PageId(12)));
        leaf.set_right_sibling(None);
        assert_eq!(leaf.right_sibling(), None);
    }

    #[test]
    fn test_split_incoming_goes_right() {
        let mut leaf = LeafNode::new();
        for key in 0..LEAF_CAPACITY as i32 {
            leaf.insert(key, rid(key as u32));
        }
        assert!(leaf.is_full());

        let incoming = LEAF_CAPACITY as i32 + 10;
        let right = leaf.split(incoming, rid(999));

        let mid = LEAF_CAPACITY / 2;
        assert_eq!(leaf.occupancy(), mid);
        assert_eq!(right.occupancy(), LEAF_CAPACITY - mid + 1);
        assert_eq!(right.key(0), mid as i32);
        assert_eq!(right.key(right.occupancy() - 1), incoming);

        // Vacated slots in the left node are zeroed.
        assert_eq!(read_key(leaf.data(), mid), 0);
        assert_eq!(read_rid(leaf.data(), mid).page_number, 0);
    }

    #[test]
    fn test_split_incoming_goes_left() {
        let mut leaf = LeafNode::new();
        for key in 0..LEAF_CAPACITY as i32 {
            leaf.insert(key + 100, rid(key as u32));
        }

        let right = leaf.split(1, rid(999));

        let mid = LEAF_CAPACITY / 2;
        assert_eq!(leaf.occupancy(), mid + 1);
        assert_eq!(right.occupancy(), LEAF_CAPACITY - mid);
        assert_eq!(leaf.key(0), 1);
        assert_eq!(leaf.key(1), 100);
        assert_eq!(right.key(0), mid as i32 + 100);
    }

    #[test]
    fn test_split_chain_order_is_preserved() {
        let mut leaf = LeafNode::new();
        for key in 0..LEAF_CAPACITY as i32 {
            leaf.insert(key * 2, rid(key as u32));
        }

        let right = leaf.split(LEAF_CAPACITY as i32, rid(999));

        let mut all: Vec<i32> = (0..leaf.occupancy()).map(|i| leaf.key(i)).collect();
        all.extend((0..right.occupancy()).map(|i| right.key(i)));
        let mut sorted = all.clone();
        sorted.sort_unstable();
        assert_eq!(all, sorted);
        assert_eq!(all.len(), LEAF_CAPACITY + 1);
    }

    #[test]
    fn test_raw_readers_match_node_view() {
        let mut leaf = LeafNode::new();
        leaf.insert(42, RecordId::new(3, 7));
        leaf.set_right_sibling(Some(PageId(5)));

        let raw = leaf.data();
        assert_eq!(read_occupancy(raw), 1);
        assert_eq!(read_key(raw, 0), 42);
        assert_eq!(read_rid(raw, 0), RecordId::new(3, 7));
        assert_eq!(read_right_sibling(raw), Some(PageId(5)));
    }
}
