use crate::storage::page::{PageId, kind};
use crate::storage::PAGE_SIZE;

// Byte layout (little-endian):
//   0       kind (0x01)
//   4..8    attribute byte offset
//   8       attribute type tag
//   12..16  root page id
//   16..36  relation name, NUL-terminated
const ATTR_OFFSET_POS: usize = 4;
const ATTR_TYPE_POS: usize = 8;
const ROOT_PAGE_POS: usize = 12;
const NAME_POS: usize = 16;
const NAME_LEN: usize = 20;

/// The header page of an index file (always page 0). Records what the index
/// was built over so a reopen can reject mismatched constructor arguments,
/// plus the current root page id, which root growth rewrites in place.
pub struct MetaPage {
    data: [u8; PAGE_SIZE],
}

impl MetaPage {
    pub fn new(relation_name: &str, attr_byte_offset: usize, attr_type_tag: u8, root: PageId) -> Self {
        let mut page = Self {
            data: [0; PAGE_SIZE],
        };
        page.data[0] = kind::META;
        page.data[ATTR_OFFSET_POS..ATTR_OFFSET_POS + 4]
            .copy_from_slice(&(attr_byte_offset as u32).to_le_bytes());
        page.data[ATTR_TYPE_POS] = attr_type_tag;
        page.set_root_page_id(root);

        // Truncate to 19 bytes; the 20th is always the terminator.
        let name = relation_name.as_bytes();
        let len = name.len().min(NAME_LEN - 1);
        page.data[NAME_POS..NAME_POS + len].copy_from_slice(&name[..len]);

        page
    }

    pub fn from_bytes(bytes: &[u8; PAGE_SIZE]) -> Self {
        debug_assert_eq!(bytes[0], kind::META);
        Self { data: *bytes }
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn relation_name(&self) -> String {
        let raw = &self.data[NAME_POS..NAME_POS + NAME_LEN];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn attr_byte_offset(&self) -> usize {
        u32::from_le_bytes(
            self.data[ATTR_OFFSET_POS..ATTR_OFFSET_POS + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    pub fn attr_type_tag(&self) -> u8 {
        self.data[ATTR_TYPE_POS]
    }

    pub fn root_page_id(&self) -> PageId {
        PageId(u32::from_le_bytes(
            self.data[ROOT_PAGE_POS..ROOT_PAGE_POS + 4].try_into().unwrap(),
        ))
    }

    pub fn set_root_page_id(&mut self, root: PageId) {
        self.data[ROOT_PAGE_POS..ROOT_PAGE_POS + 4].copy_from_slice(&root.0.to_le_bytes());
    }
}

/// Read the root page id straight off a pinned header page.
pub fn read_root_page_id(data: &[u8; PAGE_SIZE]) -> PageId {
    PageId(u32::from_le_bytes(
        data[ROOT_PAGE_POS..ROOT_PAGE_POS + 4].try_into().unwrap(),
    ))
}

/// Rewrite the root page id on a pinned header page.
pub fn write_root_page_id(data: &mut [u8; PAGE_SIZE], root: PageId) {
    data[ROOT_PAGE_POS..ROOT_PAGE_POS + 4].copy_from_slice(&root.0.to_le_bytes());
}
