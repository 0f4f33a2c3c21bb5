use std::cmp::Ordering;

/// Identifies one record in a relation. The index stores these as opaque
/// atoms; ordering is by page, then slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub page_number: u32,
    pub slot_number: u16,
}

impl RecordId {
    pub fn new(page_number: u32, slot_number: u16) -> Self {
        Self {
            page_number,
            slot_number,
        }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.page_number
            .cmp(&other.page_number)
            .then(self.slot_number.cmp(&other.slot_number))
    }
}
