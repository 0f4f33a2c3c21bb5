//! Ranged scans: positioning on the first in-range entry, stepping along the
//! leaf sibling chain, and the bound predicate.

use crate::access::btree::error::IndexError;
use crate::access::btree::BTreeIndex;
use crate::access::rid::RecordId;
use crate::storage::page::{internal_page, kind, leaf_page, PageId};
use crate::storage::PageReadGuard;
use anyhow::Result;

/// Comparison operators accepted by `start_scan`. The lower bound takes
/// `Gt`/`Gte`, the upper bound `Lt`/`Lte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// State of the one active scan. The current leaf's read guard lives here, so
/// the leaf stays pinned between `scan_next` calls and is released when the
/// scan completes, ends, or the index is dropped.
pub(super) struct ScanState {
    low: i32,
    low_op: ScanOp,
    high: i32,
    high_op: ScanOp,
    /// `None` once the scan has completed and its pin is released.
    leaf: Option<(PageId, PageReadGuard)>,
    next_entry: usize,
}

fn in_range(key: i32, low: i32, low_op: ScanOp, high: i32, high_op: ScanOp) -> bool {
    match (low_op, high_op) {
        (ScanOp::Gt, ScanOp::Lt) => low < key && key < high,
        (ScanOp::Gt, ScanOp::Lte) => low < key && key <= high,
        (ScanOp::Gte, ScanOp::Lt) => low <= key && key < high,
        (ScanOp::Gte, ScanOp::Lte) => low <= key && key <= high,
        _ => false,
    }
}

/// Within a leaf keys are non-decreasing, so the first key past the upper
/// bound proves nothing further can match.
fn past_upper_bound(key: i32, high: i32, high_op: ScanOp) -> bool {
    match high_op {
        ScanOp::Lt => key >= high,
        ScanOp::Lte => key > high,
        _ => false,
    }
}

impl BTreeIndex {
    /// Begin a ranged scan. Positions on the first entry satisfying both
    /// bounds; a running scan is ended first.
    pub fn start_scan(&mut self, low: i32, low_op: ScanOp, high: i32, high_op: ScanOp) -> Result<()> {
        if !matches!(low_op, ScanOp::Gt | ScanOp::Gte)
            || !matches!(high_op, ScanOp::Lt | ScanOp::Lte)
        {
            return Err(IndexError::BadOpcodes.into());
        }
        if low > high {
            return Err(IndexError::BadScanrange.into());
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        // Descend to the leaf whose range covers the lower bound.
        let mut page_id = self.root_page_id;
        let mut guard = self.buffer_pool.fetch_page(page_id)?;
        while guard[0] == kind::INTERNAL {
            let child = internal_page::select_child(&guard, low);
            drop(guard); // release the parent before pinning the child
            page_id = child;
            guard = self.buffer_pool.fetch_page(page_id)?;
        }

        // Walk the sibling chain until a key satisfies both bounds or the
        // upper bound is provably unreachable.
        loop {
            let count = leaf_page::read_occupancy(&guard);
            if count == 0 {
                return Err(IndexError::NoSuchKey.into());
            }
            for index in 0..count {
                let key = leaf_page::read_key(&guard, index);
                if in_range(key, low, low_op, high, high_op) {
                    self.scan = Some(ScanState {
                        low,
                        low_op,
                        high,
                        high_op,
                        leaf: Some((page_id, guard)),
                        next_entry: index,
                    });
                    return Ok(());
                }
                if past_upper_bound(key, high, high_op) {
                    return Err(IndexError::NoSuchKey.into());
                }
            }

            let sibling = leaf_page::read_right_sibling(&guard);
            drop(guard); // release the exhausted leaf before its sibling
            match sibling {
                Some(next) => {
                    page_id = next;
                    guard = self.buffer_pool.fetch_page(page_id)?;
                }
                None => return Err(IndexError::NoSuchKey.into()),
            }
        }
    }

    /// Emit the record id of the next in-range entry.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let state = self
            .scan
            .as_mut()
            .ok_or(IndexError::ScanNotInitialized)?;

        // Move to the right sibling once the current leaf is exhausted.
        if let Some((_, guard)) = &state.leaf {
            if state.next_entry == leaf_page::read_occupancy(guard) {
                let sibling = leaf_page::read_right_sibling(guard);
                state.leaf = None; // unpin before pinning the sibling
                if let Some(next) = sibling {
                    let guard = self.buffer_pool.fetch_page(next)?;
                    state.leaf = Some((next, guard));
                    state.next_entry = 0;
                }
            }
        }

        let (_, guard) = match &state.leaf {
            Some(leaf) => leaf,
            None => return Err(IndexError::ScanCompleted.into()),
        };

        let key = leaf_page::read_key(guard, state.next_entry);
        if in_range(key, state.low, state.low_op, state.high, state.high_op) {
            let rid = leaf_page::read_rid(guard, state.next_entry);
            state.next_entry += 1;
            Ok(rid)
        } else {
            // Keys only grow along the chain, so the scan is done; release
            // the pin now, the scan itself stays initialized until end_scan.
            state.leaf = None;
            Err(IndexError::ScanCompleted.into())
        }
    }

    /// Terminate the active scan and release its pin.
    pub fn end_scan(&mut self) -> Result<()> {
        match self.scan.take() {
            Some(_) => Ok(()),
            None => Err(IndexError::ScanNotInitialized.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_predicate_table() {
        // (low_op, high_op, key, expected) over the range [10, 20]
        let cases = [
            (ScanOp::Gt, ScanOp::Lt, 10, false),
            (ScanOp::Gt, ScanOp::Lt, 15, true),
            (ScanOp::Gt, ScanOp::Lt, 20, false),
            (ScanOp::Gt, ScanOp::Lte, 20, true),
            (ScanOp::Gte, ScanOp::Lt, 10, true),
            (ScanOp::Gte, ScanOp::Lte, 10, true),
            (ScanOp::Gte, ScanOp::Lte, 20, true),
            (ScanOp::Gte, ScanOp::Lte, 21, false),
            (ScanOp::Gte, ScanOp::Lte, 9, false),
        ];
        for (low_op, high_op, key, expected) in cases {
            assert_eq!(
                in_range(key, 10, low_op, 20, high_op),
                expected,
                "key {} with ({:?}, {:?})",
                key,
                low_op,
                high_op
            );
        }
    }

    #[test]
    fn test_past_upper_bound() {
        assert!(past_upper_bound(20, 20, ScanOp::Lt));
        assert!(!past_upper_bound(19, 20, ScanOp::Lt));
        assert!(past_upper_bound(21, 20, ScanOp::Lte));
        assert!(!past_upper_bound(20, 20, ScanOp::Lte));
    }
}
