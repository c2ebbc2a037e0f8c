//! Write admission
//!
//! Every batch is checked against the record and page ceilings before any byte
//! is written. A batch is admitted whole or not at all.

use crate::core::header::LogHeader;

/// Why a batch was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullReason {
    /// The batch would push the block count past `max_records`
    Records { needed: u64, remaining: u64 },
    /// The batch would need more pages than `max_pages`
    Pages { needed: u64, max: u64 },
}

/// Outcome of [`CapacityManager::authorize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Proceed,
    Full(FullReason),
}

impl Authorization {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Authorization::Proceed)
    }
}

/// Page and record ceilings for one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityManager {
    max_pages: u64,
    max_records: u64,
}

impl CapacityManager {
    pub fn new(max_pages: u64, max_records: u64) -> Self {
        CapacityManager {
            max_pages,
            max_records,
        }
    }

    pub fn from_header(header: &LogHeader) -> Self {
        CapacityManager::new(header.max_pages, header.max_records)
    }

    pub fn max_pages(&self) -> u64 {
        self.max_pages
    }

    pub fn max_records(&self) -> u64 {
        self.max_records
    }

    /// Blocks that can still be accepted, ignoring page usage
    pub fn remaining_records(&self, item_count: u64) -> u64 {
        self.max_records.saturating_sub(item_count)
    }

    /// Decide whether `batch_size` more blocks occupying `pages_after` pages in total fit
    pub fn authorize(&self, item_count: u64, batch_size: u64, pages_after: u64) -> Authorization {
        let remaining = self.remaining_records(item_count);
        if batch_size > remaining {
            return Authorization::Full(FullReason::Records {
                needed: batch_size,
                remaining,
            });
        }

        if pages_after > self.max_pages {
            return Authorization::Full(FullReason::Pages {
                needed: pages_after,
                max: self.max_pages,
            });
        }

        Authorization::Proceed
    }

    /// Whether the archive can never accept another block
    ///
    /// `tail_room` is the free space in the last page in use and
    /// `smallest_block` the smallest encoded block size possible.
    pub fn is_exhausted(
        &self,
        item_count: u64,
        current_pages: u64,
        tail_room: usize,
        smallest_block: usize,
    ) -> bool {
        if self.remaining_records(item_count) == 0 {
            return true;
        }
        current_pages >= self.max_pages && tail_room < smallest_block
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proceed_within_limits() {
        let cap = CapacityManager::new(4, 10);
        assert_eq!(cap.authorize(0, 10, 4), Authorization::Proceed);
        assert_eq!(cap.authorize(9, 1, 1), Authorization::Proceed);
        assert_eq!(cap.authorize(10, 0, 4), Authorization::Proceed);
    }

    #[test]
    fn test_record_ceiling() {
        let cap = CapacityManager::new(4, 10);
        assert_eq!(
            cap.authorize(9, 2, 1),
            Authorization::Full(FullReason::Records {
                needed: 2,
                remaining: 1
            })
        );
        assert!(!cap.authorize(10, 1, 1).is_proceed());
    }

    #[test]
    fn test_page_ceiling() {
        let cap = CapacityManager::new(4, 100);
        assert_eq!(
            cap.authorize(0, 1, 5),
            Authorization::Full(FullReason::Pages { needed: 5, max: 4 })
        );
    }

    #[test]
    fn test_remaining_records_saturates() {
        let cap = CapacityManager::new(1, 3);
        assert_eq!(cap.remaining_records(1), 2);
        assert_eq!(cap.remaining_records(5), 0);
    }

    #[test]
    fn test_exhaustion() {
        let cap = CapacityManager::new(2, 10);
        assert!(!cap.is_exhausted(3, 1, 0, 5));
        assert!(!cap.is_exhausted(3, 2, 5, 5));
        assert!(cap.is_exhausted(3, 2, 4, 5));
        assert!(cap.is_exhausted(10, 0, 4096, 5));
    }
}
