use crate::core::capacity::CapacityManager;
use crate::core::log::TransactionLog;
use crate::core::region::IndexType;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionStats {
    pub id: u64,
    /// Allocated payload bytes
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Pages physically allocated by the backend, if it tracks them
    pub pages: Option<u64>,
    pub type_of: IndexType,
}

/// Point-in-time usage snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub region: RegionStats,
    pub current_pages: u64,
    pub memory: MemoryStats,
    pub current_offset: u64,
    pub item_count: u64,
    pub max_pages: u64,
    pub max_records: u64,
}

impl Stats {
    /// Combine the configured ceilings with the log's committed usage
    pub fn collect(capacity: &CapacityManager, log: &TransactionLog) -> Stats {
        let header = log.header();
        let region = log.blocks_region();

        Stats {
            region: RegionStats {
                id: region.id().0,
                size: region.size(),
            },
            current_pages: header.current_pages,
            memory: MemoryStats {
                pages: Some(region.page_count()),
                type_of: region.kind(),
            },
            current_offset: header.current_offset,
            item_count: header.item_count,
            max_pages: capacity.max_pages(),
            max_records: capacity.max_records(),
        }
    }

    /// Blocks that can still be accepted before the record ceiling
    pub fn remaining_records(&self) -> u64 {
        self.max_records.saturating_sub(self.item_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log::LogGeometry;
    use crate::core::region::{in_memory_region, RegionRole};
    use crate::core::value::Value;

    #[test]
    fn test_collect_reflects_log() {
        let mut log = TransactionLog::create(
            in_memory_region(RegionRole::Blocks),
            in_memory_region(RegionRole::Index),
            LogGeometry {
                index_type: IndexType::Managed,
                max_pages: 8,
                max_records: 5,
                first_index: 0,
            },
        )
        .unwrap();
        let capacity = CapacityManager::from_header(log.header());

        let empty = Stats::collect(&capacity, &log);
        assert_eq!(empty.item_count, 0);
        assert_eq!(empty.current_pages, 0);
        assert_eq!(empty.region.size, 0);
        assert_eq!(empty.remaining_records(), 5);

        log.append(&Value::text("abc")).unwrap();
        let stats = Stats::collect(&capacity, &log);
        assert_eq!(stats.item_count, 1);
        assert_eq!(stats.current_pages, 1);
        assert_eq!(stats.current_offset, 8);
        assert_eq!(stats.region.id, 1);
        assert_eq!(stats.region.size, 4096);
        assert_eq!(stats.memory.pages, Some(1));
        assert_eq!(stats.memory.type_of, IndexType::Managed);
        assert_eq!(stats.max_pages, 8);
        assert_eq!(stats.remaining_records(), 4);
    }

    #[test]
    fn test_json_field_names() {
        let stats = Stats {
            region: RegionStats { id: 1, size: 0 },
            current_pages: 0,
            memory: MemoryStats {
                pages: None,
                type_of: IndexType::Stable,
            },
            current_offset: 0,
            item_count: 0,
            max_pages: 1,
            max_records: 1,
        };
        let json = serde_json::to_value(stats).unwrap();
        assert!(json.get("currentPages").is_some());
        assert!(json.get("itemCount").is_some());
        assert!(json["memory"].get("type_of").is_some());
    }
}
