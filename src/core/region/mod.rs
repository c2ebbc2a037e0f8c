//! Growable page regions backing the transaction log
//!
//! A region is an identified, contiguously addressed extent of fixed-size
//! pages with a separate header slot. Three backends exist, chosen once at
//! creation through [`IndexType`]:
//!
//! - [`stable::StableRegion`] - raw untyped pages in a file
//! - [`typed::TypedRegion`] - pages carrying a type tag and SHA-256 checksum
//! - [`managed::ManagedRegion`] - heap pages, persisted only by an explicit save

pub mod file;
pub mod managed;
pub mod stable;
pub mod typed;

use crate::core::error::{ArchiveError, Result};
use crate::core::page::PageType;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use managed::ManagedRegion;
pub use stable::StableRegion;
pub use typed::TypedRegion;

/// Storage backend strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IndexType {
    #[default]
    Stable,
    StableTyped,
    Managed,
}

impl IndexType {
    pub fn to_u8(self) -> u8 {
        match self {
            IndexType::Stable => 0,
            IndexType::StableTyped => 1,
            IndexType::Managed => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(IndexType::Stable),
            1 => Ok(IndexType::StableTyped),
            2 => Ok(IndexType::Managed),
            _ => Err(ArchiveError::InvalidIndexType(value)),
        }
    }
}

impl std::str::FromStr for IndexType {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "stable" => Ok(IndexType::Stable),
            "stable-typed" | "stable_typed" | "stabletyped" => Ok(IndexType::StableTyped),
            "managed" => Ok(IndexType::Managed),
            _ => Err(ArchiveError::InvalidConfig(format!(
                "unknown index type '{}' (valid: stable, stable-typed, managed)",
                s
            ))),
        }
    }
}

/// Region identity, stable across restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub u64);

/// What a region stores inside an archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRole {
    Blocks,
    Index,
}

impl RegionRole {
    pub fn id(self) -> RegionId {
        match self {
            RegionRole::Blocks => RegionId(1),
            RegionRole::Index => RegionId(2),
        }
    }

    pub fn page_type(self) -> PageType {
        match self {
            RegionRole::Blocks => PageType::Blocks,
            RegionRole::Index => PageType::Index,
        }
    }

    fn file_stem(self) -> &'static str {
        match self {
            RegionRole::Blocks => "blocks",
            RegionRole::Index => "index",
        }
    }

    /// File name used by the file-backed kinds
    pub fn region_file(self) -> String {
        format!("{}.region", self.file_stem())
    }

    /// File name used by managed snapshots
    pub fn snapshot_file(self) -> String {
        format!("{}.snapshot", self.file_stem())
    }
}

/// Page storage capability
///
/// Pages are allocated only at the tail and are never released. Reads take
/// `&self` and must not change observable state.
pub trait Region: Send {
    fn id(&self) -> RegionId;

    fn kind(&self) -> IndexType;

    /// Pages currently allocated
    fn page_count(&self) -> u64;

    /// Payload bytes usable in one page
    fn page_capacity(&self) -> usize;

    /// Size of the allocated extent in bytes
    fn size(&self) -> u64 {
        self.page_count() * self.page_capacity() as u64
    }

    /// Add `additional` zeroed pages, returning the id of the first new one
    fn grow(&mut self, additional: u64) -> Result<u64>;

    fn allocate_page(&mut self) -> Result<u64> {
        self.grow(1)
    }

    fn write_page(&mut self, page_id: u64, offset: usize, bytes: &[u8]) -> Result<()>;

    fn read_page(&self, page_id: u64, offset: usize, len: usize) -> Result<Vec<u8>>;

    /// Contents of the header slot (all zeros if never written)
    fn read_header(&self) -> Result<Vec<u8>>;

    fn write_header(&mut self, bytes: &[u8]) -> Result<()>;

    /// Make completed writes durable where the backend supports it
    fn sync(&mut self) -> Result<()>;

    /// Lifecycle save point (shutdown or upgrade)
    fn save(&mut self) -> Result<()> {
        self.sync()
    }
}

/// Open (or create) the region of `kind` for `role` under `dir`
pub fn open_region(kind: IndexType, dir: &Path, role: RegionRole) -> Result<Box<dyn Region>> {
    let region: Box<dyn Region> = match kind {
        IndexType::Stable => Box::new(StableRegion::open(dir.join(role.region_file()), role)?),
        IndexType::StableTyped => {
            Box::new(TypedRegion::open(dir.join(role.region_file()), role)?)
        }
        IndexType::Managed => Box::new(ManagedRegion::open(dir.join(role.snapshot_file()), role)?),
    };
    Ok(region)
}

/// A region that lives only in memory and is never persisted
pub fn in_memory_region(role: RegionRole) -> Box<dyn Region> {
    Box::new(ManagedRegion::new(role))
}
