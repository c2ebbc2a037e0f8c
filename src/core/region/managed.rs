use super::{IndexType, Region, RegionId, RegionRole};
use crate::core::error::{ArchiveError, Result};
use crate::core::header::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Heap-backed region
///
/// Pages live in memory. Nothing reaches disk until [`Region::save`] writes a
/// snapshot, so writes after the last save are lost on restart.
pub struct ManagedRegion {
    role: RegionRole,
    header: Vec<u8>,
    pages: Vec<Vec<u8>>,
    snapshot_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    region_id: RegionId,
    header: Vec<u8>,
    pages: Vec<Vec<u8>>,
}

impl ManagedRegion {
    /// A purely in-memory region
    pub fn new(role: RegionRole) -> Self {
        ManagedRegion {
            role,
            header: vec![0; PAGE_SIZE],
            pages: Vec::new(),
            snapshot_path: None,
        }
    }

    /// Restore from the snapshot at `path` if one exists; saves go to `path`
    pub fn open<P: AsRef<Path>>(path: P, role: RegionRole) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut region = ManagedRegion::new(role);

        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let snapshot: Snapshot = bincode::deserialize(&bytes)?;
            if snapshot.region_id != role.id() {
                return Err(ArchiveError::Corrupted(format!(
                    "snapshot {} belongs to region {:?}, expected {:?}",
                    path.display(),
                    snapshot.region_id,
                    role.id()
                )));
            }
            if snapshot.header.len() != PAGE_SIZE
                || snapshot.pages.iter().any(|p| p.len() != PAGE_SIZE)
            {
                return Err(ArchiveError::Corrupted(format!(
                    "snapshot {} has malformed pages",
                    path.display()
                )));
            }
            region.header = snapshot.header;
            region.pages = snapshot.pages;
            debug!(
                "Restored managed region {:?} from {} ({} pages)",
                role,
                path.display(),
                region.pages.len()
            );
        }

        region.snapshot_path = Some(path);
        Ok(region)
    }

    fn page(&self, page_id: u64) -> Result<&Vec<u8>> {
        self.pages
            .get(page_id as usize)
            .ok_or(ArchiveError::PageOutOfBounds {
                page: page_id,
                pages: self.pages.len() as u64,
            })
    }
}

fn span(offset: usize, len: usize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end <= PAGE_SIZE => Ok(offset..end),
        _ => Err(ArchiveError::RecordTooLarge {
            size: offset.saturating_add(len),
            capacity: PAGE_SIZE,
        }),
    }
}

impl Region for ManagedRegion {
    fn id(&self) -> RegionId {
        self.role.id()
    }

    fn kind(&self) -> IndexType {
        IndexType::Managed
    }

    fn page_count(&self) -> u64 {
        self.pages.len() as u64
    }

    fn page_capacity(&self) -> usize {
        PAGE_SIZE
    }

    fn grow(&mut self, additional: u64) -> Result<u64> {
        let first = self.pages.len() as u64;
        self.pages
            .extend((0..additional).map(|_| vec![0u8; PAGE_SIZE]));
        Ok(first)
    }

    fn write_page(&mut self, page_id: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = span(offset, bytes.len())?;
        let pages = self.pages.len() as u64;
        let page = self
            .pages
            .get_mut(page_id as usize)
            .ok_or(ArchiveError::PageOutOfBounds { page: page_id, pages })?;
        page[range].copy_from_slice(bytes);
        Ok(())
    }

    fn read_page(&self, page_id: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        let range = span(offset, len)?;
        Ok(self.page(page_id)?[range].to_vec())
    }

    fn read_header(&self) -> Result<Vec<u8>> {
        Ok(self.header.clone())
    }

    fn write_header(&mut self, bytes: &[u8]) -> Result<()> {
        let range = span(0, bytes.len())?;
        self.header.fill(0);
        self.header[range].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let snapshot = Snapshot {
            region_id: self.role.id(),
            header: self.header.clone(),
            pages: self.pages.clone(),
        };
        let bytes = bincode::serialize(&snapshot)?;

        // Write-then-rename so a crash never leaves a half-written snapshot
        let tmp = path.with_extension("snapshot.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;

        info!(
            "Saved managed region {:?} to {} ({} pages)",
            self.role,
            path.display(),
            self.pages.len()
        );
        Ok(())
    }
}
