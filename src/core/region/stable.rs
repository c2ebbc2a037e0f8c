use super::file::RegionFile;
use super::{IndexType, Region, RegionId, RegionRole};
use crate::core::error::Result;
use crate::core::header::PAGE_SIZE;
use std::path::Path;
use tracing::debug;

/// Raw byte region: every page byte is payload
pub struct StableRegion {
    file: RegionFile,
    role: RegionRole,
}

impl StableRegion {
    pub fn open<P: AsRef<Path>>(path: P, role: RegionRole) -> Result<Self> {
        let file = RegionFile::open_or_create(path)?;
        debug!(
            "Opened stable region {:?} at {} ({} pages)",
            role,
            file.path().display(),
            file.pages()
        );
        Ok(StableRegion { file, role })
    }
}

impl Region for StableRegion {
    fn id(&self) -> RegionId {
        self.role.id()
    }

    fn kind(&self) -> IndexType {
        IndexType::Stable
    }

    fn page_count(&self) -> u64 {
        self.file.pages()
    }

    fn page_capacity(&self) -> usize {
        PAGE_SIZE
    }

    fn grow(&mut self, additional: u64) -> Result<u64> {
        self.file.extend(additional)
    }

    fn write_page(&mut self, page_id: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        self.file.write(page_id, offset, bytes)
    }

    fn read_page(&self, page_id: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.file.read(page_id, offset, len)
    }

    fn read_header(&self) -> Result<Vec<u8>> {
        self.file.read_header()
    }

    fn write_header(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_header(bytes)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }
}
