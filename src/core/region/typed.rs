use super::file::RegionFile;
use super::{IndexType, Region, RegionId, RegionRole};
use crate::core::error::{ArchiveError, Result};
use crate::core::page::{Page, PageType};
use std::path::Path;
use tracing::debug;

/// Structurally typed region
///
/// Each page is a [`Page`] tagged with the region's page type and sealed with
/// a SHA-256 checksum of its payload. Every read verifies both.
pub struct TypedRegion {
    file: RegionFile,
    role: RegionRole,
}

impl TypedRegion {
    pub fn open<P: AsRef<Path>>(path: P, role: RegionRole) -> Result<Self> {
        let file = RegionFile::open_or_create(path)?;
        debug!(
            "Opened typed region {:?} at {} ({} pages)",
            role,
            file.path().display(),
            file.pages()
        );
        Ok(TypedRegion { file, role })
    }

    fn load(&self, page_id: u64) -> Result<Page> {
        let raw = self.file.read(page_id, 0, crate::core::header::PAGE_SIZE)?;
        let page = Page::from_bytes(&raw)?;
        if page.page_type() != self.role.page_type() {
            return Err(ArchiveError::Corrupted(format!(
                "page {} has type {:?}, expected {:?}",
                page_id,
                page.page_type(),
                self.role.page_type()
            )));
        }
        if !page.verify_checksum() {
            return Err(ArchiveError::ChecksumMismatch(page_id));
        }
        Ok(page)
    }

    fn store(&mut self, page_id: u64, page: &Page) -> Result<()> {
        self.file.write(page_id, 0, &page.to_bytes())
    }
}

impl Region for TypedRegion {
    fn id(&self) -> RegionId {
        self.role.id()
    }

    fn kind(&self) -> IndexType {
        IndexType::StableTyped
    }

    fn page_count(&self) -> u64 {
        self.file.pages()
    }

    fn page_capacity(&self) -> usize {
        Page::CAPACITY
    }

    fn grow(&mut self, additional: u64) -> Result<u64> {
        let blank = Page::new(self.role.page_type());
        self.file.append_pages(additional, &blank.to_bytes())
    }

    /// A write at offset 0 opens the page: whatever it held before is not
    /// committed data and is replaced by a fresh page.
    fn write_page(&mut self, page_id: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        let mut page = if offset == 0 {
            Page::new(self.role.page_type())
        } else {
            self.load(page_id)?
        };
        page.write_at(offset, bytes)?;
        page.seal();
        self.store(page_id, &page)
    }

    fn read_page(&self, page_id: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        let page = self.load(page_id)?;
        Ok(page.read_at(offset, len)?.to_vec())
    }

    fn read_header(&self) -> Result<Vec<u8>> {
        let raw = self.file.read_header()?;
        if raw.iter().all(|&b| b == 0) {
            return Ok(vec![0; Page::CAPACITY]);
        }

        let page = Page::from_bytes(&raw)?;
        if page.page_type() != PageType::Header || !page.verify_checksum() {
            return Err(ArchiveError::Corrupted("typed header page failed verification".into()));
        }
        Ok(page.data)
    }

    fn write_header(&mut self, bytes: &[u8]) -> Result<()> {
        let page = Page::with_data(PageType::Header, bytes)?;
        self.file.write_header(&page.to_bytes())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::header::PAGE_SIZE;
    use tempfile::TempDir;

    #[test]
    fn test_corrupted_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.region");
        {
            let mut region = TypedRegion::open(&path, RegionRole::Blocks).unwrap();
            region.grow(1).unwrap();
            region.write_page(0, 0, b"payload").unwrap();
            region.sync().unwrap();
        }

        // Flip a payload byte of region page 0 (file page 1, after the 64-byte page header)
        let mut raw = std::fs::read(&path).unwrap();
        raw[PAGE_SIZE + 64 + 2] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        let region = TypedRegion::open(&path, RegionRole::Blocks).unwrap();
        assert!(matches!(
            region.read_page(0, 0, 7),
            Err(ArchiveError::ChecksumMismatch(0))
        ));
    }

    #[test]
    fn test_wrong_page_type_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.region");
        {
            let mut region = TypedRegion::open(&path, RegionRole::Index).unwrap();
            region.grow(1).unwrap();
        }

        let region = TypedRegion::open(&path, RegionRole::Blocks).unwrap();
        assert!(matches!(
            region.read_page(0, 0, 1),
            Err(ArchiveError::Corrupted(_))
        ));
    }

    #[test]
    fn test_zeroed_page_from_interrupted_growth_is_reopened() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.region");
        {
            let mut region = TypedRegion::open(&path, RegionRole::Blocks).unwrap();
            region.grow(1).unwrap();
            region.write_page(0, 0, b"first").unwrap();
            region.sync().unwrap();
        }

        // Extended but never sealed
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(3 * PAGE_SIZE as u64).unwrap();
        drop(file);

        let mut region = TypedRegion::open(&path, RegionRole::Blocks).unwrap();
        assert_eq!(region.page_count(), 2);
        assert!(region.read_page(1, 0, 1).is_err());

        region.write_page(1, 0, b"second").unwrap();
        region.write_page(1, 6, b"-tail").unwrap();
        assert_eq!(region.read_page(1, 0, 11).unwrap(), b"second-tail");
        assert_eq!(region.read_page(0, 0, 5).unwrap(), b"first");
    }

    #[test]
    fn test_grow_seals_blank_pages() {
        let dir = TempDir::new().unwrap();
        let mut region = TypedRegion::open(dir.path().join("b.region"), RegionRole::Index).unwrap();
        assert_eq!(region.grow(3).unwrap(), 0);
        for page in 0..3 {
            assert_eq!(region.read_page(page, 0, 4).unwrap(), vec![0u8; 4]);
        }
    }

    #[test]
    fn test_header_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut region = TypedRegion::open(dir.path().join("b.region"), RegionRole::Blocks).unwrap();
        region.write_header(b"typed header").unwrap();
        let header = region.read_header().unwrap();
        assert_eq!(&header[..12], b"typed header");
        assert_eq!(header.len(), Page::CAPACITY);
    }
}
