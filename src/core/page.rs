use crate::core::error::{ArchiveError, Result};
use crate::core::header::PAGE_SIZE;
use sha2::{Digest, Sha256};

/// Page types used by typed regions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Log header (file page 0)
    Header = 0,
    /// Encoded block records
    Blocks = 1,
    /// Location index entries
    Index = 2,
}

impl PageType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PageType::Header),
            1 => Ok(PageType::Blocks),
            2 => Ok(PageType::Index),
            _ => Err(ArchiveError::InvalidPageType(value)),
        }
    }
}

/// Page header (64 bytes)
///
/// Layout: page type (1) | SHA-256 of the payload (32) | reserved (31)
#[derive(Debug, Clone)]
pub struct PageHeader {
    pub page_type: PageType,
    pub checksum: [u8; 32],
    pub reserved: [u8; 31],
}

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        PageHeader {
            page_type,
            checksum: [0; 32],
            reserved: [0; 31],
        }
    }

    pub const fn size() -> usize {
        1 + 32 + 31
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::size());
        bytes.push(self.page_type as u8);
        bytes.extend_from_slice(&self.checksum);
        bytes.extend_from_slice(&self.reserved);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::size() {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for page header",
            )));
        }

        let page_type = PageType::from_u8(bytes[0])?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[1..33]);
        let mut reserved = [0u8; 31];
        reserved.copy_from_slice(&bytes[33..64]);

        Ok(PageHeader {
            page_type,
            checksum,
            reserved,
        })
    }
}

/// A self-checking page: [Header (64 bytes)][Payload (4032 bytes)]
///
/// The checksum covers the payload and must be refreshed with [`Page::seal`]
/// after every modification.
pub struct Page {
    pub header: PageHeader,
    pub data: Vec<u8>,
}

impl Page {
    /// Payload bytes available in one page
    pub const CAPACITY: usize = PAGE_SIZE - PageHeader::size();

    /// A zeroed, sealed page
    pub fn new(page_type: PageType) -> Self {
        let mut page = Page {
            header: PageHeader::new(page_type),
            data: vec![0; Self::CAPACITY],
        };
        page.seal();
        page
    }

    pub fn with_data(page_type: PageType, data: &[u8]) -> Result<Self> {
        let mut page = Page::new(page_type);
        page.write_at(0, data)?;
        page.seal();
        Ok(page)
    }

    /// Copy `bytes` into the payload at `offset`; the page must be resealed afterwards
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = Self::payload_end(offset, bytes.len())?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = Self::payload_end(offset, len)?;
        Ok(&self.data[offset..end])
    }

    fn payload_end(offset: usize, len: usize) -> Result<usize> {
        match offset.checked_add(len) {
            Some(end) if end <= Self::CAPACITY => Ok(end),
            _ => Err(ArchiveError::RecordTooLarge {
                size: offset.saturating_add(len),
                capacity: Self::CAPACITY,
            }),
        }
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.data);
        hasher.finalize().into()
    }

    /// Recompute the payload checksum
    pub fn seal(&mut self) {
        self.header.checksum = self.digest();
    }

    pub fn verify_checksum(&self) -> bool {
        self.digest() == self.header.checksum
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(PAGE_SIZE);
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.data);
        debug_assert_eq!(bytes.len(), PAGE_SIZE);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PAGE_SIZE {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "Page bytes too short: {} (expected {})",
                    bytes.len(),
                    PAGE_SIZE
                ),
            )));
        }

        let header = PageHeader::from_bytes(&bytes[..PageHeader::size()])?;
        let data = bytes[PageHeader::size()..PAGE_SIZE].to_vec();

        Ok(Page { header, data })
    }

    pub fn page_type(&self) -> PageType {
        self.header.page_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_type_conversion() {
        assert_eq!(PageType::from_u8(0).unwrap(), PageType::Header);
        assert_eq!(PageType::from_u8(1).unwrap(), PageType::Blocks);
        assert_eq!(PageType::from_u8(2).unwrap(), PageType::Index);
        assert!(matches!(
            PageType::from_u8(9),
            Err(ArchiveError::InvalidPageType(9))
        ));
    }

    #[test]
    fn test_page_header_size() {
        assert_eq!(PageHeader::size(), 64);
        assert_eq!(Page::CAPACITY, PAGE_SIZE - 64);
    }

    #[test]
    fn test_new_page_is_sealed() {
        let page = Page::new(PageType::Blocks);
        assert_ne!(page.header.checksum, [0u8; 32]);
        assert!(page.verify_checksum());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut page = Page::new(PageType::Blocks);
        page.write_at(10, b"record").unwrap();
        assert!(!page.verify_checksum());
        page.seal();
        assert!(page.verify_checksum());

        page.data[11] ^= 0xff;
        assert!(!page.verify_checksum());
    }

    #[test]
    fn test_page_serialization() {
        let page = Page::with_data(PageType::Index, &[1, 2, 3]).unwrap();
        let bytes = page.to_bytes();
        assert_eq!(bytes.len(), PAGE_SIZE);

        let back = Page::from_bytes(&bytes).unwrap();
        assert_eq!(back.page_type(), PageType::Index);
        assert_eq!(back.read_at(0, 3).unwrap(), &[1, 2, 3]);
        assert!(back.verify_checksum());
    }

    #[test]
    fn test_write_past_end_rejected() {
        let mut page = Page::new(PageType::Blocks);
        assert!(page.write_at(Page::CAPACITY - 2, &[0; 2]).is_ok());
        assert!(matches!(
            page.write_at(Page::CAPACITY - 2, &[0; 3]),
            Err(ArchiveError::RecordTooLarge { .. })
        ));
        assert!(page.read_at(usize::MAX, 2).is_err());
    }
}
