use crate::core::error::{ArchiveError, Result};
use crate::core::region::IndexType;

pub const MAGIC: [u8; 8] = *b"LGAR\x00\x01\x00\x00";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
pub const PAGE_SIZE: usize = 4096;

/// Serialized size of the fixed header fields, checksum included
const ENCODED_LEN: usize = 8 + 2 + 2 + 4 + 1 + 8 * 6 + 4;

/// Log header
///
/// Stored in the header slot of the blocks region. It records the immutable
/// geometry chosen at creation together with the committed write position.
/// Rewriting this header is the commit point of every append batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    /// Magic number: "LGAR\x00\x01\x00\x00"
    pub magic: [u8; 8],

    pub version_major: u16,

    pub version_minor: u16,

    /// Page size in bytes (always 4096)
    pub page_size: u32,

    /// Storage backend chosen at creation
    pub index_type: IndexType,

    /// Ceiling on pages in the blocks region
    pub max_pages: u64,

    /// Ceiling on stored blocks
    pub max_records: u64,

    /// Global index of the first block held here
    pub first_index: u64,

    /// Committed block count
    pub item_count: u64,

    /// Pages in use by committed blocks
    pub current_pages: u64,

    /// Write offset inside the last page in use
    pub current_offset: u64,
}

impl LogHeader {
    pub fn new(index_type: IndexType, max_pages: u64, max_records: u64, first_index: u64) -> Self {
        LogHeader {
            magic: MAGIC,
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            page_size: PAGE_SIZE as u32,
            index_type,
            max_pages,
            max_records,
            first_index,
            item_count: 0,
            current_pages: 0,
            current_offset: 0,
        }
    }

    /// One past the last index held
    pub fn end_index(&self) -> u64 {
        self.first_index + self.item_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(ArchiveError::InvalidMagic);
        }

        if self.version_major != VERSION_MAJOR || self.version_minor != VERSION_MINOR {
            return Err(ArchiveError::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }

        if self.page_size != PAGE_SIZE as u32 {
            return Err(ArchiveError::InvalidPageSize(self.page_size));
        }

        if self.item_count > self.max_records {
            return Err(ArchiveError::Corrupted(format!(
                "item count {} exceeds max records {}",
                self.item_count, self.max_records
            )));
        }

        if self.current_pages > self.max_pages {
            return Err(ArchiveError::Corrupted(format!(
                "current pages {} exceeds max pages {}",
                self.current_pages, self.max_pages
            )));
        }

        if self.first_index.checked_add(self.max_records).is_none() {
            return Err(ArchiveError::Corrupted(format!(
                "index range starting at {} overflows",
                self.first_index
            )));
        }

        if self.current_offset > PAGE_SIZE as u64 {
            return Err(ArchiveError::Corrupted(format!(
                "write offset {} is past the page end",
                self.current_offset
            )));
        }

        if (self.item_count == 0) != (self.current_pages == 0) {
            return Err(ArchiveError::Corrupted(format!(
                "{} items stored in {} pages",
                self.item_count, self.current_pages
            )));
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ENCODED_LEN);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.version_major.to_le_bytes());
        bytes.extend_from_slice(&self.version_minor.to_le_bytes());
        bytes.extend_from_slice(&self.page_size.to_le_bytes());
        bytes.push(self.index_type.to_u8());
        for field in [
            self.max_pages,
            self.max_records,
            self.first_index,
            self.item_count,
            self.current_pages,
            self.current_offset,
        ] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }

        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Parse a header slot; an all-zero slot means the region was never initialized
    pub fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.iter().all(|&b| b == 0) {
            return Ok(None);
        }

        if bytes.len() < ENCODED_LEN {
            return Err(ArchiveError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Insufficient bytes for header",
            )));
        }

        let body = &bytes[..ENCODED_LEN - 4];
        let stored_crc = u32::from_le_bytes(read_array(bytes, ENCODED_LEN - 4));
        if crc32fast::hash(body) != stored_crc {
            return Err(ArchiveError::Corrupted("header checksum mismatch".into()));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let u64_at = |offset: usize| u64::from_le_bytes(read_array(bytes, offset));

        let header = LogHeader {
            magic,
            version_major: u16::from_le_bytes(read_array(bytes, 8)),
            version_minor: u16::from_le_bytes(read_array(bytes, 10)),
            page_size: u32::from_le_bytes(read_array(bytes, 12)),
            index_type: IndexType::from_u8(bytes[16])?,
            max_pages: u64_at(17),
            max_records: u64_at(25),
            first_index: u64_at(33),
            item_count: u64_at(41),
            current_pages: u64_at(49),
            current_offset: u64_at(57),
        };

        header.validate()?;
        Ok(Some(header))
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
