//! Durable TxIndex → location map
//!
//! Entry `i` (the `i`-th block held by this archive) is a fixed 16-byte record
//! in the index region, so a restart reloads the exact same assignment without
//! rescanning block pages.

use crate::core::error::{ArchiveError, Result};
use crate::core::region::Region;

/// Serialized size of one [`Location`]
pub const ENTRY_SIZE: usize = 16;

/// Where one encoded block lives in the blocks region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub page: u32,
    pub offset: u32,
    pub len: u32,
    /// CRC32 of the encoded block
    pub checksum: u32,
}

impl Location {
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.page.to_le_bytes());
        out[4..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.len.to_le_bytes());
        out[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Location {
            page: word(0),
            offset: word(4),
            len: word(8),
            checksum: word(12),
        }
    }

    /// Byte just past the record inside its page
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.len as u64
    }
}

/// Location index backed by its own region
pub struct LocationIndex {
    region: Box<dyn Region>,
    entries: Vec<Location>,
}

impl LocationIndex {
    /// An index with no entries
    pub fn new(region: Box<dyn Region>) -> Self {
        LocationIndex {
            region,
            entries: Vec::new(),
        }
    }

    /// Reload the first `count` committed entries
    pub fn load(region: Box<dyn Region>, count: u64) -> Result<Self> {
        let mut index = LocationIndex::new(region);
        let per_page = index.entries_per_page();
        let pages_needed = count.div_ceil(per_page);

        if index.region.page_count() < pages_needed {
            return Err(ArchiveError::Corrupted(format!(
                "index region holds {} pages, {} entries need {}",
                index.region.page_count(),
                count,
                pages_needed
            )));
        }

        index.entries.reserve(count as usize);
        for page in 0..pages_needed {
            let in_page = (count - page * per_page).min(per_page) as usize;
            let raw = index.region.read_page(page, 0, in_page * ENTRY_SIZE)?;
            index
                .entries
                .extend(raw.chunks_exact(ENTRY_SIZE).map(Location::from_bytes));
        }

        Ok(index)
    }

    fn entries_per_page(&self) -> u64 {
        (self.region.page_capacity() / ENTRY_SIZE) as u64
    }

    /// Committed entry count
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: u64) -> Option<Location> {
        self.entries.get(usize::try_from(position).ok()?).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.entries.iter()
    }

    pub fn region(&self) -> &dyn Region {
        self.region.as_ref()
    }

    /// Write entries for the next batch to the region without publishing them
    ///
    /// Staged entries become visible only through [`LocationIndex::publish`],
    /// which the log calls after the header commit.
    pub fn stage(&mut self, locations: &[Location]) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }

        let per_page = self.entries_per_page();
        let start = self.len();
        let end = start + locations.len() as u64;
        let pages_needed = end.div_ceil(per_page);
        let have = self.region.page_count();
        if have < pages_needed {
            self.region.grow(pages_needed - have)?;
        }

        // One write per touched page
        let mut done = 0usize;
        while done < locations.len() {
            let position = start + done as u64;
            let page = position / per_page;
            let slot = (position % per_page) as usize;
            let fits = (per_page as usize - slot).min(locations.len() - done);

            let mut bytes = Vec::with_capacity(fits * ENTRY_SIZE);
            for loc in &locations[done..done + fits] {
                bytes.extend_from_slice(&loc.to_bytes());
            }
            self.region.write_page(page, slot * ENTRY_SIZE, &bytes)?;
            done += fits;
        }

        Ok(())
    }

    /// Make staged entries visible
    pub fn publish(&mut self, locations: &[Location]) {
        self.entries.extend_from_slice(locations);
    }

    pub fn sync(&mut self) -> Result<()> {
        self.region.sync()
    }

    pub fn save(&mut self) -> Result<()> {
        self.region.save()
    }
}
