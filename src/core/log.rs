//! Append-only transaction log
//!
//! Blocks are encoded with the block codec and packed back to back into the
//! pages of the blocks region. A block never straddles two pages: when the
//! next frame does not fit in the tail of the current page a fresh page is
//! opened. The location index gives O(1) point lookups.
//!
//! A batch is written in three steps:
//!
//! 1. data frames into the blocks region (growing it if needed)
//! 2. location entries into the index region (staged, not yet visible)
//! 3. the log header, which is the commit point
//!
//! Only after the header is durable are the new entries published in memory.
//! A failure at any earlier step leaves the committed state untouched, and
//! the stray bytes are overwritten by the next batch.

use crate::core::capacity::{Authorization, CapacityManager};
use crate::core::codec::{self, TAG_END};
use crate::core::error::{ArchiveError, Result};
use crate::core::header::LogHeader;
use crate::core::index::{Location, LocationIndex};
use crate::core::region::{IndexType, Region};
use crate::core::value::{TxIndex, Value};
use std::ops::Range;
use tracing::{debug, info};

/// Geometry fixed when a log is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogGeometry {
    pub index_type: IndexType,
    pub max_pages: u64,
    pub max_records: u64,
    pub first_index: TxIndex,
}

/// Encoded blocks with their planned placement, ready to commit
#[derive(Debug)]
pub struct PendingBatch {
    base: u64,
    frames: Vec<Vec<u8>>,
    locations: Vec<Location>,
    pages_after: u64,
    offset_after: u64,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Pages in use once this batch is committed
    pub fn pages_after(&self) -> u64 {
        self.pages_after
    }

    /// Total encoded bytes
    pub fn encoded_bytes(&self) -> usize {
        self.frames.iter().map(Vec::len).sum()
    }
}

pub struct TransactionLog {
    blocks: Box<dyn Region>,
    index: LocationIndex,
    header: LogHeader,
}

impl TransactionLog {
    /// Initialize a new, empty log
    pub fn create(
        mut blocks: Box<dyn Region>,
        index: Box<dyn Region>,
        geometry: LogGeometry,
    ) -> Result<Self> {
        check_kinds(blocks.as_ref(), index.as_ref(), geometry.index_type)?;

        if geometry.max_pages == 0 || geometry.max_pages > u32::MAX as u64 {
            return Err(ArchiveError::InvalidConfig(format!(
                "max_pages must be in 1..={}, got {}",
                u32::MAX,
                geometry.max_pages
            )));
        }

        if LogHeader::from_bytes(&blocks.read_header()?)?.is_some() {
            return Err(ArchiveError::AlreadyInitialized);
        }

        let header = LogHeader::new(
            geometry.index_type,
            geometry.max_pages,
            geometry.max_records,
            geometry.first_index,
        );
        header.validate()?;

        blocks.write_header(&header.to_bytes())?;
        blocks.sync()?;

        info!(
            "Created {:?} log: first index {}, max {} records in {} pages",
            geometry.index_type,
            geometry.first_index,
            geometry.max_records,
            geometry.max_pages
        );

        Ok(TransactionLog {
            blocks,
            index: LocationIndex::new(index),
            header,
        })
    }

    /// Reopen a log from its committed header and index
    pub fn restore(blocks: Box<dyn Region>, index: Box<dyn Region>) -> Result<Self> {
        let header =
            LogHeader::from_bytes(&blocks.read_header()?)?.ok_or(ArchiveError::NotInitialized)?;
        check_kinds(blocks.as_ref(), index.as_ref(), header.index_type)?;

        if header.current_pages > blocks.page_count() {
            return Err(ArchiveError::Corrupted(format!(
                "header claims {} pages, blocks region holds {}",
                header.current_pages,
                blocks.page_count()
            )));
        }

        let index = LocationIndex::load(index, header.item_count)?;
        check_locations(&header, &index, blocks.page_capacity())?;

        info!(
            "Restored {:?} log: {} blocks [{}, {}) in {} pages",
            header.index_type,
            header.item_count,
            header.first_index,
            header.end_index(),
            header.current_pages
        );

        Ok(TransactionLog {
            blocks,
            index,
            header,
        })
    }

    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    pub fn blocks_region(&self) -> &dyn Region {
        self.blocks.as_ref()
    }

    pub fn first_index(&self) -> TxIndex {
        self.header.first_index
    }

    pub fn item_count(&self) -> u64 {
        self.header.item_count
    }

    /// Indices held here, `[first_index, first_index + item_count)`
    pub fn held_range(&self) -> Range<TxIndex> {
        self.header.first_index..self.header.end_index()
    }

    /// Payload bytes per page for this backend
    pub fn page_capacity(&self) -> usize {
        self.blocks.page_capacity()
    }

    /// Free bytes at the tail of the last page in use
    pub fn tail_room(&self) -> usize {
        if self.header.current_pages == 0 {
            return 0;
        }
        self.page_capacity()
            .saturating_sub(self.header.current_offset as usize)
    }

    /// Encode `blocks` and plan where each frame goes
    ///
    /// Nothing is written. Fails with `RecordTooLarge` if any encoded block
    /// exceeds a page, or with an encode error for unrepresentable values.
    pub fn prepare(&self, blocks: &[Value]) -> Result<PendingBatch> {
        let capacity = self.page_capacity();
        let mut pages = self.header.current_pages;
        let mut offset = self.header.current_offset as usize;

        let mut frames = Vec::with_capacity(blocks.len());
        let mut locations = Vec::with_capacity(blocks.len());

        for block in blocks {
            let frame = codec::encode(block)?;
            if frame.len() > capacity {
                return Err(ArchiveError::RecordTooLarge {
                    size: frame.len(),
                    capacity,
                });
            }

            if pages == 0 || offset + frame.len() > capacity {
                pages += 1;
                offset = 0;
            }

            locations.push(Location {
                page: (pages - 1) as u32,
                offset: offset as u32,
                len: frame.len() as u32,
                checksum: crc32fast::hash(&frame),
            });
            offset += frame.len();
            frames.push(frame);
        }

        Ok(PendingBatch {
            base: self.header.item_count,
            frames,
            locations,
            pages_after: pages,
            offset_after: offset as u64,
        })
    }

    /// Write a prepared batch and return the indices it was assigned
    pub fn commit(&mut self, batch: PendingBatch) -> Result<Range<TxIndex>> {
        let start = self.header.end_index();
        if batch.is_empty() {
            return Ok(start..start);
        }

        if batch.base != self.header.item_count {
            return Err(ArchiveError::Corrupted(format!(
                "batch planned at item {} but the log holds {}",
                batch.base, self.header.item_count
            )));
        }

        let count = batch.len() as u64;
        if !CapacityManager::from_header(&self.header)
            .authorize(self.header.item_count, count, batch.pages_after)
            .is_proceed()
        {
            return Err(ArchiveError::CapacityExceeded);
        }

        let have = self.blocks.page_count();
        if batch.pages_after > have {
            let first = self.blocks.grow(batch.pages_after - have)?;
            info!(
                "Grew blocks region by {} pages (now {}, first new page {})",
                batch.pages_after - have,
                self.blocks.page_count(),
                first
            );
        }

        self.write_frames(&batch)?;
        self.index.stage(&batch.locations)?;
        self.index.sync()?;
        self.blocks.sync()?;

        let mut next = self.header;
        next.item_count += count;
        next.current_pages = batch.pages_after;
        next.current_offset = batch.offset_after;
        self.blocks.write_header(&next.to_bytes())?;
        self.blocks.sync()?;

        self.header = next;
        self.index.publish(&batch.locations);

        debug!(
            "Committed {} blocks [{}, {}) ({} bytes)",
            count,
            start,
            start + count,
            batch.encoded_bytes()
        );
        Ok(start..start + count)
    }

    /// Frames bound for the same page go out in one write
    fn write_frames(&mut self, batch: &PendingBatch) -> Result<()> {
        let mut run: Vec<u8> = Vec::new();
        let mut run_start: Option<(u32, u32)> = None;

        for (frame, loc) in batch.frames.iter().zip(&batch.locations) {
            match run_start {
                Some((page, _)) if page == loc.page => {}
                Some((page, offset)) => {
                    self.blocks.write_page(page as u64, offset as usize, &run)?;
                    run.clear();
                    run_start = Some((loc.page, loc.offset));
                }
                None => run_start = Some((loc.page, loc.offset)),
            }
            run.extend_from_slice(frame);
        }

        if let Some((page, offset)) = run_start {
            self.blocks.write_page(page as u64, offset as usize, &run)?;
        }
        Ok(())
    }

    /// Append a single block
    ///
    /// Fails with `CapacityExceeded` when the record or page ceiling would be
    /// crossed.
    pub fn append(&mut self, block: &Value) -> Result<TxIndex> {
        let batch = self.prepare(std::slice::from_ref(block))?;
        let capacity = CapacityManager::from_header(&self.header);
        if let Authorization::Full(reason) =
            capacity.authorize(self.header.item_count, 1, batch.pages_after)
        {
            debug!("Append rejected: {:?}", reason);
            return Err(ArchiveError::CapacityExceeded);
        }
        Ok(self.commit(batch)?.start)
    }

    /// Stored block at `index`, or `None` outside the held range
    pub fn get(&self, index: TxIndex) -> Result<Option<Value>> {
        if !self.held_range().contains(&index) {
            return Ok(None);
        }

        let position = index - self.header.first_index;
        let loc = self.index.get(position).ok_or_else(|| {
            ArchiveError::Corrupted(format!("no index entry for block {}", index))
        })?;

        let frame = self
            .blocks
            .read_page(loc.page as u64, loc.offset as usize, loc.len as usize)?;
        if crc32fast::hash(&frame) != loc.checksum {
            return Err(ArchiveError::RecordChecksumMismatch(index));
        }

        codec::decode(&frame).map(Some)
    }

    /// Blocks in `[start, start + length)` that are held here, in index order
    pub fn range(&self, start: TxIndex, length: u64) -> Result<Vec<(TxIndex, Value)>> {
        let held = self.held_range();
        let from = start.max(held.start);
        let to = start.saturating_add(length).min(held.end);

        let mut out = Vec::with_capacity(to.saturating_sub(from) as usize);
        for index in from..to {
            match self.get(index)? {
                Some(block) => out.push((index, block)),
                None => {
                    return Err(ArchiveError::Corrupted(format!(
                        "block {} vanished from the held range",
                        index
                    )))
                }
            }
        }
        Ok(out)
    }

    /// Rescan every page in use and check it against the index
    ///
    /// Record boundaries are rediscovered from the codec framing alone; each
    /// one must match its index entry and checksum. Returns the number of
    /// blocks checked.
    pub fn verify(&self) -> Result<u64> {
        let capacity = self.page_capacity();
        let mut entries = self.index.iter().enumerate().peekable();

        for page in 0..self.header.current_pages {
            let raw = self.blocks.read_page(page, 0, capacity)?;
            let mut offset = 0usize;

            while let Some((position, loc)) = entries.next_if(|(_, l)| l.page as u64 == page) {
                let index = self.header.first_index + position as u64;
                if offset >= raw.len() || raw[offset] == TAG_END {
                    return Err(ArchiveError::Corrupted(format!(
                        "page {} ends at offset {} but block {} is indexed there",
                        page, offset, index
                    )));
                }

                let (_, len) = codec::decode_prefix(&raw[offset..]).map_err(|e| {
                    ArchiveError::Corrupted(format!("page {} offset {}: {}", page, offset, e))
                })?;
                if loc.offset as usize != offset || loc.len as usize != len {
                    return Err(ArchiveError::Corrupted(format!(
                        "block {} found at {}+{}, index says {}+{}",
                        index, offset, len, loc.offset, loc.len
                    )));
                }
                if crc32fast::hash(&raw[offset..offset + len]) != loc.checksum {
                    return Err(ArchiveError::RecordChecksumMismatch(index));
                }
                offset += len;
            }

            if offset == 0 {
                return Err(ArchiveError::Corrupted(format!("page {} holds no blocks", page)));
            }
            if page + 1 == self.header.current_pages && offset as u64 != self.header.current_offset
            {
                return Err(ArchiveError::Corrupted(format!(
                    "last page ends at {}, header says {}",
                    offset, self.header.current_offset
                )));
            }
        }

        if let Some((position, loc)) = entries.next() {
            return Err(ArchiveError::Corrupted(format!(
                "entry {} points at page {} beyond the {} pages in use",
                position, loc.page, self.header.current_pages
            )));
        }

        debug!("Verified {} blocks", self.header.item_count);
        Ok(self.header.item_count)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.index.sync()?;
        self.blocks.sync()
    }

    /// Lifecycle save point; the only way Managed logs reach disk
    pub fn save(&mut self) -> Result<()> {
        self.index.save()?;
        self.blocks.save()
    }
}

fn check_kinds(blocks: &dyn Region, index: &dyn Region, expected: IndexType) -> Result<()> {
    if blocks.kind() != expected || index.kind() != expected {
        return Err(ArchiveError::InvalidConfig(format!(
            "log is {:?} but regions are {:?}/{:?}",
            expected,
            blocks.kind(),
            index.kind()
        )));
    }
    Ok(())
}

/// Committed index entries must be ordered, in bounds and end at the header's cursor
fn check_locations(header: &LogHeader, index: &LocationIndex, capacity: usize) -> Result<()> {
    let mut prev: Option<Location> = None;
    for (position, loc) in index.iter().enumerate() {
        let in_bounds = (loc.page as u64) < header.current_pages && loc.end() <= capacity as u64;
        let ordered = match prev {
            Some(p) if p.page == loc.page => p.end() == loc.offset as u64,
            Some(p) => p.page < loc.page && loc.offset == 0,
            None => loc.page == 0 && loc.offset == 0,
        };
        if !in_bounds || !ordered || loc.len == 0 {
            return Err(ArchiveError::Corrupted(format!(
                "index entry {} ({:?}) is inconsistent with the log",
                position, loc
            )));
        }
        prev = Some(*loc);
    }

    if let Some(last) = prev {
        if last.page as u64 + 1 != header.current_pages || last.end() != header.current_offset {
            return Err(ArchiveError::Corrupted(format!(
                "last entry {:?} does not match header cursor ({} pages, offset {})",
                last, header.current_pages, header.current_offset
            )));
        }
    }
    Ok(())
}
