//! Page file shared by the file-backed regions
//!
//! File page 0 is the header slot; region page `n` lives at file page `n + 1`.

use crate::core::error::{ArchiveError, Result};
use crate::core::header::PAGE_SIZE;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct RegionFile {
    file: Mutex<File>,
    path: PathBuf,
    /// Region pages, header slot excluded
    pages: u64,
}

impl RegionFile {
    /// Open the file, creating it with an empty header slot if it doesn't exist
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.seek(SeekFrom::End(0))?;
        if len == 0 {
            file.write_all(&[0u8; PAGE_SIZE])?;
            file.flush()?;
        } else if len % PAGE_SIZE as u64 != 0 {
            return Err(ArchiveError::Corrupted(format!(
                "{} is {} bytes, not a whole number of pages",
                path.display(),
                len
            )));
        }

        let pages = (len / PAGE_SIZE as u64).saturating_sub(1);

        Ok(RegionFile {
            file: Mutex::new(file),
            path,
            pages,
        })
    }

    pub fn pages(&self) -> u64 {
        self.pages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset_of(&self, page_id: u64) -> Result<u64> {
        if page_id >= self.pages {
            return Err(ArchiveError::PageOutOfBounds {
                page: page_id,
                pages: self.pages,
            });
        }
        Ok((page_id + 1) * PAGE_SIZE as u64)
    }

    /// Read the header slot (file page 0)
    pub fn read_header(&self) -> Result<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Write the header slot; `bytes` is zero-padded to a full page
    pub fn write_header(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > PAGE_SIZE {
            return Err(ArchiveError::RecordTooLarge {
                size: bytes.len(),
                capacity: PAGE_SIZE,
            });
        }
        let mut page = vec![0u8; PAGE_SIZE];
        page[..bytes.len()].copy_from_slice(bytes);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&page)?;
        file.flush()?;
        Ok(())
    }

    /// Read `len` bytes at `offset` inside a region page
    pub fn read(&self, page_id: u64, offset: usize, len: usize) -> Result<Vec<u8>> {
        check_span(offset, len)?;
        let start = self.offset_of(page_id)? + offset as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(start))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Write bytes at `offset` inside a region page
    pub fn write(&mut self, page_id: u64, offset: usize, bytes: &[u8]) -> Result<()> {
        check_span(offset, bytes.len())?;
        let start = self.offset_of(page_id)? + offset as u64;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(start))?;
        file.write_all(bytes)?;
        Ok(())
    }

    /// Append `count` zeroed pages, returning the id of the first new page
    pub fn extend(&mut self, count: u64) -> Result<u64> {
        let first = self.pages;
        let new_len = (self.pages + count + 1) * PAGE_SIZE as u64;
        self.file.lock().set_len(new_len)?;
        self.pages += count;
        Ok(first)
    }

    /// Append `count` copies of `page`, counting them only once all are written
    pub fn append_pages(&mut self, count: u64, page: &[u8]) -> Result<u64> {
        if page.len() != PAGE_SIZE {
            return Err(ArchiveError::RecordTooLarge {
                size: page.len(),
                capacity: PAGE_SIZE,
            });
        }
        let first = self.pages;
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start((first + 1) * PAGE_SIZE as u64))?;
            for _ in 0..count {
                file.write_all(page)?;
            }
            file.flush()?;
        }
        self.pages += count;
        Ok(first)
    }

    /// Sync all writes to disk
    pub fn sync(&mut self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }
}

fn check_span(offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if end <= PAGE_SIZE => Ok(()),
        _ => Err(ArchiveError::RecordTooLarge {
            size: offset.saturating_add(len),
            capacity: PAGE_SIZE,
        }),
    }
}
