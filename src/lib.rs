//! # ledger-archive - Durable Block Archive for Ledgers
//!
//! Once a ledger's live transaction log fills up, its oldest blocks move into
//! archive instances. An archive stores a contiguous slice of the global block
//! history in an append-only paged log and answers paginated range queries,
//! redirecting callers to sibling archives or the ledger for everything it
//! does not hold.
//!
//! - **Three storage backends**: raw pages, checksummed typed pages, or heap
//!   pages saved at lifecycle boundaries
//! - **All-or-nothing batches** against page and record ceilings
//! - **Chain-aware queries** returning local blocks plus redirections
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledger_archive::{AddTransactionsResponse, Archive, ArchiveConfig, IndexType, TransactionRange, Value};
//!
//! # fn main() -> ledger_archive::Result<()> {
//! let config = ArchiveConfig::new(IndexType::Stable, 1024, 100_000, 0, "ledger", "ledger");
//! let mut archive = Archive::create("archive-data", &config)?;
//!
//! let tx = Value::map([("op", Value::text("mint")), ("amount", Value::nat(10u64))]);
//! match archive.append_transactions("ledger", vec![tx]) {
//!     AddTransactionsResponse::Ok(stats) => println!("{} blocks stored", stats.item_count),
//!     AddTransactionsResponse::Full(_) => println!("archive is full"),
//!     AddTransactionsResponse::Err(e) => println!("rejected: {}", e),
//! }
//!
//! let result = archive.icrc3_get_blocks(&[TransactionRange::new(0, 10)])?;
//! for block in result.blocks {
//!     println!("{}: {}", block.id, block.block);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    capacity::{Authorization, CapacityManager, FullReason},
    codec::{decode, encode},
    config::{ArchiveConfig, ArchiveMetadata},
    error::{ArchiveError, Result},
    header::PAGE_SIZE,
    log::{LogGeometry, TransactionLog},
    query::{
        follow_redirections, ArchivedBlocks, BlockSource, GetBlocksResult, QueryBlock,
        QueryCallback, QueryRouter, TransactionRange,
    },
    region::IndexType,
    stats::Stats,
    value::{Transaction, TxIndex, Value},
};

#[cfg(feature = "async")]
pub use crate::core::service::{ArchiveHandle, ArchiveService};

use crate::core::config::METADATA_FILE;
use crate::core::region::{in_memory_region, open_region, RegionRole};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of [`Archive::append_transactions`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddTransactionsResponse {
    /// The whole batch was stored
    #[serde(rename = "ok")]
    Ok(Stats),
    /// Nothing was stored; the message says why
    #[serde(rename = "err")]
    Err(String),
    /// Nothing was stored; the batch does not fit
    Full(Stats),
}

/// One archive instance
///
/// Owns the transaction log, its capacity limits and the query routing
/// metadata. Appends run to completion synchronously, so no other request can
/// observe or disturb a batch between its capacity check and its commit.
///
/// Dropping an archive that took appends since its last save saves it; use
/// [`Archive::close`] to see save errors. Read-only use never writes.
pub struct Archive {
    log: TransactionLog,
    capacity: CapacityManager,
    metadata: ArchiveMetadata,
    dir: Option<PathBuf>,
    /// Appends not yet covered by a save
    dirty: bool,
    closed: bool,
}

impl Archive {
    /// Create a new archive in `dir`
    ///
    /// `archive.json` is written last, so its presence marks a finished
    /// create. Empty regions left by an interrupted create are replaced.
    pub fn create<P: AsRef<Path>>(dir: P, config: &ArchiveConfig) -> Result<Self> {
        config.check()?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        if dir.join(METADATA_FILE).exists() {
            return Err(ArchiveError::AlreadyInitialized);
        }
        discard_unfinished(dir)?;

        let mut log = TransactionLog::create(
            open_region(config.index_type, dir, RegionRole::Blocks)?,
            open_region(config.index_type, dir, RegionRole::Index)?,
            config.geometry(),
        )?;
        log.save()?;

        let metadata = ArchiveMetadata::from_config(config);
        metadata.save(dir)?;

        info!("Created archive at {}", dir.display());
        Ok(Archive::assemble(log, metadata, Some(dir.to_path_buf())))
    }

    /// Reopen the archive in `dir` with identical content and indices
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.join(METADATA_FILE).exists() {
            if !region_files(dir).is_empty() {
                return Err(ArchiveError::Corrupted(format!(
                    "{} has region files but no {}; creation was interrupted, create it again",
                    dir.display(),
                    METADATA_FILE
                )));
            }
            return Err(ArchiveError::NotInitialized);
        }

        let metadata = ArchiveMetadata::load(dir)?;
        let log = TransactionLog::restore(
            open_region(metadata.index_type, dir, RegionRole::Blocks)?,
            open_region(metadata.index_type, dir, RegionRole::Index)?,
        )?;

        info!(
            "Opened archive at {} ({} blocks)",
            dir.display(),
            log.item_count()
        );
        Ok(Archive::assemble(log, metadata, Some(dir.to_path_buf())))
    }

    /// An archive that never touches disk; always uses the Managed backend
    pub fn in_memory(config: &ArchiveConfig) -> Result<Self> {
        config.check()?;
        let mut geometry = config.geometry();
        geometry.index_type = IndexType::Managed;

        let log = TransactionLog::create(
            in_memory_region(RegionRole::Blocks),
            in_memory_region(RegionRole::Index),
            geometry,
        )?;
        let mut metadata = ArchiveMetadata::from_config(config);
        metadata.index_type = IndexType::Managed;

        Ok(Archive::assemble(log, metadata, None))
    }

    fn assemble(log: TransactionLog, metadata: ArchiveMetadata, dir: Option<PathBuf>) -> Self {
        Archive {
            capacity: CapacityManager::from_header(log.header()),
            log,
            metadata,
            dir,
            dirty: false,
            closed: false,
        }
    }

    /// Append a batch of transactions on behalf of `caller`
    ///
    /// Either every transaction is stored, in order, or none is.
    pub fn append_transactions(
        &mut self,
        caller: &str,
        transactions: Vec<Transaction>,
    ) -> AddTransactionsResponse {
        if let Err(e) = self.check_owner(caller) {
            return AddTransactionsResponse::Err(e.to_string());
        }

        match self.append_batch(&transactions) {
            Ok(Some(range)) => {
                self.dirty |= !range.is_empty();
                debug!("Appended blocks [{}, {})", range.start, range.end);
                AddTransactionsResponse::Ok(self.stats())
            }
            Ok(None) => AddTransactionsResponse::Full(self.stats()),
            Err(e) => {
                warn!("Rejected batch of {}: {}", transactions.len(), e);
                AddTransactionsResponse::Err(e.to_string())
            }
        }
    }

    /// `Ok(None)` when the batch does not fit
    fn append_batch(&mut self, transactions: &[Transaction]) -> Result<Option<Range<TxIndex>>> {
        let count = transactions.len() as u64;
        let item_count = self.log.item_count();

        // Record ceiling first: no point encoding a batch that cannot fit
        let pages_now = self.log.header().current_pages;
        if let Authorization::Full(reason) = self.capacity.authorize(item_count, count, pages_now) {
            warn!("Archive full: {:?}", reason);
            return Ok(None);
        }

        let batch = self.log.prepare(transactions)?;
        if let Authorization::Full(reason) =
            self.capacity.authorize(item_count, count, batch.pages_after())
        {
            warn!("Archive full: {:?}", reason);
            return Ok(None);
        }

        self.log.commit(batch).map(Some)
    }

    /// Block at `index` if this archive holds it
    pub fn get_transaction(&self, index: TxIndex) -> Result<Option<Transaction>> {
        self.log.get(index)
    }

    /// Local blocks for `ranges` plus redirections for the rest
    pub fn icrc3_get_blocks(&self, ranges: &[TransactionRange]) -> Result<GetBlocksResult> {
        self.metadata
            .router()
            .get_blocks(&self.log, self.log_length(), ranges)
    }

    /// Total ledger length as last reported, never less than what is held here
    pub fn log_length(&self) -> u64 {
        self.metadata.log_length.max(self.log.held_range().end)
    }

    pub fn remaining_capacity(&self) -> u64 {
        self.capacity.remaining_records(self.log.item_count())
    }

    pub fn total_transactions(&self) -> u64 {
        self.log.item_count()
    }

    pub fn stats(&self) -> Stats {
        Stats::collect(&self.capacity, &self.log)
    }

    pub fn first_index(&self) -> TxIndex {
        self.log.first_index()
    }

    pub fn held_range(&self) -> Range<TxIndex> {
        self.log.held_range()
    }

    pub fn index_type(&self) -> IndexType {
        self.log.header().index_type
    }

    /// Whether no further block can ever be accepted
    pub fn is_full(&self) -> bool {
        let header = self.log.header();
        self.capacity.is_exhausted(
            header.item_count,
            header.current_pages,
            self.log.tail_room(),
            crate::core::codec::MIN_ENCODED_LEN,
        )
    }

    pub fn get_owner(&self) -> &str {
        &self.metadata.owner
    }

    pub fn update_owner(&mut self, caller: &str, new_owner: impl Into<String>) -> Result<()> {
        self.check_owner(caller)?;
        let new_owner = new_owner.into();
        if new_owner.is_empty() {
            return Err(ArchiveError::InvalidConfig("owner must not be empty".into()));
        }

        info!("Archive owner changed from {} to {}", self.metadata.owner, new_owner);
        self.metadata.owner = new_owner;
        self.save_metadata()
    }

    /// Record the ledger's current total length
    pub fn set_log_length(&mut self, caller: &str, log_length: u64) -> Result<()> {
        self.check_owner(caller)?;
        self.metadata.log_length = log_length;
        self.save_metadata()
    }

    /// Rescan all stored blocks against the index
    pub fn verify(&self) -> Result<u64> {
        self.log.verify()
    }

    pub fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn check_owner(&self, caller: &str) -> Result<()> {
        if caller != self.metadata.owner {
            warn!("Rejected call from non-owner {}", caller);
            return Err(ArchiveError::NotOwner);
        }
        Ok(())
    }

    fn save_metadata(&self) -> Result<()> {
        match &self.dir {
            Some(dir) => self.metadata.save(dir),
            None => Ok(()),
        }
    }

    /// Persist everything; required for Managed archives to survive a restart
    pub fn save(&mut self) -> Result<()> {
        self.log.save()?;
        self.save_metadata()?;
        self.dirty = false;
        Ok(())
    }

    /// Whether appends happened since the last save
    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    /// Save pending appends and release the archive
    pub fn close(mut self) -> Result<()> {
        let result = if self.dirty { self.save() } else { Ok(()) };
        self.closed = true;
        result
    }
}

impl BlockSource for Archive {
    fn get_blocks(&self, ranges: &[TransactionRange]) -> Result<GetBlocksResult> {
        self.icrc3_get_blocks(ranges)
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        if self.closed || !self.dirty {
            return;
        }
        if let Err(e) = self.save() {
            warn!("Failed to save archive on drop: {}", e);
        }
    }
}

/// Region and snapshot files present in `dir`, for either backend family
fn region_files(dir: &Path) -> Vec<(IndexType, RegionRole, PathBuf)> {
    [RegionRole::Blocks, RegionRole::Index]
        .into_iter()
        .flat_map(|role| {
            [
                (IndexType::Stable, role, dir.join(role.region_file())),
                (IndexType::Managed, role, dir.join(role.snapshot_file())),
            ]
        })
        .filter(|(_, _, path)| path.exists())
        .collect()
}

/// Remove regions left by a create that never wrote `archive.json`
///
/// Such regions hold a header and no pages. Any allocated page means real
/// data and is refused rather than deleted.
fn discard_unfinished(dir: &Path) -> Result<()> {
    for (kind, role, path) in region_files(dir) {
        let pages = open_region(kind, dir, role)?.page_count();
        if pages > 0 {
            return Err(ArchiveError::Corrupted(format!(
                "{} holds {} pages but {} is missing",
                path.display(),
                pages,
                METADATA_FILE
            )));
        }
    }
    for (_, _, path) in region_files(dir) {
        warn!("Removing {} left by an unfinished create", path.display());
        std::fs::remove_file(&path)?;
    }
    Ok(())
}

/// Builder for archives with non-default settings
///
/// ```rust,no_run
/// use ledger_archive::{ArchiveBuilder, IndexType};
///
/// # fn main() -> ledger_archive::Result<()> {
/// let archive = ArchiveBuilder::new()
///     .owner("ledger")
///     .ledger("ledger")
///     .index_type(IndexType::StableTyped)
///     .first_index(2_000_000)
///     .max_records(500_000)
///     .path("/data/archive-2")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveBuilder {
    path: Option<PathBuf>,
    owner: Option<String>,
    ledger: Option<String>,
    index_type: IndexType,
    max_pages: u64,
    max_records: u64,
    first_index: u64,
    predecessor: Option<String>,
    endpoint: Option<String>,
    max_blocks_per_response: u64,
}

impl ArchiveBuilder {
    /// 1024 pages (4 MiB) and 100 000 records unless overridden
    pub fn new() -> Self {
        ArchiveBuilder {
            path: None,
            owner: None,
            ledger: None,
            index_type: IndexType::default(),
            max_pages: 1024,
            max_records: 100_000,
            first_index: 0,
            predecessor: None,
            endpoint: None,
            max_blocks_per_response: crate::core::query::DEFAULT_MAX_BLOCKS_PER_RESPONSE,
        }
    }

    /// Data directory; without one the archive lives in memory
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn owner<S: Into<String>>(mut self, owner: S) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn ledger<S: Into<String>>(mut self, ledger: S) -> Self {
        self.ledger = Some(ledger.into());
        self
    }

    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    pub fn max_pages(mut self, max_pages: u64) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn max_records(mut self, max_records: u64) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn first_index(mut self, first_index: u64) -> Self {
        self.first_index = first_index;
        self
    }

    pub fn predecessor<S: Into<String>>(mut self, target: S) -> Self {
        self.predecessor = Some(target.into());
        self
    }

    pub fn endpoint<S: Into<String>>(mut self, target: S) -> Self {
        self.endpoint = Some(target.into());
        self
    }

    pub fn max_blocks_per_response(mut self, max: u64) -> Self {
        self.max_blocks_per_response = max;
        self
    }

    pub fn config(&self) -> Result<ArchiveConfig> {
        let owner = self
            .owner
            .clone()
            .ok_or_else(|| ArchiveError::InvalidConfig("owner must be set".into()))?;
        let ledger = self
            .ledger
            .clone()
            .ok_or_else(|| ArchiveError::InvalidConfig("ledger must be set".into()))?;

        let mut config = ArchiveConfig::new(
            self.index_type,
            self.max_pages,
            self.max_records,
            self.first_index,
            owner,
            ledger,
        )
        .with_max_blocks_per_response(self.max_blocks_per_response);
        config.predecessor = self.predecessor.clone();
        config.endpoint = self.endpoint.clone();
        Ok(config)
    }

    pub fn build(self) -> Result<Archive> {
        let config = self.config()?;
        match &self.path {
            Some(path) => Archive::create(path, &config),
            None => Archive::in_memory(&config),
        }
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(max_records: u64) -> ArchiveConfig {
        ArchiveConfig::new(IndexType::Stable, 8, max_records, 1000, "ledger", "ledger")
    }

    #[test]
    fn test_first_index_and_full_scenario() {
        let mut archive = Archive::in_memory(&config(2)).unwrap();

        let first = Value::text("first");
        let response =
            archive.append_transactions("ledger", vec![first.clone(), Value::text("second")]);
        assert!(matches!(response, AddTransactionsResponse::Ok(ref s) if s.item_count == 2));

        let response = archive.append_transactions("ledger", vec![Value::text("third")]);
        assert!(matches!(response, AddTransactionsResponse::Full(ref s) if s.item_count == 2));
        assert_eq!(archive.total_transactions(), 2);

        assert_eq!(archive.get_transaction(1000).unwrap(), Some(first));
        assert_eq!(archive.get_transaction(999).unwrap(), None);
        assert_eq!(archive.remaining_capacity(), 0);
        assert!(archive.is_full());
    }

    #[test]
    fn test_only_appends_mark_unsaved_changes() {
        let dir = TempDir::new().unwrap();
        let mut archive = Archive::create(dir.path(), &config(10)).unwrap();
        assert!(!archive.has_unsaved_changes());

        archive.append_transactions("ledger", vec![]);
        archive.set_log_length("ledger", 5000).unwrap();
        assert!(!archive.has_unsaved_changes());

        archive.append_transactions("ledger", vec![Value::nat(1u64)]);
        assert!(archive.has_unsaved_changes());
        archive.save().unwrap();
        assert!(!archive.has_unsaved_changes());
    }

    #[test]
    fn test_non_owner_rejected() {
        let mut archive = Archive::in_memory(&config(10)).unwrap();
        let response = archive.append_transactions("mallory", vec![Value::nat(1u64)]);
        assert_eq!(
            response,
            AddTransactionsResponse::Err(ArchiveError::NotOwner.to_string())
        );
        assert_eq!(archive.total_transactions(), 0);

        assert!(matches!(
            archive.update_owner("mallory", "mallory"),
            Err(ArchiveError::NotOwner)
        ));
        assert!(matches!(
            archive.set_log_length("mallory", 5),
            Err(ArchiveError::NotOwner)
        ));
    }

    #[test]
    fn test_update_owner_hands_over_appends() {
        let mut archive = Archive::in_memory(&config(10)).unwrap();
        archive.update_owner("ledger", "ledger-v2").unwrap();
        assert_eq!(archive.get_owner(), "ledger-v2");
        assert!(matches!(
            archive.append_transactions("ledger", vec![Value::nat(1u64)]),
            AddTransactionsResponse::Err(_)
        ));
        assert!(matches!(
            archive.append_transactions("ledger-v2", vec![Value::nat(1u64)]),
            AddTransactionsResponse::Ok(_)
        ));
    }

    #[test]
    fn test_oversized_block_fails_whole_batch() {
        let mut archive = Archive::in_memory(&config(10)).unwrap();
        let response = archive.append_transactions(
            "ledger",
            vec![Value::nat(1u64), Value::blob(vec![0u8; PAGE_SIZE])],
        );
        assert!(matches!(response, AddTransactionsResponse::Err(_)));
        assert_eq!(archive.total_transactions(), 0);
    }

    #[test]
    fn test_empty_batch_is_ok() {
        let mut archive = Archive::in_memory(&config(1)).unwrap();
        assert!(matches!(
            archive.append_transactions("ledger", vec![]),
            AddTransactionsResponse::Ok(ref s) if s.item_count == 0
        ));
    }

    #[test]
    fn test_log_length_reported() {
        let mut archive = Archive::in_memory(&config(10)).unwrap();
        archive.append_transactions("ledger", vec![Value::nat(1u64)]);
        assert_eq!(archive.log_length(), 1001);

        archive.set_log_length("ledger", 5000).unwrap();
        let result = archive
            .icrc3_get_blocks(&[TransactionRange::new(1000, 10)])
            .unwrap();
        assert_eq!(result.log_length, 5000);
        assert_eq!(result.blocks.len(), 1);
        assert_eq!(result.archived_blocks[0].args, vec![TransactionRange::new(1001, 9)]);
    }

    #[test]
    fn test_create_then_open() {
        let dir = TempDir::new().unwrap();
        {
            let mut archive = Archive::create(dir.path(), &config(10)).unwrap();
            archive.append_transactions("ledger", vec![Value::text("kept")]);
            archive.close().unwrap();
        }
        assert!(matches!(
            Archive::create(dir.path(), &config(10)),
            Err(ArchiveError::AlreadyInitialized)
        ));

        let archive = Archive::open(dir.path()).unwrap();
        assert_eq!(archive.get_transaction(1000).unwrap(), Some(Value::text("kept")));
        assert_eq!(archive.index_type(), IndexType::Stable);
    }

    #[test]
    fn test_open_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Archive::open(dir.path().join("nothing")),
            Err(ArchiveError::NotInitialized)
        ));
    }

    #[test]
    fn test_builder_requires_owner() {
        assert!(matches!(
            ArchiveBuilder::new().ledger("l").build(),
            Err(ArchiveError::InvalidConfig(_))
        ));
        let archive = ArchiveBuilder::new()
            .owner("o")
            .ledger("l")
            .first_index(7)
            .build()
            .unwrap();
        assert_eq!(archive.first_index(), 7);
        assert_eq!(archive.index_type(), IndexType::Managed);
        assert_eq!(archive.path(), None);
    }

    #[test]
    fn test_response_serialization_tags() {
        let json = serde_json::to_value(AddTransactionsResponse::Err("boom".into())).unwrap();
        assert_eq!(json["err"], "boom");
    }
}
