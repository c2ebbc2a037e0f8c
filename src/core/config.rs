//! Archive configuration
//!
//! [`ArchiveConfig`] is what an operator supplies at creation. Its geometry
//! (`index_type`, `max_pages`, `max_records`, `first_index`) is written into
//! the log header and never changes afterwards. The rest becomes
//! [`ArchiveMetadata`], kept in `archive.json` next to the region files and
//! updatable through the owner-guarded operations.

use crate::core::error::{ArchiveError, Result};
use crate::core::log::LogGeometry;
use crate::core::query::{QueryCallback, QueryRouter, DEFAULT_MAX_BLOCKS_PER_RESPONSE};
use crate::core::region::IndexType;
use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

/// File holding [`ArchiveMetadata`] inside the data directory
pub const METADATA_FILE: &str = "archive.json";

fn default_max_blocks_per_response() -> u64 {
    DEFAULT_MAX_BLOCKS_PER_RESPONSE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub index_type: IndexType,

    #[validate(range(min = 1, max = 4_294_967_295u64))]
    pub max_pages: u64,

    #[validate(range(min = 1))]
    pub max_records: u64,

    #[serde(default)]
    pub first_index: u64,

    /// Caller allowed to append, normally the ledger
    #[validate(length(min = 1))]
    pub owner: String,

    /// Target of the live ledger's block query method
    #[validate(length(min = 1))]
    pub ledger: String,

    /// Archive holding the blocks below `first_index`
    #[serde(default)]
    #[validate(length(min = 1))]
    pub predecessor: Option<String>,

    /// This archive's own query target
    #[serde(default)]
    #[validate(length(min = 1))]
    pub endpoint: Option<String>,

    #[serde(default = "default_max_blocks_per_response")]
    #[validate(range(min = 1))]
    pub max_blocks_per_response: u64,
}

impl ArchiveConfig {
    pub fn new(
        index_type: IndexType,
        max_pages: u64,
        max_records: u64,
        first_index: u64,
        owner: impl Into<String>,
        ledger: impl Into<String>,
    ) -> Self {
        ArchiveConfig {
            index_type,
            max_pages,
            max_records,
            first_index,
            owner: owner.into(),
            ledger: ledger.into(),
            predecessor: None,
            endpoint: None,
            max_blocks_per_response: DEFAULT_MAX_BLOCKS_PER_RESPONSE,
        }
    }

    pub fn with_predecessor(mut self, target: impl Into<String>) -> Self {
        self.predecessor = Some(target.into());
        self
    }

    pub fn with_endpoint(mut self, target: impl Into<String>) -> Self {
        self.endpoint = Some(target.into());
        self
    }

    pub fn with_max_blocks_per_response(mut self, max: u64) -> Self {
        self.max_blocks_per_response = max;
        self
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ArchiveConfig = toml::from_str(s)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Field rules plus the cross-field overflow check
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| ArchiveError::InvalidConfig(e.to_string()))?;

        if self.first_index.checked_add(self.max_records).is_none() {
            return Err(ArchiveError::InvalidConfig(format!(
                "first_index {} + max_records {} overflows u64",
                self.first_index, self.max_records
            )));
        }
        Ok(())
    }

    pub fn geometry(&self) -> LogGeometry {
        LogGeometry {
            index_type: self.index_type,
            max_pages: self.max_pages,
            max_records: self.max_records,
            first_index: self.first_index,
        }
    }
}

/// Mutable archive state persisted alongside the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub index_type: IndexType,
    pub owner: String,
    pub ledger: QueryCallback,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<QueryCallback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<QueryCallback>,
    pub max_blocks_per_response: u64,
    /// Last total ledger length reported by the owner
    #[serde(default)]
    pub log_length: u64,
}

impl ArchiveMetadata {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        ArchiveMetadata {
            index_type: config.index_type,
            owner: config.owner.clone(),
            ledger: QueryCallback::new(config.ledger.as_str()),
            predecessor: config.predecessor.as_deref().map(QueryCallback::new),
            endpoint: config.endpoint.as_deref().map(QueryCallback::new),
            max_blocks_per_response: config.max_blocks_per_response,
            log_length: 0,
        }
    }

    pub fn router(&self) -> QueryRouter {
        QueryRouter {
            ledger: self.ledger.clone(),
            predecessor: self.predecessor.clone(),
            endpoint: self.endpoint.clone(),
            max_blocks_per_response: self.max_blocks_per_response,
        }
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let bytes = std::fs::read(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write `archive.json` atomically
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(METADATA_FILE);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}
