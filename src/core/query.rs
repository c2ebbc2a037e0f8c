//! Paginated, chain-aware block retrieval
//!
//! A request is a list of `(start, length)` ranges. Each range is split into
//! up to three parts against the held range `[first, end)`:
//!
//! ```text
//!        below first        held here         above end
//!   |-----------------|==================|--------------------|
//!   predecessor/ledger   local blocks      ledger (up to log_length)
//! ```
//!
//! Parts that cannot be served locally come back as redirections: the
//! sub-range plus the callback to invoke for it. Ranges are handled in the
//! order given and never deduplicated.

use crate::core::error::{ArchiveError, Result};
use crate::core::log::TransactionLog;
use crate::core::value::{TxIndex, Value};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Method name every block source exposes
pub const GET_BLOCKS_METHOD: &str = "icrc3_get_blocks";

/// Default cap on local blocks in one response, applied when the archive has
/// an endpoint to continue from
pub const DEFAULT_MAX_BLOCKS_PER_RESPONSE: u64 = 2000;

/// Opaque reference to a block query entry point on another instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryCallback {
    pub target: String,
    pub method: String,
}

impl QueryCallback {
    /// Callback to the standard block query method of `target`
    pub fn new(target: impl Into<String>) -> Self {
        QueryCallback {
            target: target.into(),
            method: GET_BLOCKS_METHOD.to_string(),
        }
    }
}

impl std::fmt::Display for QueryCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.target, self.method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRange {
    pub start: TxIndex,
    pub length: u64,
}

impl TransactionRange {
    pub fn new(start: TxIndex, length: u64) -> Self {
        TransactionRange { start, length }
    }

    /// Exclusive end, saturating at `u64::MAX`
    pub fn end(&self) -> TxIndex {
        self.start.saturating_add(self.length)
    }

    fn from_bounds(start: TxIndex, end: TxIndex) -> Self {
        TransactionRange {
            start,
            length: end - start,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryBlock {
    pub id: TxIndex,
    pub block: Value,
}

/// Ranges the caller must fetch from `callback`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedBlocks {
    pub args: Vec<TransactionRange>,
    pub callback: QueryCallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksResult {
    pub log_length: u64,
    pub blocks: Vec<QueryBlock>,
    pub archived_blocks: Vec<ArchivedBlocks>,
}

/// Where out-of-range requests are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRouter {
    /// Live ledger, owner of everything past this archive
    pub ledger: QueryCallback,
    /// Archive holding the range just below `first_index`
    pub predecessor: Option<QueryCallback>,
    /// This archive's own entry point, used for truncated remainders
    pub endpoint: Option<QueryCallback>,
    /// Ignored without an `endpoint`: held blocks are never redirected elsewhere
    pub max_blocks_per_response: u64,
}

impl QueryRouter {
    pub fn new(ledger: QueryCallback) -> Self {
        QueryRouter {
            ledger,
            predecessor: None,
            endpoint: None,
            max_blocks_per_response: DEFAULT_MAX_BLOCKS_PER_RESPONSE,
        }
    }

    fn below(&self) -> &QueryCallback {
        self.predecessor.as_ref().unwrap_or(&self.ledger)
    }


    /// Answer `ranges` from `log`, redirecting whatever is not held here
    pub fn get_blocks(
        &self,
        log: &TransactionLog,
        log_length: u64,
        ranges: &[TransactionRange],
    ) -> Result<GetBlocksResult> {
        let held = log.held_range();
        let mut budget = match self.endpoint {
            Some(_) => self.max_blocks_per_response,
            None => u64::MAX,
        };
        let mut blocks = Vec::new();
        let mut redirects = Redirects::default();

        for range in ranges {
            let (start, end) = (range.start, range.end());
            if start >= end {
                continue;
            }

            if start < held.start {
                redirects.push(self.below(), start, end.min(held.start));
            }

            let from = start.max(held.start);
            let to = end.min(held.end);
            if from < to {
                let take = (to - from).min(budget);
                for (id, block) in log.range(from, take)? {
                    blocks.push(QueryBlock { id, block });
                }
                budget -= take;
                if from + take < to {
                    if let Some(endpoint) = &self.endpoint {
                        redirects.push(endpoint, from + take, to);
                    }
                }
            }

            if end > held.end {
                let above = start.max(held.end);
                let limit = end.min(log_length);
                if above < limit {
                    redirects.push(&self.ledger, above, limit);
                }
            }
        }

        debug!(
            "get_blocks: {} ranges -> {} local blocks, {} redirections",
            ranges.len(),
            blocks.len(),
            redirects.0.len()
        );

        Ok(GetBlocksResult {
            log_length,
            blocks,
            archived_blocks: redirects.0,
        })
    }
}

/// Redirections grouped per callback in first-seen order
#[derive(Default)]
struct Redirects(Vec<ArchivedBlocks>);

impl Redirects {
    fn push(&mut self, callback: &QueryCallback, start: TxIndex, end: TxIndex) {
        let range = TransactionRange::from_bounds(start, end);
        match self.0.iter_mut().find(|a| &a.callback == callback) {
            Some(group) => group.args.push(range),
            None => self.0.push(ArchivedBlocks {
                args: vec![range],
                callback: callback.clone(),
            }),
        }
    }
}

/// Anything that answers block range queries
pub trait BlockSource {
    fn get_blocks(&self, ranges: &[TransactionRange]) -> Result<GetBlocksResult>;
}

/// Walk redirections starting from `entry` until every range is answered
///
/// `resolve` maps a callback to the source it names. Blocks are returned in
/// index order. A chain longer than `max_hops` fails with
/// `TooManyRedirections`.
pub fn follow_redirections<'a, F>(
    entry: &'a dyn BlockSource,
    ranges: &[TransactionRange],
    resolve: F,
    max_hops: usize,
) -> Result<Vec<QueryBlock>>
where
    F: Fn(&QueryCallback) -> Option<&'a dyn BlockSource>,
{
    let mut blocks = Vec::new();
    let mut pending: VecDeque<(&'a dyn BlockSource, Vec<TransactionRange>, usize)> =
        VecDeque::new();
    pending.push_back((entry, ranges.to_vec(), 0));

    while let Some((source, args, hop)) = pending.pop_front() {
        if hop > max_hops {
            return Err(ArchiveError::TooManyRedirections(max_hops));
        }

        let result = source.get_blocks(&args)?;
        blocks.extend(result.blocks);

        for archived in result.archived_blocks {
            let next = resolve(&archived.callback)
                .ok_or_else(|| ArchiveError::UnknownCallback(archived.callback.to_string()))?;
            pending.push_back((next, archived.args, hop + 1));
        }
    }

    blocks.sort_by_key(|b| b.id);
    Ok(blocks)
}
