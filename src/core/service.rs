//! Single-inbox archive service
//!
//! The archive is moved into one tokio task that drains an mpsc inbox and runs
//! each request to completion before taking the next. Handlers never await,
//! so a batch's capacity check and its commit cannot be separated by another
//! request.

use crate::core::error::{ArchiveError, Result};
use crate::core::query::{GetBlocksResult, TransactionRange};
use crate::core::stats::Stats;
use crate::core::value::{Transaction, TxIndex};
use crate::{AddTransactionsResponse, Archive};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

const INBOX_CAPACITY: usize = 64;

enum Request {
    Append {
        caller: String,
        transactions: Vec<Transaction>,
        reply: oneshot::Sender<AddTransactionsResponse>,
    },
    Get {
        index: TxIndex,
        reply: oneshot::Sender<Result<Option<Transaction>>>,
    },
    GetBlocks {
        ranges: Vec<TransactionRange>,
        reply: oneshot::Sender<Result<GetBlocksResult>>,
    },
    RemainingCapacity {
        reply: oneshot::Sender<u64>,
    },
    TotalTransactions {
        reply: oneshot::Sender<u64>,
    },
    Stats {
        reply: oneshot::Sender<Stats>,
    },
    SetLogLength {
        caller: String,
        log_length: u64,
        reply: oneshot::Sender<Result<()>>,
    },
    Save {
        reply: oneshot::Sender<Result<()>>,
    },
}

pub struct ArchiveService;

impl ArchiveService {
    /// Move `archive` into its own task
    ///
    /// The task ends once every handle is dropped and hands the archive back
    /// through the join handle.
    pub fn spawn(archive: Archive) -> (ArchiveHandle, JoinHandle<Archive>) {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let task = tokio::spawn(run(archive, rx));
        (ArchiveHandle { tx }, task)
    }
}

async fn run(mut archive: Archive, mut inbox: mpsc::Receiver<Request>) -> Archive {
    debug!("Archive service started");
    while let Some(request) = inbox.recv().await {
        handle(&mut archive, request);
    }
    debug!("Archive service stopped");
    archive
}

// A dropped reply receiver only means the caller gave up waiting
fn handle(archive: &mut Archive, request: Request) {
    match request {
        Request::Append {
            caller,
            transactions,
            reply,
        } => {
            let _ = reply.send(archive.append_transactions(&caller, transactions));
        }
        Request::Get { index, reply } => {
            let _ = reply.send(archive.get_transaction(index));
        }
        Request::GetBlocks { ranges, reply } => {
            let _ = reply.send(archive.icrc3_get_blocks(&ranges));
        }
        Request::RemainingCapacity { reply } => {
            let _ = reply.send(archive.remaining_capacity());
        }
        Request::TotalTransactions { reply } => {
            let _ = reply.send(archive.total_transactions());
        }
        Request::Stats { reply } => {
            let _ = reply.send(archive.stats());
        }
        Request::SetLogLength {
            caller,
            log_length,
            reply,
        } => {
            let _ = reply.send(archive.set_log_length(&caller, log_length));
        }
        Request::Save { reply } => {
            let _ = reply.send(archive.save());
        }
    }
}

/// Cloneable client for a running [`ArchiveService`]
///
/// A call whose reply never arrives has an unknown outcome: check with
/// [`ArchiveHandle::get_transaction`] before retrying an append.
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: mpsc::Sender<Request>,
}

impl ArchiveHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ArchiveError::ServiceStopped)?;
        rx.await.map_err(|_| ArchiveError::ServiceStopped)
    }

    pub async fn append_transactions(
        &self,
        caller: impl Into<String>,
        transactions: Vec<Transaction>,
    ) -> Result<AddTransactionsResponse> {
        let caller = caller.into();
        self.call(|reply| Request::Append {
            caller,
            transactions,
            reply,
        })
        .await
    }

    pub async fn get_transaction(&self, index: TxIndex) -> Result<Option<Transaction>> {
        self.call(|reply| Request::Get { index, reply }).await?
    }

    pub async fn icrc3_get_blocks(&self, ranges: Vec<TransactionRange>) -> Result<GetBlocksResult> {
        self.call(|reply| Request::GetBlocks { ranges, reply }).await?
    }

    pub async fn remaining_capacity(&self) -> Result<u64> {
        self.call(|reply| Request::RemainingCapacity { reply }).await
    }

    pub async fn total_transactions(&self) -> Result<u64> {
        self.call(|reply| Request::TotalTransactions { reply }).await
    }

    pub async fn stats(&self) -> Result<Stats> {
        self.call(|reply| Request::Stats { reply }).await
    }

    pub async fn set_log_length(&self, caller: impl Into<String>, log_length: u64) -> Result<()> {
        let caller = caller.into();
        self.call(|reply| Request::SetLogLength {
            caller,
            log_length,
            reply,
        })
        .await?
    }

    pub async fn save(&self) -> Result<()> {
        self.call(|reply| Request::Save { reply }).await?
    }
}
