//! Archive storage engine
//!
//! Leaves first: [`value`] and [`codec`] define and serialize blocks,
//! [`region`] provides page storage, [`index`] and [`log`] build the
//! append-only transaction log on top of it, and [`capacity`], [`query`] and
//! [`stats`] sit above the log.

pub mod capacity;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod index;
pub mod log;
pub mod page;
pub mod query;
pub mod region;
#[cfg(feature = "async")]
pub mod service;
pub mod stats;
pub mod value;
