//! Chain extractors.
//!
//! Each chain module walks its node's on-disk storage, filters out
//! protocol-standard payloads, and feeds the survivors over the record bus
//! to a batching writer thread. Within a chain, records arrive at the
//! store in block-height order.

use std::path::Path;

pub mod bitcoin;
pub mod bus;
pub mod ethereum;
pub mod monero;

use mudlark_store::Chain;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    LevelDb(#[from] mudlark_storage::leveldb::Error),
    #[error(transparent)]
    Lmdb(#[from] mudlark_storage::lmdb::Error),
    #[error(transparent)]
    Freezer(#[from] mudlark_storage::freezer::Error),
    #[error(transparent)]
    Store(#[from] mudlark_store::Error),
    #[error("writer thread terminated early")]
    WriterGone,
    #[error("decode task pool failed: {0}")]
    TaskPool(String),
    #[error("malformed block data: {0}")]
    MalformedBlock(String),
    #[error("{chain} is not handled by this extractor")]
    WrongChain { chain: Chain },
}

/// Counters every extractor reports when its pass completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub emitted: u64,
    pub skipped_standard: u64,
    pub written: u64,
}

/// One extraction pass: walk the chain at `source`, write survivors into
/// the store at `db_path`.
pub trait Extractor {
    fn extract(&self, source: &Path, db_path: &Path) -> Result<ExtractSummary, Error>;
}
