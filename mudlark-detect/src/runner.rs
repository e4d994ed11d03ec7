//! The detection pass: stream stored records through one detector and
//! write findings back in transactional batches.

use std::path::{Path, PathBuf};

use mudlark_store::{
    AsciiFinding, Chain, FileFinding, FileFindingTable, RawRecord, Store,
};
use tracing::info;

use crate::magic_files::MagicDetector;
use crate::wrappers;
use crate::{imghdr, strings, Error};

/// Findings per commit.
pub const FINDING_BATCH: usize = 100;

/// Records between progress reports.
const PROGRESS_EVERY: u64 = 10_000;

/// Default minimum printable-run length.
pub const DEFAULT_MIN_STRING_LENGTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    NativeStrings,
    GnuStrings,
    MagicFiles,
    ImghdrFiles,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::NativeStrings => "native_strings",
            DetectorKind::GnuStrings => "gnu_strings",
            DetectorKind::MagicFiles => "magic_files",
            DetectorKind::ImghdrFiles => "imghdr_files",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyzeSummary {
    pub scanned: u64,
    pub findings: u64,
}

pub struct Analyzer {
    db_path: PathBuf,
    chain: Option<Chain>,
    min_string_length: usize,
}

impl Analyzer {
    pub fn new(db_path: &Path, chain: Option<Chain>) -> Self {
        Self {
            db_path: db_path.to_owned(),
            chain,
            min_string_length: DEFAULT_MIN_STRING_LENGTH,
        }
    }

    pub fn with_min_string_length(mut self, min: usize) -> Self {
        self.min_string_length = min;
        self
    }

    /// Run one detector over every stored record (restricted to the
    /// analyzer's chain when one is set).
    pub fn analyze(&self, detector: DetectorKind) -> Result<AnalyzeSummary, Error> {
        info!(detector = detector.as_str(), "commencing detection pass");
        let min = self.min_string_length;
        match detector {
            DetectorKind::NativeStrings => {
                self.run_ascii(&|data| strings::native_strings(data, min))
            }
            DetectorKind::GnuStrings => self.run_ascii(&|data| {
                // An unrunnable `strings` yields no finding for this record.
                strings::gnu_strings(data, min).ok().flatten()
            }),
            DetectorKind::MagicFiles => {
                let magic = MagicDetector::new()?;
                let detect = move |data: &[u8]| magic.describe(data);
                self.run_files(detector, FileFindingTable::Magic, &detect)
            }
            DetectorKind::ImghdrFiles => {
                let detect =
                    |data: &[u8]| imghdr::sniff_with_retry(data).map(str::to_owned);
                self.run_files(detector, FileFindingTable::Imghdr, &detect)
            }
        }
    }

    fn run_ascii(&self, detect: &dyn Fn(&[u8]) -> Option<usize>) -> Result<AnalyzeSummary, Error> {
        let reader = Store::open(&self.db_path)?;
        let mut writer = Store::open(&self.db_path)?;
        let mut batch: Vec<AsciiFinding> = Vec::with_capacity(FINDING_BATCH);
        let mut findings = 0u64;
        let mut seen = 0u64;

        let scanned = reader.for_each_raw(self.chain, |record| {
            if let Some(length) = detect(&record.data) {
                batch.push(AsciiFinding {
                    txid: record.txid,
                    kind: record.kind,
                    extra_index: record.extra_index,
                    string_length: length as u64,
                });
                findings += 1;
                if batch.len() >= FINDING_BATCH {
                    let txn = writer.transaction()?;
                    Store::insert_ascii_findings(&txn, &batch)?;
                    txn.commit()?;
                    batch.clear();
                }
            }
            seen += 1;
            if seen % PROGRESS_EVERY == 0 {
                info!(records = seen, findings, "detection progress");
            }
            Ok(())
        })?;

        if !batch.is_empty() {
            let txn = writer.transaction()?;
            Store::insert_ascii_findings(&txn, &batch)?;
            txn.commit()?;
        }

        info!(scanned, findings, "ascii detection pass complete");
        Ok(AnalyzeSummary { scanned, findings })
    }

    fn run_files(
        &self,
        kind: DetectorKind,
        table: FileFindingTable,
        detect: &dyn Fn(&[u8]) -> Option<String>,
    ) -> Result<AnalyzeSummary, Error> {
        let Some(chain) = self.chain else {
            return Err(Error::ChainRequired(kind.as_str()));
        };

        let probe = move |record: &RawRecord| -> Option<String> {
            if chain.is_monero() {
                wrappers::monero_find_file(&record.data, detect)
            } else if chain.is_bitcoin() {
                wrappers::bitcoin_find_file(&record.data, detect)
            } else {
                wrappers::ethereum_find_file(&record.data, detect)
            }
        };

        let reader = Store::open(&self.db_path)?;
        let mut writer = Store::open(&self.db_path)?;
        let mut batch: Vec<FileFinding> = Vec::with_capacity(FINDING_BATCH);
        let mut findings = 0u64;
        let mut seen = 0u64;

        let scanned = reader.for_each_raw(Some(chain), |record| {
            if let Some(file_type) = probe(&record) {
                batch.push(FileFinding {
                    txid: record.txid,
                    kind: record.kind,
                    extra_index: record.extra_index,
                    file_type,
                });
                findings += 1;
                if batch.len() >= FINDING_BATCH {
                    let txn = writer.transaction()?;
                    Store::insert_file_findings(&txn, table, &batch)?;
                    txn.commit()?;
                    batch.clear();
                }
            }
            seen += 1;
            if seen % PROGRESS_EVERY == 0 {
                info!(records = seen, findings, "detection progress");
            }
            Ok(())
        })?;

        if !batch.is_empty() {
            let txn = writer.transaction()?;
            Store::insert_file_findings(&txn, table, &batch)?;
            txn.commit()?;
        }

        info!(scanned, findings, "file detection pass complete");
        Ok(AnalyzeSummary { scanned, findings })
    }
}
