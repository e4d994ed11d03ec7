//! Detectors over stored payloads.
//!
//! A detector is a pure function from one payload to at most one finding.
//! The runner streams every stored record through the chosen detector and
//! writes findings back in transactional batches. Failures inside a
//! detector never abort a pass: a record that cannot be examined simply
//! yields nothing.

pub mod imghdr;
pub mod magic_files;
pub mod runner;
pub mod strings;
pub mod wrappers;

pub use runner::{AnalyzeSummary, Analyzer, DetectorKind};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] mudlark_store::Error),
    #[error("libmagic unavailable: {0}")]
    Magic(String),
    #[error("detector {0} needs a --blockchain selector")]
    ChainRequired(&'static str),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
