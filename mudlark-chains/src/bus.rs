//! The record bus: a bounded channel between one extractor and one writer
//! thread, with the writer batching bulk inserts.
//!
//! The channel depth applies backpressure on the extractor when SQL commits
//! fall behind. Shutdown is the extractor dropping its sender; the writer
//! drains whatever is buffered and reports how much it wrote.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender};
use std::thread::JoinHandle;

use mudlark_store::{RawRecord, Store};
use tracing::{info, warn};

/// Records per bulk insert.
pub const WRITE_BATCH: usize = 500;

/// Bus depth; a few batches of slack before the extractor blocks.
pub const BUS_DEPTH: usize = 4 * WRITE_BATCH;

pub type RecordSender = SyncSender<RawRecord>;

/// A running writer thread plus the sending half of its bus.
pub struct Writer {
    handle: JoinHandle<Result<u64, mudlark_store::Error>>,
}

impl Writer {
    /// Open the store at `db_path` and start the writer thread.
    pub fn spawn(db_path: &Path) -> Result<(RecordSender, Writer), mudlark_store::Error> {
        // Open before spawning so a bad path fails the run up front.
        let store = Store::open(db_path)?;
        let (sender, receiver) = std::sync::mpsc::sync_channel(BUS_DEPTH);
        let path: PathBuf = db_path.to_owned();
        let handle = std::thread::spawn(move || run(store, receiver, path));
        Ok((sender, Writer { handle }))
    }

    /// Wait for the writer to drain; returns the number of records it
    /// committed. The extractor must drop its sender first.
    pub fn join(self) -> Result<u64, crate::Error> {
        match self.handle.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(crate::Error::WriterGone),
        }
    }
}

fn run(
    mut store: Store,
    receiver: Receiver<RawRecord>,
    db_path: PathBuf,
) -> Result<u64, mudlark_store::Error> {
    let mut batch: Vec<RawRecord> = Vec::with_capacity(WRITE_BATCH);
    let mut written = 0u64;

    let mut flush = |batch: &mut Vec<RawRecord>, written: &mut u64| {
        if batch.is_empty() {
            return;
        }
        match store.insert_raw(batch) {
            Ok(()) => *written += batch.len() as u64,
            // A failed batch is reported and dropped; the next one proceeds.
            Err(err) => warn!(
                db = %db_path.display(),
                count = batch.len(),
                %err,
                "dropping record batch"
            ),
        }
        batch.clear();
    };

    while let Ok(record) = receiver.recv() {
        batch.push(record);
        if batch.len() >= WRITE_BATCH {
            flush(&mut batch, &mut written);
        }
    }
    flush(&mut batch, &mut written);

    info!(written, "writer drained");
    Ok(written)
}
