//! Monero extractor: `tx_indices` cursor, batched `txs_pruned` fetch,
//! parallel prefix decode, default-extra suppression.
//!
//! The LMDB pass holds one read transaction for its whole lifetime.
//! Rows are gathered 10 000 at a time; each batch is fetched, decoded on a
//! scoped task pool, filtered, and only then pushed onto the bus, so the
//! bus sees rows in cursor order.

use std::path::Path;

use mudlark_codec::monero::decode_tx_prefix;
use mudlark_store::{Chain, RawRecord, RecordKind};
use mudlark_storage::lmdb;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::bus::{RecordSender, Writer};
use crate::{Error, ExtractSummary, Extractor};

const TX_INDICES_TABLE: &str = "tx_indices";
const TXS_PRUNED_TABLE: &str = "txs_pruned";

/// Rows decoded per batch.
pub const BATCH_SIZE: usize = 10_000;

/// Rows handed to one decode task.
const DECODE_CHUNK: usize = 512;

/// The well-known default extra: one pubkey, then an encrypted payment id
/// nonce: `0x01 <32 bytes> 0x02 0x09 0x01 <8 bytes>`.
pub fn is_default_extra(extra: &[u8]) -> bool {
    extra.len() == 44
        && extra[0] == 0x01
        && extra[33] == 0x02
        && extra[34] == 0x09
        && extra[35] == 0x01
}

/// A `tx_indices` row: 32-byte hash key, then three little-endian u64s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TxIndexRow {
    key: [u8; 32],
    tx_id: u64,
    block_id: u64,
}

const TXINDEX_ROW_LEN: usize = 56;

fn decode_txindex(value: &[u8]) -> Option<TxIndexRow> {
    if value.len() != TXINDEX_ROW_LEN {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&value[..32]);
    let le_u64 = |slice: &[u8]| -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(slice);
        u64::from_le_bytes(bytes)
    };
    Some(TxIndexRow {
        key,
        tx_id: le_u64(&value[32..40]),
        // unlock_time sits at 40..48; the extractor has no use for it.
        block_id: le_u64(&value[48..56]),
    })
}

pub struct MoneroExtractor {
    chain: Chain,
}

impl MoneroExtractor {
    pub fn new(chain: Chain) -> Result<Self, Error> {
        if !chain.is_monero() {
            return Err(Error::WrongChain { chain });
        }
        Ok(Self { chain })
    }

    fn process_batch(
        &self,
        runtime: &tokio::runtime::Runtime,
        rows: &[TxIndexRow],
        blobs: Vec<Option<Vec<u8>>>,
        sender: &RecordSender,
        summary: &mut ExtractSummary,
    ) -> Result<(), Error> {
        let extras = decode_extras(runtime, blobs)?;

        for (row, extra) in rows.iter().zip(extras) {
            let Some(extra) = extra else {
                debug!(tx_id = row.tx_id, "pruned tx missing or undecodable");
                continue;
            };
            if extra.is_empty() {
                continue;
            }
            if is_default_extra(&extra) {
                summary.skipped_standard += 1;
                continue;
            }
            let record = RawRecord {
                data: extra,
                txid: hex::encode(row.key),
                chain: self.chain,
                kind: RecordKind::TxExtra,
                block_height: row.block_id,
                extra_index: 0,
            };
            sender.send(record).map_err(|_| Error::WriterGone)?;
            summary.emitted += 1;
        }
        Ok(())
    }
}

/// Decode a batch of pruned-transaction blobs into their extra fields on a
/// task pool, preserving order. The pool lives for one batch.
fn decode_extras(
    runtime: &tokio::runtime::Runtime,
    blobs: Vec<Option<Vec<u8>>>,
) -> Result<Vec<Option<Vec<u8>>>, Error> {
    let total = blobs.len();
    let mut chunks: Vec<Vec<(usize, Vec<u8>)>> = Vec::new();
    for (index, blob) in blobs.into_iter().enumerate() {
        let Some(blob) = blob else { continue };
        if chunks
            .last()
            .map(|chunk| chunk.len() >= DECODE_CHUNK)
            .unwrap_or(true)
        {
            chunks.push(Vec::with_capacity(DECODE_CHUNK));
        }
        if let Some(chunk) = chunks.last_mut() {
            chunk.push((index, blob));
        }
    }

    runtime.block_on(async move {
        let mut pool = JoinSet::new();
        for chunk in chunks {
            pool.spawn(async move {
                chunk
                    .into_iter()
                    .map(|(index, blob)| {
                        (index, decode_tx_prefix(&blob).ok().map(|prefix| prefix.extra))
                    })
                    .collect::<Vec<_>>()
            });
        }

        let mut extras: Vec<Option<Vec<u8>>> = vec![None; total];
        while let Some(joined) = pool.join_next().await {
            let decoded = joined.map_err(|err| Error::TaskPool(err.to_string()))?;
            for (index, extra) in decoded {
                extras[index] = extra;
            }
        }
        Ok(extras)
    })
}

impl Extractor for MoneroExtractor {
    fn extract(&self, source: &Path, db_path: &Path) -> Result<ExtractSummary, Error> {
        let (sender, writer) = Writer::spawn(db_path)?;
        let mut summary = ExtractSummary::default();

        let lmdb_dir = source.join("lmdb");
        info!(dir = %lmdb_dir.display(), "commencing monero lmdb parsing");
        let env = lmdb::Environment::open_read_only(&lmdb_dir, 10)?;
        let rtxn = env.read_txn()?;
        let tx_indices = env.open_table(&rtxn, TX_INDICES_TABLE)?;
        let txs_pruned = env.open_table(&rtxn, TXS_PRUNED_TABLE)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .build()
            .map_err(Error::Io)?;

        let mut rows: Vec<TxIndexRow> = Vec::with_capacity(BATCH_SIZE);
        let mut processed = 0u64;

        let flush = |rows: &mut Vec<TxIndexRow>,
                     summary: &mut ExtractSummary|
         -> Result<(), Error> {
            if rows.is_empty() {
                return Ok(());
            }
            let keys: Vec<[u8; 8]> = rows.iter().map(|row| row.tx_id.to_le_bytes()).collect();
            let blobs = txs_pruned
                .get_many(&rtxn, keys.iter())?
                .into_iter()
                .map(|blob| blob.map(<[u8]>::to_vec))
                .collect();
            self.process_batch(&runtime, rows, blobs, &sender, summary)?;
            rows.clear();
            Ok(())
        };

        for entry in tx_indices.iter(&rtxn)? {
            let (_, value) = entry?;
            match decode_txindex(value) {
                Some(row) => rows.push(row),
                None => {
                    warn!(len = value.len(), "skipping malformed tx_indices row");
                    continue;
                }
            }
            processed += 1;

            if rows.len() >= BATCH_SIZE {
                flush(&mut rows, &mut summary)?;
                info!(processed, emitted = summary.emitted, "monero batch done");
            }
        }
        flush(&mut rows, &mut summary)?;

        drop(sender);
        summary.written = writer.join()?;
        info!(
            processed,
            emitted = summary.emitted,
            skipped = summary.skipped_standard,
            written = summary.written,
            "monero extraction complete"
        );
        Ok(summary)
    }
}
