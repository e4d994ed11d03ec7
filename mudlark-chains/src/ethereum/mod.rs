//! Ethereum extractor: freezer-first block iteration with a LevelDB
//! hot-tail fallback, ERC-20 template suppression, header extras.
//!
//! geth keeps old blocks in the append-only ancient store and recent ones
//! in LevelDB under number-keyed entries. Heights run 1, 2, ... until
//! neither source knows the block.

use std::path::Path;

use mudlark_codec::rlp;
use mudlark_store::{Chain, RawRecord, RecordKind};
use mudlark_storage::{freezer::FreezerTable, leveldb};
use tracing::{debug, info, warn};

use crate::bus::{RecordSender, Writer};
use crate::{Error, ExtractSummary, Extractor};

const FREEZER_HEADERS_TABLE: &str = "headers";
const FREEZER_BODIES_TABLE: &str = "bodies";

const ERC20_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];
const ERC20_APPROVE: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];
const ERC20_TRANSFER_FROM: [u8; 4] = [0x23, 0xb8, 0x72, 0xdd];

/// `transfer`/`approve`/`transferFrom` calls whose address arguments carry
/// the mandatory zero padding. Anything off-template is kept: those bytes
/// are user-controlled.
pub fn is_erc20_template_call(data: &[u8]) -> bool {
    if data.len() < 5 {
        return false;
    }
    let zero_padded = |range: std::ops::Range<usize>| data[range].iter().all(|b| *b == 0);

    if data[..4] == ERC20_TRANSFER || data[..4] == ERC20_APPROVE {
        return data.len() == 68 && zero_padded(4..16);
    }
    if data[..4] == ERC20_TRANSFER_FROM {
        return data.len() == 100 && zero_padded(4..16) && zero_padded(36..48);
    }
    false
}

// Hot-tail key layouts, shared with geth's rawdb schema.

fn header_hash_key(number: u64) -> Vec<u8> {
    let mut key = vec![b'h'];
    key.extend(number.to_be_bytes());
    key.push(b'n');
    key
}

fn header_key(number: u64, hash: &[u8]) -> Vec<u8> {
    let mut key = vec![b'h'];
    key.extend(number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

fn body_key(number: u64, hash: &[u8]) -> Vec<u8> {
    let mut key = vec![b'b'];
    key.extend(number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// Outcome of looking one block up across both stores.
enum Lookup<T> {
    Found(T),
    Missing,
    Corrupt,
}

/// Both block sources behind one lookup.
struct ChainData {
    headers: Option<FreezerTable>,
    bodies: Option<FreezerTable>,
    hot: leveldb::Reader,
}

impl ChainData {
    fn open(chaindata: &Path) -> Result<Self, Error> {
        let ancient = chaindata.join("ancient");
        let open_table = |name: &str| match FreezerTable::open(&ancient, name, true) {
            Ok(table) => Some(table),
            Err(err) => {
                warn!(name, %err, "freezer table unavailable, relying on leveldb");
                None
            }
        };
        Ok(Self {
            headers: open_table(FREEZER_HEADERS_TABLE),
            bodies: open_table(FREEZER_BODIES_TABLE),
            hot: leveldb::Reader::open(chaindata)?,
        })
    }

    fn fetch<T>(
        table: &mut Option<FreezerTable>,
        hot: &mut leveldb::Reader,
        number: u64,
        hot_key: impl Fn(&[u8]) -> Vec<u8>,
        decode: impl Fn(&[u8]) -> Result<T, rlp::Error>,
    ) -> Lookup<T> {
        if let Some(table) = table {
            if table.has(number) {
                match table.retrieve(number) {
                    Ok(raw) => {
                        return match decode(&raw) {
                            Ok(value) => Lookup::Found(value),
                            Err(err) => {
                                warn!(number, %err, "undecodable freezer item");
                                Lookup::Corrupt
                            }
                        };
                    }
                    Err(err) => warn!(number, %err, "freezer read failed, trying leveldb"),
                }
            }
        }

        let Some(hash) = hot.get(&header_hash_key(number)) else {
            return Lookup::Missing;
        };
        let Some(raw) = hot.get(&hot_key(&hash)) else {
            return Lookup::Missing;
        };
        match decode(&raw) {
            Ok(value) => Lookup::Found(value),
            Err(err) => {
                warn!(number, %err, "undecodable leveldb block entry");
                Lookup::Corrupt
            }
        }
    }

    fn body(&mut self, number: u64) -> Lookup<rlp::Body> {
        Self::fetch(
            &mut self.bodies,
            &mut self.hot,
            number,
            |hash| body_key(number, hash),
            rlp::Body::decode,
        )
    }

    fn header(&mut self, number: u64) -> Lookup<rlp::Header> {
        Self::fetch(
            &mut self.headers,
            &mut self.hot,
            number,
            |hash| header_key(number, hash),
            rlp::Header::decode,
        )
    }
}

pub struct EthereumExtractor {
    chain: Chain,
}

impl EthereumExtractor {
    pub fn new(chain: Chain) -> Result<Self, Error> {
        if !chain.is_ethereum() {
            return Err(Error::WrongChain { chain });
        }
        Ok(Self { chain })
    }

    fn emit(
        &self,
        sender: &RecordSender,
        data: Vec<u8>,
        txid: String,
        block_height: u64,
    ) -> Result<(), Error> {
        let record = RawRecord {
            data,
            txid,
            chain: self.chain,
            kind: RecordKind::TxData,
            block_height,
            extra_index: 0,
        };
        sender.send(record).map_err(|_| Error::WriterGone)
    }
}

impl Extractor for EthereumExtractor {
    fn extract(&self, source: &Path, db_path: &Path) -> Result<ExtractSummary, Error> {
        let (sender, writer) = Writer::spawn(db_path)?;
        let mut summary = ExtractSummary::default();

        let chaindata = source.join("geth").join("chaindata");
        info!(dir = %chaindata.display(), "commencing ethereum chaindata parsing");
        let mut chain_data = ChainData::open(&chaindata)?;

        // One pass per height keeps the whole record stream in ascending
        // block order: a height's transaction payloads, then its header
        // extra, before the next height emits anything.
        for height in 1u64.. {
            let body = chain_data.body(height);
            let header = chain_data.header(height);
            if matches!(body, Lookup::Missing) && matches!(header, Lookup::Missing) {
                debug!(height, "no more blocks");
                break;
            }

            if let Lookup::Found(body) = body {
                for tx in &body.transactions {
                    if tx.data.len() < 2 {
                        continue;
                    }
                    if is_erc20_template_call(&tx.data) {
                        summary.skipped_standard += 1;
                        continue;
                    }
                    self.emit(
                        &sender,
                        tx.data.clone(),
                        hex::encode(tx.hash()),
                        height,
                    )?;
                    summary.emitted += 1;
                }
            }

            if let Lookup::Found(header) = header {
                if !header.extra.is_empty() {
                    // Header extras are keyed by the block's transaction root.
                    if let Some(tx_hash) = header.tx_hash {
                        self.emit(&sender, header.extra, hex::encode(tx_hash), height)?;
                        summary.emitted += 1;
                    }
                }
            }

            if height % 10_000 == 0 {
                info!(height, emitted = summary.emitted, "ethereum block scan progress");
            }
        }

        drop(sender);
        summary.written = writer.join()?;
        info!(
            emitted = summary.emitted,
            skipped = summary.skipped_standard,
            written = summary.written,
            "ethereum extraction complete"
        );
        Ok(summary)
    }
}
