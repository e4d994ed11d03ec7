//! Bitcoin extractor: block files first, then the chainstate UTXO set.
//!
//! The block phase walks every stored block in height order and keeps the
//! input and output scripts that match no standard template. The chainstate
//! phase then sweeps the live UTXO set, whose scripts are recorded with the
//! height the output was created at.

use std::path::Path;

use mudlark_codec::utxo;
use mudlark_store::{Chain, RawRecord, RecordKind};
use mudlark_storage::leveldb;
use tracing::{info, warn};

use crate::bus::{RecordSender, Writer};
use crate::{Error, ExtractSummary, Extractor};

pub mod blocks;
pub mod templates;

const OBFUSCATE_KEY: &[u8] = b"\x0e\x00obfuscate_key";

pub struct BitcoinExtractor {
    chain: Chain,
}

impl BitcoinExtractor {
    pub fn new(chain: Chain) -> Result<Self, Error> {
        if !chain.is_bitcoin() {
            return Err(Error::WrongChain { chain });
        }
        Ok(Self { chain })
    }

    fn emit(
        &self,
        sender: &RecordSender,
        data: Vec<u8>,
        txid: String,
        kind: RecordKind,
        block_height: u64,
        extra_index: u32,
    ) -> Result<(), Error> {
        let record = RawRecord {
            data,
            txid,
            chain: self.chain,
            kind,
            block_height,
            extra_index,
        };
        sender.send(record).map_err(|_| Error::WriterGone)
    }

    fn extract_blocks(
        &self,
        blocks_dir: &Path,
        sender: &RecordSender,
        summary: &mut ExtractSummary,
    ) -> Result<(), Error> {
        let mut index = leveldb::Reader::open(&blocks_dir.join("index"))?;
        let locations = blocks::read_block_index(&mut index)?;
        info!(blocks = locations.len(), "bitcoin block index loaded");

        let mut files = blocks::BlockFiles::new(blocks_dir);
        for (count, location) in locations.iter().enumerate() {
            let raw = files.read_block(*location)?;
            let txs = match blocks::parse_block_txs(&raw) {
                Ok(txs) => txs,
                Err(err) => {
                    warn!(height = location.height, %err, "skipping undecodable block");
                    continue;
                }
            };

            for tx in txs {
                for (input_index, script_sig) in tx.script_sigs.iter().enumerate() {
                    if script_sig.len() < 2 || templates::is_standard_input(script_sig) {
                        summary.skipped_standard += 1;
                        continue;
                    }
                    self.emit(
                        sender,
                        script_sig.clone(),
                        tx.txid_hex.clone(),
                        RecordKind::ScriptSig,
                        location.height,
                        input_index as u32,
                    )?;
                    summary.emitted += 1;
                }

                for (output_index, script_pubkey) in tx.script_pubkeys.iter().enumerate() {
                    if script_pubkey.is_empty() || templates::is_standard_output(script_pubkey) {
                        summary.skipped_standard += 1;
                        continue;
                    }
                    self.emit(
                        sender,
                        script_pubkey.clone(),
                        tx.txid_hex.clone(),
                        RecordKind::ScriptPubkey,
                        location.height,
                        output_index as u32,
                    )?;
                    summary.emitted += 1;
                }
            }

            if (count + 1) % 500 == 0 {
                info!(
                    height = location.height,
                    emitted = summary.emitted,
                    skipped = summary.skipped_standard,
                    "bitcoin block scan progress"
                );
            }
        }
        Ok(())
    }

    fn extract_chainstate(
        &self,
        chainstate_dir: &Path,
        sender: &RecordSender,
        summary: &mut ExtractSummary,
    ) -> Result<(), Error> {
        let mut db = leveldb::Reader::open(chainstate_dir)?;

        // The first byte of the stored key is its length; the key itself
        // follows.
        let obfuscation_key = db
            .get(OBFUSCATE_KEY)
            .and_then(|value| value.get(1..).map(<[u8]>::to_vec))
            .unwrap_or_default();

        let mut scanned = 0u64;
        for (key, mut value) in db.scan_prefix(&[utxo::COIN_KEY_PREFIX])? {
            utxo::deobfuscate(&obfuscation_key, &mut value);
            let coin = match utxo::decode_coin(&key, &value) {
                Ok(coin) => coin,
                Err(err) => {
                    warn!(key = %hex::encode(&key), %err, "skipping undecodable utxo");
                    continue;
                }
            };

            scanned += 1;
            if scanned % 100_000 == 0 {
                info!(scanned, "chainstate scan progress");
            }

            if coin.script.is_empty() || templates::is_standard_output(&coin.script) {
                summary.skipped_standard += 1;
                continue;
            }

            let mut txid = coin.tx_hash;
            txid.reverse();
            self.emit(
                sender,
                coin.script,
                hex::encode(txid),
                RecordKind::ScriptPubkey,
                coin.height,
                coin.vout as u32,
            )?;
            summary.emitted += 1;
        }
        Ok(())
    }
}

impl Extractor for BitcoinExtractor {
    fn extract(&self, source: &Path, db_path: &Path) -> Result<ExtractSummary, Error> {
        let (sender, writer) = Writer::spawn(db_path)?;
        let mut summary = ExtractSummary::default();

        let blocks_dir = source.join("blocks");
        info!(dir = %blocks_dir.display(), "commencing bitcoin block parsing");
        self.extract_blocks(&blocks_dir, &sender, &mut summary)?;

        info!("block parsing complete, commencing utxo parsing");
        self.extract_chainstate(&source.join("chainstate"), &sender, &mut summary)?;

        drop(sender);
        summary.written = writer.join()?;
        info!(
            emitted = summary.emitted,
            skipped = summary.skipped_standard,
            written = summary.written,
            "bitcoin extraction complete"
        );
        Ok(summary)
    }
}
