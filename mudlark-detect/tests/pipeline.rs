//! The whole pipeline against an on-disk fixture: a regtest-style Bitcoin
//! data directory goes in, extraction fills the store, a detection pass
//! finds the planted string.

use std::io::Write as _;
use std::path::Path;

use mudlark_chains::bitcoin::BitcoinExtractor;
use mudlark_chains::Extractor;
use mudlark_detect::{Analyzer, DetectorKind};
use mudlark_store::{Chain, RecordKind, Store};
use rusty_leveldb::{Options, DB};

fn push_compact(n: u64, out: &mut Vec<u8>) {
    assert!(n < 0xfd);
    out.push(n as u8);
}

fn build_tx(script_sigs: &[&[u8]], script_pubkeys: &[&[u8]]) -> Vec<u8> {
    let mut tx = Vec::new();
    tx.extend(1u32.to_le_bytes());
    push_compact(script_sigs.len() as u64, &mut tx);
    for script in script_sigs {
        tx.extend([0xee; 32]);
        tx.extend(0u32.to_le_bytes());
        push_compact(script.len() as u64, &mut tx);
        tx.extend_from_slice(script);
        tx.extend(0xffff_ffffu32.to_le_bytes());
    }
    push_compact(script_pubkeys.len() as u64, &mut tx);
    for script in script_pubkeys {
        tx.extend(5000u64.to_le_bytes());
        push_compact(script.len() as u64, &mut tx);
        tx.extend_from_slice(script);
    }
    tx.extend(0u32.to_le_bytes());
    tx
}

fn build_data_dir(root: &Path, txs: &[Vec<u8>]) {
    let blocks_dir = root.join("blocks");
    std::fs::create_dir_all(&blocks_dir).unwrap();

    let mut block = vec![0u8; 80];
    push_compact(txs.len() as u64, &mut block);
    for tx in txs {
        block.extend_from_slice(tx);
    }

    let mut blk = std::fs::File::create(blocks_dir.join("blk00000.dat")).unwrap();
    blk.write_all(&[0xfa, 0xbf, 0xb5, 0xda]).unwrap();
    blk.write_all(&(block.len() as u32).to_le_bytes()).unwrap();
    blk.write_all(&block).unwrap();

    let mut options = Options::default();
    options.create_if_missing = true;
    let mut index = DB::open(blocks_dir.join("index"), options).unwrap();
    let mut entry = Vec::new();
    for field in [1u64, 1, 8, txs.len() as u64, 0, 8] {
        mudlark_codec::varint::write_b128(field, &mut entry);
    }
    let mut key = vec![b'b'];
    key.extend([0x31; 32]);
    index.put(&key, &entry).unwrap();
    index.flush().unwrap();

    let mut options = Options::default();
    options.create_if_missing = true;
    let chainstate = DB::open(root.join("chainstate"), options).unwrap();
    drop(chainstate);
}

#[test]
fn op_return_payload_survives_to_a_finding() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("pipeline.db");

    // One OP_RETURN output carrying "Hello", one standard P2PKH output.
    let op_return = b"\x6a\x05Hello";
    let mut p2pkh = vec![0x76, 0xa9, 20];
    p2pkh.extend([0xaa; 20]);
    p2pkh.extend([0x88, 0xac]);
    let tx = build_tx(&[], &[op_return, &p2pkh]);
    build_data_dir(dir.path(), &[tx]);

    let extractor = BitcoinExtractor::new(Chain::BitcoinRegtest).unwrap();
    let summary = extractor.extract(dir.path(), &db).unwrap();
    assert_eq!(summary.emitted, 1);
    assert_eq!(summary.written, 1);

    // The stored record is the OP_RETURN script itself.
    let store = Store::open(&db).unwrap();
    let mut records = Vec::new();
    store
        .for_each_raw(Some(Chain::BitcoinRegtest), |record| {
            records.push(record);
            Ok(())
        })
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, RecordKind::ScriptPubkey);
    assert_eq!(records[0].data, op_return);
    drop(store);

    // The string detector scores the 5-byte run once the minimum allows it.
    let none = Analyzer::new(&db, Some(Chain::BitcoinRegtest))
        .analyze(DetectorKind::NativeStrings)
        .unwrap();
    assert_eq!(none.findings, 0);

    let summary = Analyzer::new(&db, Some(Chain::BitcoinRegtest))
        .with_min_string_length(4)
        .analyze(DetectorKind::NativeStrings)
        .unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.findings, 1);

    let store = Store::open(&db).unwrap();
    assert_eq!(store.ascii_histogram(None).unwrap(), vec![(5, 1)]);
}

#[test]
fn repeated_parses_produce_the_same_keys() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("determinism.db");
    let tx = build_tx(&[b"\x07\x01\x02\x03"], &[b"\x6a\x04data"]);
    build_data_dir(dir.path(), &[tx]);

    let extractor = BitcoinExtractor::new(Chain::BitcoinRegtest).unwrap();

    let mut keys_per_run = Vec::new();
    for _ in 0..2 {
        extractor.extract(dir.path(), &db).unwrap();
        let store = Store::open(&db).unwrap();
        let mut keys = Vec::new();
        store
            .for_each_raw(None, |record| {
                keys.push((record.txid, record.kind.as_str(), record.extra_index));
                Ok(())
            })
            .unwrap();
        keys.sort();
        keys_per_run.push(keys);
    }

    assert_eq!(keys_per_run[0], keys_per_run[1]);
    assert_eq!(keys_per_run[0].len(), 2);
}
