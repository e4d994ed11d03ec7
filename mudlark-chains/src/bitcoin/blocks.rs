//! Bitcoin block storage: the LevelDB block index and the `blk*.dat` files.
//!
//! The index stores one record per known header under `'b' || hash`; the
//! fields are the b128 varints Core writes, and only entries flagged
//! BLOCK_HAVE_DATA point at an on-disk block. Blocks themselves sit in
//! numbered blk files, each preceded by network magic and a length word.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use mudlark_codec::hashes::sha256d;
use mudlark_codec::varint::{Cursor, Error as VarintError};
use mudlark_storage::leveldb;
use tracing::warn;

const BLOCK_HAVE_DATA: u64 = 8;
const BLOCK_HAVE_UNDO: u64 = 16;

/// Upper bound on per-tx input/output counts; anything bigger is a decode
/// gone off the rails, not a real transaction.
const MAX_VEC_LEN: u64 = 1 << 22;

/// Where one block's data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    pub height: u64,
    pub file: u64,
    pub offset: u64,
}

/// Scan the block index and return every block with data on disk, sorted
/// by height. Malformed entries are logged and skipped.
pub fn read_block_index(index: &mut leveldb::Reader) -> Result<Vec<BlockLocation>, crate::Error> {
    let mut locations = Vec::new();
    for (key, value) in index.scan_prefix(b"b")? {
        // Header-hash keys are exactly 'b' plus 32 bytes; shorter keys in
        // the same prefix range belong to other record types.
        if key.len() != 33 {
            continue;
        }
        match decode_index_entry(&value) {
            Ok(Some(location)) => locations.push(location),
            Ok(None) => {}
            Err(err) => {
                warn!(key = %hex::encode(&key), %err, "skipping malformed block index entry");
            }
        }
    }
    locations.sort_by_key(|location| location.height);
    Ok(locations)
}

fn decode_index_entry(value: &[u8]) -> Result<Option<BlockLocation>, VarintError> {
    let mut cur = Cursor::new(value);
    let _version = cur.read_b128()?;
    let height = cur.read_b128()?;
    let status = cur.read_b128()?;
    let _tx_count = cur.read_b128()?;

    if status & (BLOCK_HAVE_DATA | BLOCK_HAVE_UNDO) == 0 {
        return Ok(None);
    }
    let file = cur.read_b128()?;
    if status & BLOCK_HAVE_DATA == 0 {
        return Ok(None);
    }
    let offset = cur.read_b128()?;
    Ok(Some(BlockLocation {
        height,
        file,
        offset,
    }))
}

/// Reader over the numbered blk files, FDs cached per file.
pub struct BlockFiles {
    dir: PathBuf,
    open: HashMap<u64, File>,
}

impl BlockFiles {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_owned(),
            open: HashMap::new(),
        }
    }

    /// Read the serialized block at `location`. The length word Core wrote
    /// sits four bytes before the block start.
    pub fn read_block(&mut self, location: BlockLocation) -> Result<Vec<u8>, crate::Error> {
        let dir = &self.dir;
        let file = match self.open.entry(location.file) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let path = dir.join(format!("blk{:05}.dat", location.file));
                slot.insert(File::open(path)?)
            }
        };
        let length_word = location.offset.checked_sub(4).ok_or_else(|| {
            crate::Error::MalformedBlock(format!(
                "block offset {} in blk{:05}.dat leaves no room for the length word",
                location.offset, location.file
            ))
        })?;
        file.seek(SeekFrom::Start(length_word))?;
        let mut len = [0u8; 4];
        file.read_exact(&mut len)?;
        let len = u32::from_le_bytes(len) as usize;
        let mut block = vec![0u8; len];
        file.read_exact(&mut block)?;
        Ok(block)
    }
}

/// One transaction reduced to what the extractor keeps: its display-order
/// id and the raw scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTx {
    pub txid_hex: String,
    pub script_sigs: Vec<Vec<u8>>,
    pub script_pubkeys: Vec<Vec<u8>>,
}

/// Parse a serialized block into its transactions.
pub fn parse_block_txs(block: &[u8]) -> Result<Vec<ParsedTx>, VarintError> {
    let mut cur = Cursor::new(block);
    cur.take(80)?;
    let tx_count = cur.read_compact_size()?;
    if tx_count > MAX_VEC_LEN {
        return Err(VarintError::Overflow { offset: 80 });
    }
    let mut txs = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        txs.push(parse_tx(&mut cur)?);
    }
    Ok(txs)
}

fn parse_tx<'a>(cur: &mut Cursor<'a>) -> Result<ParsedTx, VarintError> {
    let version = cur.take(4)?;

    // Segwit marker: a zero where the input count cannot be zero.
    let rest = cur.remaining();
    let segwit = rest.len() >= 2 && rest[0] == 0x00 && rest[1] == 0x01;
    if segwit {
        cur.take(2)?;
    }

    let base = cur.remaining();
    let pos = cur.position();

    let input_count = bounded(cur.read_compact_size()?, cur)?;
    let mut script_sigs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        cur.take(36)?;
        let len = bounded(cur.read_compact_size()?, cur)?;
        script_sigs.push(cur.take(len as usize)?.to_vec());
        cur.take(4)?;
    }

    let output_count = bounded(cur.read_compact_size()?, cur)?;
    let mut script_pubkeys = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        cur.take(8)?;
        let len = bounded(cur.read_compact_size()?, cur)?;
        script_pubkeys.push(cur.take(len as usize)?.to_vec());
    }

    let base_consumed = cur.position() - pos;

    if segwit {
        for _ in 0..input_count {
            let items = bounded(cur.read_compact_size()?, cur)?;
            for _ in 0..items {
                let len = bounded(cur.read_compact_size()?, cur)?;
                cur.take(len as usize)?;
            }
        }
    }

    let locktime = cur.take(4)?;

    // txid covers the witness-stripped serialization.
    let mut preimage = Vec::with_capacity(8 + base_consumed);
    preimage.extend_from_slice(version);
    preimage.extend_from_slice(&base[..base_consumed]);
    preimage.extend_from_slice(locktime);
    let mut txid = sha256d(&preimage);
    txid.reverse();

    Ok(ParsedTx {
        txid_hex: hex::encode(txid),
        script_sigs,
        script_pubkeys,
    })
}

fn bounded(n: u64, cur: &Cursor<'_>) -> Result<u64, VarintError> {
    if n > MAX_VEC_LEN {
        return Err(VarintError::Overflow {
            offset: cur.position(),
        });
    }
    Ok(n)
}
