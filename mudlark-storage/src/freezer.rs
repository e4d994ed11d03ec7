//! Reader for geth's append-only "freezer" tables (the ancient store).
//!
//! A table is one index file plus numbered data shards. Index entries are
//! six bytes big-endian: a shard number and a byte offset into that shard.
//! Entry `i+1` marks the end of item `i`; an item that would cross a shard
//! boundary is written whole at the start of the next shard, so a single
//! item never straddles two files.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use binary_layout::prelude::*;
use tap::Tap;
use tracing::{debug, trace};

define_layout!(index_entry, BigEndian, {
    file_number: u16,
    offset: u32,
});

pub const INDEX_ENTRY_SIZE: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub file_number: u16,
    pub offset: u32,
}

impl IndexEntry {
    fn parse(buf: &[u8]) -> Self {
        let view = index_entry::View::new(buf);
        Self {
            file_number: view.file_number().read(),
            offset: view.offset().read(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("freezer table directory {0} not found")]
    MissingDir(PathBuf),
    #[error("index size {size} is not a multiple of {INDEX_ENTRY_SIZE}")]
    MisalignedIndex { size: u64 },
    #[error("item {item} out of bounds (tail {tail}, head {head})")]
    OutOfBounds { item: u64, tail: u64, head: u64 },
    #[error("snappy payload corrupt: {0}")]
    Snappy(#[from] snap::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One open freezer table, FDs cached per shard.
pub struct FreezerTable {
    path: PathBuf,
    name: String,
    compressed: bool,
    index: File,
    /// Items discarded from the tail (the first index entry's offset field).
    item_offset: u64,
    /// Total items ever written, tail included.
    items: u64,
    files: HashMap<u16, File>,
}

impl FreezerTable {
    /// Open `<dir>/<name>.cidx` (compressed) or `<name>.ridx` and size the
    /// table from the index file.
    pub fn open(dir: &Path, name: &str, compressed: bool) -> Result<Self, Error> {
        if !dir.is_dir() {
            return Err(Error::MissingDir(dir.to_owned()));
        }
        let ext = if compressed { "cidx" } else { "ridx" };
        let index_path = dir.join(format!("{name}.{ext}"));
        let mut index = File::open(&index_path)?;

        let size = index.metadata()?.len();
        if size % INDEX_ENTRY_SIZE != 0 {
            return Err(Error::MisalignedIndex { size });
        }

        // The zeroth entry carries the tail shard number and the count of
        // discarded items rather than a real data offset.
        let mut buf = [0u8; INDEX_ENTRY_SIZE as usize];
        index.seek(SeekFrom::Start(0))?;
        index.read_exact(&mut buf)?;
        let first = IndexEntry::parse(&buf);

        let item_offset = u64::from(first.offset);
        let items = item_offset + size / INDEX_ENTRY_SIZE - 1;

        debug!(
            name,
            items, item_offset, compressed, "opened freezer table"
        );

        Ok(Self {
            path: dir.to_owned(),
            name: name.to_owned(),
            compressed,
            index,
            item_offset,
            items,
            files: HashMap::new(),
        })
    }

    /// Number of items addressable through this table.
    pub fn items(&self) -> u64 {
        self.items
    }

    pub fn has(&self, item: u64) -> bool {
        item >= self.item_offset && item < self.items
    }

    /// Retrieve a single item.
    pub fn retrieve(&mut self, item: u64) -> Result<Vec<u8>, Error> {
        let mut items = self.retrieve_items(item, 1, 0)?;
        Ok(items.swap_remove(0))
    }

    /// Retrieve up to `count` items starting at `start`. Returns at least
    /// one item; stops early once returning another would push the output
    /// past `max_bytes` (0 means no cap).
    pub fn retrieve_items(
        &mut self,
        start: u64,
        count: u64,
        max_bytes: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        if count == 0 || !self.has(start) {
            return Err(Error::OutOfBounds {
                item: start,
                tail: self.item_offset,
                head: self.items,
            });
        }
        let count = count.min(self.items - start);
        let indices = self.indices(start, count)?;

        let mut output = Vec::with_capacity(count as usize);
        let mut output_size = 0usize;
        for pair in indices.windows(2) {
            let (first, second) = (pair[0], pair[1]);
            // An item "crossing" into the next shard actually lives at the
            // start of that shard.
            let (data_start, data_end, file_number) = if first.file_number != second.file_number {
                (0, second.offset, second.file_number)
            } else {
                (first.offset, second.offset, second.file_number)
            };

            let len = (data_end - data_start) as usize;
            let file = self.data_file(file_number)?;
            file.seek(SeekFrom::Start(u64::from(data_start)))?;
            let mut item = vec![0u8; len];
            file.read_exact(&mut item)?;

            let item = if self.compressed {
                snap::raw::Decoder::new().decompress_vec(&item)?
            } else {
                item
            };

            if !output.is_empty() && output_size + item.len() > max_bytes && max_bytes > 0 {
                break;
            }
            output_size += item.len();
            output.push(item);
        }

        Ok(output.tap(|output| {
            trace!(
                table = %self.name,
                start,
                returned = output.len(),
                bytes = output_size,
                "freezer read"
            )
        }))
    }

    /// Read the `count + 1` index entries covering items
    /// `start .. start + count`, tail offset applied.
    fn indices(&mut self, start: u64, count: u64) -> Result<Vec<IndexEntry>, Error> {
        let from = start - self.item_offset;
        self.index.seek(SeekFrom::Start(from * INDEX_ENTRY_SIZE))?;
        let mut buf = vec![0u8; ((count + 1) * INDEX_ENTRY_SIZE) as usize];
        self.index.read_exact(&mut buf)?;

        let mut entries: Vec<IndexEntry> = buf
            .chunks_exact(INDEX_ENTRY_SIZE as usize)
            .map(IndexEntry::parse)
            .collect();

        if from == 0 {
            // The zeroth entry is metadata; the first real item starts at
            // offset zero of whatever shard the next entry ends in.
            entries[0] = IndexEntry {
                file_number: entries[1].file_number,
                offset: 0,
            };
        }

        Ok(entries)
    }

    fn data_file(&mut self, number: u16) -> Result<&mut File, Error> {
        let ext = if self.compressed { "cdat" } else { "rdat" };
        let name = &self.name;
        let dir = &self.path;
        match self.files.entry(number) {
            Entry::Occupied(slot) => Ok(slot.into_mut()),
            Entry::Vacant(slot) => {
                let path = dir.join(format!("{name}.{number:04}.{ext}"));
                trace!(path = %path.display(), "opening freezer shard");
                Ok(slot.insert(File::open(path)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a table the way geth would: items appended to shards, one
    /// index entry per item recording where each ends.
    fn write_table(dir: &Path, name: &str, compressed: bool, shards: &[Vec<&[u8]>]) {
        let ext = if compressed { "cidx" } else { "ridx" };
        let mut index = Vec::new();
        // Zeroth entry: tail shard 0, no deleted items.
        index.extend([0u8; 6]);

        for (number, items) in shards.iter().enumerate() {
            let ext = if compressed { "cdat" } else { "rdat" };
            let mut data = Vec::new();
            for item in items {
                let encoded = if compressed {
                    snap::raw::Encoder::new().compress_vec(item).unwrap()
                } else {
                    item.to_vec()
                };
                data.extend_from_slice(&encoded);
                index.extend((number as u16).to_be_bytes());
                index.extend((data.len() as u32).to_be_bytes());
            }
            let mut f = File::create(dir.join(format!("{name}.{number:04}.{ext}"))).unwrap();
            f.write_all(&data).unwrap();
        }

        let mut f = File::create(dir.join(format!("{name}.{ext}"))).unwrap();
        f.write_all(&index).unwrap();
    }

    #[test]
    fn retrieves_items_within_one_shard() {
        let dir = tempfile::tempdir().unwrap();
        write_table(
            dir.path(),
            "bodies",
            false,
            &[vec![b"alpha", b"bravo", b"charlie"]],
        );

        let mut table = FreezerTable::open(dir.path(), "bodies", false).unwrap();
        assert_eq!(table.items(), 3);
        assert_eq!(table.retrieve(0).unwrap(), b"alpha");
        assert_eq!(table.retrieve(1).unwrap(), b"bravo");
        assert_eq!(table.retrieve(2).unwrap(), b"charlie");
        assert!(table.retrieve(3).is_err());
    }

    #[test]
    fn cross_shard_item_reads_from_start_of_next_shard() {
        let dir = tempfile::tempdir().unwrap();
        // Item 1 is the first item of shard 1: the index records it under
        // shard 1 at end-offset len("delta-item").
        write_table(
            dir.path(),
            "headers",
            false,
            &[vec![b"first-shard"], vec![b"delta-item", b"echo"]],
        );

        let mut table = FreezerTable::open(dir.path(), "headers", false).unwrap();
        assert_eq!(table.items(), 3);
        assert_eq!(table.retrieve(1).unwrap(), b"delta-item");
        assert_eq!(table.retrieve(2).unwrap(), b"echo");
    }

    #[test]
    fn compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let blob = vec![0x42u8; 300];
        write_table(dir.path(), "bodies", true, &[vec![&blob, b"tiny"]]);

        let mut table = FreezerTable::open(dir.path(), "bodies", true).unwrap();
        assert_eq!(table.retrieve(0).unwrap(), blob);
        assert_eq!(table.retrieve(1).unwrap(), b"tiny");
    }

    #[test]
    fn max_bytes_returns_at_least_one_item() {
        let dir = tempfile::tempdir().unwrap();
        write_table(
            dir.path(),
            "bodies",
            false,
            &[vec![b"0123456789", b"abcdefghij", b"xyz"]],
        );

        let mut table = FreezerTable::open(dir.path(), "bodies", false).unwrap();
        let items = table.retrieve_items(0, 3, 4).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0], b"0123456789");

        let items = table.retrieve_items(0, 3, 20).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn rejects_misaligned_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bodies.ridx"), [0u8; 13]).unwrap();
        assert!(matches!(
            FreezerTable::open(dir.path(), "bodies", false),
            Err(Error::MisalignedIndex { size: 13 })
        ));
    }
}
