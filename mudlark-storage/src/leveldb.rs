//! LevelDB reader used for the Bitcoin block index, the chainstate, and
//! geth's hot-tail block storage.
//!
//! `rusty-leveldb` is a full reimplementation, so no C library is involved;
//! it transparently handles the snappy-compressed blocks geth writes. We
//! only ever read, but the handle API is `&mut self` because the library
//! maintains an internal block cache.

use std::path::Path;

use rusty_leveldb::{LdbIterator, Options, DB};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cannot open leveldb at {path}: {status}")]
    Open { path: String, status: String },
    #[error("cannot create leveldb iterator: {0}")]
    Iterator(String),
}

pub struct Reader {
    db: DB,
}

impl Reader {
    /// Open an existing database. Never creates one.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut options = Options::default();
        options.create_if_missing = false;
        let db = DB::open(path, options).map_err(|status| Error::Open {
            path: path.display().to_string(),
            status: status.to_string(),
        })?;
        Ok(Self { db })
    }

    pub fn get(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.get(key)
    }

    /// Ordered scan over every entry whose key starts with `prefix`.
    pub fn scan_prefix(&mut self, prefix: &[u8]) -> Result<PrefixScan, Error> {
        let mut inner = self
            .db
            .new_iter()
            .map_err(|status| Error::Iterator(status.to_string()))?;
        inner.seek(prefix);
        Ok(PrefixScan {
            inner,
            prefix: prefix.to_vec(),
            primed: false,
        })
    }
}

pub struct PrefixScan {
    inner: rusty_leveldb::DBIterator,
    prefix: Vec<u8>,
    primed: bool,
}

impl Iterator for PrefixScan {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        // seek() leaves the iterator on the first matching entry, so the
        // first next() must not advance past it.
        let entry = if self.primed {
            self.inner.next()
        } else {
            self.primed = true;
            let mut key = Vec::new();
            let mut value = Vec::new();
            self.inner
                .current(&mut key, &mut value)
                .then_some((key, value))
        };

        entry.filter(|(key, _)| key.starts_with(&self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_fixture(dir: &Path) {
        let mut options = Options::default();
        options.create_if_missing = true;
        let mut db = DB::open(dir, options).unwrap();
        db.put(b"Ca", b"first").unwrap();
        db.put(b"Cb", b"second").unwrap();
        db.put(b"Cc", b"third").unwrap();
        db.put(b"b0", b"other").unwrap();
        db.put(b"zz", b"tail").unwrap();
        db.flush().unwrap();
    }

    #[test]
    fn point_lookup() {
        let dir = tempfile::tempdir().unwrap();
        build_fixture(dir.path());

        let mut reader = Reader::open(dir.path()).unwrap();
        assert_eq!(reader.get(b"Cb"), Some(b"second".to_vec()));
        assert_eq!(reader.get(b"missing"), None);
    }

    #[test]
    fn prefix_scan_is_ordered_and_bounded() {
        let dir = tempfile::tempdir().unwrap();
        build_fixture(dir.path());

        let mut reader = Reader::open(dir.path()).unwrap();
        let entries: Vec<_> = reader.scan_prefix(b"C").unwrap().collect();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].0, b"Ca");
        assert_eq!(entries[2].1, b"third");
    }

    #[test]
    fn open_refuses_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Reader::open(&dir.path().join("nope")).is_err());
    }
}
