//! LMDB reader for the Monero blockchain database.
//!
//! The environment opens read-only and lockless, the way an external tool
//! must approach a database that monerod may still own. Tables are dupsort
//! with integer keys; iteration visits every duplicate in key order, which
//! is all the extractor needs.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, EnvFlags, EnvOpenOptions, RoTxn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lmdb environment error: {0}")]
    Env(#[from] heed::Error),
    #[error("named database {0:?} does not exist")]
    MissingTable(String),
}

pub struct Environment {
    env: heed::Env,
}

impl Environment {
    /// Open an existing environment read-only, without acquiring the
    /// reader lock, with room for the handful of named databases monerod
    /// keeps.
    pub fn open_read_only(path: &Path, max_dbs: u32) -> Result<Self, Error> {
        let mut options = EnvOpenOptions::new();
        options.max_dbs(max_dbs);
        unsafe {
            options.flags(EnvFlags::READ_ONLY | EnvFlags::NO_LOCK);
        }
        let env = unsafe { options.open(path)? };
        Ok(Self { env })
    }

    pub fn read_txn(&self) -> Result<RoTxn, Error> {
        Ok(self.env.read_txn()?)
    }

    pub fn open_table(&self, rtxn: &RoTxn, name: &str) -> Result<Table, Error> {
        let db: Database<Bytes, Bytes> = self
            .env
            .open_database(rtxn, Some(name))?
            .ok_or_else(|| Error::MissingTable(name.to_owned()))?;
        Ok(Table { db })
    }
}

#[derive(Clone, Copy)]
pub struct Table {
    db: Database<Bytes, Bytes>,
}

impl Table {
    pub fn get<'t>(&self, rtxn: &'t RoTxn, key: &[u8]) -> Result<Option<&'t [u8]>, Error> {
        Ok(self.db.get(rtxn, key)?)
    }

    /// Fetch a batch of keys in one pass, preserving order. Misses come
    /// back as `None` so callers can keep rows aligned with their batch.
    pub fn get_many<'t, I>(&self, rtxn: &'t RoTxn, keys: I) -> Result<Vec<Option<&'t [u8]>>, Error>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let mut out = Vec::new();
        for key in keys {
            out.push(self.db.get(rtxn, key.as_ref())?);
        }
        Ok(out)
    }

    /// Cursor over every entry, duplicates included.
    pub fn iter<'t>(
        &self,
        rtxn: &'t RoTxn,
    ) -> Result<impl Iterator<Item = Result<(&'t [u8], &'t [u8]), Error>> + 't, Error> {
        let iter = self.db.iter(rtxn)?;
        Ok(iter.map(|entry| entry.map_err(Error::from)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heed::DatabaseFlags;

    fn build_fixture(path: &Path) {
        std::fs::create_dir_all(path).unwrap();
        let mut options = EnvOpenOptions::new();
        options.max_dbs(4);
        options.map_size(16 * 1024 * 1024);
        let env = unsafe { options.open(path).unwrap() };
        let mut wtxn = env.write_txn().unwrap();
        let db = env
            .database_options()
            .types::<Bytes, Bytes>()
            .name("tx_indices")
            .flags(DatabaseFlags::DUP_SORT)
            .create(&mut wtxn)
            .unwrap();
        db.put(&mut wtxn, b"k1", b"v1").unwrap();
        db.put(&mut wtxn, b"k1", b"v2").unwrap();
        db.put(&mut wtxn, b"k2", b"v3").unwrap();
        wtxn.commit().unwrap();
        env.prepare_for_closing().wait();
    }

    #[test]
    fn iterates_duplicates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        build_fixture(dir.path());

        let env = Environment::open_read_only(dir.path(), 4).unwrap();
        let rtxn = env.read_txn().unwrap();
        let table = env.open_table(&rtxn, "tx_indices").unwrap();

        let entries: Vec<_> = table
            .iter(&rtxn)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], (&b"k1"[..], &b"v1"[..]));
        assert_eq!(entries[1], (&b"k1"[..], &b"v2"[..]));
        assert_eq!(entries[2], (&b"k2"[..], &b"v3"[..]));
    }

    #[test]
    fn get_many_preserves_order_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        build_fixture(dir.path());

        let env = Environment::open_read_only(dir.path(), 4).unwrap();
        let rtxn = env.read_txn().unwrap();
        let table = env.open_table(&rtxn, "tx_indices").unwrap();

        let values = table
            .get_many(&rtxn, [&b"k2"[..], &b"missing"[..], &b"k1"[..]])
            .unwrap();
        assert_eq!(values[0], Some(&b"v3"[..]));
        assert_eq!(values[1], None);
        // Dupsort get returns the first duplicate.
        assert_eq!(values[2], Some(&b"v1"[..]));
    }

    #[test]
    fn missing_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        build_fixture(dir.path());

        let env = Environment::open_read_only(dir.path(), 4).unwrap();
        let rtxn = env.read_txn().unwrap();
        assert!(matches!(
            env.open_table(&rtxn, "no_such_table"),
            Err(Error::MissingTable(_))
        ));
    }
}
