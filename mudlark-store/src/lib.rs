//! The embedded relational store.
//!
//! One SQLite file holds everything the pipeline produces: the raw payload
//! table written during extraction and three findings tables written during
//! detection. Raw records are identified by `(txid, extra_index, kind)`;
//! re-inserting an existing identity is a no-op, which is what makes
//! interrupted runs restartable.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("unknown blockchain selector {0:?}")]
    UnknownChain(String),
    #[error("unknown record kind {0:?}")]
    UnknownKind(String),
}

/// The chains the extractors understand. The string forms are stable: they
/// are stored in the `COIN` column and accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chain {
    BitcoinMainnet,
    BitcoinTestnet3,
    BitcoinRegtest,
    MoneroMainnet,
    MoneroStagenet,
    MoneroTestnet,
    EthereumMainnet,
}

impl Chain {
    pub const ALL: [Chain; 7] = [
        Chain::BitcoinMainnet,
        Chain::BitcoinTestnet3,
        Chain::BitcoinRegtest,
        Chain::MoneroMainnet,
        Chain::MoneroStagenet,
        Chain::MoneroTestnet,
        Chain::EthereumMainnet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::BitcoinMainnet => "bitcoin_mainnet",
            Chain::BitcoinTestnet3 => "bitcoin_testnet3",
            Chain::BitcoinRegtest => "bitcoin_regtest",
            Chain::MoneroMainnet => "monero_mainnet",
            Chain::MoneroStagenet => "monero_stagenet",
            Chain::MoneroTestnet => "monero_testnet",
            Chain::EthereumMainnet => "ethereum_mainnet",
        }
    }

    pub fn is_bitcoin(&self) -> bool {
        matches!(
            self,
            Chain::BitcoinMainnet | Chain::BitcoinTestnet3 | Chain::BitcoinRegtest
        )
    }

    pub fn is_monero(&self) -> bool {
        matches!(
            self,
            Chain::MoneroMainnet | Chain::MoneroStagenet | Chain::MoneroTestnet
        )
    }

    pub fn is_ethereum(&self) -> bool {
        matches!(self, Chain::EthereumMainnet)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Chain::ALL
            .into_iter()
            .find(|chain| chain.as_str() == s)
            .ok_or_else(|| Error::UnknownChain(s.to_owned()))
    }
}

/// Which field of a transaction a payload was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    ScriptSig,
    ScriptPubkey,
    TxExtra,
    TxData,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::ScriptSig => "scriptsig",
            RecordKind::ScriptPubkey => "script_pubkey",
            RecordKind::TxExtra => "tx_extra",
            RecordKind::TxData => "tx_data",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "scriptsig" => Ok(RecordKind::ScriptSig),
            "script_pubkey" => Ok(RecordKind::ScriptPubkey),
            "tx_extra" => Ok(RecordKind::TxExtra),
            "tx_data" => Ok(RecordKind::TxData),
            other => Err(Error::UnknownKind(other.to_owned())),
        }
    }
}

/// One extracted payload, as persisted in `cryptoData`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub data: Vec<u8>,
    pub txid: String,
    pub chain: Chain,
    pub kind: RecordKind,
    pub block_height: u64,
    pub extra_index: u32,
}

/// A detected printable-string run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiFinding {
    pub txid: String,
    pub kind: RecordKind,
    pub extra_index: u32,
    pub string_length: u64,
}

/// A detected file format (libmagic description or image sniff name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFinding {
    pub txid: String,
    pub kind: RecordKind,
    pub extra_index: u32,
    pub file_type: String,
}

/// The two file-finding tables share one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFindingTable {
    Magic,
    Imghdr,
}

impl FileFindingTable {
    fn table_name(&self) -> &'static str {
        match self {
            FileFindingTable::Magic => "magicFileData",
            FileFindingTable::Imghdr => "imghdrFileData",
        }
    }
}

/// Aggregate counts for the `record_stats` report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub raw_records: u64,
    pub per_kind: Vec<(String, u64)>,
    pub ascii_findings: u64,
    pub max_string_length: u64,
    pub magic_findings: u64,
    pub imghdr_findings: u64,
}

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS cryptoData (
    DATA         BLOB     NOT NULL,
    TXID         CHAR(64) NOT NULL,
    COIN         TEXT     NOT NULL,
    DATA_TYPE    TEXT     NOT NULL,
    BLOCK_HEIGHT INTEGER  NOT NULL,
    EXTRA_INDEX  INTEGER,
    PRIMARY KEY (TXID, EXTRA_INDEX, DATA_TYPE)
);
CREATE TABLE IF NOT EXISTS asciiData (
    TXID          CHAR(64) NOT NULL,
    DATA_TYPE     TEXT     NOT NULL,
    EXTRA_INDEX   INTEGER,
    STRING_LENGTH INTEGER  NOT NULL,
    PRIMARY KEY (TXID, EXTRA_INDEX, DATA_TYPE)
);
CREATE TABLE IF NOT EXISTS magicFileData (
    TXID        CHAR(64) NOT NULL,
    DATA_TYPE   TEXT     NOT NULL,
    EXTRA_INDEX INTEGER,
    FILE_TYPE   TEXT     NOT NULL,
    PRIMARY KEY (TXID, EXTRA_INDEX, DATA_TYPE)
);
CREATE TABLE IF NOT EXISTS imghdrFileData (
    TXID        CHAR(64) NOT NULL,
    DATA_TYPE   TEXT     NOT NULL,
    EXTRA_INDEX INTEGER,
    FILE_TYPE   TEXT     NOT NULL,
    PRIMARY KEY (TXID, EXTRA_INDEX, DATA_TYPE)
);
";

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database and make sure the schema exists.
    ///
    /// WAL lets the detector runner stream one connection while committing
    /// finding batches on another.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Bulk-insert raw records in one transaction. Records whose identity
    /// already exists are silently ignored.
    pub fn insert_raw(&mut self, records: &[RawRecord]) -> Result<(), Error> {
        let txn = self.conn.transaction()?;
        {
            let mut stmt = txn.prepare_cached(
                "INSERT OR IGNORE INTO cryptoData \
                 (DATA, TXID, COIN, DATA_TYPE, BLOCK_HEIGHT, EXTRA_INDEX) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for record in records {
                stmt.execute(rusqlite::params![
                    record.data,
                    record.txid,
                    record.chain.as_str(),
                    record.kind.as_str(),
                    record.block_height,
                    record.extra_index,
                ])?;
            }
        }
        txn.commit()?;
        debug!(count = records.len(), "raw batch committed");
        Ok(())
    }

    pub fn raw_count(&self) -> Result<u64, Error> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cryptoData", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Stream every raw record through `visit`, optionally restricted to
    /// one chain. Returns the number of records visited.
    pub fn for_each_raw<F>(&self, chain: Option<Chain>, mut visit: F) -> Result<u64, Error>
    where
        F: FnMut(RawRecord) -> Result<(), Error>,
    {
        let sql = "SELECT DATA, TXID, COIN, DATA_TYPE, BLOCK_HEIGHT, EXTRA_INDEX \
                   FROM cryptoData";
        let mut visited = 0u64;

        let emit = |row: &rusqlite::Row<'_>| -> Result<RawRecord, Error> {
            let chain: String = row.get(2)?;
            let kind: String = row.get(3)?;
            Ok(RawRecord {
                data: row.get(0)?,
                txid: row.get(1)?,
                chain: chain.parse()?,
                kind: kind.parse()?,
                block_height: row.get(4)?,
                extra_index: row.get(5)?,
            })
        };

        match chain {
            Some(chain) => {
                let mut stmt = self.conn.prepare(&format!("{sql} WHERE COIN = ?1"))?;
                let mut rows = stmt.query([chain.as_str()])?;
                while let Some(row) = rows.next()? {
                    visit(emit(row)?)?;
                    visited += 1;
                }
            }
            None => {
                let mut stmt = self.conn.prepare(sql)?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    visit(emit(row)?)?;
                    visited += 1;
                }
            }
        }

        Ok(visited)
    }

    /// Begin a transaction for batched finding writes; the caller commits.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>, Error> {
        Ok(self.conn.transaction()?)
    }

    /// Insert ascii findings inside the caller's transaction.
    pub fn insert_ascii_findings(
        txn: &rusqlite::Transaction<'_>,
        findings: &[AsciiFinding],
    ) -> Result<(), Error> {
        let mut stmt = txn.prepare_cached(
            "INSERT OR IGNORE INTO asciiData \
             (TXID, DATA_TYPE, EXTRA_INDEX, STRING_LENGTH) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for finding in findings {
            stmt.execute(rusqlite::params![
                finding.txid,
                finding.kind.as_str(),
                finding.extra_index,
                finding.string_length,
            ])?;
        }
        Ok(())
    }

    /// Insert file findings inside the caller's transaction.
    pub fn insert_file_findings(
        txn: &rusqlite::Transaction<'_>,
        table: FileFindingTable,
        findings: &[FileFinding],
    ) -> Result<(), Error> {
        let mut stmt = txn.prepare_cached(&format!(
            "INSERT OR IGNORE INTO {} \
             (TXID, DATA_TYPE, EXTRA_INDEX, FILE_TYPE) VALUES (?1, ?2, ?3, ?4)",
            table.table_name()
        ))?;
        for finding in findings {
            stmt.execute(rusqlite::params![
                finding.txid,
                finding.kind.as_str(),
                finding.extra_index,
                finding.file_type,
            ])?;
        }
        Ok(())
    }

    /// Count of detected strings per length, ascending by length.
    pub fn ascii_histogram(&self, chain: Option<Chain>) -> Result<Vec<(u64, u64)>, Error> {
        let (sql, params) = match chain {
            Some(chain) => (
                "SELECT a.STRING_LENGTH, COUNT(*) FROM asciiData a \
                 JOIN cryptoData c ON a.TXID = c.TXID \
                     AND a.EXTRA_INDEX = c.EXTRA_INDEX AND a.DATA_TYPE = c.DATA_TYPE \
                 WHERE c.COIN = ?1 \
                 GROUP BY a.STRING_LENGTH ORDER BY a.STRING_LENGTH",
                vec![chain.as_str().to_owned()],
            ),
            None => (
                "SELECT STRING_LENGTH, COUNT(*) FROM asciiData \
                 GROUP BY STRING_LENGTH ORDER BY STRING_LENGTH",
                vec![],
            ),
        };
        self.histogram_query(sql, &params)
    }

    /// Count of findings per file type, most common first.
    pub fn file_histogram(
        &self,
        table: FileFindingTable,
        chain: Option<Chain>,
    ) -> Result<Vec<(String, u64)>, Error> {
        let name = table.table_name();
        let (sql, params) = match chain {
            Some(chain) => (
                format!(
                    "SELECT f.FILE_TYPE, COUNT(*) FROM {name} f \
                     JOIN cryptoData c ON f.TXID = c.TXID \
                         AND f.EXTRA_INDEX = c.EXTRA_INDEX AND f.DATA_TYPE = c.DATA_TYPE \
                     WHERE c.COIN = ?1 \
                     GROUP BY f.FILE_TYPE ORDER BY COUNT(*) DESC"
                ),
                vec![chain.as_str().to_owned()],
            ),
            None => (
                format!(
                    "SELECT FILE_TYPE, COUNT(*) FROM {name} \
                     GROUP BY FILE_TYPE ORDER BY COUNT(*) DESC"
                ),
                vec![],
            ),
        };

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    /// Aggregate counts for the stats report.
    pub fn record_stats(&self, chain: Option<Chain>) -> Result<RecordStats, Error> {
        let filter = match chain {
            Some(_) => " WHERE COIN = ?1",
            None => "",
        };
        let params: Vec<String> = match chain {
            Some(chain) => vec![chain.as_str().to_owned()],
            None => vec![],
        };

        let raw_records =
            self.count_query(&format!("SELECT COUNT(*) FROM cryptoData{filter}"), &params)?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT DATA_TYPE, COUNT(*) FROM cryptoData{filter} GROUP BY DATA_TYPE"
        ))?;
        let per_kind = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let joined = |table: &str| match chain {
            Some(_) => format!(
                "SELECT COUNT(*) FROM {table} f JOIN cryptoData c \
                 ON f.TXID = c.TXID AND f.EXTRA_INDEX = c.EXTRA_INDEX \
                 AND f.DATA_TYPE = c.DATA_TYPE WHERE c.COIN = ?1"
            ),
            None => format!("SELECT COUNT(*) FROM {table}"),
        };

        let ascii_findings = self.count_query(&joined("asciiData"), &params)?;
        let magic_findings = self.count_query(&joined("magicFileData"), &params)?;
        let imghdr_findings = self.count_query(&joined("imghdrFileData"), &params)?;

        let max_sql = match chain {
            Some(_) => {
                "SELECT COALESCE(MAX(a.STRING_LENGTH), 0) FROM asciiData a \
                 JOIN cryptoData c ON a.TXID = c.TXID AND a.EXTRA_INDEX = c.EXTRA_INDEX \
                 AND a.DATA_TYPE = c.DATA_TYPE WHERE c.COIN = ?1"
                    .to_owned()
            }
            None => "SELECT COALESCE(MAX(STRING_LENGTH), 0) FROM asciiData".to_owned(),
        };
        let max_string_length = self.count_query(&max_sql, &params)?;

        Ok(RecordStats {
            raw_records,
            per_kind,
            ascii_findings,
            max_string_length,
            magic_findings,
            imghdr_findings,
        })
    }

    fn histogram_query(&self, sql: &str, params: &[String]) -> Result<Vec<(u64, u64)>, Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?))
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    fn count_query(&self, sql: &str, params: &[String]) -> Result<u64, Error> {
        let count = self
            .conn
            .query_row(sql, rusqlite::params_from_iter(params.iter()), |row| {
                row.get(0)
            })?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(txid: &str, kind: RecordKind, extra_index: u32, data: &[u8]) -> RawRecord {
        RawRecord {
            data: data.to_vec(),
            txid: txid.to_owned(),
            chain: Chain::BitcoinRegtest,
            kind,
            block_height: 5,
            extra_index,
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let (_dir, mut store) = temp_store();
        let rec = record("aa", RecordKind::ScriptSig, 0, b"payload");
        store.insert_raw(&[rec.clone()]).unwrap();
        store.insert_raw(&[rec.clone()]).unwrap();
        store
            .insert_raw(&[record("aa", RecordKind::ScriptSig, 0, b"different")])
            .unwrap();
        assert_eq!(store.raw_count().unwrap(), 1);

        // Same txid under a different kind or index is a new record.
        store
            .insert_raw(&[record("aa", RecordKind::ScriptPubkey, 0, b"x")])
            .unwrap();
        store
            .insert_raw(&[record("aa", RecordKind::ScriptSig, 1, b"y")])
            .unwrap();
        assert_eq!(store.raw_count().unwrap(), 3);
    }

    #[test]
    fn streaming_round_trips_records() {
        let (_dir, mut store) = temp_store();
        let rec = record("bb", RecordKind::ScriptPubkey, 2, b"\x6a\x05hello");
        store.insert_raw(&[rec.clone()]).unwrap();

        let mut seen = Vec::new();
        let visited = store
            .for_each_raw(None, |r| {
                seen.push(r);
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 1);
        assert_eq!(seen, vec![rec]);
    }

    #[test]
    fn chain_filter_restricts_stream() {
        let (_dir, mut store) = temp_store();
        let mut eth = record("cc", RecordKind::TxData, 0, b"abc");
        eth.chain = Chain::EthereumMainnet;
        store
            .insert_raw(&[eth, record("dd", RecordKind::ScriptSig, 0, b"def")])
            .unwrap();

        let visited = store
            .for_each_raw(Some(Chain::EthereumMainnet), |r| {
                assert_eq!(r.chain, Chain::EthereumMainnet);
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 1);
    }

    #[test]
    fn findings_and_views() {
        let (_dir, mut store) = temp_store();
        store
            .insert_raw(&[
                record("aa", RecordKind::ScriptSig, 0, b"one"),
                record("bb", RecordKind::ScriptSig, 0, b"two"),
                record("cc", RecordKind::ScriptPubkey, 0, b"three"),
            ])
            .unwrap();

        let txn = store.transaction().unwrap();
        Store::insert_ascii_findings(
            &txn,
            &[
                AsciiFinding {
                    txid: "aa".into(),
                    kind: RecordKind::ScriptSig,
                    extra_index: 0,
                    string_length: 12,
                },
                AsciiFinding {
                    txid: "bb".into(),
                    kind: RecordKind::ScriptSig,
                    extra_index: 0,
                    string_length: 12,
                },
            ],
        )
        .unwrap();
        Store::insert_file_findings(
            &txn,
            FileFindingTable::Magic,
            &[FileFinding {
                txid: "cc".into(),
                kind: RecordKind::ScriptPubkey,
                extra_index: 0,
                file_type: "PNG image data".into(),
            }],
        )
        .unwrap();
        txn.commit().unwrap();

        assert_eq!(store.ascii_histogram(None).unwrap(), vec![(12, 2)]);
        assert_eq!(
            store.ascii_histogram(Some(Chain::BitcoinRegtest)).unwrap(),
            vec![(12, 2)]
        );
        assert_eq!(
            store.ascii_histogram(Some(Chain::EthereumMainnet)).unwrap(),
            vec![]
        );
        assert_eq!(
            store
                .file_histogram(FileFindingTable::Magic, None)
                .unwrap(),
            vec![("PNG image data".to_owned(), 1)]
        );

        let stats = store.record_stats(None).unwrap();
        assert_eq!(stats.raw_records, 3);
        assert_eq!(stats.ascii_findings, 2);
        assert_eq!(stats.magic_findings, 1);
        assert_eq!(stats.imghdr_findings, 0);
        assert_eq!(stats.max_string_length, 12);
    }

    #[test]
    fn chain_strings_round_trip() {
        for chain in Chain::ALL {
            assert_eq!(chain.as_str().parse::<Chain>().unwrap(), chain);
        }
        assert!(matches!(
            "dogecoin".parse::<Chain>(),
            Err(Error::UnknownChain(_))
        ));
    }
}
