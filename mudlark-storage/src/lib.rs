//! Read-only storage adapters.
//!
//! Every chain ships its own embedded database; these modules open them in
//! place, without taking locks or writing a byte: LevelDB for Bitcoin's
//! block index and chainstate and for geth's hot tail, LMDB for Monero, and
//! geth's append-only freezer tables for cold blocks.

pub mod freezer;
pub mod leveldb;
pub mod lmdb;
