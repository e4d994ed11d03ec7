//! Digest helpers shared by the chain extractors.

use sha2::{Digest as _, Sha256};
use sha3::{Digest as _, Keccak256};

/// Keccak-256 as used for Ethereum transaction identity.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Double SHA-256 as used for Bitcoin transaction identity.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}
