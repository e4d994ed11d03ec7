//! Bitcoin chainstate (UTXO set) decoding, Core 0.15+ layout.
//!
//! Keys are `'C' || tx_hash[32] || b128(vout)`. Values are XOR-obfuscated
//! with the database's obfuscation key and then decode as
//! `code || amount || out_type || script`, where `code = height << 1 |
//! coinbase` and the amount is compressed the way Core's `CompressAmount`
//! writes it.

use crate::varint::{self, Cursor};

/// Leading byte of every UTXO key.
pub const COIN_KEY_PREFIX: u8 = 0x43;

/// Script types 0..=5 are compressed standard forms; anything above encodes
/// the raw script length.
const SPECIAL_SCRIPTS: u64 = 6;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("key does not start with the coin prefix")]
    NotACoinKey,
    #[error("key is {0} bytes, too short for a tx hash")]
    ShortKey(usize),
    #[error("script is {got} bytes where the type byte implies {want}")]
    ScriptLength { want: usize, got: usize },
    #[error(transparent)]
    Varint(#[from] varint::Error),
}

/// One decoded unspent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
    pub tx_hash: [u8; 32],
    pub vout: u64,
    pub height: u64,
    pub coinbase: bool,
    pub amount: u64,
    pub out_type: u64,
    pub script: Vec<u8>,
}

/// XOR the value in place with the obfuscation key, repeated to length.
pub fn deobfuscate(key: &[u8], value: &mut [u8]) {
    if key.is_empty() {
        return;
    }
    for (i, byte) in value.iter_mut().enumerate() {
        *byte ^= key[i % key.len()];
    }
}

/// Decode one chainstate entry from its key and deobfuscated value.
pub fn decode_coin(key: &[u8], value: &[u8]) -> Result<Coin, Error> {
    if key.first() != Some(&COIN_KEY_PREFIX) {
        return Err(Error::NotACoinKey);
    }
    if key.len() < 34 {
        return Err(Error::ShortKey(key.len()));
    }
    let mut tx_hash = [0u8; 32];
    tx_hash.copy_from_slice(&key[1..33]);
    let vout = Cursor::new(&key[33..]).read_b128()?;

    let mut cur = Cursor::new(value);
    let code = cur.read_b128()?;
    let amount = decompress_amount(cur.read_b128()?);
    let out_type = cur.read_b128()?;

    let script = match out_type {
        0 | 1 => cur.take(20)?.to_vec(),
        2..=5 => {
            // The type byte doubles as the first script byte (the key
            // parity / uncompressed marker).
            let mut script = Vec::with_capacity(33);
            script.push(out_type as u8);
            script.extend_from_slice(cur.take(32)?);
            script
        }
        n => {
            let want = (n - SPECIAL_SCRIPTS) as usize;
            let rest = cur.remaining();
            if rest.len() != want {
                return Err(Error::ScriptLength {
                    want,
                    got: rest.len(),
                });
            }
            rest.to_vec()
        }
    };

    Ok(Coin {
        tx_hash,
        vout,
        height: code >> 1,
        coinbase: code & 1 == 1,
        amount,
        out_type,
        script,
    })
}

/// Inverse of Bitcoin Core's `CompressAmount`.
pub fn decompress_amount(x: u64) -> u64 {
    if x == 0 {
        return 0;
    }
    let x = x - 1;
    let mut e = x % 10;
    let x = x / 10;
    let mut n = if e < 9 {
        let d = (x % 9) + 1;
        (x / 9) * 10 + d
    } else {
        x + 1
    };
    while e > 0 {
        n *= 10;
        e -= 1;
    }
    n
}

/// Bitcoin Core's `CompressAmount`; only the tests need the forward
/// direction, to state the left-inverse law.
pub fn compress_amount(mut n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let mut e = 0u64;
    while n % 10 == 0 && e < 9 {
        n /= 10;
        e += 1;
    }
    if e < 9 {
        let d = n % 10;
        debug_assert!(d >= 1 && d <= 9);
        n /= 10;
        1 + (n * 9 + d - 1) * 10 + e
    } else {
        1 + (n - 1) * 10 + 9
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::write_b128;
    use proptest::prelude::*;

    #[test]
    fn amount_known_vectors() {
        assert_eq!(decompress_amount(0), 0);
        assert_eq!(decompress_amount(0x48), 80);
        assert_eq!(decompress_amount(7), 1_000_000);
        // 600 BTC: stored as varint bytes 0x83 0x58, which decode to 600.
        let mut cur = Cursor::new(&[0x83, 0x58]);
        let compressed = cur.read_b128().unwrap();
        assert_eq!(compressed, 600);
        assert_eq!(decompress_amount(compressed), 60_000_000_000);
        assert_eq!(compress_amount(60_000_000_000), 600);
    }

    proptest! {
        #[test]
        fn decompress_is_left_inverse(amount in 0u64..21_000_000_0000_0000u64) {
            prop_assert_eq!(decompress_amount(compress_amount(amount)), amount);
        }
    }

    fn coin_key(tx_hash: [u8; 32], vout: u64) -> Vec<u8> {
        let mut key = vec![COIN_KEY_PREFIX];
        key.extend(tx_hash);
        write_b128(vout, &mut key);
        key
    }

    fn coin_value(height: u64, coinbase: bool, amount: u64, out_type: u64, tail: &[u8]) -> Vec<u8> {
        let mut value = Vec::new();
        write_b128(height << 1 | u64::from(coinbase), &mut value);
        write_b128(compress_amount(amount), &mut value);
        write_b128(out_type, &mut value);
        value.extend_from_slice(tail);
        value
    }

    #[test]
    fn decodes_hash_script() {
        let key = coin_key([0xab; 32], 3);
        let value = coin_value(203_998, false, 60_000_000_000, 0, &[0x11; 20]);
        let coin = decode_coin(&key, &value).unwrap();
        assert_eq!(coin.vout, 3);
        assert_eq!(coin.height, 203_998);
        assert!(!coin.coinbase);
        assert_eq!(coin.amount, 60_000_000_000);
        assert_eq!(coin.script, vec![0x11; 20]);
    }

    #[test]
    fn decodes_compressed_pubkey_script() {
        let key = coin_key([0x01; 32], 0);
        let value = coin_value(100, true, 50_0000_0000, 2, &[0x22; 32]);
        let coin = decode_coin(&key, &value).unwrap();
        assert!(coin.coinbase);
        assert_eq!(coin.script.len(), 33);
        assert_eq!(coin.script[0], 0x02);
        assert_eq!(&coin.script[1..], &[0x22; 32]);
    }

    #[test]
    fn decodes_raw_script() {
        let raw = [0x6a, 0x03, 0x61, 0x62, 0x63];
        let key = coin_key([0x02; 32], 1);
        let value = coin_value(7, false, 0, SPECIAL_SCRIPTS + raw.len() as u64, &raw);
        let coin = decode_coin(&key, &value).unwrap();
        assert_eq!(coin.script, raw);
        assert_eq!(coin.height, 7);
    }

    #[test]
    fn rejects_script_length_mismatch() {
        let key = coin_key([0x02; 32], 1);
        let value = coin_value(7, false, 0, SPECIAL_SCRIPTS + 4, &[0x00; 3]);
        assert!(matches!(
            decode_coin(&key, &value),
            Err(Error::ScriptLength { want: 4, got: 3 })
        ));
    }

    #[test]
    fn deobfuscation_repeats_the_key() {
        let key = [0x0f, 0xf0];
        let mut value = vec![0x0f, 0xf0, 0x0f, 0xf0, 0x0f];
        deobfuscate(&key, &mut value);
        assert_eq!(value, vec![0, 0, 0, 0, 0]);
    }
}
