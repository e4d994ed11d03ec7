//! Recursive-length-prefix codec for Ethereum block storage.
//!
//! The decoder is strict: length prefixes must be canonical (single bytes
//! below 0x80 encode as themselves, no leading zeros in long lengths) and an
//! item must consume its declared payload exactly. The encoder produces the
//! same canonical form, which is what makes `Transaction::hash` meaningful.

use crate::hashes::keccak256;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("input ends {missing} bytes short of its length prefix")]
    Overrun { missing: usize },
    #[error("non-canonical length prefix")]
    NonCanonical,
    #[error("{0} trailing bytes after the outer item")]
    Trailing(usize),
    #[error("expected a list")]
    ExpectedList,
    #[error("expected a byte string")]
    ExpectedBytes,
    #[error("integer has leading zero bytes")]
    LeadingZeros,
    #[error("integer wider than {max} bytes")]
    IntegerTooWide { max: usize },
    #[error("fixed-width field is {got} bytes, expected {want}")]
    BadWidth { want: usize, got: usize },
    #[error("list has {got} fields, expected {want}")]
    BadArity { want: usize, got: usize },
}

/// A decoded item borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<'a> {
    Bytes(&'a [u8]),
    List(Vec<Item<'a>>),
}

impl<'a> Item<'a> {
    pub fn as_bytes(&self) -> Result<&'a [u8], Error> {
        match self {
            Item::Bytes(b) => Ok(b),
            Item::List(_) => Err(Error::ExpectedBytes),
        }
    }

    pub fn as_list(&self) -> Result<&[Item<'a>], Error> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(Error::ExpectedList),
        }
    }

    /// Big-endian unsigned integer without leading zeros, at most 8 bytes.
    pub fn as_u64(&self) -> Result<u64, Error> {
        let bytes = self.uint_bytes(8)?;
        let mut out = 0u64;
        for b in bytes {
            out = (out << 8) | u64::from(*b);
        }
        Ok(out)
    }

    /// Big-endian unsigned integer without leading zeros, at most 16 bytes.
    pub fn as_u128(&self) -> Result<u128, Error> {
        let bytes = self.uint_bytes(16)?;
        let mut out = 0u128;
        for b in bytes {
            out = (out << 8) | u128::from(*b);
        }
        Ok(out)
    }

    pub fn as_u256(&self) -> Result<U256, Error> {
        Ok(U256(self.uint_bytes(32)?.to_vec()))
    }

    fn uint_bytes(&self, max: usize) -> Result<&'a [u8], Error> {
        let bytes = self.as_bytes()?;
        if bytes.first() == Some(&0) {
            return Err(Error::LeadingZeros);
        }
        if bytes.len() > max {
            return Err(Error::IntegerTooWide { max });
        }
        Ok(bytes)
    }

    pub fn as_fixed<const N: usize>(&self) -> Result<[u8; N], Error> {
        let bytes = self.as_bytes()?;
        bytes.try_into().map_err(|_| Error::BadWidth {
            want: N,
            got: bytes.len(),
        })
    }

    /// Fixed-width field that may also be entirely absent (empty string).
    pub fn as_fixed_or_empty<const N: usize>(&self) -> Result<Option<[u8; N]>, Error> {
        let bytes = self.as_bytes()?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.as_fixed()?))
    }
}

/// Decode a complete buffer into a single item, rejecting trailing bytes.
pub fn decode(buf: &[u8]) -> Result<Item<'_>, Error> {
    let (item, rest) = decode_any(buf)?;
    if !rest.is_empty() {
        return Err(Error::Trailing(rest.len()));
    }
    Ok(item)
}

fn decode_any(buf: &[u8]) -> Result<(Item<'_>, &[u8]), Error> {
    let (&prefix, rest) = buf.split_first().ok_or(Error::Overrun { missing: 1 })?;
    match prefix {
        0x00..=0x7f => Ok((Item::Bytes(&buf[..1]), rest)),
        0x80..=0xb7 => {
            let len = usize::from(prefix - 0x80);
            let (payload, rest) = split_checked(rest, len)?;
            if len == 1 && payload[0] < 0x80 {
                return Err(Error::NonCanonical);
            }
            Ok((Item::Bytes(payload), rest))
        }
        0xb8..=0xbf => {
            let (len, rest) = long_length(rest, prefix - 0xb7)?;
            let (payload, rest) = split_checked(rest, len)?;
            Ok((Item::Bytes(payload), rest))
        }
        0xc0..=0xf7 => {
            let len = usize::from(prefix - 0xc0);
            let (payload, rest) = split_checked(rest, len)?;
            Ok((Item::List(decode_items(payload)?), rest))
        }
        0xf8..=0xff => {
            let (len, rest) = long_length(rest, prefix - 0xf7)?;
            let (payload, rest) = split_checked(rest, len)?;
            Ok((Item::List(decode_items(payload)?), rest))
        }
    }
}

fn long_length(buf: &[u8], width: u8) -> Result<(usize, &[u8]), Error> {
    let (len_bytes, rest) = split_checked(buf, usize::from(width))?;
    if len_bytes[0] == 0 {
        return Err(Error::NonCanonical);
    }
    let mut len = 0usize;
    for b in len_bytes {
        len = len
            .checked_mul(256)
            .and_then(|n| n.checked_add(usize::from(*b)))
            .ok_or(Error::NonCanonical)?;
    }
    if len <= 55 {
        return Err(Error::NonCanonical);
    }
    Ok((len, rest))
}

fn split_checked(buf: &[u8], len: usize) -> Result<(&[u8], &[u8]), Error> {
    if buf.len() < len {
        return Err(Error::Overrun {
            missing: len - buf.len(),
        });
    }
    Ok(buf.split_at(len))
}

fn decode_items(mut payload: &[u8]) -> Result<Vec<Item<'_>>, Error> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let (item, rest) = decode_any(payload)?;
        items.push(item);
        payload = rest;
    }
    Ok(items)
}

/// Unsigned integer up to 256 bits, kept as minimal big-endian bytes so it
/// re-encodes canonically without a bignum dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct U256(Vec<u8>);

impl U256 {
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        U256(bytes[start..].to_vec())
    }

    pub fn from_u64(n: u64) -> Self {
        Self::from_be_bytes(&n.to_be_bytes())
    }

    pub fn be_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }
}

// ---- encoder ----

fn encode_length(len: usize, short_prefix: u8, out: &mut Vec<u8>) {
    if len <= 55 {
        out.push(short_prefix + len as u8);
    } else {
        let be = len.to_be_bytes();
        let start = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
        out.push(short_prefix + 55 + (be.len() - start) as u8);
        out.extend_from_slice(&be[start..]);
    }
}

pub fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    if bytes.len() == 1 && bytes[0] < 0x80 {
        out.push(bytes[0]);
    } else {
        encode_length(bytes.len(), 0x80, out);
        out.extend_from_slice(bytes);
    }
}

pub fn encode_u64(n: u64, out: &mut Vec<u8>) {
    encode_bytes(U256::from_u64(n).be_bytes(), out);
}

pub fn encode_u128(n: u128, out: &mut Vec<u8>) {
    encode_bytes(U256::from_be_bytes(&n.to_be_bytes()).be_bytes(), out);
}

pub fn encode_u256(n: &U256, out: &mut Vec<u8>) {
    encode_bytes(n.be_bytes(), out);
}

/// Wrap an already-encoded payload in a list prefix.
pub fn encode_list(payload: &[u8], out: &mut Vec<u8>) {
    encode_length(payload.len(), 0xc0, out);
    out.extend_from_slice(payload);
}

// ---- the three record layouts geth stores ----

/// A legacy transaction as stored in block bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<[u8; 20]>,
    pub value: U256,
    pub data: Vec<u8>,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl Transaction {
    pub fn from_item(item: &Item<'_>) -> Result<Self, Error> {
        let fields = expect_arity(item, 9)?;
        Ok(Transaction {
            nonce: fields[0].as_u64()?,
            gas_price: fields[1].as_u128()?,
            gas_limit: fields[2].as_u64()?,
            to: fields[3].as_fixed_or_empty()?,
            value: fields[4].as_u256()?,
            data: fields[5].as_bytes()?.to_vec(),
            v: fields[6].as_u64()?,
            r: fields[7].as_u256()?,
            s: fields[8].as_u256()?,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        encode_u64(self.nonce, &mut payload);
        encode_u128(self.gas_price, &mut payload);
        encode_u64(self.gas_limit, &mut payload);
        match self.to {
            Some(addr) => encode_bytes(&addr, &mut payload),
            None => encode_bytes(&[], &mut payload),
        }
        encode_u256(&self.value, &mut payload);
        encode_bytes(&self.data, &mut payload);
        encode_u64(self.v, &mut payload);
        encode_u256(&self.r, &mut payload);
        encode_u256(&self.s, &mut payload);
        encode_list(&payload, out);
    }

    /// Transaction identity: keccak-256 of the canonical encoding.
    pub fn hash(&self) -> [u8; 32] {
        let mut encoded = Vec::new();
        self.encode(&mut encoded);
        keccak256(&encoded)
    }
}

/// A block header, 15 fields in storage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub parent_hash: [u8; 32],
    pub uncle_hash: [u8; 32],
    pub coinbase: [u8; 20],
    pub root: Option<[u8; 32]>,
    pub tx_hash: Option<[u8; 32]>,
    pub receipt_hash: Option<[u8; 32]>,
    pub bloom: [u8; 256],
    pub difficulty: u128,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub time: u64,
    pub extra: Vec<u8>,
    pub mix_digest: Vec<u8>,
    pub nonce: Vec<u8>,
}

impl Header {
    pub fn from_item(item: &Item<'_>) -> Result<Self, Error> {
        let fields = expect_arity(item, 15)?;
        Ok(Header {
            parent_hash: fields[0].as_fixed()?,
            uncle_hash: fields[1].as_fixed()?,
            coinbase: fields[2].as_fixed()?,
            root: fields[3].as_fixed_or_empty()?,
            tx_hash: fields[4].as_fixed_or_empty()?,
            receipt_hash: fields[5].as_fixed_or_empty()?,
            bloom: fields[6].as_fixed()?,
            difficulty: fields[7].as_u128()?,
            number: fields[8].as_u64()?,
            gas_limit: fields[9].as_u64()?,
            gas_used: fields[10].as_u64()?,
            time: fields[11].as_u64()?,
            extra: fields[12].as_bytes()?.to_vec(),
            mix_digest: fields[13].as_bytes()?.to_vec(),
            nonce: fields[14].as_bytes()?.to_vec(),
        })
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        Self::from_item(&decode(buf)?)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::new();
        encode_bytes(&self.parent_hash, &mut payload);
        encode_bytes(&self.uncle_hash, &mut payload);
        encode_bytes(&self.coinbase, &mut payload);
        encode_fixed_or_empty(&self.root, &mut payload);
        encode_fixed_or_empty(&self.tx_hash, &mut payload);
        encode_fixed_or_empty(&self.receipt_hash, &mut payload);
        encode_bytes(&self.bloom, &mut payload);
        encode_u128(self.difficulty, &mut payload);
        encode_u64(self.number, &mut payload);
        encode_u64(self.gas_limit, &mut payload);
        encode_u64(self.gas_used, &mut payload);
        encode_u64(self.time, &mut payload);
        encode_bytes(&self.extra, &mut payload);
        encode_bytes(&self.mix_digest, &mut payload);
        encode_bytes(&self.nonce, &mut payload);
        encode_list(&payload, out);
    }
}

fn encode_fixed_or_empty<const N: usize>(field: &Option<[u8; N]>, out: &mut Vec<u8>) {
    match field {
        Some(bytes) => encode_bytes(bytes, out),
        None => encode_bytes(&[], out),
    }
}

/// A block body: transactions plus uncle headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<Header>,
}

impl Body {
    pub fn from_item(item: &Item<'_>) -> Result<Self, Error> {
        let fields = expect_arity(item, 2)?;
        let transactions = fields[0]
            .as_list()?
            .iter()
            .map(Transaction::from_item)
            .collect::<Result<_, _>>()?;
        let uncles = fields[1]
            .as_list()?
            .iter()
            .map(Header::from_item)
            .collect::<Result<_, _>>()?;
        Ok(Body {
            transactions,
            uncles,
        })
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        Self::from_item(&decode(buf)?)
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut txs = Vec::new();
        for tx in &self.transactions {
            tx.encode(&mut txs);
        }
        let mut uncles = Vec::new();
        for uncle in &self.uncles {
            uncle.encode(&mut uncles);
        }
        let mut payload = Vec::new();
        encode_list(&txs, &mut payload);
        encode_list(&uncles, &mut payload);
        encode_list(&payload, out);
    }
}

fn expect_arity<'a, 'i>(item: &'a Item<'i>, want: usize) -> Result<&'a [Item<'i>], Error> {
    let fields = item.as_list()?;
    if fields.len() != want {
        return Err(Error::BadArity {
            want,
            got: fields.len(),
        });
    }
    Ok(fields)
}
