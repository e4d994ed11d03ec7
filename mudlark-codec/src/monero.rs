//! Monero binary serialization: LEB128 varints, the pruned transaction
//! prefix as stored in `txs_pruned`, and the `extra` tag stream.
//!
//! The extra parser reports the byte offset of an unrecognized tag so
//! callers can salvage the decodable prefix and treat the remainder as
//! opaque payload.

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("varint at offset {offset} runs past the end of the input")]
    TruncatedVarint { offset: usize },
    #[error("varint at offset {offset} overflows 64 bits")]
    VarintOverflow { offset: usize },
    #[error("field at offset {offset} wants {wanted} bytes, {available} left")]
    Truncated {
        offset: usize,
        wanted: usize,
        available: usize,
    },
    #[error("unsupported input tag {tag:#04x} at offset {offset}")]
    UnsupportedInput { tag: u8, offset: usize },
    #[error("unsupported output tag {tag:#04x} at offset {offset}")]
    UnsupportedOutput { tag: u8, offset: usize },
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() - self.pos < n {
            return Err(Error::Truncated {
                offset: self.pos,
                wanted: n,
                available: self.buf.len() - self.pos,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    /// Monero's LEB128-style varint (no +1 carry, unlike Bitcoin's).
    fn read_varint(&mut self) -> Result<u64, Error> {
        let start = self.pos;
        let mut n: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self
                .take_u8()
                .map_err(|_| Error::TruncatedVarint { offset: start })?;
            if shift >= 64 || (shift == 63 && (byte & 0x7f) > 1) {
                return Err(Error::VarintOverflow { offset: start });
            }
            n |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(n);
            }
            shift += 7;
        }
    }
}

/// The prefix fields of a pruned transaction. Only what the extractor
/// needs survives decoding; ring members and signatures are skipped over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPrefix {
    pub version: u64,
    pub unlock_time: u64,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub extra: Vec<u8>,
}

/// Decode the transaction prefix at the start of a `txs_pruned` value.
pub fn decode_tx_prefix(buf: &[u8]) -> Result<TxPrefix, Error> {
    let mut r = Reader::new(buf);
    let version = r.read_varint()?;
    let unlock_time = r.read_varint()?;

    let num_inputs = r.read_varint()? as usize;
    for _ in 0..num_inputs {
        let offset = r.pos;
        let tag = r.take_u8()?;
        match tag {
            // txin_gen: coinbase input carrying the block height
            0xff => {
                r.read_varint()?;
            }
            // txin_to_key: amount, key offsets, key image
            0x02 => {
                r.read_varint()?;
                let offsets = r.read_varint()? as usize;
                for _ in 0..offsets {
                    r.read_varint()?;
                }
                r.take(32)?;
            }
            tag => return Err(Error::UnsupportedInput { tag, offset }),
        }
    }

    let num_outputs = r.read_varint()? as usize;
    for _ in 0..num_outputs {
        r.read_varint()?;
        let offset = r.pos;
        let tag = r.take_u8()?;
        match tag {
            // txout_to_key
            0x02 => {
                r.take(32)?;
            }
            // txout_to_tagged_key: key plus a one-byte view tag
            0x03 => {
                r.take(33)?;
            }
            tag => return Err(Error::UnsupportedOutput { tag, offset }),
        }
    }

    let extra_len = r.read_varint()? as usize;
    let extra = r.take(extra_len)?.to_vec();

    Ok(TxPrefix {
        version,
        unlock_time,
        num_inputs,
        num_outputs,
        extra,
    })
}

// Tags of the extra field's tag-length-value stream.
const TAG_PADDING: u8 = 0x00;
const TAG_PUBKEY: u8 = 0x01;
const TAG_NONCE: u8 = 0x02;
const TAG_MERGE_MINING: u8 = 0x03;
const TAG_ADDITIONAL_PUBKEYS: u8 = 0x04;
const TAG_MINERGATE: u8 = 0xde;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ExtraError {
    #[error("unknown tag {tag:#04x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("tag {tag:#04x} at offset {offset} overruns the extra field")]
    Truncated { tag: u8, offset: usize },
}

impl ExtraError {
    /// Offset from which a salvage decode may continue, when the failure
    /// leaves the earlier stream intact. Truncations do not qualify: the
    /// remainder is part of the broken field, not a fresh payload.
    pub fn recoverable_offset(&self) -> Option<usize> {
        match self {
            ExtraError::UnknownTag { offset, .. } => Some(*offset),
            ExtraError::Truncated { .. } => None,
        }
    }
}

/// Parsed `extra` content: transaction public keys and nonce blobs
/// (payment identifiers, in the common case).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxExtra {
    pub pubkeys: Vec<[u8; 32]>,
    pub nonces: Vec<Vec<u8>>,
}

/// Parse the extra tag stream.
pub fn parse_extra(data: &[u8]) -> Result<TxExtra, ExtraError> {
    let mut extra = TxExtra::default();
    let mut pos = 0usize;

    while pos < data.len() {
        let tag_offset = pos;
        let tag = data[pos];
        pos += 1;

        let truncated = |_: Error| ExtraError::Truncated {
            tag,
            offset: tag_offset,
        };

        match tag {
            TAG_PADDING => {
                // A padding run is bounded by its own zero bytes; whatever
                // follows is the next tag.
                pos += data[pos..].iter().take_while(|&&b| b == 0).count();
            }
            TAG_PUBKEY => {
                let mut r = Reader::new(&data[pos..]);
                let key = r.take(32).map_err(truncated)?;
                let mut pubkey = [0u8; 32];
                pubkey.copy_from_slice(key);
                extra.pubkeys.push(pubkey);
                pos += r.pos;
            }
            TAG_NONCE => {
                let mut r = Reader::new(&data[pos..]);
                let len = r.read_varint().map_err(truncated)? as usize;
                let nonce = r.take(len).map_err(truncated)?;
                extra.nonces.push(nonce.to_vec());
                pos += r.pos;
            }
            TAG_MERGE_MINING => {
                let mut r = Reader::new(&data[pos..]);
                r.read_varint().map_err(truncated)?;
                r.take(32).map_err(truncated)?;
                pos += r.pos;
            }
            TAG_ADDITIONAL_PUBKEYS => {
                let mut r = Reader::new(&data[pos..]);
                let count = r.read_varint().map_err(truncated)? as usize;
                for _ in 0..count {
                    let key = r.take(32).map_err(truncated)?;
                    let mut pubkey = [0u8; 32];
                    pubkey.copy_from_slice(key);
                    extra.pubkeys.push(pubkey);
                }
                pos += r.pos;
            }
            TAG_MINERGATE => {
                let mut r = Reader::new(&data[pos..]);
                let len = r.read_varint().map_err(truncated)? as usize;
                r.take(len).map_err(truncated)?;
                pos += r.pos;
            }
            tag => {
                return Err(ExtraError::UnknownTag {
                    tag,
                    offset: tag_offset,
                })
            }
        }
    }

    Ok(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_extra() -> Vec<u8> {
        // pubkey tag + key, then a nonce carrying an 8-byte payment id.
        let mut extra = vec![TAG_PUBKEY];
        extra.extend([0xaa; 32]);
        extra.extend([TAG_NONCE, 0x09, 0x01]);
        extra.extend([0xbb; 8]);
        extra
    }

    #[test]
    fn parses_default_extra() {
        let parsed = parse_extra(&default_extra()).unwrap();
        assert_eq!(parsed.pubkeys, vec![[0xaa; 32]]);
        assert_eq!(parsed.nonces.len(), 1);
        assert_eq!(parsed.nonces[0].len(), 9);
        assert_eq!(parsed.nonces[0][0], 0x01);
    }

    #[test]
    fn padding_run_is_skipped() {
        // Two padding bytes, then a pubkey entry.
        let mut extra = vec![0x00, 0x00, 0x01];
        extra.extend([0x44; 32]);
        let parsed = parse_extra(&extra).unwrap();
        assert_eq!(parsed.pubkeys, vec![[0x44; 32]]);

        // Trailing padding runs to the end of the field.
        let mut extra = vec![0x01];
        extra.extend([0x55; 32]);
        extra.extend([0x00; 5]);
        let parsed = parse_extra(&extra).unwrap();
        assert_eq!(parsed.pubkeys, vec![[0x55; 32]]);
        assert!(parsed.nonces.is_empty());
    }

    #[test]
    fn parses_additional_pubkeys() {
        let mut extra = vec![TAG_ADDITIONAL_PUBKEYS, 0x02];
        extra.extend([0x01; 32]);
        extra.extend([0x02; 32]);
        let parsed = parse_extra(&extra).unwrap();
        assert_eq!(parsed.pubkeys.len(), 2);
        assert_eq!(parsed.pubkeys[1], [0x02; 32]);
    }

    #[test]
    fn unknown_tag_reports_offset() {
        let mut extra = vec![TAG_PUBKEY];
        extra.extend([0xcc; 32]);
        extra.extend([0x7b, 0x04]);

        let err = parse_extra(&extra).unwrap_err();
        assert_eq!(
            err,
            ExtraError::UnknownTag {
                tag: 0x7b,
                offset: 33
            }
        );
        assert_eq!(err.recoverable_offset(), Some(33));

        // The prefix before the offset still parses on its own.
        let salvaged = parse_extra(&extra[..33]).unwrap();
        assert_eq!(salvaged.pubkeys, vec![[0xcc; 32]]);
    }

    #[test]
    fn truncated_field_is_not_recoverable() {
        let extra = vec![TAG_PUBKEY, 0x01, 0x02];
        let err = parse_extra(&extra).unwrap_err();
        assert_eq!(err.recoverable_offset(), None);
    }

    #[test]
    fn decodes_coinbase_prefix() {
        // version 2, unlock 60, one txin_gen at height 1000, one output,
        // then a default-shaped extra.
        let mut tx = vec![0x02, 0x3c, 0x01, 0xff];
        tx.extend([0xe8, 0x07]);
        tx.push(0x01);
        tx.extend([0x80, 0x80, 0x90, 0xca, 0xd2, 0xc6, 0x0e]);
        tx.push(0x02);
        tx.extend([0x12; 32]);
        let extra = default_extra();
        tx.push(extra.len() as u8);
        tx.extend(&extra);

        let prefix = decode_tx_prefix(&tx).unwrap();
        assert_eq!(prefix.version, 2);
        assert_eq!(prefix.unlock_time, 60);
        assert_eq!(prefix.num_inputs, 1);
        assert_eq!(prefix.num_outputs, 1);
        assert_eq!(prefix.extra, extra);
    }

    #[test]
    fn decodes_spend_prefix() {
        let mut tx = vec![0x02, 0x00];
        // one txin_to_key: amount 0, two key offsets, key image
        tx.extend([0x01, 0x02, 0x00, 0x02, 0x05, 0x03]);
        tx.extend([0x34; 32]);
        // two tagged outputs
        tx.push(0x02);
        tx.extend([0x00, 0x03]);
        tx.extend([0x56; 33]);
        tx.extend([0x00, 0x03]);
        tx.extend([0x78; 33]);
        // empty extra
        tx.push(0x00);

        let prefix = decode_tx_prefix(&tx).unwrap();
        assert_eq!(prefix.num_inputs, 1);
        assert_eq!(prefix.num_outputs, 2);
        assert!(prefix.extra.is_empty());
    }

    #[test]
    fn rejects_unsupported_input() {
        let tx = vec![0x01, 0x00, 0x01, 0x01];
        assert!(matches!(
            decode_tx_prefix(&tx),
            Err(Error::UnsupportedInput { tag: 0x01, .. })
        ));
    }

    #[test]
    fn varint_decodes_multi_byte() {
        let mut r = Reader::new(&[0xe8, 0x07]);
        assert_eq!(r.read_varint().unwrap(), 1000);
    }
}
