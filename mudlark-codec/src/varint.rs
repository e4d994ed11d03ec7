//! Variable-length integers used across Bitcoin's storage formats.
//!
//! Two distinct encodings live here. The chainstate and the block index use
//! the MSB-continuation base-128 varint with a +1 carry on every
//! continuation byte; the P2P block serialization uses the compact-size
//! integer. They are not interchangeable.

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("varint runs past the end of the input at offset {offset}")]
    Truncated { offset: usize },
    #[error("varint at offset {offset} overflows 64 bits")]
    Overflow { offset: usize },
}

/// Cursor over a byte slice, tracking the absolute offset for errors.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.buf.len() - self.pos < n {
            return Err(Error::Truncated { offset: self.pos });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    /// Bitcoin's MSB-continuation base-128 varint with the +1 carry.
    pub fn read_b128(&mut self) -> Result<u64, Error> {
        let start = self.pos;
        let mut n: u64 = 0;
        loop {
            let byte = self.take_u8().map_err(|_| Error::Truncated { offset: start })?;
            if n > (u64::MAX >> 7) {
                return Err(Error::Overflow { offset: start });
            }
            n = (n << 7) | u64::from(byte & 0x7f);
            if byte & 0x80 != 0 {
                n = n.checked_add(1).ok_or(Error::Overflow { offset: start })?;
            } else {
                return Ok(n);
            }
        }
    }

    /// P2P compact-size integer (1, 3, 5 or 9 bytes).
    pub fn read_compact_size(&mut self) -> Result<u64, Error> {
        let tag = self.take_u8()?;
        match tag {
            0xfd => {
                let b = self.take(2)?;
                Ok(u64::from(u16::from_le_bytes([b[0], b[1]])))
            }
            0xfe => {
                let b = self.take(4)?;
                Ok(u64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
            }
            0xff => {
                let b = self.take(8)?;
                Ok(u64::from_le_bytes([
                    b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
                ]))
            }
            n => Ok(u64::from(n)),
        }
    }
}

/// Encode a value in the b128 format. Only tests and fixtures write varints;
/// the pipeline itself is read-only.
pub fn write_b128(mut n: u64, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 10];
    let mut len = 0;
    loop {
        tmp[len] = (n & 0x7f) as u8 | if len > 0 { 0x80 } else { 0 };
        if n <= 0x7f {
            break;
        }
        n = (n >> 7) - 1;
        len += 1;
    }
    out.extend(tmp[..=len].iter().rev());
}
