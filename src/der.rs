//! Minimal DER reader
//!
//! Only what the firmware containers use: single byte tags, definite
//! lengths (short form or up to 8 length bytes) and unsigned INTEGERs.

use thiserror::Error;

pub const INTEGER: u8 = 0x02;
pub const OCTET_STRING: u8 = 0x04;
pub const IA5_STRING: u8 = 0x16;
pub const SEQUENCE: u8 = 0x30;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DerError {
    #[error("truncated element at offset {0}")]
    Truncated(usize),
    #[error("multi byte tags are not supported (offset {0})")]
    HighTagNumber(usize),
    #[error("indefinite length at offset {0}")]
    IndefiniteLength(usize),
    #[error("length field too wide at offset {0}")]
    LengthTooWide(usize),
    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },
    #[error("invalid integer")]
    InvalidInteger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: u8,
    pub value: &'a [u8],
}

pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        DerReader { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn byte(&mut self) -> Result<u8, DerError> {
        let b = *self.data.get(self.pos).ok_or(DerError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read(&mut self) -> Result<Tlv<'a>, DerError> {
        let start = self.pos;
        let tag = self.byte()?;
        if tag & 0x1f == 0x1f {
            return Err(DerError::HighTagNumber(start));
        }

        let len = match self.byte()? {
            short @ 0x00..=0x7f => short as usize,
            0x80 => return Err(DerError::IndefiniteLength(start)),
            long => {
                let width = (long & 0x7f) as usize;
                if width > 8 {
                    return Err(DerError::LengthTooWide(start));
                }
                let mut len: u64 = 0;
                for _ in 0..width {
                    len = (len << 8) | self.byte()? as u64;
                }
                usize::try_from(len).map_err(|_| DerError::LengthTooWide(start))?
            }
        };

        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DerError::Truncated(start))?;
        let value = &self.data[self.pos..end];
        self.pos = end;

        Ok(Tlv { tag, value })
    }

    /// Read the next element and check its tag.
    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], DerError> {
        let tlv = self.read()?;
        if tlv.tag != tag {
            return Err(DerError::UnexpectedTag {
                expected: tag,
                found: tlv.tag,
            });
        }
        Ok(tlv.value)
    }
}

// Non negative INTEGER that fits a u64
pub fn parse_uint(value: &[u8]) -> Result<u64, DerError> {
    if value.is_empty() || value[0] & 0x80 != 0 {
        return Err(DerError::InvalidInteger);
    }

    let first = value.iter().position(|b| *b != 0).unwrap_or(value.len());
    let digits = &value[first..];
    if digits.len() > 8 {
        return Err(DerError::InvalidInteger);
    }

    Ok(digits.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
}

#[cfg(test)]
pub(crate) mod test_util {
    // DER encoders for building fixtures
    pub fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        let len = value.len();
        if len < 0x80 {
            out.push(len as u8);
        } else {
            let bytes = (len as u64).to_be_bytes();
            let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
            out.push(0x80 | (8 - first) as u8);
            out.extend_from_slice(&bytes[first..]);
        }
        out.extend_from_slice(value);
        out
    }

    pub fn uint(value: u64) -> Vec<u8> {
        let bytes = value.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
        let mut out = vec![];
        if bytes[first] & 0x80 != 0 {
            out.push(0);
        }
        out.extend_from_slice(&bytes[first..]);
        tlv(super::INTEGER, &out)
    }
}
