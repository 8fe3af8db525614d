//! Header pre-scan: validates CBOR framing without materialising values.
//!
//! Every declared length is checked against the input that is left before
//! the scan moves on, so a forged length prefix can never drive an
//! allocation. Arrays and maps are bounded by one byte per element, the
//! smallest possible CBOR item.

use super::WireLimits;
use crate::error::{Result, WireError};

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_TAG: u8 = 6;
const MAJOR_SIMPLE: u8 = 7;

/// Walk the single top-level item in `bytes`; trailing data is an error.
pub(crate) fn prescan(bytes: &[u8], limits: &WireLimits) -> Result<()> {
    let mut scanner = Scanner {
        bytes,
        pos: 0,
        max_depth: limits.max_depth,
    };
    scanner.item(0)?;
    if scanner.pos != bytes.len() {
        return Err(WireError::malformed(format!(
            "{} trailing bytes after message",
            bytes.len() - scanner.pos
        )));
    }
    Ok(())
}

struct Scanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl Scanner<'_> {
    const fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.remaining() {
            return Err(WireError::malformed(format!(
                "truncated input: need {n} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.bytes[start..self.pos])
    }

    /// Returns (major type, additional info, argument).
    fn header(&mut self) -> Result<(u8, u8, u64)> {
        let initial = self.take(1)?[0];
        let major = initial >> 5;
        let info = initial & 0x1f;
        let arg = match info {
            0..=23 => u64::from(info),
            24 => u64::from(self.take(1)?[0]),
            25 => {
                let b = self.take(2)?;
                u64::from(u16::from_be_bytes([b[0], b[1]]))
            }
            26 => {
                let b = self.take(4)?;
                u64::from(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            27 => {
                let b = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                u64::from_be_bytes(buf)
            }
            31 => {
                return Err(WireError::malformed(format!(
                    "indefinite-length item at offset {}",
                    self.pos - 1
                )))
            }
            _ => {
                return Err(WireError::malformed(format!(
                    "reserved additional info {info} at offset {}",
                    self.pos - 1
                )))
            }
        };
        Ok((major, info, arg))
    }

    /// Declared length, rejected when it cannot fit in what is left.
    fn bounded(&self, declared: u64, per_item: u64, what: &str) -> Result<u64> {
        let needed = declared.saturating_mul(per_item);
        if needed > self.remaining() as u64 {
            return Err(WireError::malformed(format!(
                "{what} declares {declared} items but only {} bytes remain",
                self.remaining()
            )));
        }
        Ok(declared)
    }

    fn item(&mut self, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(WireError::malformed(format!(
                "nesting deeper than {}",
                self.max_depth
            )));
        }

        let (major, _info, arg) = self.header()?;
        match major {
            MAJOR_UNSIGNED | MAJOR_NEGATIVE | MAJOR_SIMPLE => Ok(()),
            MAJOR_BYTES | MAJOR_TEXT => {
                let len = self.bounded(arg, 1, "string")?;
                let len = usize::try_from(len)
                    .map_err(|_| WireError::malformed("string length overflows usize"))?;
                self.take(len)?;
                Ok(())
            }
            MAJOR_ARRAY => {
                let count = self.bounded(arg, 1, "array")?;
                for _ in 0..count {
                    self.item(depth + 1)?;
                }
                Ok(())
            }
            MAJOR_MAP => {
                let count = self.bounded(arg, 2, "map")?;
                for _ in 0..count * 2 {
                    self.item(depth + 1)?;
                }
                Ok(())
            }
            MAJOR_TAG => self.item(depth + 1),
            _ => unreachable!("major type is three bits"),
        }
    }
}
