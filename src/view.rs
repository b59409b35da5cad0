//! Bounds-checked read cursor over the mapped file buffer.
//!
//! Every on-disk structure in this crate is a *view*: a copy of a
//! [`ByteView`] plus whatever fields it extracted at validation time.
//! Views own no data; the buffer outlives them all. All multi-byte
//! reads are little-endian, matching the HDF5 wire format.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// The HDF5 "undefined address" sentinel (all ones).
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Returns true if `addr` is the undefined-address sentinel.
#[inline]
pub fn is_undefined(addr: u64) -> bool {
    addr == UNDEFINED_ADDRESS
}

/// A copyable `(buffer, offset)` cursor.
///
/// Reads are relative to `base` and fail with [`Error::CorruptFile`]
/// rather than touching memory outside the buffer.
#[derive(Clone, Copy)]
pub struct ByteView<'f> {
    data: &'f [u8],
    base: usize,
}

impl<'f> ByteView<'f> {
    /// Creates a view at an absolute file address.
    ///
    /// The undefined-address sentinel and addresses past the end of the
    /// buffer are rejected here so later relative reads start sane.
    pub fn new(data: &'f [u8], address: u64) -> Result<Self> {
        if is_undefined(address) {
            return Err(Error::CorruptFile(
                "attempt to dereference the undefined address".into(),
            ));
        }
        let base = usize::try_from(address).map_err(|_| {
            Error::CorruptFile(format!("address 0x{address:x} exceeds the address space"))
        })?;
        if base > data.len() {
            return Err(Error::CorruptFile(format!(
                "address 0x{base:x} is past the end of the file (len 0x{:x})",
                data.len()
            )));
        }
        Ok(ByteView { data, base })
    }

    /// Absolute file offset of this view's base.
    #[inline]
    pub fn base(&self) -> u64 {
        self.base as u64
    }

    /// The whole underlying buffer.
    #[inline]
    pub fn file_data(&self) -> &'f [u8] {
        self.data
    }

    /// A new view at `base + offset` over the same buffer.
    pub fn at(&self, offset: usize) -> Result<ByteView<'f>> {
        let base = self
            .base
            .checked_add(offset)
            .ok_or_else(|| Error::CorruptFile("view offset overflow".into()))?;
        ByteView::new(self.data, base as u64)
    }

    /// Borrows `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'f [u8]> {
        let start = self
            .base
            .checked_add(offset)
            .ok_or_else(|| Error::CorruptFile("read offset overflow".into()))?;
        let end = start
            .checked_add(len)
            .ok_or_else(|| Error::CorruptFile("read length overflow".into()))?;
        if end > self.data.len() {
            return Err(Error::CorruptFile(format!(
                "read of {len} bytes at 0x{start:x} is past the end of the file (len 0x{:x})",
                self.data.len()
            )));
        }
        Ok(&self.data[start..end])
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(offset, 2)?))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(offset, 4)?))
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(offset, 8)?))
    }

    pub fn read_i8(&self, offset: usize) -> Result<i8> {
        Ok(self.read_u8(offset)? as i8)
    }

    pub fn read_i16(&self, offset: usize) -> Result<i16> {
        Ok(self.read_u16(offset)? as i16)
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        Ok(self.read_u32(offset)? as i32)
    }

    pub fn read_i64(&self, offset: usize) -> Result<i64> {
        Ok(self.read_u64(offset)? as i64)
    }

    /// Reads a little-endian unsigned integer of 1..=8 bytes.
    pub fn read_uint(&self, offset: usize, width: usize) -> Result<u64> {
        match width {
            1 => Ok(self.read_u8(offset)? as u64),
            2 => Ok(self.read_u16(offset)? as u64),
            4 => Ok(self.read_u32(offset)? as u64),
            8 => self.read_u64(offset),
            3 | 5 | 6 | 7 => {
                let bytes = self.bytes(offset, width)?;
                let mut val = 0u64;
                for (i, &b) in bytes.iter().enumerate() {
                    val |= (b as u64) << (i * 8);
                }
                Ok(val)
            }
            _ => Err(Error::CorruptFile(format!(
                "invalid integer field width: {width}"
            ))),
        }
    }

    /// Reads a NUL-terminated string starting at `offset`.
    pub fn read_cstr(&self, offset: usize) -> Result<&'f str> {
        let start = self
            .base
            .checked_add(offset)
            .ok_or_else(|| Error::CorruptFile("read offset overflow".into()))?;
        let tail = self.data.get(start..).ok_or_else(|| {
            Error::CorruptFile(format!("string at 0x{start:x} is past the end of the file"))
        })?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::CorruptFile(format!("unterminated string at 0x{start:x}")))?;
        std::str::from_utf8(&tail[..end])
            .map_err(|_| Error::CorruptFile(format!("invalid UTF-8 in string at 0x{start:x}")))
    }

    /// Validates a 4-byte structure signature at `offset`.
    pub fn check_signature(&self, offset: usize, expected: &[u8; 4]) -> Result<()> {
        let got = self.bytes(offset, 4)?;
        if got != expected {
            return Err(Error::CorruptFile(format!(
                "expected {:?} signature at 0x{:x}, found {:?}",
                String::from_utf8_lossy(expected),
                self.base + offset,
                String::from_utf8_lossy(got),
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ByteView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ByteView(0x{:x})", self.base)
    }
}
