// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Big-endian, length-prefixed serialization shared by every TPM 1.2 record.
//!
//! Output is produced through [`StoreBuffer`], an append-only byte buffer.
//! Input is consumed through [`LoadCursor`], which walks a borrowed slice and
//! fails with [`CodecError::Truncated`] rather than reading past its end.
//!
//! Records implement [`Store`] and [`Load`]. A record never writes padding,
//! multi-byte integers are always big-endian, and a "sized buffer" is a `u32`
//! length followed by that many raw bytes.

use self::packed_nums::*;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

#[allow(non_camel_case_types)]
mod packed_nums {
    pub type u16_be = zerocopy::U16<zerocopy::BigEndian>;
    pub type u32_be = zerocopy::U32<zerocopy::BigEndian>;
}

/// Errors produced while decoding a serialized stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the next field requires.
    #[error("stream truncated at offset {offset}: need {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Cursor position when the read was attempted.
        offset: usize,
        /// Bytes the field needed.
        needed: usize,
        /// Bytes actually left in the stream.
        remaining: usize,
    },
    /// A tagged record opened with the wrong tag.
    #[error("unexpected structure tag {found:#06x}, expected {expected:#06x}")]
    BadTag {
        /// Tag the record kind requires.
        expected: u16,
        /// Tag found in the stream.
        found: u16,
    },
    /// A field decoded but carries a value the record does not allow.
    #[error("invalid structure: {0}")]
    InvalidStructure(&'static str),
    /// Bytes were left over after a complete record.
    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Append-only output buffer.
#[derive(Debug, Default, Clone)]
pub struct StoreBuffer {
    buf: Vec<u8>,
}

impl StoreBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append a single byte.
    pub fn append_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Append a big-endian `u16`.
    pub fn append_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(u16_be::new(value).as_bytes());
    }

    /// Append a big-endian `u32`.
    pub fn append_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(u32_be::new(value).as_bytes());
    }

    /// Append a boolean as a single `0x00` / `0x01` byte.
    pub fn append_bool(&mut self, value: bool) {
        self.append_u8(value.into());
    }

    /// Append raw bytes with no length prefix.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a sized buffer: a `u32` length followed by `bytes`.
    pub fn append_sized(&mut self, bytes: &[u8]) {
        // Record loaders bound every sized field far below u32::MAX.
        self.append_u32(bytes.len() as u32);
        self.append_bytes(bytes);
    }

    /// Append a sized buffer whose contents are produced by `f`.
    ///
    /// The length prefix is patched once `f` returns, so nested records can be
    /// stored without an intermediate allocation.
    pub fn append_sized_with(&mut self, f: impl FnOnce(&mut StoreBuffer)) {
        let len_offset = self.buf.len();
        self.append_u32(0);
        f(self);
        let len = (self.buf.len() - len_offset - size_of::<u32>()) as u32;
        self.buf[len_offset..len_offset + size_of::<u32>()]
            .copy_from_slice(u32_be::new(len).as_bytes());
    }

    /// Append a nested record.
    pub fn append<T: Store + ?Sized>(&mut self, value: &T) {
        value.store(self);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the buffer, returning its bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Read cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct LoadCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> LoadCursor<'a> {
    /// Create a cursor positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current offset from the start of the stream.
    pub fn position(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Returns true once every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn truncated(&self, needed: usize) -> CodecError {
        CodecError::Truncated {
            offset: self.offset,
            needed,
            remaining: self.remaining(),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let rest = self.rest();
        if rest.len() < n {
            return Err(self.truncated(n));
        }
        self.offset += n;
        Ok(&rest[..n])
    }

    /// Read a single byte.
    pub fn load_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian `u16` without advancing.
    pub fn peek_u16(&self) -> Result<u16, CodecError> {
        let (value, _) =
            u16_be::read_from_prefix(self.rest()).map_err(|_| self.truncated(size_of::<u16>()))?;
        Ok(value.get())
    }

    /// Read a big-endian `u16`.
    pub fn load_u16(&mut self) -> Result<u16, CodecError> {
        let value = self.peek_u16()?;
        self.offset += size_of::<u16>();
        Ok(value)
    }

    /// Read a big-endian `u32`.
    pub fn load_u32(&mut self) -> Result<u32, CodecError> {
        let (value, _) =
            u32_be::read_from_prefix(self.rest()).map_err(|_| self.truncated(size_of::<u32>()))?;
        self.offset += size_of::<u32>();
        Ok(value.get())
    }

    /// Read a one-byte boolean; any nonzero value is true.
    pub fn load_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.load_u8()? != 0)
    }

    /// Read `n` raw bytes.
    pub fn load_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    /// Read exactly `N` raw bytes into an array.
    pub fn load_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let bytes = self.take(N)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a sized buffer.
    ///
    /// The cursor only advances if both the length and the payload are
    /// present.
    pub fn load_sized(&mut self) -> Result<&'a [u8], CodecError> {
        let (len, payload) =
            u32_be::read_from_prefix(self.rest()).map_err(|_| self.truncated(size_of::<u32>()))?;
        let len = len.get() as usize;
        if payload.len() < len {
            return Err(self.truncated(size_of::<u32>() + len));
        }
        self.offset += size_of::<u32>() + len;
        Ok(&payload[..len])
    }

    /// Consume the 16-bit tag that opens a record, failing if it is not
    /// `expected`.
    ///
    /// On mismatch the cursor is left at the tag.
    pub fn check_tag(&mut self, expected: u16) -> Result<(), CodecError> {
        let found = self.peek_u16()?;
        if found != expected {
            return Err(CodecError::BadTag { expected, found });
        }
        self.offset += size_of::<u16>();
        Ok(())
    }

    /// Decode a nested record.
    pub fn load<T: Load>(&mut self) -> Result<T, T::Error> {
        T::load(self)
    }

    /// Fail if any bytes remain unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// A record that can be serialized.
pub trait Store {
    /// Append the wire form of `self` to `buf`.
    fn store(&self, buf: &mut StoreBuffer);

    /// Serialize `self` into a fresh vector.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = StoreBuffer::new();
        self.store(&mut buf);
        buf.into_vec()
    }
}

/// A record that can be deserialized.
pub trait Load: Sized {
    /// Error type; every decoder can at least fail with a [`CodecError`].
    type Error: From<CodecError>;

    /// Decode one record from the cursor.
    fn load(cursor: &mut LoadCursor<'_>) -> Result<Self, Self::Error>;

    /// Decode a record that must span all of `bytes`.
    fn from_bytes(bytes: &[u8]) -> Result<Self, Self::Error> {
        let mut cursor = LoadCursor::new(bytes);
        let value = Self::load(&mut cursor)?;
        cursor.finish()?;
        Ok(value)
    }
}
