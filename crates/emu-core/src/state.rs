//! Binary save-state codec.
//!
//! Saving is done in two passes over the same `serialize()` code: first
//! against a [`SizeCounter`] to learn the exact length, then against a
//! [`StateWriter`] allocated with that capacity. Integers are big-endian.
//! Byte arrays carry a `u32` length prefix.
//!
//! Components are written and read back in a fixed order. Any disagreement
//! between the stream and the reader is a [`StateError`], and the caller must
//! treat the restore as failed.

use thiserror::Error;

/// Errors raised while decoding a saved state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state truncated at offset {offset}: {needed} more bytes needed")]
    Truncated { offset: usize, needed: usize },
    #[error("length mismatch for {what}: expected {expected} bytes, found {found}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{0} unread bytes left after restore")]
    TrailingBytes(usize),
    #[error("invalid value {value} for {what}")]
    InvalidValue { what: &'static str, value: u32 },
}

/// Destination of a serialization pass.
pub trait StateSink {
    fn put_u8(&mut self, value: u8);
    fn put_u16(&mut self, value: u16);
    fn put_u32(&mut self, value: u32);

    fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    /// Written as two `u32`s, high word first.
    fn put_u64(&mut self, value: u64) {
        self.put_u32((value >> 32) as u32);
        self.put_u32(value as u32);
    }

    /// Write a length-prefixed byte array.
    fn put_bytes(&mut self, bytes: &[u8]);
}

/// Size-only sink used for the first pass.
#[derive(Debug, Default)]
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl StateSink for SizeCounter {
    fn put_u8(&mut self, _value: u8) {
        self.len += 1;
    }

    fn put_u16(&mut self, _value: u16) {
        self.len += 2;
    }

    fn put_u32(&mut self, _value: u32) {
        self.len += 4;
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.len += 4 + bytes.len();
    }
}

/// Buffer sink used for the second pass.
#[derive(Debug, Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl StateSink for StateWriter {
    fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }
}

/// Cursor over a saved state.
#[derive(Debug)]
pub struct StateReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> StateReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], StateError> {
        if self.remaining() < n {
            return Err(StateError::Truncated {
                offset: self.offset,
                needed: n - self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8, StateError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, StateError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32, StateError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64, StateError> {
        let hi = self.get_u32()?;
        let lo = self.get_u32()?;
        Ok(u64::from(hi) << 32 | u64::from(lo))
    }

    pub fn get_bool(&mut self) -> Result<bool, StateError> {
        match self.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(StateError::InvalidValue {
                what: "bool",
                value: u32::from(v),
            }),
        }
    }

    /// Read a length-prefixed byte array of any length.
    pub fn get_bytes(&mut self) -> Result<&'a [u8], StateError> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed byte array into `dest`, which must have
    /// exactly the stored length.
    pub fn get_bytes_into(&mut self, what: &'static str, dest: &mut [u8]) -> Result<(), StateError> {
        let bytes = self.get_bytes()?;
        if bytes.len() != dest.len() {
            return Err(StateError::LengthMismatch {
                what,
                expected: dest.len(),
                found: bytes.len(),
            });
        }
        dest.copy_from_slice(bytes);
        Ok(())
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<(), StateError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(StateError::TrailingBytes(n)),
        }
    }
}

/// A component that takes part in save-state.
pub trait Serializable {
    fn serialize(&self, sink: &mut dyn StateSink);

    fn deserialize(&mut self, reader: &mut StateReader<'_>) -> Result<(), StateError>;

    /// Exact number of bytes `serialize()` produces.
    fn serialized_size(&self) -> usize {
        let mut counter = SizeCounter::default();
        self.serialize(&mut counter);
        counter.len()
    }
}

/// Serialize one component with the size-then-write scheme.
#[must_use]
pub fn save(component: &dyn Serializable) -> Vec<u8> {
    let mut writer = StateWriter::with_capacity(component.serialized_size());
    component.serialize(&mut writer);
    writer.into_bytes()
}

/// Restore one component and require the whole buffer to be consumed.
pub fn restore(component: &mut dyn Serializable, data: &[u8]) -> Result<(), StateError> {
    let mut reader = StateReader::new(data);
    component.deserialize(&mut reader)?;
    reader.finish()
}
