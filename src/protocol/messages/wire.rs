//! Little-endian field reader and writer shared by every message body

use bytes::{Buf, BufMut};

use super::MessageError;

/// Appends message fields to a buffer
#[derive(Debug, Default)]
pub struct MessageWriter {
    buffer: Vec<u8>,
}

impl MessageWriter {
    /// Start a message with its envelope bytes
    #[must_use]
    pub fn new(generation: u8, tag: u8) -> Self {
        let mut buffer = Vec::with_capacity(32);
        buffer.put_u8(generation);
        buffer.put_u8(tag);
        Self { buffer }
    }

    /// Append a byte
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buffer.put_u8(value);
        self
    }

    /// Append a bool as one byte
    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.buffer.put_u8(u8::from(value));
        self
    }

    /// Append a little-endian `u32`
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buffer.put_u32_le(value);
        self
    }

    /// Append a little-endian `i32`
    pub fn i32(&mut self, value: i32) -> &mut Self {
        self.buffer.put_i32_le(value);
        self
    }

    /// Append a little-endian `u64`
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buffer.put_u64_le(value);
        self
    }

    /// Raw bytes without a length prefix
    pub fn fixed(&mut self, value: &[u8]) -> &mut Self {
        self.buffer.put_slice(value);
        self
    }

    /// Bytes with a `u16` length prefix
    ///
    /// # Errors
    ///
    /// Returns `MessageError::FieldTooLong` above 65535 bytes.
    pub fn chunk(&mut self, field: &'static str, value: &[u8]) -> Result<&mut Self, MessageError> {
        let len = u16::try_from(value.len()).map_err(|_| MessageError::FieldTooLong {
            field,
            len: value.len(),
        })?;
        self.buffer.put_u16_le(len);
        self.buffer.put_slice(value);
        Ok(self)
    }

    /// UTF-8 string with a `u16` length prefix
    ///
    /// # Errors
    ///
    /// Returns `MessageError::FieldTooLong` above 65535 bytes.
    pub fn string(&mut self, field: &'static str, value: &str) -> Result<&mut Self, MessageError> {
        self.chunk(field, value.as_bytes())
    }

    /// Finish and take the encoded bytes
    #[must_use]
    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }
}

/// Reads message fields with bounds checks
pub struct MessageReader<'a> {
    data: &'a [u8],
}

impl<'a> MessageReader<'a> {
    /// Read from the start of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn need(&self, needed: usize) -> Result<(), MessageError> {
        if self.data.remaining() < needed {
            return Err(MessageError::Truncated {
                needed,
                available: self.data.remaining(),
            });
        }
        Ok(())
    }

    /// Read a byte
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn u8(&mut self) -> Result<u8, MessageError> {
        self.need(1)?;
        Ok(self.data.get_u8())
    }

    /// Read a byte as a bool, nonzero is `true`
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn bool(&mut self) -> Result<bool, MessageError> {
        Ok(self.u8()? != 0)
    }

    /// Read a little-endian `u16`
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn u16(&mut self) -> Result<u16, MessageError> {
        self.need(2)?;
        Ok(self.data.get_u16_le())
    }

    /// Read a little-endian `u32`
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn u32(&mut self) -> Result<u32, MessageError> {
        self.need(4)?;
        Ok(self.data.get_u32_le())
    }

    /// Read a little-endian `i32`
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn i32(&mut self) -> Result<i32, MessageError> {
        self.need(4)?;
        Ok(self.data.get_i32_le())
    }

    /// Read a little-endian `u64`
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn u64(&mut self) -> Result<u64, MessageError> {
        self.need(8)?;
        Ok(self.data.get_u64_le())
    }

    /// Read exactly `N` raw bytes
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn fixed<const N: usize>(&mut self) -> Result<[u8; N], MessageError> {
        self.need(N)?;
        let mut out = [0u8; N];
        self.data.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Read bytes behind a `u16` length prefix
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` when the buffer runs out.
    pub fn chunk(&mut self) -> Result<Vec<u8>, MessageError> {
        let len = usize::from(self.u16()?);
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head.to_vec())
    }

    /// Read a length-prefixed UTF-8 string
    ///
    /// # Errors
    ///
    /// Returns `MessageError::Truncated` or `MessageError::InvalidUtf8`.
    pub fn string(&mut self, field: &'static str) -> Result<String, MessageError> {
        String::from_utf8(self.chunk()?).map_err(|_| MessageError::InvalidUtf8(field))
    }

    /// Bytes left unread
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}
