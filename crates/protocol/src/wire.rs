//! RFC4251 §5 primitive data types.
//!
//! Every channel request payload is a concatenation of `uint32`, `string`
//! and `boolean` fields. [`WireReader`] decodes them with explicit bounds
//! checks and [`WireWriter`] builds them on top of [`BytesMut`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Bounds-checked cursor over a payload.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    /// Create a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        if self.buf.len() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(needed);
        self.buf = tail;
        Ok(head)
    }

    /// Read a big-endian `uint32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Read a `boolean` (a single byte, 0 or 1).
    pub fn read_bool(&mut self) -> Result<bool> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidBool(other)),
        }
    }

    /// Read a length-prefixed `string` as raw bytes.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed `string` that must be UTF-8.
    pub fn read_string(&mut self) -> Result<String> {
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Assert that the whole payload has been consumed.
    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes(self.buf.len()))
        }
    }
}

/// Growable payload builder.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a big-endian `uint32`.
    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    /// Append a `boolean`.
    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(u8::from(value));
        self
    }

    /// Append a length-prefixed `string`.
    pub fn put_bytes(&mut self, value: &[u8]) -> &mut Self {
        // Payloads are bounded by the transport's packet size, far below u32::MAX.
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    /// Append a UTF-8 `string`.
    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    /// Freeze the accumulated payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
