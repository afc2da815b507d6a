//! Byte-level readers and writers for the wire and store layouts.
//!
//! Every multi-byte integer is big-endian unless a layout explicitly says
//! otherwise (legacy block work nonces are little-endian on the wire).
//! Decoding is result-typed; malformed input is an error, never a panic.

use thiserror::Error;

use weave_primitives::{Amount, Buf32, Buf64};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("input ended early")]
    UnexpectedEnd,

    #[error("trailing bytes after message body")]
    TrailingBytes,

    #[error("length field out of bounds")]
    BadLength,

    #[error("invalid value in field {0}")]
    BadField(&'static str),

    #[error("unknown type tag {0}")]
    BadTypeTag(u8),

    #[error("malformed json: {0}")]
    BadJson(&'static str),
}

/// Cursor over an input buffer.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails unless the whole input has been consumed.
    pub fn finish(self) -> Result<(), CodecError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes)
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEnd);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, CodecError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u16_le(&mut self) -> Result<u16, CodecError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes(b.try_into().expect("4 bytes")))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, CodecError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes(b.try_into().expect("8 bytes")))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, CodecError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_le_bytes(b.try_into().expect("8 bytes")))
    }

    pub fn read_amount(&mut self) -> Result<Amount, CodecError> {
        let b = self.read_bytes(16)?;
        Ok(Amount::from_be_bytes(b.try_into().expect("16 bytes")))
    }

    pub fn read_buf32(&mut self) -> Result<Buf32, CodecError> {
        let b = self.read_bytes(32)?;
        Ok(Buf32::from_slice(b).expect("32 bytes"))
    }

    pub fn read_buf64(&mut self) -> Result<Buf64, CodecError> {
        let b = self.read_bytes(64)?;
        Ok(Buf64::from_slice(b).expect("64 bytes"))
    }
}

/// Growable output buffer with symmetric write helpers.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u16_be(&mut self, v: u16) -> &mut Self {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u16_le(&mut self, v: u16) -> &mut Self {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_u32_be(&mut self, v: u32) -> &mut Self {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u64_be(&mut self, v: u64) -> &mut Self {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u64_le(&mut self, v: u64) -> &mut Self {
        self.write_bytes(&v.to_le_bytes())
    }

    pub fn write_amount(&mut self, v: Amount) -> &mut Self {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_buf32(&mut self, v: &Buf32) -> &mut Self {
        self.write_bytes(v.as_bytes())
    }

    pub fn write_buf64(&mut self, v: &Buf64) -> &mut Self {
        self.write_bytes(v.as_bytes())
    }
}

/// JSON field access helpers for the textual codecs.
pub mod json {
    use serde_json::Value;

    use weave_primitives::account::decode_account;
    use weave_primitives::{Account, Amount, Buf32, Buf64};

    use super::CodecError;

    pub fn get_str<'a>(v: &'a Value, key: &'static str) -> Result<&'a str, CodecError> {
        v.get(key)
            .and_then(Value::as_str)
            .ok_or(CodecError::BadJson(key))
    }

    pub fn get_buf32(v: &Value, key: &'static str) -> Result<Buf32, CodecError> {
        Buf32::from_hex(get_str(v, key)?).map_err(|_| CodecError::BadJson(key))
    }

    pub fn get_buf64(v: &Value, key: &'static str) -> Result<Buf64, CodecError> {
        Buf64::from_hex(get_str(v, key)?).map_err(|_| CodecError::BadJson(key))
    }

    pub fn get_amount(v: &Value, key: &'static str) -> Result<Amount, CodecError> {
        get_str(v, key)?
            .parse::<Amount>()
            .map_err(|_| CodecError::BadJson(key))
    }

    pub fn get_account(v: &Value, key: &'static str) -> Result<Account, CodecError> {
        decode_account(get_str(v, key)?).map_err(|_| CodecError::BadJson(key))
    }

    pub fn get_u64_hex(v: &Value, key: &'static str) -> Result<u64, CodecError> {
        u64::from_str_radix(get_str(v, key)?, 16).map_err(|_| CodecError::BadJson(key))
    }

    pub fn get_u64_dec(v: &Value, key: &'static str) -> Result<u64, CodecError> {
        get_str(v, key)?
            .parse::<u64>()
            .map_err(|_| CodecError::BadJson(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_roundtrip() {
        let mut w = Writer::new();
        w.write_u8(7)
            .write_u32_be(0x01020304)
            .write_u64_le(0x1122334455667788)
            .write_amount(Amount(5))
            .write_buf32(&Buf32::from(9u64));
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u32_be().unwrap(), 0x01020304);
        assert_eq!(r.read_u64_le().unwrap(), 0x1122334455667788);
        assert_eq!(r.read_amount().unwrap(), Amount(5));
        assert_eq!(r.read_buf32().unwrap(), Buf32::from(9u64));
        r.finish().unwrap();
    }

    #[test]
    fn test_reader_short_input() {
        let mut r = Reader::new(&[1, 2]);
        assert_eq!(r.read_u32_be(), Err(CodecError::UnexpectedEnd));
    }

    #[test]
    fn test_trailing_bytes() {
        let r = Reader::new(&[1]);
        assert_eq!(r.finish(), Err(CodecError::TrailingBytes));
    }
}
