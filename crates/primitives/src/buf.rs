//! Fixed-width byte buffers used for hashes, keys and signatures.

use std::fmt;
use std::ops::{BitXor, BitXorAssign};
use std::str::FromStr;

use thiserror::Error;

/// Error decoding a buf from its hex form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BufDecodeError {
    #[error("expected {0} hex chars, got {1}")]
    BadLength(usize, usize),

    #[error("invalid hex digit")]
    BadDigit,
}

/// 32-byte buf, used for hashes, accounts, public keys and seeds.
///
/// Ordering is byte-lexicographic, which for the big-endian encodings we use
/// everywhere is also numeric ordering.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf32(pub [u8; 32]);

/// 64-byte buf, used for signatures.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Buf64(pub [u8; 64]);

impl Buf32 {
    pub const LEN: usize = 32;

    pub fn zero() -> Self {
        Self([0; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = buf.try_into().ok()?;
        Some(Self(arr))
    }

    /// Interprets the low 8 bytes as a big-endian integer, for the store's
    /// checksum grid addressing.
    pub fn low_u64(&self) -> u64 {
        let mut b = [0; 8];
        b.copy_from_slice(&self.0[24..]);
        u64::from_be_bytes(b)
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, BufDecodeError> {
        if s.len() != 64 {
            return Err(BufDecodeError::BadLength(64, s.len()));
        }
        let mut arr = [0; 32];
        hex::decode_to_slice(s, &mut arr).map_err(|_| BufDecodeError::BadDigit)?;
        Ok(Self(arr))
    }
}

impl Buf64 {
    pub const LEN: usize = 64;

    pub fn zero() -> Self {
        Self([0; 64])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn from_slice(buf: &[u8]) -> Option<Self> {
        let arr: [u8; 64] = buf.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, BufDecodeError> {
        if s.len() != 128 {
            return Err(BufDecodeError::BadLength(128, s.len()));
        }
        let mut arr = [0; 64];
        hex::decode_to_slice(s, &mut arr).map_err(|_| BufDecodeError::BadDigit)?;
        Ok(Self(arr))
    }
}

impl Default for Buf64 {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<[u8; 32]> for Buf32 {
    fn from(arr: [u8; 32]) -> Self {
        Self(arr)
    }
}

impl From<Buf32> for [u8; 32] {
    fn from(buf: Buf32) -> Self {
        buf.0
    }
}

impl From<[u8; 64]> for Buf64 {
    fn from(arr: [u8; 64]) -> Self {
        Self(arr)
    }
}

impl From<u64> for Buf32 {
    fn from(v: u64) -> Self {
        let mut arr = [0; 32];
        arr[24..].copy_from_slice(&v.to_be_bytes());
        Self(arr)
    }
}

impl BitXor for Buf32 {
    type Output = Buf32;

    fn bitxor(mut self, rhs: Buf32) -> Buf32 {
        self ^= rhs;
        self
    }
}

impl BitXorAssign for Buf32 {
    fn bitxor_assign(&mut self, rhs: Buf32) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a ^= b;
        }
    }
}

impl fmt::Display for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Buf32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Display for Buf64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Buf64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Buf32 {
    type Err = BufDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl FromStr for Buf64 {
    type Err = BufDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let mut arr = [0u8; 32];
        for (i, b) in arr.iter_mut().enumerate() {
            *b = i as u8;
        }
        let buf = Buf32(arr);
        let s = buf.to_hex();
        assert_eq!(s.len(), 64);
        assert_eq!(Buf32::from_hex(&s).unwrap(), buf);
    }

    #[test]
    fn test_hex_rejects() {
        assert!(Buf32::from_hex("00").is_err());
        let bad = "ZZ".repeat(32);
        assert!(Buf32::from_hex(&bad).is_err());
    }

    #[test]
    fn test_xor_involution() {
        let a = Buf32::from(0x1234u64);
        let b = Buf32::from(0xffffu64);
        assert_eq!(a ^ b ^ b, a);
        assert_eq!(a ^ a, Buf32::zero());
    }

    #[test]
    fn test_ordering_is_numeric() {
        assert!(Buf32::from(1u64) < Buf32::from(2u64));
        assert!(Buf32::from(0x100u64) > Buf32::from(0xffu64));
    }
}
