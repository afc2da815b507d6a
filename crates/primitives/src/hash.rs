//! Blake2b wrappers.  Every content digest in the system is a Blake2b-256
//! over fields fed in a fixed order.

use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;

use crate::buf::Buf32;

/// Incremental Blake2b-256 hasher fed field-by-field.
pub struct Hasher256 {
    inner: Blake2bVar,
}

impl Hasher256 {
    pub fn new() -> Self {
        Self {
            inner: Blake2bVar::new(32).expect("blake2b-256 output size"),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(bytes);
        self
    }

    pub fn finalize(self) -> Buf32 {
        let mut out = [0; 32];
        self.inner
            .finalize_variable(&mut out)
            .expect("blake2b-256 finalize");
        Buf32(out)
    }
}

impl Default for Hasher256 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot digest over a sequence of byte slices.
pub fn hash256(parts: &[&[u8]]) -> Buf32 {
    let mut h = Hasher256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize()
}

/// 8-byte Blake2b digest interpreted little-endian, used by proof-of-work.
pub fn hash64(parts: &[&[u8]]) -> u64 {
    let mut h = Blake2bVar::new(8).expect("blake2b-64 output size");
    for p in parts {
        h.update(p);
    }
    let mut out = [0; 8];
    h.finalize_variable(&mut out).expect("blake2b-64 finalize");
    u64::from_le_bytes(out)
}

/// 5-byte Blake2b digest, used by the account address checksum.
pub fn hash40(data: &[u8]) -> [u8; 5] {
    let mut h = Blake2bVar::new(5).expect("blake2b-40 output size");
    h.update(data);
    let mut out = [0; 5];
    h.finalize_variable(&mut out).expect("blake2b-40 finalize");
    out
}
