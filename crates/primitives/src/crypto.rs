//! ed25519 signing over 256-bit digests.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use thiserror::Error;

use crate::buf::{Buf32, Buf64};
use crate::hash::Hasher256;
use crate::{PublicKey, Signature};

#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("invalid key encoding")]
    BadEncoding,
}

/// Unencrypted private key material.  Kept out of Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct RawKey(pub Buf32);

impl RawKey {
    pub fn zero() -> Self {
        Self(Buf32::zero())
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(self.0.as_bytes())
    }
}

impl std::fmt::Debug for RawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RawKey(..)")
    }
}

/// A key pair.  The private key is generated from OS randomness or passed in
/// as a hex string; the public key is derived using ed25519.
#[derive(Clone, Debug)]
pub struct Keypair {
    pub public: PublicKey,
    pub raw: RawKey,
}

impl Keypair {
    /// Fresh random pair.
    pub fn generate() -> Self {
        let mut seed = [0; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let raw = RawKey(Buf32(seed));
        let public = derive_public(&raw);
        Self { public, raw }
    }

    /// Pair from a 64-char hex private key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let raw = RawKey(Buf32::from_hex(s).map_err(|_| KeyError::BadEncoding)?);
        let public = derive_public(&raw);
        Ok(Self { public, raw })
    }
}

/// Derives the public key for raw private key material.
pub fn derive_public(raw: &RawKey) -> PublicKey {
    let vk = raw.signing_key().verifying_key();
    Buf32(vk.to_bytes())
}

/// Signs a 256-bit digest.  The public key is passed alongside so callers
/// can't accidentally sign for a mismatched account; a mismatch is a
/// programming error and yields a signature that will never validate.
pub fn sign_message(raw: &RawKey, public: &PublicKey, message: &Buf32) -> Signature {
    let sk = raw.signing_key();
    debug_assert_eq!(&Buf32(sk.verifying_key().to_bytes()), public);
    let sig = sk.sign(message.as_bytes());
    Buf64(sig.to_bytes())
}

/// Checks a signature over a 256-bit digest.  Returns `true` when valid.
pub fn validate_message(public: &PublicKey, message: &Buf32, signature: &Signature) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(public.as_bytes()) else {
        return false;
    };
    let sig = DalekSignature::from_bytes(signature.as_bytes());
    vk.verify_strict(message.as_bytes(), &sig).is_ok()
}

/// Index-derived private key: Blake2b-256 over seed then the 32-bit index,
/// big-endian.  Wallets use this to mint account keys from one seed.
pub fn deterministic_key(seed: &Buf32, index: u32) -> RawKey {
    let mut h = Hasher256::new();
    h.update(seed.as_bytes());
    h.update(&index.to_be_bytes());
    RawKey(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let pair = Keypair::generate();
        let msg = Buf32::from(42u64);
        let sig = sign_message(&pair.raw, &pair.public, &msg);
        assert!(validate_message(&pair.public, &msg, &sig));
    }

    #[test]
    fn test_flipped_bit_fails() {
        let pair = Keypair::generate();
        let msg = Buf32::from(42u64);
        let sig = sign_message(&pair.raw, &pair.public, &msg);
        for byte in [0usize, 17, 63] {
            let mut bad = sig;
            bad.0[byte] ^= 0x01;
            assert!(!validate_message(&pair.public, &msg, &bad));
        }
        let other = Keypair::generate();
        assert!(!validate_message(&other.public, &msg, &sig));
    }

    #[test]
    fn test_deterministic_key() {
        let seed = Buf32::from(7u64);
        let k0 = deterministic_key(&seed, 0);
        let k0again = deterministic_key(&seed, 0);
        let k1 = deterministic_key(&seed, 1);
        assert_eq!(k0, k0again);
        assert_ne!(k0, k1);
    }

    #[test]
    fn test_hex_keypair() {
        let pair = Keypair::from_hex(&"34".repeat(32)).unwrap();
        let msg = Buf32::from(1u64);
        let sig = sign_message(&pair.raw, &pair.public, &msg);
        assert!(validate_message(&pair.public, &msg, &sig));
        assert!(Keypair::from_hex("beef").is_err());
    }
}
