//! Account address codec: a 256-bit public key rendered as a checksummed
//! base-32 string with a fixed prefix.
//!
//! Layout is `wv_` + 52 chars (4 zero bits + 256 key bits, MSB first) +
//! 8 chars (Blake2b-40 of the key, byte-reversed).

use thiserror::Error;

use crate::buf::Buf32;
use crate::hash::hash40;
use crate::Account;

pub const ACCOUNT_PREFIX: &str = "wv_";

const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address length or prefix is wrong")]
    BadShape,

    #[error("character outside the address alphabet")]
    BadCharacter,

    #[error("checksum mismatch")]
    BadChecksum,
}

fn alphabet_index(c: u8) -> Option<u32> {
    ALPHABET.iter().position(|a| *a == c).map(|i| i as u32)
}

/// Encodes `data` MSB-first in 5-bit groups, with `pad_bits` zero bits
/// prepended so the total is a multiple of 5.
fn to_chars(data: &[u8], pad_bits: usize) -> String {
    debug_assert_eq!((pad_bits + data.len() * 8) % 5, 0);
    let mut out = String::with_capacity((pad_bits + data.len() * 8) / 5);
    let mut acc: u32 = 0;
    let mut nbits = pad_bits;
    for &b in data {
        acc = (acc << 8) | b as u32;
        nbits += 8;
        while nbits >= 5 {
            let group = (acc >> (nbits - 5)) & 0x1f;
            out.push(ALPHABET[group as usize] as char);
            nbits -= 5;
            acc &= (1 << nbits) - 1;
        }
    }
    out
}

/// Reverses [`to_chars`].  Fails on characters outside the alphabet or
/// nonzero padding bits.
fn from_chars(s: &str, pad_bits: usize, out_len: usize) -> Result<Vec<u8>, AddressError> {
    debug_assert_eq!(s.len() * 5, pad_bits + out_len * 8);
    let mut out = Vec::with_capacity(out_len);
    let mut acc: u32 = 0;
    let mut nbits = 0usize;
    for (i, c) in s.bytes().enumerate() {
        let val = alphabet_index(c).ok_or(AddressError::BadCharacter)?;
        if i == 0 && pad_bits > 0 {
            // The leading group carries the zero padding in its high bits.
            if val >> (5 - pad_bits) != 0 {
                return Err(AddressError::BadCharacter);
            }
            acc = val;
            nbits = 5 - pad_bits;
            continue;
        }
        acc = (acc << 5) | val;
        nbits += 5;
        while nbits >= 8 {
            out.push(((acc >> (nbits - 8)) & 0xff) as u8);
            nbits -= 8;
            acc &= (1 << nbits) - 1;
        }
    }
    debug_assert_eq!(nbits, 0);
    Ok(out)
}

/// Renders an account number as its address string.
pub fn encode_account(account: &Account) -> String {
    let mut check = hash40(account.as_bytes());
    check.reverse();
    let mut out = String::with_capacity(3 + 52 + 8);
    out.push_str(ACCOUNT_PREFIX);
    out.push_str(&to_chars(account.as_bytes(), 4));
    out.push_str(&to_chars(&check, 0));
    out
}

/// Parses an address string back into the account number, verifying the
/// checksum.
pub fn decode_account(s: &str) -> Result<Account, AddressError> {
    let rest = s.strip_prefix(ACCOUNT_PREFIX).ok_or(AddressError::BadShape)?;
    if rest.len() != 60 || !rest.is_ascii() {
        return Err(AddressError::BadShape);
    }
    let (data, check_part) = rest.split_at(52);
    let key = from_chars(data, 4, 32)?;
    let mut check = from_chars(check_part, 0, 5)?;
    check.reverse();
    let account = Buf32::from_slice(&key).ok_or(AddressError::BadShape)?;
    if hash40(account.as_bytes()) != check.as_slice() {
        return Err(AddressError::BadChecksum);
    }
    Ok(account)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_roundtrip() {
        for _ in 0..8 {
            let pair = Keypair::generate();
            let addr = encode_account(&pair.public);
            assert!(addr.starts_with(ACCOUNT_PREFIX));
            assert_eq!(addr.len(), 63);
            assert_eq!(decode_account(&addr).unwrap(), pair.public);
        }
    }

    #[test]
    fn test_zero_account() {
        let addr = encode_account(&Buf32::zero());
        assert_eq!(decode_account(&addr).unwrap(), Buf32::zero());
    }

    #[test]
    fn test_mutation_rejected() {
        let addr = encode_account(&Keypair::generate().public);
        for i in 3..addr.len() {
            let mut chars: Vec<u8> = addr.bytes().collect();
            // Swap in a different alphabet character at position i.
            let replacement = ALPHABET.iter().find(|c| **c != chars[i]).unwrap();
            chars[i] = *replacement;
            let mutated = String::from_utf8(chars).unwrap();
            assert!(decode_account(&mutated).is_err(), "mutation at {i} accepted");
        }
    }

    #[test]
    fn test_bad_shape() {
        assert!(decode_account("xx_123").is_err());
        assert!(decode_account("wv_123").is_err());
        assert!(decode_account("").is_err());
    }
}
