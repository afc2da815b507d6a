//! 128-bit balances and amounts.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// SI-style dividers for display purposes.  The base unit of account is
/// 10^24 raw.
pub const GIGA: u128 = 10u128.pow(33);
pub const MEGA: u128 = 10u128.pow(30);
pub const KILO: u128 = 10u128.pow(27);
pub const UNIT: u128 = 10u128.pow(24);
pub const MILLI: u128 = 10u128.pow(21);
pub const MICRO: u128 = 10u128.pow(18);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid decimal amount")]
pub struct AmountDecodeError;

/// A balance or balance delta.  Serialized big-endian, 16 bytes.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Amount(pub u128);

impl Amount {
    pub const LEN: usize = 16;

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn max() -> Self {
        Self(u128::MAX)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn number(&self) -> u128 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Formats in terms of `scale` raw per displayed unit, keeping
    /// `precision` fractional digits.
    pub fn format_balance(&self, scale: u128, precision: usize) -> String {
        let whole = self.0 / scale;
        if precision == 0 {
            return whole.to_string();
        }
        let frac = self.0 % scale;
        // Scale the remainder into the requested number of digits.
        let digits = 10u128.pow(precision as u32);
        let frac_scaled = frac / (scale / digits);
        format!("{whole}.{frac_scaled:0precision$}")
    }
}

impl From<u128> for Amount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = AmountDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 39 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountDecodeError);
        }
        s.parse::<u128>().map(Amount).map_err(|_| AmountDecodeError)
    }
}
