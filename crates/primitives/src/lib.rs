//! Fixed-width value types and the crypto/work primitives built on them.

pub mod account;
pub mod amount;
pub mod buf;
pub mod crypto;
pub mod hash;
pub mod params;
pub mod work;

pub use amount::Amount;
pub use buf::{Buf32, Buf64};

/// 256-bit block digest.
pub type BlockHash = Buf32;

/// 256-bit epoch header digest.
pub type EpochHash = Buf32;

/// Account number, the ed25519 public key that operates the chain.
pub type Account = Buf32;

/// Public half of a signing key.
pub type PublicKey = Buf32;

/// Detached ed25519 signature.
pub type Signature = Buf64;

/// Node identity key, persisted in the epoch store meta table.
pub type NodeId = Buf32;

/// Rolling ledger checksum cell.
pub type Checksum = Buf32;
