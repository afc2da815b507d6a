//! Fixed-layout records the stores keep alongside blocks.

use weave_primitives::{Account, Amount, BlockHash, EpochHash};

use crate::codec::{CodecError, Reader, Writer};

/// Latest information about an account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountInfo {
    pub head: BlockHash,
    pub open_block: BlockHash,
    pub balance: Amount,
    /// Seconds since the unix epoch of the last mutation.
    pub modified: u64,
    pub block_count: u64,
}

impl AccountInfo {
    pub const SIZE: usize = 32 + 32 + 16 + 8 + 8;

    pub fn new(
        head: BlockHash,
        open_block: BlockHash,
        balance: Amount,
        modified: u64,
        block_count: u64,
    ) -> Self {
        Self {
            head,
            open_block,
            balance,
            modified,
            block_count,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIZE);
        w.write_buf32(&self.head)
            .write_buf32(&self.open_block)
            .write_amount(self.balance)
            .write_u64_be(self.modified)
            .write_u64_be(self.block_count);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let info = Self {
            head: r.read_buf32()?,
            open_block: r.read_buf32()?,
            balance: r.read_amount()?,
            modified: r.read_u64_be()?,
            block_count: r.read_u64_be()?,
        };
        r.finish()?;
        Ok(info)
    }
}

/// Key of an uncollected send: who may receive it, and which send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PendingKey {
    pub destination: Account,
    pub send_hash: BlockHash,
}

impl PendingKey {
    pub const SIZE: usize = 64;

    pub fn new(destination: Account, send_hash: BlockHash) -> Self {
        Self {
            destination,
            send_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0; 64];
        out[..32].copy_from_slice(self.destination.as_bytes());
        out[32..].copy_from_slice(self.send_hash.as_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let key = Self {
            destination: r.read_buf32()?,
            send_hash: r.read_buf32()?,
        };
        r.finish()?;
        Ok(key)
    }
}

/// Value of an uncollected send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingInfo {
    pub source: Account,
    pub amount: Amount,
}

impl PendingInfo {
    pub const SIZE: usize = 48;

    pub fn new(source: Account, amount: Amount) -> Self {
        Self { source, amount }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIZE);
        w.write_buf32(&self.source).write_amount(self.amount);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let info = Self {
            source: r.read_buf32()?,
            amount: r.read_amount()?,
        };
        r.finish()?;
        Ok(info)
    }
}

/// Cached `(account, balance)` for a block, short-circuiting balance walks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockInfo {
    pub account: Account,
    pub balance: Amount,
}

impl BlockInfo {
    pub const SIZE: usize = 48;

    pub fn new(account: Account, balance: Amount) -> Self {
        Self { account, balance }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIZE);
        w.write_buf32(&self.account).write_amount(self.balance);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let info = Self {
            account: r.read_buf32()?,
            balance: r.read_amount()?,
        };
        r.finish()?;
        Ok(info)
    }
}

/// Head of the epoch chain plus bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpochInfo {
    pub head: EpochHash,
    pub modified: u64,
    pub block_count: u64,
}

impl EpochInfo {
    pub const SIZE: usize = 48;

    pub fn new(head: EpochHash, modified: u64, block_count: u64) -> Self {
        Self {
            head,
            modified,
            block_count,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::SIZE);
        w.write_buf32(&self.head)
            .write_u64_be(self.modified)
            .write_u64_be(self.block_count);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes);
        let info = Self {
            head: r.read_buf32()?,
            modified: r.read_u64_be()?,
            block_count: r.read_u64_be()?,
        };
        r.finish()?;
        Ok(info)
    }
}
