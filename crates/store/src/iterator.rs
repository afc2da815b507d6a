//! Typed views over the raw byte-pair cursors.  Key and value decoding for
//! each table lives here, once, so callers never see raw records.

use weave_db::{DbError, DbResult};
use weave_primitives::{Account, BlockHash, Buf32};
use weave_state::{AccountInfo, BlockInfo, EpochBlock, PendingInfo, PendingKey};

use crate::transaction::RawItem;

/// Iterator adapter decoding `(key, value)` records into typed pairs.
pub struct TypedIter<'a, K, V> {
    inner: Box<dyn Iterator<Item = RawItem> + 'a>,
    table: &'static str,
    decode: fn(&[u8], &[u8]) -> Option<(K, V)>,
}

impl<'a, K, V> TypedIter<'a, K, V> {
    pub(crate) fn new(
        inner: Box<dyn Iterator<Item = RawItem> + 'a>,
        table: &'static str,
        decode: fn(&[u8], &[u8]) -> Option<(K, V)>,
    ) -> Self {
        Self {
            inner,
            table,
            decode,
        }
    }
}

impl<'a, K, V> Iterator for TypedIter<'a, K, V> {
    type Item = DbResult<(K, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.next()? {
            Ok((key, value)) => {
                Some((self.decode)(&key, &value).ok_or(DbError::Corrupt(self.table)))
            }
            Err(e) => Some(Err(DbError::from(e))),
        }
    }
}

pub type LatestIter<'a> = TypedIter<'a, Account, AccountInfo>;
pub type PendingIter<'a> = TypedIter<'a, PendingKey, PendingInfo>;
pub type BlockInfoIter<'a> = TypedIter<'a, BlockHash, BlockInfo>;
pub type FrontierIter<'a> = TypedIter<'a, BlockHash, Account>;
pub type EpochIter<'a> = TypedIter<'a, Buf32, EpochBlock>;
pub type VoteIter<'a> = TypedIter<'a, Account, weave_state::Vote>;
/// Unchecked rows: `(dependency, parked block)`.
pub type UncheckedIter<'a> = TypedIter<'a, BlockHash, weave_state::Block>;

pub(crate) fn decode_latest(key: &[u8], value: &[u8]) -> Option<(Account, AccountInfo)> {
    Some((Buf32::from_slice(key)?, AccountInfo::from_bytes(value).ok()?))
}

pub(crate) fn decode_pending(key: &[u8], value: &[u8]) -> Option<(PendingKey, PendingInfo)> {
    Some((
        PendingKey::from_bytes(key).ok()?,
        PendingInfo::from_bytes(value).ok()?,
    ))
}

pub(crate) fn decode_block_info(key: &[u8], value: &[u8]) -> Option<(BlockHash, BlockInfo)> {
    Some((Buf32::from_slice(key)?, BlockInfo::from_bytes(value).ok()?))
}

pub(crate) fn decode_frontier(key: &[u8], value: &[u8]) -> Option<(BlockHash, Account)> {
    Some((Buf32::from_slice(key)?, Buf32::from_slice(value)?))
}
