//! Durable block storage and its side tables.
//!
//! One column family per table; each block table's record is the serialized
//! block followed by a fixed 32-byte successor slot that is patched in place
//! when a child lands.  All mutation goes through [`StoreTransaction`]
//! handles so a batch either commits whole or not at all.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use parking_lot::Mutex;
use rand::RngCore;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, TransactionDB, TransactionDBOptions};
use tracing::*;

use weave_db::tables;
use weave_db::{DbError, DbResult, SCHEMA_VERSION};
use weave_primitives::crypto::RawKey;
use weave_primitives::{Account, BlockHash, Buf32, Checksum};
use weave_state::{AccountInfo, Block, BlockInfo, BlockType, PendingInfo, PendingKey, Vote};

use crate::iterator::{
    decode_block_info, decode_frontier, decode_latest, decode_pending, BlockInfoIter,
    FrontierIter, LatestIter, PendingIter, TypedIter,
};
use crate::migrations;
use crate::transaction::StoreTransaction;

/// Entries the unchecked read-through mirror retains.
const UNCHECKED_MIRROR_CAPACITY: usize = 16 * 1024;

/// Every N-th block of a long chain gets a `blocks_info` cache record.
pub const BLOCK_INFO_INTERVAL: u64 = 32;

/// Per-variant record counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockCounts {
    pub send: u64,
    pub receive: u64,
    pub open: u64,
    pub change: u64,
    pub state: u64,
}

impl BlockCounts {
    pub fn sum(&self) -> u64 {
        self.send + self.receive + self.open + self.change + self.state
    }
}

/// Manages block storage and iteration.
pub struct BlockStore {
    db: TransactionDB,
    unchecked_mirror: Mutex<LruCache<BlockHash, Vec<Block>>>,
    vote_cache: Mutex<HashMap<Account, Vote>>,
}

impl BlockStore {
    /// Opens (or creates) the store and brings its schema up to v11.
    pub fn open(path: &Path) -> DbResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let txn_opts = TransactionDBOptions::default();
        let cfs = tables::ALL
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cfs)?;

        let store = Self {
            db,
            unchecked_mirror: Mutex::new(LruCache::new(
                NonZeroUsize::new(UNCHECKED_MIRROR_CAPACITY).expect("nonzero capacity"),
            )),
            vote_cache: Mutex::new(HashMap::new()),
        };

        let txn = store.tx_begin_write();
        match store.version_get(&txn)? {
            None => {
                // Fresh store, stamp it current.
                store.version_put(&txn, SCHEMA_VERSION)?;
            }
            Some(v) if v < SCHEMA_VERSION => {
                info!(from = v, to = SCHEMA_VERSION, "upgrading block store");
                store.do_upgrades(&txn)?;
            }
            Some(v) if v > SCHEMA_VERSION => return Err(DbError::VersionFromFuture(v)),
            Some(_) => {}
        }
        txn.commit()?;
        Ok(store)
    }

    pub fn tx_begin_write(&self) -> StoreTransaction<'_> {
        StoreTransaction::new(&self.db)
    }

    /// Read-only snapshot of the store.  Never committed.
    pub fn tx_begin_read(&self) -> StoreTransaction<'_> {
        StoreTransaction::new(&self.db)
    }

    pub(crate) fn cf(&self, name: &'static str) -> DbResult<&ColumnFamily> {
        self.db.cf_handle(name).ok_or(DbError::MissingTable(name))
    }

    fn block_cf(&self, block_type: BlockType) -> DbResult<&ColumnFamily> {
        let name = match block_type {
            BlockType::Send => tables::SEND_BLOCKS,
            BlockType::Receive => tables::RECEIVE_BLOCKS,
            BlockType::Open => tables::OPEN_BLOCKS,
            BlockType::Change => tables::CHANGE_BLOCKS,
            BlockType::State => tables::STATE_BLOCKS,
            other => {
                return Err(DbError::Other(format!(
                    "no block table for type {other:?}"
                )))
            }
        };
        self.cf(name)
    }

    fn table_type(name: &'static str) -> BlockType {
        match name {
            tables::SEND_BLOCKS => BlockType::Send,
            tables::RECEIVE_BLOCKS => BlockType::Receive,
            tables::OPEN_BLOCKS => BlockType::Open,
            tables::CHANGE_BLOCKS => BlockType::Change,
            tables::STATE_BLOCKS => BlockType::State,
            _ => BlockType::Invalid,
        }
    }

    // ---- blocks ----

    /// Writes a block and links it in as its predecessor's successor.  The
    /// predecessor must already be stored unless the block roots a chain.
    pub fn block_put(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
        block: &Block,
        successor: BlockHash,
    ) -> DbResult<()> {
        let previous = block.previous();
        if !previous.is_zero() {
            self.block_successor_set(txn, &previous, hash)?;
        }
        let cf = self.block_cf(block.block_type())?;
        let mut value = block.to_bytes();
        value.extend_from_slice(successor.as_bytes());
        txn.put(cf, hash.as_bytes(), &value)
    }

    fn block_get_raw(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<Option<(&'static str, Vec<u8>)>> {
        for name in tables::BLOCK_TABLES {
            let cf = self.cf(name)?;
            if let Some(value) = txn.get(cf, hash.as_bytes())? {
                return Ok(Some((name, value)));
            }
        }
        Ok(None)
    }

    pub fn block_get(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<Option<Block>> {
        let Some((table, value)) = self.block_get_raw(txn, hash)? else {
            return Ok(None);
        };
        let body_len = value
            .len()
            .checked_sub(32)
            .ok_or(DbError::Corrupt(table))?;
        let block = Block::from_bytes(Self::table_type(table), &value[..body_len])
            .map_err(|_| DbError::Corrupt(table))?;
        Ok(Some(block))
    }

    pub fn block_exists(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<bool> {
        Ok(self.block_get_raw(txn, hash)?.is_some())
    }

    /// Removes the record from its variant table only; index maintenance is
    /// the caller's job.
    pub fn block_del(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<()> {
        let Some((table, _)) = self.block_get_raw(txn, hash)? else {
            return Err(DbError::NotFound);
        };
        txn.delete(self.cf(table)?, hash.as_bytes())
    }

    /// Successor stored in the record's trailing slot, zero if unlinked.
    pub fn block_successor(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<BlockHash> {
        let Some((table, value)) = self.block_get_raw(txn, hash)? else {
            return Ok(BlockHash::zero());
        };
        let tail = value
            .len()
            .checked_sub(32)
            .ok_or(DbError::Corrupt(table))?;
        Ok(Buf32::from_slice(&value[tail..]).expect("32-byte suffix"))
    }

    pub fn block_successor_clear(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<()> {
        self.block_successor_set(txn, hash, &BlockHash::zero())
    }

    fn block_successor_set(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
        successor: &BlockHash,
    ) -> DbResult<()> {
        let Some((table, mut value)) = self.block_get_raw(txn, hash)? else {
            return Err(DbError::MissingPredecessor(*hash));
        };
        let tail = value
            .len()
            .checked_sub(32)
            .ok_or(DbError::Corrupt(table))?;
        value[tail..].copy_from_slice(successor.as_bytes());
        txn.put(self.cf(table)?, hash.as_bytes(), &value)
    }

    pub fn block_count(&self, txn: &StoreTransaction<'_>) -> DbResult<BlockCounts> {
        Ok(BlockCounts {
            send: txn.count(self.cf(tables::SEND_BLOCKS)?)?,
            receive: txn.count(self.cf(tables::RECEIVE_BLOCKS)?)?,
            open: txn.count(self.cf(tables::OPEN_BLOCKS)?)?,
            change: txn.count(self.cf(tables::CHANGE_BLOCKS)?)?,
            state: txn.count(self.cf(tables::STATE_BLOCKS)?)?,
        })
    }

    /// Uniform sample over every stored block, used by rep crawling.
    pub fn block_random(&self, txn: &StoreTransaction<'_>) -> DbResult<Option<Block>> {
        let counts = self.block_count(txn)?;
        let total = counts.sum();
        if total == 0 {
            return Ok(None);
        }
        let mut rng = rand::thread_rng();
        let mut pick = rng.next_u64() % total;
        let per_table = [
            (tables::SEND_BLOCKS, counts.send),
            (tables::RECEIVE_BLOCKS, counts.receive),
            (tables::OPEN_BLOCKS, counts.open),
            (tables::CHANGE_BLOCKS, counts.change),
            (tables::STATE_BLOCKS, counts.state),
        ];
        for (name, count) in per_table {
            if pick >= count {
                pick -= count;
                continue;
            }
            let cf = self.cf(name)?;
            let mut start = [0u8; 32];
            rng.fill_bytes(&mut start);
            // Seek to a random key and wrap to the front if we fell off.
            let item = txn
                .iter_from(cf, &start)
                .next()
                .or_else(|| txn.iter_start(cf).next());
            let Some(item) = item else {
                return Ok(None);
            };
            let (key, _) = item?;
            let hash = Buf32::from_slice(&key).ok_or(DbError::Corrupt(name))?;
            return self.block_get(txn, &hash);
        }
        Ok(None)
    }

    // ---- accounts ----

    pub fn account_put(
        &self,
        txn: &StoreTransaction<'_>,
        account: &Account,
        info: &AccountInfo,
    ) -> DbResult<()> {
        txn.put(self.cf(tables::ACCOUNTS)?, account.as_bytes(), &info.to_bytes())
    }

    pub fn account_get(
        &self,
        txn: &StoreTransaction<'_>,
        account: &Account,
    ) -> DbResult<Option<AccountInfo>> {
        let Some(value) = txn.get(self.cf(tables::ACCOUNTS)?, account.as_bytes())? else {
            return Ok(None);
        };
        AccountInfo::from_bytes(&value)
            .map(Some)
            .map_err(|_| DbError::Corrupt(tables::ACCOUNTS))
    }

    pub fn account_del(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<()> {
        txn.delete(self.cf(tables::ACCOUNTS)?, account.as_bytes())
    }

    pub fn account_exists(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<bool> {
        txn.exists(self.cf(tables::ACCOUNTS)?, account.as_bytes())
    }

    pub fn account_count(&self, txn: &StoreTransaction<'_>) -> DbResult<u64> {
        txn.count(self.cf(tables::ACCOUNTS)?)
    }

    pub fn latest_begin<'a>(&self, txn: &'a StoreTransaction<'_>) -> DbResult<LatestIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_start(self.cf(tables::ACCOUNTS)?),
            tables::ACCOUNTS,
            decode_latest,
        ))
    }

    pub fn latest_begin_at<'a>(
        &self,
        txn: &'a StoreTransaction<'_>,
        account: &Account,
    ) -> DbResult<LatestIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_from(self.cf(tables::ACCOUNTS)?, account.as_bytes()),
            tables::ACCOUNTS,
            decode_latest,
        ))
    }

    // ---- frontiers ----

    pub fn frontier_put(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
        account: &Account,
    ) -> DbResult<()> {
        txn.put(self.cf(tables::FRONTIERS)?, hash.as_bytes(), account.as_bytes())
    }

    pub fn frontier_get(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<Option<Account>> {
        let Some(value) = txn.get(self.cf(tables::FRONTIERS)?, hash.as_bytes())? else {
            return Ok(None);
        };
        Buf32::from_slice(&value)
            .map(Some)
            .ok_or(DbError::Corrupt(tables::FRONTIERS))
    }

    pub fn frontier_del(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<()> {
        txn.delete(self.cf(tables::FRONTIERS)?, hash.as_bytes())
    }

    pub fn frontier_begin<'a>(&self, txn: &'a StoreTransaction<'_>) -> DbResult<FrontierIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_start(self.cf(tables::FRONTIERS)?),
            tables::FRONTIERS,
            decode_frontier,
        ))
    }

    // ---- pending ----

    pub fn pending_put(
        &self,
        txn: &StoreTransaction<'_>,
        key: &PendingKey,
        info: &PendingInfo,
    ) -> DbResult<()> {
        txn.put(self.cf(tables::PENDING)?, &key.to_bytes(), &info.to_bytes())
    }

    pub fn pending_get(
        &self,
        txn: &StoreTransaction<'_>,
        key: &PendingKey,
    ) -> DbResult<Option<PendingInfo>> {
        let Some(value) = txn.get(self.cf(tables::PENDING)?, &key.to_bytes())? else {
            return Ok(None);
        };
        PendingInfo::from_bytes(&value)
            .map(Some)
            .map_err(|_| DbError::Corrupt(tables::PENDING))
    }

    pub fn pending_del(&self, txn: &StoreTransaction<'_>, key: &PendingKey) -> DbResult<()> {
        txn.delete(self.cf(tables::PENDING)?, &key.to_bytes())
    }

    pub fn pending_exists(&self, txn: &StoreTransaction<'_>, key: &PendingKey) -> DbResult<bool> {
        txn.exists(self.cf(tables::PENDING)?, &key.to_bytes())
    }

    pub fn pending_begin<'a>(
        &self,
        txn: &'a StoreTransaction<'_>,
        key: &PendingKey,
    ) -> DbResult<PendingIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_from(self.cf(tables::PENDING)?, &key.to_bytes()),
            tables::PENDING,
            decode_pending,
        ))
    }

    // ---- block info cache ----

    pub fn block_info_put(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
        info: &BlockInfo,
    ) -> DbResult<()> {
        txn.put(self.cf(tables::BLOCKS_INFO)?, hash.as_bytes(), &info.to_bytes())
    }

    pub fn block_info_get(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<Option<BlockInfo>> {
        let Some(value) = txn.get(self.cf(tables::BLOCKS_INFO)?, hash.as_bytes())? else {
            return Ok(None);
        };
        BlockInfo::from_bytes(&value)
            .map(Some)
            .map_err(|_| DbError::Corrupt(tables::BLOCKS_INFO))
    }

    pub fn block_info_del(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<()> {
        txn.delete(self.cf(tables::BLOCKS_INFO)?, hash.as_bytes())
    }

    pub fn block_info_exists(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<bool> {
        txn.exists(self.cf(tables::BLOCKS_INFO)?, hash.as_bytes())
    }

    pub fn block_info_begin<'a>(
        &self,
        txn: &'a StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<BlockInfoIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_from(self.cf(tables::BLOCKS_INFO)?, hash.as_bytes()),
            tables::BLOCKS_INFO,
            decode_block_info,
        ))
    }

    /// Cached balance for a block if the info cache covers it.
    pub fn block_balance(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &BlockHash,
    ) -> DbResult<Option<weave_primitives::Amount>> {
        Ok(self.block_info_get(txn, hash)?.map(|i| i.balance))
    }

    // ---- unchecked ----

    /// Parks a block until `dependency` arrives.  Multi-valued per key.
    pub fn unchecked_put(
        &self,
        txn: &StoreTransaction<'_>,
        dependency: &BlockHash,
        block: &Block,
    ) -> DbResult<()> {
        self.unchecked_mirror.lock().pop(dependency);
        let key = unchecked_key(dependency, &block.hash());
        let mut value = vec![u8::from(block.block_type())];
        value.extend_from_slice(&block.to_bytes());
        txn.put(self.cf(tables::UNCHECKED)?, &key, &value)
    }

    /// All blocks parked on `dependency`, via the read-through mirror.
    pub fn unchecked_get(
        &self,
        txn: &StoreTransaction<'_>,
        dependency: &BlockHash,
    ) -> DbResult<Vec<Block>> {
        if let Some(cached) = self.unchecked_mirror.lock().get(dependency) {
            return Ok(cached.clone());
        }
        let cf = self.cf(tables::UNCHECKED)?;
        let mut blocks = Vec::new();
        for item in txn.iter_from(cf, dependency.as_bytes()) {
            let (key, value) = item?;
            if &key[..32] != dependency.as_bytes() {
                break;
            }
            blocks.push(decode_unchecked(&value)?);
        }
        self.unchecked_mirror
            .lock()
            .put(*dependency, blocks.clone());
        Ok(blocks)
    }

    pub fn unchecked_del(
        &self,
        txn: &StoreTransaction<'_>,
        dependency: &BlockHash,
        block: &Block,
    ) -> DbResult<()> {
        self.unchecked_mirror.lock().pop(dependency);
        let key = unchecked_key(dependency, &block.hash());
        txn.delete(self.cf(tables::UNCHECKED)?, &key)
    }

    pub fn unchecked_clear(&self, txn: &StoreTransaction<'_>) -> DbResult<()> {
        self.unchecked_mirror.lock().clear();
        let cf = self.cf(tables::UNCHECKED)?;
        let keys: Vec<_> = txn
            .iter_start(cf)
            .map(|item| item.map(|(k, _)| k))
            .collect::<Result<_, _>>()?;
        for key in keys {
            txn.delete(cf, &key)?;
        }
        Ok(())
    }

    pub fn unchecked_count(&self, txn: &StoreTransaction<'_>) -> DbResult<u64> {
        txn.count(self.cf(tables::UNCHECKED)?)
    }

    /// All parked blocks keyed by the dependency they wait on.
    pub fn unchecked_begin<'a>(
        &self,
        txn: &'a StoreTransaction<'_>,
    ) -> DbResult<crate::iterator::UncheckedIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_start(self.cf(tables::UNCHECKED)?),
            tables::UNCHECKED,
            decode_unchecked_row,
        ))
    }

    // ---- checksum grid ----

    pub fn checksum_put(
        &self,
        txn: &StoreTransaction<'_>,
        prefix: u64,
        mask: u8,
        checksum: &Checksum,
    ) -> DbResult<()> {
        txn.put(
            self.cf(tables::CHECKSUM)?,
            &checksum_key(prefix, mask),
            checksum.as_bytes(),
        )
    }

    pub fn checksum_get(
        &self,
        txn: &StoreTransaction<'_>,
        prefix: u64,
        mask: u8,
    ) -> DbResult<Option<Checksum>> {
        let Some(value) = txn.get(self.cf(tables::CHECKSUM)?, &checksum_key(prefix, mask))? else {
            return Ok(None);
        };
        Buf32::from_slice(&value)
            .map(Some)
            .ok_or(DbError::Corrupt(tables::CHECKSUM))
    }

    pub fn checksum_del(&self, txn: &StoreTransaction<'_>, prefix: u64, mask: u8) -> DbResult<()> {
        txn.delete(self.cf(tables::CHECKSUM)?, &checksum_key(prefix, mask))
    }

    // ---- votes ----

    /// Latest vote for an account from the table, ignoring the cache.
    pub fn vote_get(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<Option<Vote>> {
        let Some(value) = txn.get(self.cf(tables::VOTE)?, account.as_bytes())? else {
            return Ok(None);
        };
        decode_vote(&value).map(Some)
    }

    pub fn vote_put(&self, txn: &StoreTransaction<'_>, vote: &Vote) -> DbResult<()> {
        let mut value = vec![u8::from(vote.block.block_type())];
        value.extend_from_slice(&vote.to_bytes());
        txn.put(self.cf(tables::VOTE)?, vote.account.as_bytes(), &value)
    }

    /// Stores `vote` if it outranks the stored one; returns whichever has
    /// the higher sequence.
    pub fn vote_max(&self, txn: &StoreTransaction<'_>, vote: Vote) -> DbResult<Vote> {
        match self.vote_get(txn, &vote.account)? {
            Some(stored) if stored.sequence >= vote.sequence => Ok(stored),
            _ => {
                self.vote_put(txn, &vote)?;
                Ok(vote)
            }
        }
    }

    /// Latest vote for an account considering the in-memory cache.
    pub fn vote_current(
        &self,
        txn: &StoreTransaction<'_>,
        account: &Account,
    ) -> DbResult<Option<Vote>> {
        if let Some(vote) = self.vote_cache.lock().get(account) {
            return Ok(Some(vote.clone()));
        }
        self.vote_get(txn, account)
    }

    /// Builds this account's next vote, one sequence past its current one.
    pub fn vote_generate(
        &self,
        txn: &StoreTransaction<'_>,
        account: &Account,
        prv: &RawKey,
        block: Block,
    ) -> DbResult<Vote> {
        let sequence = self
            .vote_current(txn, account)?
            .map(|v| v.sequence + 1)
            .unwrap_or(1);
        let vote = Vote::new(*account, prv, sequence, block);
        self.vote_cache.lock().insert(*account, vote.clone());
        Ok(vote)
    }

    /// Persists the vote cache through `vote_max`.
    pub fn flush(&self, txn: &StoreTransaction<'_>) -> DbResult<()> {
        let cached: Vec<Vote> = self.vote_cache.lock().values().cloned().collect();
        for vote in cached {
            self.vote_max(txn, vote)?;
        }
        Ok(())
    }

    /// Highest stored vote per account.
    pub fn vote_begin<'a>(
        &self,
        txn: &'a StoreTransaction<'_>,
    ) -> DbResult<crate::iterator::VoteIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_start(self.cf(tables::VOTE)?),
            tables::VOTE,
            decode_vote_row,
        ))
    }

    // ---- meta ----

    pub fn version_get(&self, txn: &StoreTransaction<'_>) -> DbResult<Option<u32>> {
        let key = Buf32::from(1u64);
        let Some(value) = txn.get(self.cf(tables::META)?, key.as_bytes())? else {
            return Ok(None);
        };
        let buf = Buf32::from_slice(&value).ok_or(DbError::Corrupt(tables::META))?;
        Ok(Some(buf.low_u64() as u32))
    }

    pub fn version_put(&self, txn: &StoreTransaction<'_>, version: u32) -> DbResult<()> {
        let key = Buf32::from(1u64);
        let value = Buf32::from(version as u64);
        txn.put(self.cf(tables::META)?, key.as_bytes(), value.as_bytes())
    }

    /// Applies the schema migrations in order up to v11.  Each step is
    /// idempotent on stores that already carry its shape.
    pub fn do_upgrades(&self, txn: &StoreTransaction<'_>) -> DbResult<()> {
        migrations::do_upgrades(self, txn)
    }
}

fn unchecked_key(dependency: &BlockHash, block_hash: &BlockHash) -> [u8; 64] {
    let mut key = [0; 64];
    key[..32].copy_from_slice(dependency.as_bytes());
    key[32..].copy_from_slice(block_hash.as_bytes());
    key
}

fn checksum_key(prefix: u64, mask: u8) -> [u8; 9] {
    let mut key = [0; 9];
    // Only the high 56 bits of the prefix address the grid.
    key[..8].copy_from_slice(&(prefix & 0xffff_ffff_ffff_ff00).to_be_bytes());
    key[8] = mask;
    key
}

fn decode_unchecked(value: &[u8]) -> DbResult<Block> {
    let tag = *value.first().ok_or(DbError::Corrupt(tables::UNCHECKED))?;
    let block_type = BlockType::try_from(tag).map_err(|_| DbError::Corrupt(tables::UNCHECKED))?;
    Block::from_bytes(block_type, &value[1..]).map_err(|_| DbError::Corrupt(tables::UNCHECKED))
}

pub(crate) fn decode_vote(value: &[u8]) -> DbResult<Vote> {
    let tag = *value.first().ok_or(DbError::Corrupt(tables::VOTE))?;
    let block_type = BlockType::try_from(tag).map_err(|_| DbError::Corrupt(tables::VOTE))?;
    Vote::from_bytes(block_type, &value[1..]).map_err(|_| DbError::Corrupt(tables::VOTE))
}

fn decode_vote_row(key: &[u8], value: &[u8]) -> Option<(Account, Vote)> {
    Some((Buf32::from_slice(key)?, decode_vote(value).ok()?))
}

fn decode_unchecked_row(key: &[u8], value: &[u8]) -> Option<(BlockHash, Block)> {
    let dependency = Buf32::from_slice(key.get(..32)?)?;
    Some((dependency, decode_unchecked(value).ok()?))
}
