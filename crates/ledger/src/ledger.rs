//! Ledger queries over the block store.
//!
//! Application and rollback live in sibling modules; everything here is a
//! read or a small index maintenance helper shared by them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::*;

use weave_db::{DbError, DbResult};
use weave_primitives::{Account, Amount, BlockHash, Buf32, Checksum};
use weave_state::genesis::genesis_amount;
use weave_state::{AccountInfo, Block, PendingKey, TxKind};
use weave_store::{BlockStore, StoreTransaction};

use crate::votes::Votes;

pub fn seconds_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Account-chain bookkeeping over a [`BlockStore`].
pub struct Ledger {
    store: Arc<BlockStore>,
    /// Heads the epoch pipeline has committed; rollback refuses to cross
    /// them.  Memory-only, rebuilt as epochs commit.
    epoch_confirmed: Mutex<HashSet<BlockHash>>,
}

impl Ledger {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self {
            store,
            epoch_confirmed: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Marks a block as committed by an epoch; rollback will refuse to undo
    /// it.
    pub fn mark_epoch_confirmed(&self, hash: BlockHash) {
        self.epoch_confirmed.lock().insert(hash);
    }

    pub(crate) fn is_epoch_confirmed(&self, hash: &BlockHash) -> bool {
        self.epoch_confirmed.lock().contains(hash)
    }

    pub fn block_exists(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<bool> {
        self.store.block_exists(txn, hash)
    }

    /// Head block of an account's chain, if opened.
    pub fn latest(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<Option<BlockHash>> {
        Ok(self.store.account_get(txn, account)?.map(|i| i.head))
    }

    /// Head block, or the account itself for unopened accounts; the root a
    /// first block would be contested under.
    pub fn latest_root(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<Buf32> {
        Ok(match self.store.account_get(txn, account)? {
            Some(info) => info.head,
            None => *account,
        })
    }

    /// Owning account of a block, by chasing successor links to the
    /// frontier.
    pub fn account(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<Option<Account>> {
        let mut current = *hash;
        if !self.store.block_exists(txn, &current)? {
            return Ok(None);
        }
        loop {
            let successor = self.store.block_successor(txn, &current)?;
            if successor.is_zero() {
                break;
            }
            current = successor;
        }
        self.store.frontier_get(txn, &current)
    }

    /// Block following `hash` in its chain.
    pub fn successor(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<Option<Block>> {
        let successor = self.store.block_successor(txn, hash)?;
        if successor.is_zero() {
            return Ok(None);
        }
        self.store.block_get(txn, &successor)
    }

    /// The block currently holding the root that `block` contests.
    pub fn forked_block(&self, txn: &StoreTransaction<'_>, block: &Block) -> DbResult<Option<Block>> {
        let previous = block.previous();
        if previous.is_zero() {
            // First blocks contest the account itself.
            let account = block.root();
            let Some(info) = self.store.account_get(txn, &account)? else {
                return Ok(None);
            };
            self.store.block_get(txn, &info.open_block)
        } else {
            self.successor(txn, &previous)
        }
    }

    /// Balance as of `hash`, walking the chain backward and stopping at
    /// the first balance-bearing block or cache record.
    pub fn balance(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<Amount> {
        let mut result: u128 = 0;
        let mut current = *hash;
        while !current.is_zero() {
            if let Some(info) = self.store.block_info_get(txn, &current)? {
                result += info.balance.number();
                break;
            }
            let Some(block) = self.store.block_get(txn, &current)? else {
                return Err(DbError::NotFound);
            };
            match block {
                Block::Send(b) => {
                    result += b.balance.number();
                    break;
                }
                Block::State(b) => {
                    result += b.balance.number();
                    break;
                }
                Block::Tx(tx) => {
                    result += tx.balance.number();
                    break;
                }
                Block::Receive(b) => {
                    result += self.amount(txn, &b.source)?.number();
                    current = b.previous;
                }
                Block::Open(b) => {
                    result += self.source_amount(txn, &b.source)?.number();
                    break;
                }
                Block::Change(b) => {
                    current = b.previous;
                }
            }
        }
        Ok(Amount(result))
    }

    /// Balance delta a block moved: `previous − balance` for sends, the
    /// source send's amount for receives and opens.
    pub fn amount(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<Amount> {
        let Some(block) = self.store.block_get(txn, hash)? else {
            return Err(DbError::NotFound);
        };
        match block {
            Block::Send(b) => {
                let previous = self.balance(txn, &b.previous)?;
                Ok(Amount(previous.number() - b.balance.number()))
            }
            Block::Receive(b) => self.amount(txn, &b.source),
            Block::Open(b) => self.source_amount(txn, &b.source),
            Block::Change(_) => Ok(Amount::zero()),
            Block::State(b) => {
                let previous = if b.previous.is_zero() {
                    Amount::zero()
                } else {
                    self.balance(txn, &b.previous)?
                };
                Ok(Amount(previous.number().abs_diff(b.balance.number())))
            }
            Block::Tx(tx) => {
                let previous = if tx.previous.is_zero() {
                    Amount::zero()
                } else {
                    self.balance(txn, &tx.previous)?
                };
                Ok(Amount(previous.number().abs_diff(tx.balance.number())))
            }
        }
    }

    /// Amount delivered by a source block; the genesis open has no real
    /// source, its amount is the whole supply.
    fn source_amount(&self, txn: &StoreTransaction<'_>, source: &BlockHash) -> DbResult<Amount> {
        if self.store.block_exists(txn, source)? {
            self.amount(txn, source)
        } else {
            Ok(genesis_amount())
        }
    }

    pub fn account_balance(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<Amount> {
        Ok(self
            .store
            .account_get(txn, account)?
            .map(|i| i.balance)
            .unwrap_or(Amount::zero()))
    }

    /// Sum of pending amounts addressed to an account.
    pub fn account_pending(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<Amount> {
        let start = PendingKey::new(*account, BlockHash::zero());
        let mut sum: u128 = 0;
        for item in self.store.pending_begin(txn, &start)? {
            let (key, info) = item?;
            if key.destination != *account {
                break;
            }
            sum += info.amount.number();
        }
        Ok(Amount(sum))
    }

    /// Voting weight of an account.  Representatives are not modelled, so
    /// weight is the account's own balance.
    pub fn weight(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<Amount> {
        self.account_balance(txn, account)
    }

    /// Weight-ordered tally of a vote book, heaviest first; ties order by
    /// ascending hash.
    pub fn tally(&self, txn: &StoreTransaction<'_>, votes: &Votes) -> DbResult<Vec<(Amount, Block)>> {
        let mut totals: HashMap<BlockHash, (u128, Block)> = HashMap::new();
        for (rep, block) in &votes.rep_votes {
            let weight = self.weight(txn, rep)?.number();
            let entry = totals
                .entry(block.hash())
                .or_insert_with(|| (0, block.clone()));
            entry.0 += weight;
        }
        let mut out: Vec<(Amount, Block)> = totals
            .into_values()
            .map(|(w, b)| (Amount(w), b))
            .collect();
        out.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.hash().cmp(&b.1.hash())));
        Ok(out)
    }

    /// Heaviest block of a vote book and its weight.
    pub fn winner(&self, txn: &StoreTransaction<'_>, votes: &Votes) -> DbResult<(Amount, Block)> {
        let tally = self.tally(txn, votes)?;
        tally
            .into_iter()
            .next()
            .ok_or_else(|| DbError::Other("empty vote book".into()))
    }

    pub fn is_send(&self, txn: &StoreTransaction<'_>, block: &Block) -> DbResult<bool> {
        Ok(match block {
            Block::Send(_) => true,
            Block::Receive(_) | Block::Open(_) | Block::Change(_) => false,
            Block::State(b) => {
                if b.previous.is_zero() {
                    false
                } else {
                    b.balance < self.balance(txn, &b.previous)?
                }
            }
            Block::Tx(tx) => tx.kind() == TxKind::Send,
        })
    }

    /// Destination account a send-style block credits, zero otherwise.
    pub fn block_destination(&self, txn: &StoreTransaction<'_>, block: &Block) -> DbResult<Account> {
        Ok(match block {
            Block::Send(b) => b.destination,
            Block::State(b) if self.is_send(txn, block)? => b.link,
            Block::Tx(tx) => tx.destination,
            _ => Account::zero(),
        })
    }

    /// Source block a receive-style block consumes, zero otherwise.
    pub fn block_source(&self, txn: &StoreTransaction<'_>, block: &Block) -> DbResult<BlockHash> {
        Ok(match block {
            Block::Receive(b) => b.source,
            Block::Open(b) => b.source,
            Block::State(b) if !self.is_send(txn, block)? => b.link,
            Block::Tx(tx) => tx.source,
            _ => BlockHash::zero(),
        })
    }

    /// Rewrites an account's head records: account info, the frontier pair
    /// and the rolling checksum.  A zero `hash` erases the account.
    pub(crate) fn change_latest(
        &self,
        txn: &StoreTransaction<'_>,
        account: &Account,
        hash: BlockHash,
        balance: Amount,
        block_count: u64,
    ) -> DbResult<()> {
        let existing = self.store.account_get(txn, account)?;
        if let Some(info) = &existing {
            self.store.frontier_del(txn, &info.head)?;
            self.checksum_update(txn, &info.head)?;
        }
        if hash.is_zero() {
            self.store.account_del(txn, account)?;
            return Ok(());
        }
        let open_block = match &existing {
            Some(info) if !info.open_block.is_zero() => info.open_block,
            _ => hash,
        };
        let info = AccountInfo::new(hash, open_block, balance, seconds_since_epoch(), block_count);
        self.store.account_put(txn, account, &info)?;
        self.store.frontier_put(txn, &hash, account)?;
        self.checksum_update(txn, &hash)
    }

    /// XORs a head in or out of the rolling frontier checksum.
    pub fn checksum_update(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<()> {
        let current = self
            .store
            .checksum_get(txn, 0, 0)?
            .unwrap_or_else(Checksum::zero);
        self.store.checksum_put(txn, 0, 0, &(current ^ *hash))
    }

    /// Rolling XOR of all frontier heads.
    pub fn checksum(&self, txn: &StoreTransaction<'_>) -> DbResult<Checksum> {
        Ok(self
            .store
            .checksum_get(txn, 0, 0)?
            .unwrap_or_else(Checksum::zero))
    }

    /// JSON rendering of a stored block, for operator tooling.
    pub fn block_text(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<Option<String>> {
        Ok(self
            .store
            .block_get(txn, hash)?
            .map(|block| block.to_json().to_string()))
    }

    /// Logs an account's chain from the frontier back, for debugging.
    pub fn dump_account_chain(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<()> {
        let mut hash = self.latest(txn, account)?.unwrap_or_else(BlockHash::zero);
        while !hash.is_zero() {
            let Some(block) = self.store.block_get(txn, &hash)? else {
                break;
            };
            debug!(%hash, kind = block.type_name(), "chain entry");
            hash = block.previous();
        }
        Ok(())
    }
}
