//! Undoing applied blocks.
//!
//! Rollback peels blocks off the owning account's head until the requested
//! block is gone, restoring pending entries for undone sends and cascading
//! into any chain that already received them.

use tracing::*;

use weave_db::{DbError, DbResult};
use weave_primitives::{Account, Amount, BlockHash};
use weave_state::{PendingInfo, PendingKey};
use weave_store::StoreTransaction;

use crate::ledger::Ledger;

impl Ledger {
    /// Undoes the chain back through `hash`.  Fails without touching state
    /// if the span crosses a block committed by an epoch.
    pub fn rollback(&self, txn: &StoreTransaction<'_>, hash: &BlockHash) -> DbResult<()> {
        let Some(account) = self.account(txn, hash)? else {
            return Err(DbError::NotFound);
        };
        // Check the whole span before undoing anything.
        let head = self
            .latest(txn, &account)?
            .ok_or(DbError::NotFound)?;
        let mut cursor = head;
        loop {
            if self.is_epoch_confirmed(&cursor) {
                return Err(DbError::Other(format!(
                    "rollback of {cursor} would cross a committed epoch"
                )));
            }
            if cursor == *hash {
                break;
            }
            let block = self
                .store()
                .block_get(txn, &cursor)?
                .ok_or(DbError::NotFound)?;
            cursor = block.previous();
            if cursor.is_zero() {
                break;
            }
        }

        while self.store().block_exists(txn, hash)? {
            self.rollback_head(txn, &account)?;
        }
        Ok(())
    }

    /// Undoes exactly the head block of `account`.
    fn rollback_head(&self, txn: &StoreTransaction<'_>, account: &Account) -> DbResult<()> {
        let info = self
            .store()
            .account_get(txn, account)?
            .ok_or(DbError::NotFound)?;
        let head = info.head;
        let block = self
            .store()
            .block_get(txn, &head)?
            .ok_or(DbError::NotFound)?;
        trace!(%head, kind = block.type_name(), "rolling back");

        let previous = block.previous();
        let is_send = self.is_send(txn, &block)?;
        if is_send {
            let destination = self.block_destination(txn, &block)?;
            let pending_key = PendingKey::new(destination, head);
            // If the matching receive already landed, unwind it first.
            while !self.store().pending_exists(txn, &pending_key)? {
                let dest_head = self
                    .latest(txn, &destination)?
                    .ok_or_else(|| DbError::Other("consumed send with no receiver chain".into()))?;
                self.rollback(txn, &dest_head)?;
            }
            self.store().pending_del(txn, &pending_key)?;

            let restored = self.balance(txn, &previous)?;
            self.change_latest(txn, account, previous, restored, info.block_count - 1)?;
        } else {
            let source = self.block_source(txn, &block)?;
            if !source.is_zero() {
                // Receive or open: put the consumed pending entry back.
                let amount = self.amount(txn, &head)?;
                let source_account = self
                    .account(txn, &source)?
                    .unwrap_or_else(Account::zero);
                if previous.is_zero() {
                    // Undoing the open erases the account entirely.
                    self.change_latest(txn, account, BlockHash::zero(), Amount::zero(), 0)?;
                } else {
                    let restored = Amount(info.balance.number() - amount.number());
                    self.change_latest(txn, account, previous, restored, info.block_count - 1)?;
                }
                self.store().pending_put(
                    txn,
                    &PendingKey::new(*account, source),
                    &PendingInfo::new(source_account, amount),
                )?;
            } else {
                // Change-style block; balance carries over.
                self.change_latest(txn, account, previous, info.balance, info.block_count - 1)?;
            }
        }

        self.store().block_del(txn, &head)?;
        self.store().block_info_del(txn, &head)?;
        if !previous.is_zero() {
            self.store().block_successor_clear(txn, &previous)?;
        }
        Ok(())
    }
}
