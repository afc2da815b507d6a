//! Block validation and application.
//!
//! Each variant walks the same gauntlet: existence, predecessor
//! continuity, position rule, signature, balance arithmetic, pending
//! lookup, then the atomic apply.  The first failing step decides the
//! returned code; store I/O failures surface as errors and abort the
//! enclosing transaction.

use weave_db::DbResult;
use weave_primitives::crypto::validate_message;
use weave_primitives::{Account, Amount};
use weave_state::genesis::burn_account;
use weave_state::{
    AccountInfo, Block, ChangeBlock, OpenBlock, PendingInfo, PendingKey, ReceiveBlock, SendBlock,
    StateBlock, Tx, TxKind,
};
use weave_store::StoreTransaction;

use crate::ledger::Ledger;
use crate::result::{ProcessResult, ProcessReturn};

/// Continuity lookup outcome for blocks extending an existing chain.
enum Continuity {
    Ok(Account, AccountInfo, Block),
    Reject(ProcessResult),
}

impl Ledger {
    /// Validates and applies one block under the given write transaction.
    pub fn process(&self, txn: &StoreTransaction<'_>, block: &Block) -> DbResult<ProcessReturn> {
        if self.store().block_exists(txn, &block.hash())? {
            return Ok(ProcessReturn::reject(ProcessResult::Old));
        }
        match block {
            Block::Send(b) => self.process_send(txn, block, b),
            Block::Receive(b) => self.process_receive(txn, block, b),
            Block::Open(b) => self.process_open(txn, block, b),
            Block::Change(b) => self.process_change(txn, block, b),
            Block::State(b) => self.process_state(txn, block, b),
            Block::Tx(t) => self.process_tx(txn, block, t),
        }
    }

    /// Resolves the chain a non-first block claims to extend.  `previous`
    /// must be stored and still be the frontier of its account.
    fn continuity(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
    ) -> DbResult<Continuity> {
        let previous = block.previous();
        let Some(prev_block) = self.store().block_get(txn, &previous)? else {
            return Ok(Continuity::Reject(ProcessResult::GapPrevious));
        };
        if !block.valid_predecessor(&prev_block) {
            return Ok(Continuity::Reject(ProcessResult::BlockPosition));
        }
        let Some(account) = self.store().frontier_get(txn, &previous)? else {
            // Previous exists but already has a successor.
            return Ok(Continuity::Reject(ProcessResult::Fork));
        };
        let Some(info) = self.store().account_get(txn, &account)? else {
            return Ok(Continuity::Reject(ProcessResult::GapPrevious));
        };
        Ok(Continuity::Ok(account, info, prev_block))
    }

    fn process_send(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
        b: &SendBlock,
    ) -> DbResult<ProcessReturn> {
        let hash = block.hash();
        let (account, info) = match self.continuity(txn, block)? {
            Continuity::Ok(account, info, _) => (account, info),
            Continuity::Reject(code) => return Ok(ProcessReturn::reject(code)),
        };
        if !validate_message(&account, &hash, &b.signature) {
            return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
        }
        if b.balance > info.balance {
            return Ok(ProcessReturn::reject(ProcessResult::NegativeSpend));
        }
        let amount = Amount(info.balance.number() - b.balance.number());

        self.store().block_put(txn, &hash, block, Default::default())?;
        self.change_latest(txn, &account, hash, b.balance, info.block_count + 1)?;
        self.store().pending_put(
            txn,
            &PendingKey::new(b.destination, hash),
            &PendingInfo::new(account, amount),
        )?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account,
            amount,
            pending_account: b.destination,
            state_is_send: None,
        })
    }

    fn process_receive(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
        b: &ReceiveBlock,
    ) -> DbResult<ProcessReturn> {
        let hash = block.hash();
        let (account, info) = match self.continuity(txn, block)? {
            Continuity::Ok(account, info, _) => (account, info),
            Continuity::Reject(code) => return Ok(ProcessReturn::reject(code)),
        };
        if !validate_message(&account, &hash, &b.signature) {
            return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
        }
        if !self.store().block_exists(txn, &b.source)? {
            return Ok(ProcessReturn::reject(ProcessResult::GapSource));
        }
        let pending_key = PendingKey::new(account, b.source);
        let Some(pending) = self.store().pending_get(txn, &pending_key)? else {
            return Ok(ProcessReturn::reject(ProcessResult::Unreceivable));
        };
        let new_balance = Amount(info.balance.number() + pending.amount.number());

        self.store().block_put(txn, &hash, block, Default::default())?;
        self.store().pending_del(txn, &pending_key)?;
        self.change_latest(txn, &account, hash, new_balance, info.block_count + 1)?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account,
            amount: pending.amount,
            pending_account: Account::zero(),
            state_is_send: None,
        })
    }

    fn process_open(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
        b: &OpenBlock,
    ) -> DbResult<ProcessReturn> {
        let hash = block.hash();
        if b.account == burn_account() {
            return Ok(ProcessReturn::reject(ProcessResult::OpenedBurnAccount));
        }
        if self.store().account_exists(txn, &b.account)? {
            // The account root is already taken by another open.
            return Ok(ProcessReturn::reject(ProcessResult::Fork));
        }
        if !validate_message(&b.account, &hash, &b.signature) {
            return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
        }
        if !self.store().block_exists(txn, &b.source)? {
            return Ok(ProcessReturn::reject(ProcessResult::GapSource));
        }
        let pending_key = PendingKey::new(b.account, b.source);
        let Some(pending) = self.store().pending_get(txn, &pending_key)? else {
            return Ok(ProcessReturn::reject(ProcessResult::Unreceivable));
        };

        self.store().block_put(txn, &hash, block, Default::default())?;
        self.store().pending_del(txn, &pending_key)?;
        self.change_latest(txn, &b.account, hash, pending.amount, 1)?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account: b.account,
            amount: pending.amount,
            pending_account: Account::zero(),
            state_is_send: None,
        })
    }

    fn process_change(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
        b: &ChangeBlock,
    ) -> DbResult<ProcessReturn> {
        let hash = block.hash();
        let (account, info) = match self.continuity(txn, block)? {
            Continuity::Ok(account, info, _) => (account, info),
            Continuity::Reject(code) => return Ok(ProcessReturn::reject(code)),
        };
        if !validate_message(&account, &hash, &b.signature) {
            return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
        }
        self.store().block_put(txn, &hash, block, Default::default())?;
        self.change_latest(txn, &account, hash, info.balance, info.block_count + 1)?;
        Ok(ProcessReturn {
            code: ProcessResult::Progress,
            account,
            amount: Amount::zero(),
            pending_account: Account::zero(),
            state_is_send: None,
        })
    }

    fn process_state(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
        b: &StateBlock,
    ) -> DbResult<ProcessReturn> {
        let hash = block.hash();
        if b.previous.is_zero() {
            // First block of the account; must receive.
            if b.account == burn_account() {
                return Ok(ProcessReturn::reject(ProcessResult::OpenedBurnAccount));
            }
            if self.store().account_exists(txn, &b.account)? {
                return Ok(ProcessReturn::reject(ProcessResult::Fork));
            }
            if !validate_message(&b.account, &hash, &b.signature) {
                return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
            }
            if b.link.is_zero() || !self.store().block_exists(txn, &b.link)? {
                return Ok(ProcessReturn::reject(ProcessResult::GapSource));
            }
            let pending_key = PendingKey::new(b.account, b.link);
            let Some(pending) = self.store().pending_get(txn, &pending_key)? else {
                return Ok(ProcessReturn::reject(ProcessResult::Unreceivable));
            };
            if b.balance != pending.amount {
                return Ok(ProcessReturn::reject(ProcessResult::BalanceMismatch));
            }
            self.store().block_put(txn, &hash, block, Default::default())?;
            self.store().pending_del(txn, &pending_key)?;
            self.change_latest(txn, &b.account, hash, b.balance, 1)?;
            return Ok(ProcessReturn {
                code: ProcessResult::Progress,
                account: b.account,
                amount: pending.amount,
                pending_account: Account::zero(),
                state_is_send: Some(false),
            });
        }

        let Some(_prev_block) = self.store().block_get(txn, &b.previous)? else {
            return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
        };
        let Some(info) = self.store().account_get(txn, &b.account)? else {
            return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
        };
        if info.head != b.previous {
            return Ok(ProcessReturn::reject(ProcessResult::Fork));
        }
        if !validate_message(&b.account, &hash, &b.signature) {
            return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
        }

        if b.balance < info.balance {
            // Send: link names the destination.
            let amount = Amount(info.balance.number() - b.balance.number());
            self.store().block_put(txn, &hash, block, Default::default())?;
            self.change_latest(txn, &b.account, hash, b.balance, info.block_count + 1)?;
            self.store().pending_put(
                txn,
                &PendingKey::new(b.link, hash),
                &PendingInfo::new(b.account, amount),
            )?;
            Ok(ProcessReturn {
                code: ProcessResult::Progress,
                account: b.account,
                amount,
                pending_account: b.link,
                state_is_send: Some(true),
            })
        } else if b.balance > info.balance {
            // Receive: link names the source send.
            if b.link.is_zero() || !self.store().block_exists(txn, &b.link)? {
                return Ok(ProcessReturn::reject(ProcessResult::GapSource));
            }
            let pending_key = PendingKey::new(b.account, b.link);
            let Some(pending) = self.store().pending_get(txn, &pending_key)? else {
                return Ok(ProcessReturn::reject(ProcessResult::Unreceivable));
            };
            let delta = Amount(b.balance.number() - info.balance.number());
            if delta != pending.amount {
                return Ok(ProcessReturn::reject(ProcessResult::BalanceMismatch));
            }
            self.store().block_put(txn, &hash, block, Default::default())?;
            self.store().pending_del(txn, &pending_key)?;
            self.change_latest(txn, &b.account, hash, b.balance, info.block_count + 1)?;
            Ok(ProcessReturn {
                code: ProcessResult::Progress,
                account: b.account,
                amount: delta,
                pending_account: Account::zero(),
                state_is_send: Some(false),
            })
        } else {
            // Balance unchanged; bare chain extension.
            self.store().block_put(txn, &hash, block, Default::default())?;
            self.change_latest(txn, &b.account, hash, b.balance, info.block_count + 1)?;
            Ok(ProcessReturn {
                code: ProcessResult::Progress,
                account: b.account,
                amount: Amount::zero(),
                pending_account: Account::zero(),
                state_is_send: Some(false),
            })
        }
    }

    fn process_tx(
        &self,
        txn: &StoreTransaction<'_>,
        block: &Block,
        t: &Tx,
    ) -> DbResult<ProcessReturn> {
        let hash = block.hash();
        match t.kind() {
            TxKind::NotABlock => Ok(ProcessReturn::reject(ProcessResult::BlockPosition)),
            TxKind::Send => {
                if t.previous.is_zero() {
                    // An account cannot start with a send.
                    return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
                }
                if self.store().block_get(txn, &t.previous)?.is_none() {
                    return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
                }
                let Some(info) = self.store().account_get(txn, &t.account)? else {
                    return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
                };
                if info.head != t.previous {
                    return Ok(ProcessReturn::reject(ProcessResult::Fork));
                }
                if !validate_message(&t.account, &hash, &t.signature) {
                    return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
                }
                if t.balance > info.balance {
                    return Ok(ProcessReturn::reject(ProcessResult::NegativeSpend));
                }
                let amount = Amount(info.balance.number() - t.balance.number());
                self.store().block_put(txn, &hash, block, Default::default())?;
                self.change_latest(txn, &t.account, hash, t.balance, info.block_count + 1)?;
                self.store().pending_put(
                    txn,
                    &PendingKey::new(t.destination, hash),
                    &PendingInfo::new(t.account, amount),
                )?;
                Ok(ProcessReturn {
                    code: ProcessResult::Progress,
                    account: t.account,
                    amount,
                    pending_account: t.destination,
                    state_is_send: Some(true),
                })
            }
            TxKind::Receive => {
                if t.previous.is_zero() {
                    if t.account == burn_account() {
                        return Ok(ProcessReturn::reject(ProcessResult::OpenedBurnAccount));
                    }
                    if self.store().account_exists(txn, &t.account)? {
                        return Ok(ProcessReturn::reject(ProcessResult::Fork));
                    }
                    if !validate_message(&t.account, &hash, &t.signature) {
                        return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
                    }
                    if !self.store().block_exists(txn, &t.source)? {
                        return Ok(ProcessReturn::reject(ProcessResult::GapSource));
                    }
                    let pending_key = PendingKey::new(t.account, t.source);
                    let Some(pending) = self.store().pending_get(txn, &pending_key)? else {
                        return Ok(ProcessReturn::reject(ProcessResult::Unreceivable));
                    };
                    if t.balance != pending.amount {
                        return Ok(ProcessReturn::reject(ProcessResult::BalanceMismatch));
                    }
                    self.store().block_put(txn, &hash, block, Default::default())?;
                    self.store().pending_del(txn, &pending_key)?;
                    self.change_latest(txn, &t.account, hash, t.balance, 1)?;
                    return Ok(ProcessReturn {
                        code: ProcessResult::Progress,
                        account: t.account,
                        amount: pending.amount,
                        pending_account: Account::zero(),
                        state_is_send: Some(false),
                    });
                }
                if self.store().block_get(txn, &t.previous)?.is_none() {
                    return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
                }
                let Some(info) = self.store().account_get(txn, &t.account)? else {
                    return Ok(ProcessReturn::reject(ProcessResult::GapPrevious));
                };
                if info.head != t.previous {
                    return Ok(ProcessReturn::reject(ProcessResult::Fork));
                }
                if !validate_message(&t.account, &hash, &t.signature) {
                    return Ok(ProcessReturn::reject(ProcessResult::BadSignature));
                }
                if !self.store().block_exists(txn, &t.source)? {
                    return Ok(ProcessReturn::reject(ProcessResult::GapSource));
                }
                let pending_key = PendingKey::new(t.account, t.source);
                let Some(pending) = self.store().pending_get(txn, &pending_key)? else {
                    return Ok(ProcessReturn::reject(ProcessResult::Unreceivable));
                };
                if t.balance <= info.balance {
                    return Ok(ProcessReturn::reject(ProcessResult::BalanceMismatch));
                }
                let delta = Amount(t.balance.number() - info.balance.number());
                if delta != pending.amount {
                    return Ok(ProcessReturn::reject(ProcessResult::BalanceMismatch));
                }
                self.store().block_put(txn, &hash, block, Default::default())?;
                self.store().pending_del(txn, &pending_key)?;
                self.change_latest(txn, &t.account, hash, t.balance, info.block_count + 1)?;
                Ok(ProcessReturn {
                    code: ProcessResult::Progress,
                    account: t.account,
                    amount: delta,
                    pending_account: Account::zero(),
                    state_is_send: Some(false),
                })
            }
        }
    }
}
