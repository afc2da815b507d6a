//! Wallet boundary: key custody, signing, precomputed work and block
//! assembly.  Private material never leaves this crate; the node receives
//! fully-formed signed blocks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::*;

use weave_db::DbError;
use weave_ledger::Ledger;
use weave_primitives::crypto::{deterministic_key, derive_public, sign_message, RawKey};
use weave_primitives::work::WorkPool;
use weave_primitives::{Account, Amount, BlockHash, Buf32, Signature};
use weave_state::{Block, ChangeBlock, OpenBlock, PendingKey, ReceiveBlock, SendBlock};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("account not held by this wallet")]
    AccountNotFound,

    #[error("account has no chain yet")]
    AccountNotOpened,

    #[error("balance too low")]
    InsufficientBalance,

    #[error("nothing pending for account")]
    NothingPending,

    #[error("work generation cancelled")]
    WorkCancelled,

    #[error(transparent)]
    Store(#[from] DbError),
}

struct KeyStore {
    seed: RawKey,
    next_index: u32,
    keys: HashMap<Account, RawKey>,
}

/// Signs outgoing blocks and keeps precomputed work per account frontier.
pub struct Wallet {
    keys: Mutex<KeyStore>,
    work_pool: Arc<WorkPool>,
    /// root -> nonce, filled ahead of time per account head.  Shared with
    /// pool callbacks, which outlive any borrow of the wallet.
    work_cache: Arc<Mutex<HashMap<Buf32, u64>>>,
}

impl Wallet {
    pub fn new(seed: RawKey, work_pool: Arc<WorkPool>) -> Self {
        Self {
            keys: Mutex::new(KeyStore {
                seed,
                next_index: 0,
                keys: HashMap::new(),
            }),
            work_pool,
            work_cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Derives the next seed-indexed account.
    pub fn deterministic_insert(&self) -> Account {
        let mut keys = self.keys.lock();
        let raw = deterministic_key(&keys.seed.0, keys.next_index);
        keys.next_index += 1;
        let account = derive_public(&raw);
        keys.keys.insert(account, raw);
        account
    }

    /// Adds an ad-hoc private key.
    pub fn insert_adhoc(&self, raw: RawKey) -> Account {
        let account = derive_public(&raw);
        self.keys.lock().keys.insert(account, raw);
        account
    }

    pub fn contains(&self, account: &Account) -> bool {
        self.keys.lock().keys.contains_key(account)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.keys.lock().keys.keys().copied().collect()
    }

    /// Signs a digest for a held account.
    pub fn sign(&self, account: &Account, hash: &Buf32) -> Result<Signature, WalletError> {
        let keys = self.keys.lock();
        let raw = keys.keys.get(account).ok_or(WalletError::AccountNotFound)?;
        Ok(sign_message(raw, account, hash))
    }

    /// Queues work generation for a root so the next block is instant.
    pub fn precompute_work(&self, root: Buf32) {
        if self.work_cache.lock().contains_key(&root) {
            return;
        }
        let cache = self.work_cache.clone();
        self.work_pool.generate_async(root, move |work| {
            if let Some(work) = work {
                cache.lock().insert(root, work);
            }
        });
    }

    /// Takes cached work for a root or grinds it on the spot.
    pub fn work_fetch(&self, root: &Buf32) -> Result<u64, WalletError> {
        if let Some(work) = self.work_cache.lock().remove(root) {
            return Ok(work);
        }
        self.work_pool
            .generate(*root)
            .ok_or(WalletError::WorkCancelled)
    }

    /// Builds a signed send moving `amount` from `account` to
    /// `destination`.
    pub fn create_send(
        &self,
        ledger: &Ledger,
        account: &Account,
        destination: &Account,
        amount: Amount,
    ) -> Result<Block, WalletError> {
        let (raw, info) = self.account_head(ledger, account)?;
        let balance = info.1;
        if balance < amount {
            return Err(WalletError::InsufficientBalance);
        }
        let head = info.0;
        let work = self.work_fetch(&head)?;
        let block = Block::Send(SendBlock::new(
            head,
            *destination,
            Amount(balance.number() - amount.number()),
            &raw,
            account,
            work,
        ));
        self.precompute_work(block.hash());
        debug!(account = %account, amount = %amount, "send built");
        Ok(block)
    }

    /// Builds a signed receive (or open) for the oldest pending send.
    pub fn create_receive(
        &self,
        ledger: &Ledger,
        account: &Account,
        source: &BlockHash,
    ) -> Result<Block, WalletError> {
        let raw = {
            let keys = self.keys.lock();
            keys.keys
                .get(account)
                .cloned()
                .ok_or(WalletError::AccountNotFound)?
        };
        let txn = ledger.store().tx_begin_read();
        if !ledger
            .store()
            .pending_exists(&txn, &PendingKey::new(*account, *source))?
        {
            return Err(WalletError::NothingPending);
        }
        let block = match ledger.latest(&txn, account)? {
            Some(head) => {
                let work = self.work_fetch(&head)?;
                Block::Receive(ReceiveBlock::new(head, *source, &raw, account, work))
            }
            None => {
                let work = self.work_fetch(account)?;
                Block::Open(OpenBlock::new(*source, *account, &raw, account, work))
            }
        };
        self.precompute_work(block.hash());
        Ok(block)
    }

    /// Pending sends addressed to any account this wallet holds.
    pub fn search_pending(&self, ledger: &Ledger) -> Result<Vec<PendingKey>, WalletError> {
        let accounts = self.accounts();
        let txn = ledger.store().tx_begin_read();
        let mut found = Vec::new();
        for account in accounts {
            let start = PendingKey::new(account, BlockHash::zero());
            for item in ledger.store().pending_begin(&txn, &start)? {
                let (key, _) = item?;
                if key.destination != account {
                    break;
                }
                found.push(key);
            }
        }
        Ok(found)
    }

    /// Builds one receive per account for the oldest pending send each.
    /// Apply the batch and call again until it comes back empty; chained
    /// receives need the fresh frontier.
    pub fn receive_all(&self, ledger: &Ledger) -> Result<Vec<Block>, WalletError> {
        let mut built = Vec::new();
        let mut covered: Vec<Account> = Vec::new();
        for key in self.search_pending(ledger)? {
            if covered.contains(&key.destination) {
                continue;
            }
            match self.create_receive(ledger, &key.destination, &key.send_hash) {
                Ok(block) => {
                    covered.push(key.destination);
                    built.push(block);
                }
                // Raced with another receive; skip it.
                Err(WalletError::NothingPending) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(built)
    }

    /// Builds a signed bare chain extension.
    pub fn create_change(&self, ledger: &Ledger, account: &Account) -> Result<Block, WalletError> {
        let (raw, (head, _)) = self.account_head(ledger, account)?;
        let work = self.work_fetch(&head)?;
        let block = Block::Change(ChangeBlock::new(head, &raw, account, work));
        self.precompute_work(block.hash());
        Ok(block)
    }

    fn account_head(
        &self,
        ledger: &Ledger,
        account: &Account,
    ) -> Result<(RawKey, (BlockHash, Amount)), WalletError> {
        let raw = {
            let keys = self.keys.lock();
            keys.keys
                .get(account)
                .cloned()
                .ok_or(WalletError::AccountNotFound)?
        };
        let txn = ledger.store().tx_begin_read();
        let head = ledger
            .latest(&txn, account)?
            .ok_or(WalletError::AccountNotOpened)?;
        let balance = ledger.account_balance(&txn, account)?;
        Ok((raw, (head, balance)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_ledger::genesis::initialize;
    use weave_primitives::params::Network;
    use weave_primitives::work::{work_validate, WORK_THRESHOLD_TEST};
    use weave_state::genesis::{genesis_amount, test_genesis_key, Genesis};
    use weave_store::test_utils::get_test_store;

    fn setup() -> (tempfile::TempDir, Arc<Ledger>, Genesis, Wallet) {
        let (dir, store) = get_test_store();
        let ledger = Arc::new(Ledger::new(store));
        let genesis = Genesis::new(Network::Test);
        let txn = ledger.store().tx_begin_write();
        initialize(&ledger, &txn, &genesis).unwrap();
        txn.commit().unwrap();
        let pool = Arc::new(WorkPool::new(2, WORK_THRESHOLD_TEST));
        let wallet = Wallet::new(RawKey(Buf32::from(0x5eedu64)), pool);
        (dir, ledger, genesis, wallet)
    }

    #[test]
    fn test_deterministic_accounts_are_stable() {
        let pool = Arc::new(WorkPool::new(1, WORK_THRESHOLD_TEST));
        let a = Wallet::new(RawKey(Buf32::from(1u64)), pool.clone());
        let b = Wallet::new(RawKey(Buf32::from(1u64)), pool);
        assert_eq!(a.deterministic_insert(), b.deterministic_insert());
        assert_eq!(a.deterministic_insert(), b.deterministic_insert());
        assert_ne!(a.accounts()[0], Buf32::zero());
    }

    #[test]
    fn test_send_receive_through_wallet() {
        let (_dir, ledger, genesis, wallet) = setup();
        let gkey = test_genesis_key();
        wallet.insert_adhoc(gkey.raw.clone());
        let receiver = wallet.deterministic_insert();

        let send = wallet
            .create_send(&ledger, &genesis.account, &receiver, Amount(250))
            .unwrap();
        assert!(work_validate(
            &send.root(),
            send.work(),
            WORK_THRESHOLD_TEST
        ));
        {
            let txn = ledger.store().tx_begin_write();
            assert!(ledger.process(&txn, &send).unwrap().code.is_progress());
            txn.commit().unwrap();
        }

        let open = wallet
            .create_receive(&ledger, &receiver, &send.hash())
            .unwrap();
        assert!(matches!(open, Block::Open(_)));
        {
            let txn = ledger.store().tx_begin_write();
            assert!(ledger.process(&txn, &open).unwrap().code.is_progress());
            txn.commit().unwrap();
        }

        let txn = ledger.store().tx_begin_read();
        assert_eq!(
            ledger.account_balance(&txn, &receiver).unwrap(),
            Amount(250)
        );
        assert_eq!(
            ledger.account_balance(&txn, &genesis.account).unwrap(),
            Amount(genesis_amount().number() - 250)
        );
    }

    #[test]
    fn test_errors_for_unknown_and_poor_accounts() {
        let (_dir, ledger, genesis, wallet) = setup();
        let stranger = Buf32::from(9u64);
        assert!(matches!(
            wallet.create_send(&ledger, &stranger, &genesis.account, Amount(1)),
            Err(WalletError::AccountNotFound)
        ));

        let gkey = test_genesis_key();
        wallet.insert_adhoc(gkey.raw.clone());
        assert!(matches!(
            wallet.create_send(&ledger, &genesis.account, &stranger, Amount::max()),
            Err(WalletError::InsufficientBalance)
        ));
        // max == balance is spendable down to zero.
        assert!(wallet
            .create_send(&ledger, &genesis.account, &stranger, genesis_amount())
            .is_ok());
    }

    #[test]
    fn test_receive_requires_pending() {
        let (_dir, ledger, _genesis, wallet) = setup();
        let receiver = wallet.deterministic_insert();
        assert!(matches!(
            wallet.create_receive(&ledger, &receiver, &Buf32::from(1u64)),
            Err(WalletError::NothingPending)
        ));
    }

    #[test]
    fn test_receive_all_drains_pending() {
        let (_dir, ledger, genesis, wallet) = setup();
        let gkey = test_genesis_key();
        wallet.insert_adhoc(gkey.raw.clone());
        let r1 = wallet.deterministic_insert();
        let r2 = wallet.deterministic_insert();

        for (receiver, amount) in [(r1, 10u128), (r2, 20u128)] {
            let send = wallet
                .create_send(&ledger, &genesis.account, &receiver, Amount(amount))
                .unwrap();
            let txn = ledger.store().tx_begin_write();
            assert!(ledger.process(&txn, &send).unwrap().code.is_progress());
            txn.commit().unwrap();
        }
        assert_eq!(wallet.search_pending(&ledger).unwrap().len(), 2);

        // Apply batches until the wallet reports nothing pending.
        loop {
            let batch = wallet.receive_all(&ledger).unwrap();
            if batch.is_empty() {
                break;
            }
            let txn = ledger.store().tx_begin_write();
            for block in batch {
                assert!(ledger.process(&txn, &block).unwrap().code.is_progress());
            }
            txn.commit().unwrap();
        }
        let txn = ledger.store().tx_begin_read();
        assert_eq!(ledger.account_balance(&txn, &r1).unwrap(), Amount(10));
        assert_eq!(ledger.account_balance(&txn, &r2).unwrap(), Amount(20));
        assert!(wallet.search_pending(&ledger).unwrap().is_empty());
    }

    #[test]
    fn test_precomputed_work_is_used() {
        let (_dir, _ledger, _genesis, wallet) = setup();
        let root = Buf32::from(77u64);
        wallet.precompute_work(root);
        // The fetch drains either the cache or the pool, both valid.
        let work = wallet.work_fetch(&root).unwrap();
        assert!(work_validate(&root, work, WORK_THRESHOLD_TEST));
    }
}
