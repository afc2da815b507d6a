//! Seeding a fresh ledger with the network's genesis record.

use weave_db::DbResult;
use weave_state::genesis::Genesis;
use weave_state::Block;
use weave_store::StoreTransaction;

use crate::ledger::Ledger;

/// Writes the genesis tx, its frontier, account info and checksum seed.
/// Idempotent on an already-initialized store.
pub fn initialize(ledger: &Ledger, txn: &StoreTransaction<'_>, genesis: &Genesis) -> DbResult<()> {
    let hash = genesis.hash();
    if ledger.store().block_exists(txn, &hash)? {
        return Ok(());
    }
    let block = Block::Tx(genesis.tx.clone());
    ledger
        .store()
        .block_put(txn, &hash, &block, Default::default())?;
    ledger.change_latest(txn, &genesis.account, hash, genesis.tx.balance, 1)
}
