//! Schema migrations, v1 through v11.
//!
//! Upgrades run inside the caller's write transaction so a failed step
//! leaves the store at its previous version.  Every step is idempotent on a
//! store that already carries the target shape; the v11 layouts defined in
//! `weave-state` are authoritative and missing legacy fields are
//! synthesized by walking the chains that are present.

use tracing::*;

use weave_db::{tables, DbResult, SCHEMA_VERSION};
use weave_primitives::{Amount, BlockHash, Buf32};
use weave_state::{AccountInfo, Block, BlockInfo, PendingInfo, PendingKey};

use crate::block_store::{BlockStore, BLOCK_INFO_INTERVAL};
use crate::transaction::StoreTransaction;

pub(crate) fn do_upgrades(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let mut version = store.version_get(txn)?.unwrap_or(1);
    while version < SCHEMA_VERSION {
        debug!(from = version, "applying store migration");
        match version {
            1 => upgrade_v1_to_v2(store, txn)?,
            2 => upgrade_v2_to_v3(store, txn)?,
            3 => upgrade_v3_to_v4(store, txn)?,
            4 => upgrade_v4_to_v5(store, txn)?,
            5 => upgrade_v5_to_v6(store, txn)?,
            6 => upgrade_v6_to_v7(store, txn)?,
            7 => upgrade_v7_to_v8(store, txn)?,
            8 => upgrade_v8_to_v9(store, txn)?,
            9 => upgrade_v9_to_v10(store, txn)?,
            10 => upgrade_v10_to_v11(store, txn)?,
            _ => unreachable!("version checked against SCHEMA_VERSION"),
        }
        version += 1;
        store.version_put(txn, version)?;
    }
    Ok(())
}

fn raw_rows(
    store: &BlockStore,
    txn: &StoreTransaction<'_>,
    table: &'static str,
) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let cf = store.cf(table)?;
    txn.iter_start(cf)
        .map(|item| {
            item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(Into::into)
        })
        .collect()
}

/// v1 account rows were `head || balance || modified` with no open block or
/// count.  Walk each chain backward to synthesize both.
fn upgrade_v1_to_v2(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    for (key, value) in raw_rows(store, txn, tables::ACCOUNTS)? {
        if value.len() != 56 {
            continue;
        }
        let Some(account) = Buf32::from_slice(&key) else {
            continue;
        };
        let head = Buf32::from_slice(&value[..32]).expect("32 bytes");
        let balance = Amount::from_be_bytes(value[32..48].try_into().expect("16 bytes"));
        let modified = u64::from_be_bytes(value[48..56].try_into().expect("8 bytes"));
        let (open_block, block_count) = walk_to_open(store, txn, &head)?;
        let info = AccountInfo::new(head, open_block, balance, modified, block_count);
        store.account_put(txn, &account, &info)?;
    }
    Ok(())
}

fn walk_to_open(
    store: &BlockStore,
    txn: &StoreTransaction<'_>,
    head: &BlockHash,
) -> DbResult<(BlockHash, u64)> {
    let mut hash = *head;
    let mut count = 0u64;
    loop {
        let Some(block) = store.block_get(txn, &hash)? else {
            // Chain is truncated; report what we could see.
            return Ok((hash, count));
        };
        count += 1;
        let previous = block.previous();
        if previous.is_zero() {
            return Ok((hash, count));
        }
        hash = previous;
    }
}

/// Rebuild the checksum grid from the frontier set.
fn upgrade_v2_to_v3(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let mut sum = Buf32::zero();
    let frontiers: Vec<_> = store
        .frontier_begin(txn)?
        .collect::<DbResult<Vec<_>>>()?;
    for (head, _) in frontiers {
        sum ^= head;
    }
    store.checksum_put(txn, 0, 0, &sum)
}

/// v3 pending rows were keyed by send hash alone, with the destination in
/// the value.  Re-key them under `(destination, send_hash)`.
fn upgrade_v3_to_v4(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let cf = store.cf(tables::PENDING)?;
    for (key, value) in raw_rows(store, txn, tables::PENDING)? {
        if key.len() != 32 || value.len() != 80 {
            continue;
        }
        let send_hash = Buf32::from_slice(&key).expect("32 bytes");
        let destination = Buf32::from_slice(&value[..32]).expect("32 bytes");
        let source = Buf32::from_slice(&value[32..64]).expect("32 bytes");
        let amount = Amount::from_be_bytes(value[64..80].try_into().expect("16 bytes"));
        txn.delete(cf, &key)?;
        store.pending_put(
            txn,
            &PendingKey::new(destination, send_hash),
            &PendingInfo::new(source, amount),
        )?;
    }
    Ok(())
}

/// Backfill the successor slots older stores never wrote.
fn upgrade_v4_to_v5(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let accounts: Vec<_> = store.latest_begin(txn)?.collect::<DbResult<Vec<_>>>()?;
    for (_, info) in accounts {
        let mut hash = info.head;
        let mut successor = BlockHash::zero();
        while !hash.is_zero() {
            let Some(block) = store.block_get(txn, &hash)? else {
                break;
            };
            if !successor.is_zero() && store.block_successor(txn, &hash)?.is_zero() {
                // Re-put patches the slot without touching the body.
                store.block_put(txn, &hash, &block, successor)?;
            }
            successor = hash;
            hash = block.previous();
        }
    }
    Ok(())
}

/// Recount `block_count` from the chains themselves.
fn upgrade_v5_to_v6(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let accounts: Vec<_> = store.latest_begin(txn)?.collect::<DbResult<Vec<_>>>()?;
    for (account, mut info) in accounts {
        let (_, counted) = walk_to_open(store, txn, &info.head)?;
        if info.block_count != counted {
            info.block_count = counted;
            store.account_put(txn, &account, &info)?;
        }
    }
    Ok(())
}

/// Unchecked cache format change; parked blocks are refetched by bootstrap.
fn upgrade_v6_to_v7(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    store.unchecked_clear(txn)
}

/// Unchecked keys gained the block-hash suffix for multi-value semantics.
fn upgrade_v7_to_v8(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    store.unchecked_clear(txn)
}

/// Drop vote rows written by builds with the shorter vote layout.
fn upgrade_v8_to_v9(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let cf = store.cf(tables::VOTE)?;
    for (key, value) in raw_rows(store, txn, tables::VOTE)? {
        if crate::block_store::decode_vote(&value).is_err() {
            txn.delete(cf, &key)?;
        }
    }
    Ok(())
}

/// Seed the block info cache for long chains so balance walks stay short.
/// Only blocks carrying an explicit balance get a row.
fn upgrade_v9_to_v10(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    let accounts: Vec<_> = store.latest_begin(txn)?.collect::<DbResult<Vec<_>>>()?;
    for (account, info) in accounts {
        if info.block_count <= BLOCK_INFO_INTERVAL {
            continue;
        }
        let mut hash = info.head;
        let mut depth = info.block_count;
        while !hash.is_zero() {
            let Some(block) = store.block_get(txn, &hash)? else {
                break;
            };
            if depth % BLOCK_INFO_INTERVAL == 0 && !store.block_info_exists(txn, &hash)? {
                let balance = match &block {
                    Block::Send(b) => Some(b.balance),
                    Block::State(b) => Some(b.balance),
                    Block::Tx(tx) => Some(tx.balance),
                    _ => None,
                };
                if let Some(balance) = balance {
                    store.block_info_put(txn, &hash, &BlockInfo::new(account, balance))?;
                }
            }
            depth = depth.saturating_sub(1);
            hash = block.previous();
        }
    }
    Ok(())
}

/// v10 account rows still carried the representative block column; v11
/// drops it.
fn upgrade_v10_to_v11(store: &BlockStore, txn: &StoreTransaction<'_>) -> DbResult<()> {
    for (key, value) in raw_rows(store, txn, tables::ACCOUNTS)? {
        if value.len() != 128 {
            continue;
        }
        let Some(account) = Buf32::from_slice(&key) else {
            continue;
        };
        // head(32) || rep_block(32) || open(32) || balance(16) || modified(8)
        // || count(8), with the rep column excised.
        let mut v11 = Vec::with_capacity(AccountInfo::SIZE);
        v11.extend_from_slice(&value[..32]);
        v11.extend_from_slice(&value[64..]);
        let info = AccountInfo::from_bytes(&v11)
            .map_err(|_| weave_db::DbError::Corrupt(tables::ACCOUNTS))?;
        store.account_put(txn, &account, &info)?;
    }
    Ok(())
}
