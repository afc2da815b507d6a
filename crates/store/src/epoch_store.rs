//! Durable storage for epoch headers, mirroring the block store's record
//! shape: serialized header plus a trailing 32-byte successor slot.

use std::path::Path;

use rand::RngCore;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, TransactionDB, TransactionDBOptions};

use weave_db::epoch_tables as tables;
use weave_db::{DbError, DbResult, SCHEMA_VERSION};
use weave_primitives::crypto::RawKey;
use weave_primitives::{Buf32, Checksum, EpochHash};
use weave_state::EpochBlock;

use crate::iterator::{EpochIter, TypedIter};
use crate::transaction::StoreTransaction;

/// Manages epoch header storage and iteration.
pub struct EpochStore {
    db: TransactionDB,
}

impl EpochStore {
    pub fn open(path: &Path) -> DbResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let txn_opts = TransactionDBOptions::default();
        let cfs = tables::ALL
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = TransactionDB::open_cf_descriptors(&opts, &txn_opts, path, cfs)?;
        let store = Self { db };

        let txn = store.tx_begin_write();
        if store.version_get(&txn)?.is_none() {
            store.version_put(&txn, SCHEMA_VERSION)?;
        }
        txn.commit()?;
        Ok(store)
    }

    pub fn tx_begin_write(&self) -> StoreTransaction<'_> {
        StoreTransaction::new(&self.db)
    }

    pub fn tx_begin_read(&self) -> StoreTransaction<'_> {
        StoreTransaction::new(&self.db)
    }

    fn cf(&self, name: &'static str) -> DbResult<&ColumnFamily> {
        self.db.cf_handle(name).ok_or(DbError::MissingTable(name))
    }

    /// Writes a header and links it as its predecessor's successor.  A
    /// nonzero `previous` must already be stored.
    pub fn block_put(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &EpochHash,
        epoch: &EpochBlock,
        successor: EpochHash,
    ) -> DbResult<()> {
        if !epoch.previous.is_zero() {
            self.block_successor_set(txn, &epoch.previous, hash)?;
        }
        let mut value = epoch.to_bytes();
        value.extend_from_slice(successor.as_bytes());
        txn.put(self.cf(tables::EPOCH_BLOCKS)?, hash.as_bytes(), &value)
    }

    pub fn block_get(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &EpochHash,
    ) -> DbResult<Option<EpochBlock>> {
        let Some(value) = txn.get(self.cf(tables::EPOCH_BLOCKS)?, hash.as_bytes())? else {
            return Ok(None);
        };
        decode_epoch_body(&value).map(Some)
    }

    pub fn block_del(&self, txn: &StoreTransaction<'_>, hash: &EpochHash) -> DbResult<()> {
        txn.delete(self.cf(tables::EPOCH_BLOCKS)?, hash.as_bytes())
    }

    pub fn block_exists(&self, txn: &StoreTransaction<'_>, hash: &EpochHash) -> DbResult<bool> {
        txn.exists(self.cf(tables::EPOCH_BLOCKS)?, hash.as_bytes())
    }

    /// Successor from the record's trailing slot.  Records too short to
    /// carry one (early-era rows) read as zero rather than erroring.
    pub fn block_successor(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &EpochHash,
    ) -> DbResult<EpochHash> {
        let Some(value) = txn.get(self.cf(tables::EPOCH_BLOCKS)?, hash.as_bytes())? else {
            return Ok(EpochHash::zero());
        };
        match value.len().checked_sub(32) {
            Some(tail) if EpochBlock::from_bytes(&value[..tail]).is_ok() => {
                Ok(Buf32::from_slice(&value[tail..]).expect("32-byte suffix"))
            }
            _ => Ok(EpochHash::zero()),
        }
    }

    pub fn block_successor_clear(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &EpochHash,
    ) -> DbResult<()> {
        self.block_successor_set(txn, hash, &EpochHash::zero())
    }

    fn block_successor_set(
        &self,
        txn: &StoreTransaction<'_>,
        hash: &EpochHash,
        successor: &EpochHash,
    ) -> DbResult<()> {
        let cf = self.cf(tables::EPOCH_BLOCKS)?;
        let Some(value) = txn.get(cf, hash.as_bytes())? else {
            return Err(DbError::MissingPredecessor(*hash));
        };
        // Early-era rows lack the slot; extend them.
        let mut value = value;
        match value.len().checked_sub(32) {
            Some(tail) if EpochBlock::from_bytes(&value[..tail]).is_ok() => {
                value[tail..].copy_from_slice(successor.as_bytes());
            }
            _ => value.extend_from_slice(successor.as_bytes()),
        }
        txn.put(cf, hash.as_bytes(), &value)
    }

    pub fn block_count(&self, txn: &StoreTransaction<'_>) -> DbResult<u64> {
        txn.count(self.cf(tables::EPOCH_BLOCKS)?)
    }

    pub fn latest_begin<'a>(&self, txn: &'a StoreTransaction<'_>) -> DbResult<EpochIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_start(self.cf(tables::EPOCH_BLOCKS)?),
            tables::EPOCH_BLOCKS,
            decode_epoch_row,
        ))
    }

    pub fn latest_begin_at<'a>(
        &self,
        txn: &'a StoreTransaction<'_>,
        hash: &EpochHash,
    ) -> DbResult<EpochIter<'a>> {
        Ok(TypedIter::new(
            txn.iter_from(self.cf(tables::EPOCH_BLOCKS)?, hash.as_bytes()),
            tables::EPOCH_BLOCKS,
            decode_epoch_row,
        ))
    }

    // ---- checksum ----

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
        txn.put(
            self.cf(tables::META)?,
            key.as_bytes(),
            Buf32::from(version as u64).as_bytes(),
        )
    }

    /// This node's persistent identity key, minted on first request.
    /// Requires a write transaction the first time.
    pub fn get_node_id(&self, txn: &StoreTransaction<'_>) -> DbResult<RawKey> {
        let key = Buf32::from(2u64);
        let cf = self.cf(tables::META)?;
        if let Some(value) = txn.get(cf, key.as_bytes())? {
            let buf = Buf32::from_slice(&value).ok_or(DbError::Corrupt(tables::META))?;
            return Ok(RawKey(buf));
        }
        let mut bytes = [0; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let id = RawKey(Buf32(bytes));
        txn.put(cf, key.as_bytes(), id.0.as_bytes())?;
        Ok(id)
    }

    /// Deletes the node ID from the store.
    pub fn delete_node_id(&self, txn: &StoreTransaction<'_>) -> DbResult<()> {
        let key = Buf32::from(2u64);
        txn.delete(self.cf(tables::META)?, key.as_bytes())
    }
}

fn checksum_key(prefix: u64, mask: u8) -> [u8; 9] {
    let mut key = [0; 9];
    key[..8].copy_from_slice(&(prefix & 0xffff_ffff_ffff_ff00).to_be_bytes());
    key[8] = mask;
    key
}

fn decode_epoch_body(value: &[u8]) -> DbResult<EpochBlock> {
    // Prefer the suffixed layout; fall back to suffix-free early rows.
    if let Some(tail) = value.len().checked_sub(32) {
        if let Ok(epoch) = EpochBlock::from_bytes(&value[..tail]) {
            return Ok(epoch);
        }
    }
    EpochBlock::from_bytes(value).map_err(|_| DbError::Corrupt(tables::EPOCH_BLOCKS))
}

fn decode_epoch_row(key: &[u8], value: &[u8]) -> Option<(Buf32, EpochBlock)> {
    Some((Buf32::from_slice(key)?, decode_epoch_body(value).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_primitives::Buf64;

    fn fresh() -> (tempfile::TempDir, EpochStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = EpochStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn epoch(previous: EpochHash, timestamp: u64) -> EpochBlock {
        let mut e = EpochBlock::new(timestamp, previous, vec![Buf32::from(timestamp)]);
        e.signature = Buf64::zero();
        e
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (_dir, store) = fresh();
        let e = epoch(EpochHash::zero(), 1);
        let txn = store.tx_begin_write();
        store
            .block_put(&txn, &e.hash(), &e, EpochHash::zero())
            .unwrap();
        assert_eq!(store.block_get(&txn, &e.hash()).unwrap(), Some(e.clone()));
        assert!(store.block_exists(&txn, &e.hash()).unwrap());
        assert_eq!(store.block_count(&txn).unwrap(), 1);
        txn.commit().unwrap();
    }

    #[test]
    fn test_successor_chain() {
        let (_dir, store) = fresh();
        let genesis = epoch(EpochHash::zero(), 1);
        let child = epoch(genesis.hash(), 2);

        let txn = store.tx_begin_write();
        store
            .block_put(&txn, &genesis.hash(), &genesis, EpochHash::zero())
            .unwrap();
        store
            .block_put(&txn, &child.hash(), &child, EpochHash::zero())
            .unwrap();
        assert_eq!(
            store.block_successor(&txn, &genesis.hash()).unwrap(),
            child.hash()
        );
        assert!(store
            .block_successor(&txn, &child.hash())
            .unwrap()
            .is_zero());

        store.block_successor_clear(&txn, &genesis.hash()).unwrap();
        assert!(store
            .block_successor(&txn, &genesis.hash())
            .unwrap()
            .is_zero());
    }

    #[test]
    fn test_missing_predecessor_fails() {
        let (_dir, store) = fresh();
        let orphan = epoch(Buf32::from(404u64), 3);
        let txn = store.tx_begin_write();
        assert!(matches!(
            store.block_put(&txn, &orphan.hash(), &orphan, EpochHash::zero()),
            Err(DbError::MissingPredecessor(_))
        ));
    }

    #[test]
    fn test_suffix_free_row_reads_as_zero_successor() {
        let (_dir, store) = fresh();
        let e = epoch(EpochHash::zero(), 4);
        let txn = store.tx_begin_write();
        // Simulate an early-era record without the successor slot.
        let cf = store.cf(tables::EPOCH_BLOCKS).unwrap();
        txn.put(cf, e.hash().as_bytes(), &e.to_bytes()).unwrap();

        assert!(store.block_successor(&txn, &e.hash()).unwrap().is_zero());
        assert_eq!(store.block_get(&txn, &e.hash()).unwrap(), Some(e.clone()));

        // Linking a child extends the row in place.
        let child = epoch(e.hash(), 5);
        store
            .block_put(&txn, &child.hash(), &child, EpochHash::zero())
            .unwrap();
        assert_eq!(store.block_successor(&txn, &e.hash()).unwrap(), child.hash());
    }

    #[test]
    fn test_node_id_is_stable() {
        let (_dir, store) = fresh();
        let txn = store.tx_begin_write();
        let id = store.get_node_id(&txn).unwrap();
        assert_eq!(store.get_node_id(&txn).unwrap(), id);
        store.delete_node_id(&txn).unwrap();
        let regenerated = store.get_node_id(&txn).unwrap();
        assert_ne!(regenerated, id);
    }

    #[test]
    fn test_latest_iteration() {
        let (_dir, store) = fresh();
        let txn = store.tx_begin_write();
        let a = epoch(EpochHash::zero(), 1);
        let b = epoch(a.hash(), 2);
        store
            .block_put(&txn, &a.hash(), &a, EpochHash::zero())
            .unwrap();
        store
            .block_put(&txn, &b.hash(), &b, EpochHash::zero())
            .unwrap();
        let rows: Vec<_> = store
            .latest_begin(&txn)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
    }
}
