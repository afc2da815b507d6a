//! Transaction handle shared by both stores.
//!
//! Writers get pessimistic rocksdb transactions: reads inside the
//! transaction observe its own writes, commit is atomic, and dropping the
//! handle without committing aborts.  Readers use the same handle type and
//! simply never commit.

use rocksdb::{ColumnFamily, Direction, IteratorMode, Transaction, TransactionDB};

use weave_db::{DbError, DbResult};

/// Raw record pairs produced by the table cursors, decoded by the typed
/// wrappers in [`crate::iterator`].
pub type RawItem = Result<(Box<[u8]>, Box<[u8]>), rocksdb::Error>;

/// Scoped unit of store work.
pub struct StoreTransaction<'db> {
    inner: Transaction<'db, TransactionDB>,
}

impl<'db> StoreTransaction<'db> {
    pub(crate) fn new(db: &'db TransactionDB) -> Self {
        Self {
            inner: db.transaction(),
        }
    }

    /// Commits every write made through this handle, or none of them.
    pub fn commit(self) -> DbResult<()> {
        self.inner.commit().map_err(DbError::from)
    }

    /// Explicitly discards the transaction.  Dropping does the same.
    pub fn abort(self) {
        let _ = self.inner.rollback();
    }

    pub(crate) fn get(&self, cf: &ColumnFamily, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.inner.get_cf(cf, key).map_err(DbError::from)
    }

    pub(crate) fn put(&self, cf: &ColumnFamily, key: &[u8], value: &[u8]) -> DbResult<()> {
        self.inner.put_cf(cf, key, value).map_err(DbError::from)
    }

    pub(crate) fn delete(&self, cf: &ColumnFamily, key: &[u8]) -> DbResult<()> {
        self.inner.delete_cf(cf, key).map_err(DbError::from)
    }

    pub(crate) fn exists(&self, cf: &ColumnFamily, key: &[u8]) -> DbResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    pub(crate) fn iter_start<'a>(
        &'a self,
        cf: &ColumnFamily,
    ) -> Box<dyn Iterator<Item = RawItem> + 'a> {
        Box::new(self.inner.iterator_cf(cf, IteratorMode::Start))
    }

    pub(crate) fn iter_from<'a>(
        &'a self,
        cf: &ColumnFamily,
        start: &[u8],
    ) -> Box<dyn Iterator<Item = RawItem> + 'a> {
        Box::new(
            self.inner
                .iterator_cf(cf, IteratorMode::From(start, Direction::Forward)),
        )
    }

    /// Number of records in a table.  Linear in the table, used by the
    /// aggregate counters and tests only.
    pub(crate) fn count(&self, cf: &ColumnFamily) -> DbResult<u64> {
        let mut n = 0;
        for item in self.iter_start(cf) {
            item?;
            n += 1;
        }
        Ok(n)
    }
}
