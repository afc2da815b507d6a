//! rocksdb-backed implementations of the block store and epoch store.

pub mod block_store;
pub mod epoch_store;
pub mod iterator;
mod migrations;
pub mod transaction;

#[cfg(feature = "test_utils")]
pub mod test_utils;

pub use block_store::{BlockCounts, BlockStore, BLOCK_INFO_INTERVAL};
pub use epoch_store::EpochStore;
pub use iterator::TypedIter;
pub use transaction::StoreTransaction;
