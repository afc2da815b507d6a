//! Helpers for tests that need throwaway stores.

use std::sync::Arc;

use tempfile::TempDir;

use crate::{BlockStore, EpochStore};

/// A block store in a temp dir that lives as long as the returned guard.
pub fn get_test_store() -> (TempDir, Arc<BlockStore>) {
    let dir = TempDir::new().expect("create temp dir");
    let store = BlockStore::open(dir.path()).expect("open block store");
    (dir, Arc::new(store))
}

/// An epoch store in a temp dir.
pub fn get_test_epoch_store() -> (TempDir, Arc<EpochStore>) {
    let dir = TempDir::new().expect("create temp dir");
    let store = EpochStore::open(dir.path()).expect("open epoch store");
    (dir, Arc::new(store))
}
