//! Error type shared across the store interfaces.

use thiserror::Error;

use weave_primitives::Buf32;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("rocksdb: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    #[error("record in table {0} failed to decode")]
    Corrupt(&'static str),

    #[error("missing column family {0}")]
    MissingTable(&'static str),

    #[error("predecessor {0} not in store")]
    MissingPredecessor(Buf32),

    #[error("key not found")]
    NotFound,

    #[error("store schema version {0} is newer than this node understands")]
    VersionFromFuture(u32),

    #[error("{0}")]
    Other(String),
}
