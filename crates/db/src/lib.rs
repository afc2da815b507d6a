//! Shared store-facing types: the error surface and the on-disk table
//! registry both stores' column families are created from.

pub mod errors;

pub use errors::{DbError, DbResult};

/// Authoritative schema version written to fresh stores and targeted by
/// upgrades.
pub const SCHEMA_VERSION: u32 = 11;

/// Column families of the block store, in creation order.  The per-variant
/// block tables are scanned in this order by `block_get`.
pub mod tables {
    pub const FRONTIERS: &str = "frontiers";
    pub const ACCOUNTS: &str = "accounts";
    pub const SEND_BLOCKS: &str = "send_blocks";
    pub const RECEIVE_BLOCKS: &str = "receive_blocks";
    pub const OPEN_BLOCKS: &str = "open_blocks";
    pub const CHANGE_BLOCKS: &str = "change_blocks";
    pub const STATE_BLOCKS: &str = "state_blocks";
    pub const PENDING: &str = "pending";
    pub const BLOCKS_INFO: &str = "blocks_info";
    pub const UNCHECKED: &str = "unchecked";
    pub const CHECKSUM: &str = "checksum";
    pub const VOTE: &str = "vote";
    pub const META: &str = "meta";

    pub const ALL: [&str; 13] = [
        FRONTIERS,
        ACCOUNTS,
        SEND_BLOCKS,
        RECEIVE_BLOCKS,
        OPEN_BLOCKS,
        CHANGE_BLOCKS,
        STATE_BLOCKS,
        PENDING,
        BLOCKS_INFO,
        UNCHECKED,
        CHECKSUM,
        VOTE,
        META,
    ];

    /// Block tables in the fixed scan order.
    pub const BLOCK_TABLES: [&str; 5] = [
        SEND_BLOCKS,
        RECEIVE_BLOCKS,
        OPEN_BLOCKS,
        CHANGE_BLOCKS,
        STATE_BLOCKS,
    ];
}

/// Column families of the epoch store.
pub mod epoch_tables {
    pub const EPOCH_BLOCKS: &str = "epoch_blocks";
    pub const CHECKSUM: &str = "checksum";
    pub const META: &str = "meta";

    pub const ALL: [&str; 3] = [EPOCH_BLOCKS, CHECKSUM, META];
}
