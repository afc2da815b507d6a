//! Chain state types: blocks, transactions, votes, epoch headers and the
//! fixed-layout records the stores keep beside them.

pub mod block;
pub mod codec;
pub mod epoch;
pub mod genesis;
pub mod info;
pub mod tx;
pub mod vote;

pub use block::{Block, BlockType, ChangeBlock, OpenBlock, ReceiveBlock, SendBlock, StateBlock};
pub use epoch::EpochBlock;
pub use info::{AccountInfo, BlockInfo, EpochInfo, PendingInfo, PendingKey};
pub use tx::{Tx, TxKind, TxPayload};
pub use vote::{Vote, VoteCode};
