//! Outcome taxonomy of ledger processing.  The codes are the contract with
//! the block processor and consensus: everything except `Progress` and
//! `Old` is a validation verdict, not an error.

use weave_primitives::{Account, Amount};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    /// Hasn't been seen before, signed correctly, applied.
    Progress,
    /// Already seen and was valid.
    Old,
    /// Same root, different hash; surfaced to consensus.
    Fork,
    /// Block marked as previous is unknown.
    GapPrevious,
    /// Receive/open source is unknown.
    GapSource,
    /// Source exists but no live pending entry for this account.
    Unreceivable,
    /// Signature was bad, forged or transmission error.
    BadSignature,
    /// Claimed new balance exceeds the predecessor's.
    NegativeSpend,
    /// Receive delta does not equal the pending amount.
    BalanceMismatch,
    /// Attempt to open the all-zero account.
    OpenedBurnAccount,
    /// Block type not allowed to follow its predecessor.
    BlockPosition,
}

impl ProcessResult {
    pub fn is_progress(&self) -> bool {
        matches!(self, ProcessResult::Progress)
    }
}

/// What `process` learned about an applied (or rejected) block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessReturn {
    pub code: ProcessResult,
    /// Owning account, where determinable.
    pub account: Account,
    /// Balance delta the block moved.
    pub amount: Amount,
    /// Destination credited with a pending entry, for sends.
    pub pending_account: Account,
    /// For state-style blocks, whether the applied block sent.
    pub state_is_send: Option<bool>,
}

impl ProcessReturn {
    pub fn reject(code: ProcessResult) -> Self {
        Self {
            code,
            account: Account::zero(),
            amount: Amount::zero(),
            pending_account: Account::zero(),
            state_is_send: None,
        }
    }
}
