//! Per-root vote book used by elections.

use std::collections::HashMap;

use weave_primitives::{Account, Buf32};
use weave_state::{Block, Vote};

/// How a vote changed the book.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TallyResult {
    /// First vote from this representative.
    Vote,
    /// Representative switched blocks.
    Changed,
    /// Representative repeated its current choice.
    Confirm,
}

/// All votes received by account for one contested root.
#[derive(Clone, Debug)]
pub struct Votes {
    /// Root block of the fork.
    pub id: Buf32,
    /// Each representative's current choice.
    pub rep_votes: HashMap<Account, Block>,
}

impl Votes {
    /// Seeds the book with the block that opened the election, attributed
    /// to the null representative so an uncontested root has a winner.
    pub fn new(block: Block) -> Self {
        let mut rep_votes = HashMap::new();
        let id = block.root();
        rep_votes.insert(Account::zero(), block);
        Self { id, rep_votes }
    }

    pub fn vote(&mut self, vote: &Vote) -> TallyResult {
        match self.rep_votes.get(&vote.account) {
            Some(existing) if existing.hash() == vote.block.hash() => TallyResult::Confirm,
            Some(_) => {
                self.rep_votes.insert(vote.account, vote.block.clone());
                TallyResult::Changed
            }
            None => {
                self.rep_votes.insert(vote.account, vote.block.clone());
                TallyResult::Vote
            }
        }
    }

    /// Whether only the seeded block has ever been voted for.
    pub fn uncontested(&self) -> bool {
        let mut hashes = self.rep_votes.values().map(|b| b.hash());
        let first = hashes.next();
        match first {
            Some(h) => hashes.all(|other| other == h),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_primitives::crypto::Keypair;
    use weave_state::ChangeBlock;

    fn block(previous: u64, key: &Keypair) -> Block {
        Block::Change(ChangeBlock::new(
            Buf32::from(previous),
            &key.raw,
            &key.public,
            0,
        ))
    }

    #[test]
    fn test_vote_transitions() {
        let key = Keypair::generate();
        let rep = Keypair::generate();
        let a = block(1, &key);
        let b = block(2, &key);
        let mut votes = Votes::new(a.clone());
        assert!(votes.uncontested());

        let vote_a = Vote::new(rep.public, &rep.raw, 1, a);
        assert_eq!(votes.vote(&vote_a), TallyResult::Vote);
        assert_eq!(votes.vote(&vote_a), TallyResult::Confirm);
        assert!(votes.uncontested());

        let vote_b = Vote::new(rep.public, &rep.raw, 2, b);
        assert_eq!(votes.vote(&vote_b), TallyResult::Changed);
        assert!(!votes.uncontested());
    }
}
