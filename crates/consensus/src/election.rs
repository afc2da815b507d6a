//! Per-root election state.

use std::collections::HashMap;
use std::time::Instant;

use weave_ledger::Votes;
use weave_primitives::{Account, Amount, Buf32};
use weave_state::{Block, Vote, VoteCode};

/// Callback fired exactly once when an election confirms.
pub type ConfirmationAction = Box<dyn Fn(ElectionStatus) + Send>;

/// Result of a decided (or still-running) election.
#[derive(Clone, Debug)]
pub struct ElectionStatus {
    pub winner: Block,
    pub tally: Amount,
}

/// A root being contested: the vote book, replay guards and announce
/// bookkeeping.  Lives in memory only, until confirmed or aged out.
pub struct Election {
    pub votes: Votes,
    /// Highest vote sequence seen per representative.
    last_votes: HashMap<Account, u64>,
    pub status: ElectionStatus,
    pub confirmed: bool,
    /// Number of announcements in a row for this root.
    pub announcements: u32,
    pub started: Instant,
    pub last_vote_arrival: Instant,
    confirmation_action: Option<ConfirmationAction>,
}

impl Election {
    pub fn new(block: Block, confirmation_action: Option<ConfirmationAction>) -> Self {
        let status = ElectionStatus {
            winner: block.clone(),
            tally: Amount::zero(),
        };
        Self {
            votes: Votes::new(block),
            last_votes: HashMap::new(),
            status,
            confirmed: false,
            announcements: 0,
            started: Instant::now(),
            last_vote_arrival: Instant::now(),
            confirmation_action,
        }
    }

    pub fn root(&self) -> Buf32 {
        self.votes.id
    }

    /// Ingests a verified vote; the caller has already checked the
    /// signature.  Older or equal sequences per rep are replays.
    pub fn vote(&mut self, vote: &Vote) -> VoteCode {
        match self.last_votes.get(&vote.account) {
            Some(last) if *last >= vote.sequence => return VoteCode::Replay,
            _ => {}
        }
        self.last_votes.insert(vote.account, vote.sequence);
        self.last_vote_arrival = Instant::now();
        self.votes.vote(vote);
        VoteCode::Vote
    }

    /// Marks confirmed and hands back the callback, exactly once.  The
    /// caller invokes it after releasing the roots lock so the action can
    /// safely re-enter the elections map.
    pub fn take_confirmation(&mut self, status: ElectionStatus) -> Option<ConfirmationAction> {
        if self.confirmed {
            return None;
        }
        self.confirmed = true;
        self.status = status;
        self.confirmation_action.take()
    }

    pub fn has_votes(&self) -> bool {
        !self.last_votes.is_empty()
    }
}
