//! The roots map: every election currently being fought, plus the online
//! stake tracker quorum is measured against.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::*;

use weave_db::DbResult;
use weave_ledger::Ledger;
use weave_primitives::params::NetworkParams;
use weave_primitives::{Account, Amount, Buf32};
use weave_state::{Block, Vote, VoteCode};

use crate::election::{ConfirmationAction, Election, ElectionStatus};

/// Confirmed elections kept for duplicate suppression and introspection.
const RECENT_HISTORY_BOUND: usize = 128;

/// Representatives heard from recently; their summed weight approximates
/// the online stake.
pub struct OnlineReps {
    window: Duration,
    reps: Mutex<HashMap<Account, (Amount, Instant)>>,
}

impl OnlineReps {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            reps: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, rep: Account, weight: Amount) {
        self.reps.lock().insert(rep, (weight, Instant::now()));
    }

    pub fn online_stake(&self) -> u128 {
        let mut reps = self.reps.lock();
        let now = Instant::now();
        reps.retain(|_, (_, seen)| now.duration_since(*seen) < self.window);
        reps.values().map(|(w, _)| w.number()).sum()
    }
}

/// Work the announce tick decided on, executed by the caller outside the
/// roots lock.
#[derive(Default)]
pub struct AnnounceActions {
    /// Leaders to solicit confirm_reqs for.
    pub confirm_reqs: Vec<Block>,
    /// Newly confirmed election results to broadcast.
    pub confirmed: Vec<ElectionStatus>,
}

struct ActiveState {
    roots: HashMap<Buf32, Election>,
    recent: VecDeque<ElectionStatus>,
}

/// Active elections over competing blocks.
pub struct ActiveElections {
    params: NetworkParams,
    ledger: Arc<Ledger>,
    pub online: OnlineReps,
    state: Mutex<ActiveState>,
}

impl ActiveElections {
    pub fn new(params: NetworkParams, ledger: Arc<Ledger>) -> Self {
        let online_window = params.peer_cutoff.max(Duration::from_secs(60));
        Self {
            params,
            ledger,
            online: OnlineReps::new(online_window),
            state: Mutex::new(ActiveState {
                roots: HashMap::new(),
                recent: VecDeque::new(),
            }),
        }
    }

    /// Starts an election for the block's root.  Returns `false` if one was
    /// already running there.
    pub fn start(&self, block: Block, action: Option<ConfirmationAction>) -> bool {
        let root = block.root();
        let mut state = self.state.lock();
        if state.roots.contains_key(&root) {
            return false;
        }
        debug!(%root, hash = %block.hash(), "election started");
        state.roots.insert(root, Election::new(block, action));
        true
    }

    /// Ingests a network vote: signature check, replay rule, tally update
    /// and quorum detection.
    pub fn vote(&self, vote: &Vote) -> DbResult<VoteCode> {
        if !vote.validate() {
            return Ok(VoteCode::Invalid);
        }
        let txn = self.ledger.store().tx_begin_read();
        let weight = self.ledger.weight(&txn, &vote.account)?;
        self.online.observe(vote.account, weight);

        let root = vote.block.root();
        let mut state = self.state.lock();
        let Some(election) = state.roots.get_mut(&root) else {
            return Ok(VoteCode::Vote);
        };
        let code = election.vote(vote);
        if code == VoteCode::Replay || election.confirmed {
            return Ok(code);
        }

        // Re-tally and check quorum with the fresh vote folded in.
        let (tally, winner) = self.ledger.winner(&txn, &election.votes)?;
        let online = self.online.online_stake();
        let status = ElectionStatus { winner, tally };
        let reached = self.params.quorum_reached(tally.number(), online);
        let mut action = None;
        if reached {
            info!(%root, winner = %status.winner.hash(), %tally, "election confirmed");
            action = election.take_confirmation(status.clone());
            state.recent.push_back(status.clone());
            if state.recent.len() > RECENT_HISTORY_BOUND {
                state.recent.pop_front();
            }
        } else {
            election.status = status.clone();
        }
        // Fire the confirmation outside the roots lock; the action may
        // re-enter this map.
        drop(state);
        if let Some(action) = action {
            action(status);
        }
        Ok(code)
    }

    /// One announce tick: bump counters, pick leaders that need confirm_req
    /// fanout, drop finished and aged-out elections.
    pub fn announce_tick(&self) -> AnnounceActions {
        let mut actions = AnnounceActions::default();
        let cutoff = self.params.peer_cutoff;
        let mut state = self.state.lock();
        let mut finished = Vec::new();
        for (root, election) in state.roots.iter_mut() {
            if election.confirmed {
                actions.confirmed.push(election.status.clone());
                finished.push(*root);
                continue;
            }
            election.announcements += 1;
            if election.announcements >= self.params.announcement_min {
                actions.confirm_reqs.push(election.status.winner.clone());
            }
            if election.announcements >= self.params.announcement_long {
                warn!(%root, announcements = election.announcements, "election stuck");
            }
            if !election.has_votes() && election.started.elapsed() > cutoff {
                debug!(%root, "election aged out");
                finished.push(*root);
            }
        }
        for root in finished {
            state.roots.remove(&root);
        }
        actions
    }

    /// Drops the election for a root, e.g. when its block is rolled back.
    pub fn erase(&self, root: &Buf32) {
        self.state.lock().roots.remove(root);
    }

    pub fn roots_empty(&self) -> bool {
        self.state.lock().roots.is_empty()
    }

    pub fn roots_len(&self) -> usize {
        self.state.lock().roots.len()
    }

    pub fn recent_confirmed(&self) -> Vec<ElectionStatus> {
        self.state.lock().recent.iter().cloned().collect()
    }

    /// Current leader for a root, if contested.
    pub fn leader(&self, root: &Buf32) -> Option<Block> {
        self.state
            .lock()
            .roots
            .get(root)
            .map(|e| e.status.winner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_ledger::genesis::initialize;
    use weave_primitives::crypto::Keypair;
    use weave_primitives::params::Network;
    use weave_state::genesis::{genesis_amount, test_genesis_key, Genesis};
    use weave_state::SendBlock;
    use weave_store::test_utils::get_test_store;

    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (tempfile::TempDir, Arc<Ledger>, Genesis, ActiveElections) {
        let (dir, store) = get_test_store();
        let ledger = Arc::new(Ledger::new(store));
        let genesis = Genesis::new(Network::Test);
        let txn = ledger.store().tx_begin_write();
        initialize(&ledger, &txn, &genesis).unwrap();
        txn.commit().unwrap();
        let active = ActiveElections::new(NetworkParams::new(Network::Test), ledger.clone());
        (dir, ledger, genesis, active)
    }

    fn forked_sends(genesis: &Genesis) -> (Block, Block) {
        let gkey = test_genesis_key();
        let a = Block::Send(SendBlock::new(
            genesis.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 1),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        let b = Block::Send(SendBlock::new(
            genesis.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 2),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        (a, b)
    }

    #[test]
    fn test_start_is_per_root() {
        let (_d, _ledger, genesis, active) = setup();
        let (a, b) = forked_sends(&genesis);
        assert!(active.start(a, None));
        // Same root: the existing election stands.
        assert!(!active.start(b, None));
        assert_eq!(active.roots_len(), 1);
    }

    #[test]
    fn test_quorum_confirms_exactly_once() {
        let (_d, ledger, genesis, active) = setup();
        let (a, b) = forked_sends(&genesis);
        {
            let txn = ledger.store().tx_begin_write();
            ledger.process(&txn, &a).unwrap();
            txn.commit().unwrap();
        }
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        let b_hash = b.hash();
        assert!(active.start(
            a.clone(),
            Some(Box::new(move |status: ElectionStatus| {
                assert_eq!(status.winner.hash(), b_hash);
                fired2.fetch_add(1, Ordering::SeqCst);
            })),
        ));

        // Genesis holds effectively the whole online stake; its vote for B
        // clears any quorum.
        let gkey = test_genesis_key();
        let vote = Vote::new(gkey.public, &gkey.raw, 1, b.clone());
        assert_eq!(active.vote(&vote).unwrap(), VoteCode::Vote);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Further votes cannot re-fire the callback.
        let vote2 = Vote::new(gkey.public, &gkey.raw, 2, b);
        active.vote(&vote2).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(active.recent_confirmed().len(), 1);
    }

    #[test]
    fn test_replay_and_invalid_votes() {
        let (_d, _ledger, genesis, active) = setup();
        let (a, b) = forked_sends(&genesis);
        active.start(a.clone(), None);

        let rep = Keypair::generate();
        let v5 = Vote::new(rep.public, &rep.raw, 5, b.clone());
        assert_eq!(active.vote(&v5).unwrap(), VoteCode::Vote);
        let v4 = Vote::new(rep.public, &rep.raw, 4, b.clone());
        assert_eq!(active.vote(&v4).unwrap(), VoteCode::Replay);
        let v5_again = Vote::new(rep.public, &rep.raw, 5, a);
        assert_eq!(active.vote(&v5_again).unwrap(), VoteCode::Replay);

        let mut forged = Vote::new(rep.public, &rep.raw, 6, b);
        forged.sequence = 7;
        assert_eq!(active.vote(&forged).unwrap(), VoteCode::Invalid);
    }

    #[test]
    fn test_announce_tick_requests_after_minimum() {
        let (_d, _ledger, genesis, active) = setup();
        let (a, _) = forked_sends(&genesis);
        active.start(a.clone(), None);

        let params = NetworkParams::new(Network::Test);
        for _ in 0..params.announcement_min - 1 {
            let actions = active.announce_tick();
            assert!(actions.confirm_reqs.is_empty());
        }
        let actions = active.announce_tick();
        assert_eq!(actions.confirm_reqs.len(), 1);
        assert_eq!(actions.confirm_reqs[0].hash(), a.hash());
    }

    #[test]
    fn test_erase_removes_root() {
        let (_d, _ledger, genesis, active) = setup();
        let (a, _) = forked_sends(&genesis);
        active.start(a.clone(), None);
        active.erase(&a.root());
        assert!(active.roots_empty());
    }
}
