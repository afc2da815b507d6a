//! Epoch commitment: assemble a candidate header from recently confirmed
//! txs, gather committee pre-votes then votes, and write the committed
//! header through the epoch store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::*;

use weave_db::DbResult;
use weave_ledger::Ledger;
use weave_primitives::crypto::{sign_message, validate_message, Keypair};
use weave_primitives::params::NetworkParams;
use weave_primitives::{Account, BlockHash, EpochHash, Signature};
use weave_state::epoch::MAX_COMMITTEE_SIGNATURES;
use weave_state::{EpochBlock, EpochInfo};
use weave_store::EpochStore;

/// How ingesting a foreign committed epoch went.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EpochProcessResult {
    Progress,
    Old,
    /// Previous epoch unknown; fetch it first.
    GapPrevious,
    /// Wrong linkage or vote sets outside the committee bounds.
    Malformed,
}

/// Voting phase of the in-flight round.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RoundPhase {
    PreVote,
    Vote,
}

struct Round {
    candidate: EpochBlock,
    committee: Vec<Account>,
    phase: RoundPhase,
    pre_votes: HashMap<Account, Signature>,
    votes: HashMap<Account, Signature>,
}

impl Round {
    fn two_thirds(&self) -> usize {
        // Ceiling of 2/3rds of the committee.
        (self.committee.len() * 2).div_ceil(3)
    }
}

struct PipelineState {
    info: EpochInfo,
    pending_txs: Vec<BlockHash>,
    round: Option<Round>,
    epochs_since_rotation: usize,
}

/// What a successful commit produced.
pub struct CommitOutcome {
    pub epoch: EpochBlock,
    /// A full committee rotation elapsed with this commit.
    pub round_completed: bool,
}

/// Drives epoch rounds for the local node and ingests committed epochs
/// from the network.
pub struct EpochPipeline {
    params: NetworkParams,
    ledger: Arc<Ledger>,
    epoch_store: Arc<EpochStore>,
    /// Local witness identity, when this node holds a committee seat.
    identity: Option<Keypair>,
    state: Mutex<PipelineState>,
}

impl EpochPipeline {
    pub fn new(
        params: NetworkParams,
        ledger: Arc<Ledger>,
        epoch_store: Arc<EpochStore>,
        identity: Option<Keypair>,
    ) -> DbResult<Self> {
        let info = load_epoch_info(&epoch_store)?;
        Ok(Self {
            params,
            ledger,
            epoch_store,
            identity,
            state: Mutex::new(PipelineState {
                info,
                pending_txs: Vec::new(),
                round: None,
                epochs_since_rotation: 0,
            }),
        })
    }

    pub fn epoch_info(&self) -> EpochInfo {
        self.state.lock().info
    }

    /// Queues a confirmed tx for the next candidate header.
    pub fn observe_tx(&self, hash: BlockHash) {
        let mut state = self.state.lock();
        if !state.pending_txs.contains(&hash) {
            state.pending_txs.push(hash);
        }
    }

    /// Opens a voting round over the queued txs.  Returns the candidate to
    /// gossip to the committee, or `None` when a round is already running
    /// or there is nothing to commit.
    pub fn begin_round(
        &self,
        committee: Vec<Account>,
        timestamp: u64,
    ) -> Option<EpochBlock> {
        if committee.is_empty() {
            return None;
        }
        let mut state = self.state.lock();
        if state.round.is_some() || state.pending_txs.is_empty() {
            return None;
        }
        let txs = std::mem::take(&mut state.pending_txs);
        let candidate = EpochBlock::new(timestamp, state.info.head, txs);
        debug!(candidate = %candidate.candidate_hash(), txs = candidate.txs.len(), "epoch round opened");
        state.round = Some(Round {
            candidate: candidate.clone(),
            committee,
            phase: RoundPhase::PreVote,
            pre_votes: HashMap::new(),
            votes: HashMap::new(),
        });
        Some(candidate)
    }

    pub fn round_phase(&self) -> Option<RoundPhase> {
        self.state.lock().round.as_ref().map(|r| r.phase)
    }

    /// Candidate header of the in-flight round.
    pub fn current_candidate(&self) -> Option<EpochBlock> {
        self.state.lock().round.as_ref().map(|r| r.candidate.clone())
    }

    /// Signs the current candidate with the local witness identity, for
    /// whichever phase the round is in.
    pub fn sign_current(&self) -> Option<(Account, Signature)> {
        let identity = self.identity.as_ref()?;
        let state = self.state.lock();
        let round = state.round.as_ref()?;
        let digest = round.candidate.candidate_hash();
        Some((
            identity.public,
            sign_message(&identity.raw, &identity.public, &digest),
        ))
    }

    /// Ingests a committee pre-vote.  On 2/3rds the round advances to the
    /// vote phase.
    pub fn pre_vote(&self, account: Account, signature: Signature) -> Option<RoundPhase> {
        let mut state = self.state.lock();
        let round = state.round.as_mut()?;
        if round.phase != RoundPhase::PreVote || !round.committee.contains(&account) {
            return Some(round.phase);
        }
        let digest = round.candidate.candidate_hash();
        if !validate_message(&account, &digest, &signature) {
            return Some(round.phase);
        }
        round.pre_votes.insert(account, signature);
        if round.pre_votes.len() >= round.two_thirds() {
            debug!("pre-vote quorum reached");
            round.phase = RoundPhase::Vote;
        }
        Some(round.phase)
    }

    /// Ingests a commit-round vote.  On 2/3rds the epoch commits and is
    /// returned for broadcast.
    pub fn vote(&self, account: Account, signature: Signature) -> DbResult<Option<CommitOutcome>> {
        let mut state = self.state.lock();
        let Some(round) = state.round.as_mut() else {
            return Ok(None);
        };
        if round.phase != RoundPhase::Vote || !round.committee.contains(&account) {
            return Ok(None);
        }
        let digest = round.candidate.candidate_hash();
        if !validate_message(&account, &digest, &signature) {
            return Ok(None);
        }
        round.votes.insert(account, signature);
        if round.votes.len() < round.two_thirds() {
            return Ok(None);
        }

        // Quorum in both phases: seal and persist.
        let round = state.round.take().expect("round in flight");
        let mut epoch = round.candidate;
        epoch.pre_votes = ordered_signatures(&round.committee, &round.pre_votes);
        epoch.votes = ordered_signatures(&round.committee, &round.votes);
        if let Some(identity) = &self.identity {
            epoch.signature = sign_message(&identity.raw, &identity.public, &epoch.hash());
        }

        let hash = epoch.hash();
        let txn = self.epoch_store.tx_begin_write();
        self.epoch_store
            .block_put(&txn, &hash, &epoch, EpochHash::zero())?;
        txn.commit()?;

        for tx in &epoch.txs {
            self.ledger.mark_epoch_confirmed(*tx);
        }
        state.info = EpochInfo::new(hash, epoch.timestamp, state.info.block_count + 1);
        state.epochs_since_rotation += 1;
        let round_completed = state.epochs_since_rotation >= self.params.witness_count;
        if round_completed {
            state.epochs_since_rotation = 0;
        }
        info!(%hash, txs = epoch.txs.len(), "epoch committed");
        Ok(Some(CommitOutcome {
            epoch,
            round_completed,
        }))
    }

    /// Ingests an already-committed epoch learned from a peer.
    pub fn process_epoch(&self, epoch: &EpochBlock) -> DbResult<EpochProcessResult> {
        if epoch.pre_votes.len() > MAX_COMMITTEE_SIGNATURES
            || epoch.votes.len() > MAX_COMMITTEE_SIGNATURES
            || epoch.pre_votes.len() < self.params.epoch_signature_min
            || epoch.votes.len() < self.params.epoch_signature_min
        {
            return Ok(EpochProcessResult::Malformed);
        }
        let hash = epoch.hash();
        let mut state = self.state.lock();
        let txn = self.epoch_store.tx_begin_write();
        if self.epoch_store.block_exists(&txn, &hash)? {
            return Ok(EpochProcessResult::Old);
        }
        if epoch.previous.is_zero() {
            if state.info.block_count != 0 {
                return Ok(EpochProcessResult::Malformed);
            }
        } else {
            if !self.epoch_store.block_exists(&txn, &epoch.previous)? {
                return Ok(EpochProcessResult::GapPrevious);
            }
            if epoch.previous != state.info.head {
                // Chain is strictly linear; non-head parents are bogus.
                return Ok(EpochProcessResult::Malformed);
            }
        }
        self.epoch_store
            .block_put(&txn, &hash, epoch, EpochHash::zero())?;
        txn.commit()?;
        for tx in &epoch.txs {
            self.ledger.mark_epoch_confirmed(*tx);
        }
        state.info = EpochInfo::new(hash, epoch.timestamp, state.info.block_count + 1);
        Ok(EpochProcessResult::Progress)
    }
}

/// Signatures in committee order, so the sealed header is deterministic.
fn ordered_signatures(
    committee: &[Account],
    sigs: &HashMap<Account, Signature>,
) -> Vec<Signature> {
    committee
        .iter()
        .filter_map(|account| sigs.get(account).copied())
        .collect()
}

/// Rebuilds the epoch head record by scanning for the header without a
/// successor.
fn load_epoch_info(store: &EpochStore) -> DbResult<EpochInfo> {
    let txn = store.tx_begin_read();
    let mut info = EpochInfo::default();
    let mut count = 0u64;
    for item in store.latest_begin(&txn)? {
        let (hash, epoch) = item?;
        count += 1;
        if store.block_successor(&txn, &hash)?.is_zero() {
            info.head = hash;
            info.modified = epoch.timestamp;
        }
    }
    info.block_count = count;
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_primitives::params::Network;
    use weave_primitives::Buf32;
    use weave_store::test_utils::{get_test_epoch_store, get_test_store};

    fn pipeline(
        committee_keys: &[Keypair],
    ) -> (
        Vec<tempfile::TempDir>,
        Arc<EpochStore>,
        EpochPipeline,
        Vec<Account>,
    ) {
        let (d1, store) = get_test_store();
        let (d2, epoch_store) = get_test_epoch_store();
        let ledger = Arc::new(Ledger::new(store));
        let identity = committee_keys.first().cloned();
        let pipeline = EpochPipeline::new(
            NetworkParams::new(Network::Test),
            ledger,
            epoch_store.clone(),
            identity,
        )
        .unwrap();
        let committee = committee_keys.iter().map(|k| k.public).collect();
        (vec![d1, d2], epoch_store, pipeline, committee)
    }

    fn run_round(
        pipeline: &EpochPipeline,
        keys: &[Keypair],
        committee: &[Account],
        timestamp: u64,
    ) -> CommitOutcome {
        pipeline.observe_tx(Buf32::from(timestamp));
        let candidate = pipeline
            .begin_round(committee.to_vec(), timestamp)
            .expect("round opens");
        let digest = candidate.candidate_hash();
        for key in keys {
            let sig = sign_message(&key.raw, &key.public, &digest);
            pipeline.pre_vote(key.public, sig);
        }
        assert_eq!(pipeline.round_phase(), Some(RoundPhase::Vote));
        let mut outcome = None;
        for key in keys {
            let sig = sign_message(&key.raw, &key.public, &digest);
            if let Some(done) = pipeline.vote(key.public, sig).unwrap() {
                outcome = Some(done);
            }
        }
        outcome.expect("round commits")
    }

    #[test]
    fn test_round_commits_with_two_thirds() {
        let keys: Vec<Keypair> = (0..3).map(|_| Keypair::generate()).collect();
        let (_dirs, epoch_store, pipeline, committee) = pipeline(&keys);

        pipeline.observe_tx(Buf32::from(7u64));
        let candidate = pipeline.begin_round(committee.clone(), 1000).unwrap();
        let digest = candidate.candidate_hash();

        // Two of three is exactly the 2/3 ceiling.
        for key in &keys[..2] {
            let sig = sign_message(&key.raw, &key.public, &digest);
            pipeline.pre_vote(key.public, sig);
        }
        assert_eq!(pipeline.round_phase(), Some(RoundPhase::Vote));

        let mut committed = None;
        for key in &keys[..2] {
            let sig = sign_message(&key.raw, &key.public, &digest);
            if let Some(outcome) = pipeline.vote(key.public, sig).unwrap() {
                committed = Some(outcome);
            }
        }
        let outcome = committed.expect("committed");
        assert_eq!(outcome.epoch.txs, vec![Buf32::from(7u64)]);
        assert_eq!(outcome.epoch.pre_votes.len(), 2);
        assert_eq!(outcome.epoch.votes.len(), 2);

        let txn = epoch_store.tx_begin_read();
        assert!(epoch_store
            .block_exists(&txn, &outcome.epoch.hash())
            .unwrap());
        assert_eq!(pipeline.epoch_info().head, outcome.epoch.hash());
        assert_eq!(pipeline.epoch_info().block_count, 1);
    }

    #[test]
    fn test_bad_and_foreign_signatures_ignored() {
        let keys: Vec<Keypair> = (0..3).map(|_| Keypair::generate()).collect();
        let (_dirs, _es, pipeline, committee) = pipeline(&keys);
        pipeline.observe_tx(Buf32::from(1u64));
        let candidate = pipeline.begin_round(committee, 1).unwrap();
        let digest = candidate.candidate_hash();

        let outsider = Keypair::generate();
        let sig = sign_message(&outsider.raw, &outsider.public, &digest);
        pipeline.pre_vote(outsider.public, sig);
        assert_eq!(pipeline.round_phase(), Some(RoundPhase::PreVote));

        // Right account, garbage signature.
        pipeline.pre_vote(keys[0].public, Signature::zero());
        assert_eq!(pipeline.round_phase(), Some(RoundPhase::PreVote));
    }

    #[test]
    fn test_epoch_chain_advances_and_rotates() {
        let keys: Vec<Keypair> = (0..3).map(|_| Keypair::generate()).collect();
        let (_dirs, _es, pipeline, committee) = pipeline(&keys);
        let witness_count = NetworkParams::new(Network::Test).witness_count;

        let mut rotations = 0;
        let mut prev = EpochHash::zero();
        for i in 0..witness_count {
            let outcome = run_round(&pipeline, &keys, &committee, 1000 + i as u64);
            assert_eq!(outcome.epoch.previous, prev);
            prev = outcome.epoch.hash();
            if outcome.round_completed {
                rotations += 1;
            }
        }
        assert_eq!(rotations, 1);
    }

    #[test]
    fn test_process_epoch_from_peer() {
        let keys: Vec<Keypair> = (0..3).map(|_| Keypair::generate()).collect();
        let (_dirs, _es, source, committee) = pipeline(&keys);
        let first = run_round(&source, &keys, &committee, 1).epoch;
        let second = run_round(&source, &keys, &committee, 2).epoch;

        let (_dirs2, _es2, sink, _) = pipeline(&keys);
        // Out of order: the child gaps until its parent lands.
        assert_eq!(
            sink.process_epoch(&second).unwrap(),
            EpochProcessResult::GapPrevious
        );
        assert_eq!(
            sink.process_epoch(&first).unwrap(),
            EpochProcessResult::Progress
        );
        assert_eq!(
            sink.process_epoch(&second).unwrap(),
            EpochProcessResult::Progress
        );
        assert_eq!(
            sink.process_epoch(&second).unwrap(),
            EpochProcessResult::Old
        );
        assert_eq!(sink.epoch_info().block_count, 2);
    }
}
