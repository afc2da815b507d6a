//! The node: wires stores, ledger, processors, consensus, gossip and
//! bootstrap together, and owns the periodic tasks that keep them moving.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rand::RngCore;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::*;

use weave_bootstrap::{BootstrapInitiator, BootstrapServer, BootstrapSink};
use weave_consensus::epoch_pipeline::EpochProcessResult;
use weave_consensus::{
    ActiveElections, BlockProcessor, EpochPipeline, ProcessorObserver, VoteProcessor, WitnessSet,
};
use weave_db::DbError;
use weave_ledger::{genesis as ledger_genesis, Ledger, ProcessResult, ProcessReturn};
use weave_net::message::{Keepalive, NodeIdHandshake};
use weave_net::peers::reserved_address;
use weave_net::{MessageHandler, PeerContainer, UdpService};
use weave_primitives::crypto::{derive_public, sign_message, Keypair, RawKey};
use weave_primitives::params::{NetworkParams, PROTOCOL_VERSION};
use weave_primitives::work::WorkPool;
use weave_primitives::{Buf32, Signature};
use weave_state::genesis::Genesis;
use weave_state::{Block, EpochBlock, Tx, Vote, VoteCode};
use weave_store::{BlockStore, EpochStore};
use weave_wallet::Wallet;

use crate::config::NodeConfig;

/// Fanout of confirm_req solicitations to the heaviest reps.
const CONFIRM_REQ_REP_FANOUT: usize = 16;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Store(#[from] DbError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

type BlockObserver = Box<dyn Fn(&Block, &ProcessReturn) + Send + Sync>;
type VoteObserverFn = Box<dyn Fn(&Vote) + Send + Sync>;
type PeerObserver = Box<dyn Fn(SocketAddr) + Send + Sync>;
type PlainObserver = Box<dyn Fn() + Send + Sync>;

/// Observer surface the node exposes to its embedder.
#[derive(Default)]
pub struct NodeObservers {
    blocks: Mutex<Vec<BlockObserver>>,
    votes: Mutex<Vec<VoteObserverFn>>,
    peers: Mutex<Vec<PeerObserver>>,
    disconnects: Mutex<Vec<PlainObserver>>,
    started: Mutex<Vec<PlainObserver>>,
}

impl NodeObservers {
    pub fn add_block_observer(&self, f: BlockObserver) {
        self.blocks.lock().push(f);
    }

    pub fn add_vote_observer(&self, f: VoteObserverFn) {
        self.votes.lock().push(f);
    }

    pub fn add_peer_observer(&self, f: PeerObserver) {
        self.peers.lock().push(f);
    }

    pub fn add_disconnect_observer(&self, f: PlainObserver) {
        self.disconnects.lock().push(f);
    }

    pub fn add_started_observer(&self, f: PlainObserver) {
        self.started.lock().push(f);
    }

    fn notify_block(&self, block: &Block, result: &ProcessReturn) {
        for f in self.blocks.lock().iter() {
            f(block, result);
        }
    }

    fn notify_vote(&self, vote: &Vote) {
        for f in self.votes.lock().iter() {
            f(vote);
        }
    }

    fn notify_peer(&self, endpoint: SocketAddr) {
        for f in self.peers.lock().iter() {
            f(endpoint);
        }
    }

    fn notify_disconnect(&self) {
        for f in self.disconnects.lock().iter() {
            f();
        }
    }

    fn notify_started(&self) {
        for f in self.started.lock().iter() {
            f();
        }
    }
}

/// Trampoline between the workers and the node: the processors are built
/// before the node exists, so they talk to it through a weak reference.
struct NodeGlue {
    node: Mutex<Weak<Node>>,
}

impl NodeGlue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            node: Mutex::new(Weak::new()),
        })
    }

    fn bind(&self, node: &Arc<Node>) {
        *self.node.lock() = Arc::downgrade(node);
    }

    fn node(&self) -> Option<Arc<Node>> {
        self.node.lock().upgrade()
    }
}

impl ProcessorObserver for NodeGlue {
    fn block_processed(&self, block: &Block, result: &ProcessReturn) {
        let Some(node) = self.node() else {
            return;
        };
        if result.code == ProcessResult::Progress {
            node.epoch_pipeline.observe_tx(block.hash());
            node.republish(block.clone());
        }
        node.observers.notify_block(block, result);
    }

    fn fork(&self, incoming: Block, existing: Block) {
        let Some(node) = self.node() else {
            return;
        };
        debug!(incoming = %incoming.hash(), existing = %existing.hash(), "starting election");
        node.start_election(existing);
    }
}

impl MessageHandler for NodeGlue {
    fn keepalive(&self, from: SocketAddr, message: Keepalive) {
        let Some(node) = self.node() else {
            return;
        };
        let known = node.peers.contains(&from);
        node.peers.contacted(from, PROTOCOL_VERSION);
        if !known {
            node.observers.notify_peer(from);
            // Greet back and open a handshake so the peer can shed its
            // legacy status.
            node.send_keepalive(from);
            node.begin_handshake(from);
        }
        for endpoint in message.listed() {
            if endpoint != node.udp.local_addr()
                && !reserved_address(&endpoint)
                && !node.peers.contains(&endpoint)
            {
                node.send_keepalive(endpoint);
            }
        }
    }

    fn publish(&self, from: SocketAddr, block: Block) {
        let Some(node) = self.node() else {
            return;
        };
        node.peers.contacted(from, PROTOCOL_VERSION);
        node.processor.add(block);
    }

    fn confirm_req(&self, from: SocketAddr, block: Block) {
        let Some(node) = self.node() else {
            return;
        };
        node.peers.contacted(from, PROTOCOL_VERSION);
        node.processor.add(block.clone());
        if node.config.enable_voting {
            match node.generate_votes(&block) {
                Ok(votes) => {
                    for vote in votes {
                        node.send_confirm_ack(from, vote);
                    }
                }
                Err(e) => warn!(err = %e, "vote generation failed"),
            }
        }
    }

    fn confirm_ack(&self, from: SocketAddr, vote: Vote) {
        let Some(node) = self.node() else {
            return;
        };
        node.peers.contacted(from, PROTOCOL_VERSION);
        let txn = node.store.tx_begin_read();
        if let Ok(weight) = node.ledger.weight(&txn, &vote.account) {
            node.peers.rep_response(from, weight);
        }
        drop(txn);
        node.vote_processor.vote(vote);
    }

    fn node_id_handshake(&self, from: SocketAddr, message: NodeIdHandshake) {
        let Some(node) = self.node() else {
            return;
        };
        if let Some((account, signature)) = message.response {
            if node.peers.validate_syn_cookie(from, &account, &signature) {
                node.peers.insert(from, PROTOCOL_VERSION, Some(account));
                node.observers.notify_peer(from);
                trace!(%from, id = %account, "handshake completed");
            } else {
                node.bad_handshakes.fetch_add(1, Ordering::Relaxed);
                trace!(%from, "bad syn cookie");
            }
        }
        if let Some(query) = message.query {
            let response = Some((
                node.node_id.public,
                sign_message(&node.node_id.raw, &node.node_id.public, &query),
            ));
            let query_back = if node.peers.contains(&from) {
                None
            } else {
                node.peers.assign_syn_cookie(from)
            };
            node.send_handshake(
                from,
                NodeIdHandshake {
                    query: query_back,
                    response,
                },
            );
        }
    }

    fn transaction(&self, from: SocketAddr, tx: Tx) {
        let Some(node) = self.node() else {
            return;
        };
        node.peers.contacted(from, PROTOCOL_VERSION);
        node.processor.add(Block::Tx(tx));
    }

    fn bad_message(&self, _from: SocketAddr) {
        if let Some(node) = self.node() {
            node.bad_messages.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl BootstrapSink for NodeGlue {
    fn block(&self, block: Block) {
        if let Some(node) = self.node() {
            node.processor.add(block);
        }
    }

    fn epoch(&self, epoch: EpochBlock) {
        let Some(node) = self.node() else {
            return;
        };
        match node.epoch_pipeline.process_epoch(&epoch) {
            Ok(EpochProcessResult::Progress) => {
                node.witnesses.on_epoch_committed();
            }
            Ok(result) => trace!(?result, "epoch not applied"),
            Err(e) => warn!(err = %e, "epoch ingest failed"),
        }
    }
}

/// A running node.
pub struct Node {
    pub params: NetworkParams,
    pub config: NodeConfig,
    pub store: Arc<BlockStore>,
    pub epoch_store: Arc<EpochStore>,
    pub ledger: Arc<Ledger>,
    pub genesis: Genesis,
    pub active: Arc<ActiveElections>,
    pub witnesses: Arc<WitnessSet>,
    pub epoch_pipeline: Arc<EpochPipeline>,
    pub peers: Arc<PeerContainer>,
    pub udp: Arc<UdpService>,
    pub bootstrap: Arc<BootstrapInitiator>,
    pub wallet: Arc<Wallet>,
    pub work_pool: Arc<WorkPool>,
    pub processor: Arc<BlockProcessor>,
    pub vote_processor: Arc<VoteProcessor>,
    pub observers: Arc<NodeObservers>,
    node_id: Keypair,
    bootstrap_addr: SocketAddr,
    runtime: Handle,
    stop_tx: watch::Sender<bool>,
    bad_messages: AtomicU64,
    bad_handshakes: AtomicU64,
    glue: Arc<NodeGlue>,
}

impl Node {
    /// Builds and starts a node: opens stores, seeds genesis, binds the
    /// sockets and spawns the periodic tasks.
    pub async fn start(config: NodeConfig) -> Result<Arc<Node>, NodeError> {
        let params = NetworkParams::new(config.network);
        let genesis = Genesis::new(config.network);

        let store = Arc::new(BlockStore::open(&config.data_dir.join("ledger"))?);
        let epoch_store = Arc::new(EpochStore::open(&config.data_dir.join("epoch"))?);
        let ledger = Arc::new(Ledger::new(store.clone()));
        {
            let txn = store.tx_begin_write();
            ledger_genesis::initialize(&ledger, &txn, &genesis)?;
            txn.commit()?;
        }

        let work_pool = Arc::new(WorkPool::new(config.work_threads, params.work_threshold));
        let mut seed = [0; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        let wallet = Arc::new(Wallet::new(RawKey(Buf32(seed)), work_pool.clone()));

        let node_id = {
            let txn = epoch_store.tx_begin_write();
            let raw = epoch_store.get_node_id(&txn)?;
            txn.commit()?;
            let public = derive_public(&raw);
            Keypair { public, raw }
        };

        let glue = NodeGlue::new();
        let active = Arc::new(ActiveElections::new(params.clone(), ledger.clone()));
        let witnesses = Arc::new(WitnessSet::new(params.clone()));
        let epoch_pipeline = Arc::new(EpochPipeline::new(
            params.clone(),
            ledger.clone(),
            epoch_store.clone(),
            None,
        )?);
        let processor = Arc::new(BlockProcessor::new(ledger.clone(), glue.clone()));
        let vote_glue = glue.clone();
        let vote_processor = Arc::new(VoteProcessor::new(
            active.clone(),
            Arc::new(move |vote, code| {
                if let Some(node) = vote_glue.node() {
                    node.vote_processed(vote, code);
                }
            }),
        ));

        let peers = Arc::new(PeerContainer::new(params.syn_cookie_cutoff));
        let udp = Arc::new(
            UdpService::bind(
                SocketAddr::new(config.listen, config.peering_port),
                params.clone(),
            )
            .await?,
        );
        let bootstrap_server = Arc::new(
            BootstrapServer::bind(
                SocketAddr::new(config.listen, config.bootstrap_port),
                params.clone(),
                ledger.clone(),
                epoch_store.clone(),
                glue.clone(),
            )
            .await?,
        );
        let bootstrap_addr = bootstrap_server.local_addr();
        let bootstrap = Arc::new(BootstrapInitiator::new(
            params.clone(),
            ledger.clone(),
            epoch_store.clone(),
            glue.clone(),
            config.max_bootstrap_connections,
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let node = Arc::new(Node {
            params,
            config,
            store,
            epoch_store,
            ledger,
            genesis,
            active,
            witnesses,
            epoch_pipeline,
            peers,
            udp: udp.clone(),
            bootstrap,
            wallet,
            work_pool,
            processor,
            vote_processor,
            observers: Arc::new(NodeObservers::default()),
            node_id,
            bootstrap_addr,
            runtime: Handle::current(),
            stop_tx,
            bad_messages: AtomicU64::new(0),
            bad_handshakes: AtomicU64::new(0),
            glue: glue.clone(),
        });
        glue.bind(&node);

        node.runtime
            .spawn(udp.run(glue.clone(), stop_rx.clone()));
        node.runtime.spawn(bootstrap_server.run(stop_rx.clone()));
        node.runtime
            .spawn(keepalive_loop(node.clone(), stop_rx.clone()));
        node.runtime
            .spawn(announce_loop(node.clone(), stop_rx.clone()));
        node.runtime
            .spawn(epoch_loop(node.clone(), stop_rx.clone()));
        node.runtime
            .spawn(rep_crawl_loop(node.clone(), stop_rx.clone()));
        node.runtime
            .spawn(ongoing_bootstrap_loop(node.clone(), stop_rx.clone()));
        node.runtime.spawn(flush_loop(node.clone(), stop_rx));

        for peer in &node.config.preconfigured_peers {
            node.keepalive_to(peer.clone());
        }

        info!(
            udp = %node.udp.local_addr(),
            tcp = %node.bootstrap_addr,
            "node started"
        );
        node.observers.notify_started();
        Ok(node)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        self.udp.local_addr()
    }

    pub fn bootstrap_addr(&self) -> SocketAddr {
        self.bootstrap_addr
    }

    pub fn node_id(&self) -> &Keypair {
        &self.node_id
    }

    pub fn bad_message_count(&self) -> u64 {
        self.bad_messages.load(Ordering::Relaxed)
    }

    pub fn bad_handshake_count(&self) -> u64 {
        self.bad_handshakes.load(Ordering::Relaxed)
    }

    /// Stops the workers and sockets; tasks notice via the watch channel.
    pub fn stop(&self) {
        info!("node stopping");
        let _ = self.stop_tx.send(true);
        self.bootstrap.stop();
        self.processor.stop();
        self.vote_processor.stop();
        self.work_pool.stop();
        self.observers.notify_disconnect();
    }

    // ---- request entry points ----

    /// Operator-supplied block: queue it ahead of gossip and flood it.
    pub fn process_active(&self, block: Block) {
        self.processor.force(block.clone());
        self.republish(block);
    }

    /// Sends a keepalive to `host:port` once resolution succeeds.
    pub fn keepalive_to(&self, target: String) {
        let glue = self.glue.clone();
        self.runtime.spawn(async move {
            match tokio::net::lookup_host(&target).await {
                Ok(mut addrs) => {
                    if let (Some(addr), Some(node)) = (addrs.next(), glue.node()) {
                        node.send_keepalive(addr);
                        node.peers.insert(addr, PROTOCOL_VERSION, None);
                    }
                }
                Err(e) => warn!(peer = %target, err = %e, "keepalive resolution failed"),
            }
        });
    }

    /// Sends a keepalive datagram listing a sample of our peers.
    pub fn send_keepalive(&self, endpoint: SocketAddr) {
        let udp = self.udp.clone();
        let listed = self.peers.random_peers(weave_net::message::KEEPALIVE_PEERS);
        self.runtime.spawn(async move {
            udp.send_keepalive(endpoint, &listed).await;
        });
    }

    /// Starts a bootstrap attempt against a specific peer.
    pub fn bootstrap_to(
        self: &Arc<Self>,
        peer: SocketAddr,
    ) -> Option<tokio::task::JoinHandle<bool>> {
        let inserted = self.peers.insert(peer, PROTOCOL_VERSION, None);
        if inserted {
            self.observers.notify_peer(peer);
        }
        self.bootstrap.bootstrap(peer)
    }

    /// Starts a bootstrap attempt against the least-recently tried peer.
    pub fn bootstrap_any(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<bool>> {
        let peer = self.peers.bootstrap_peer()?;
        // Bootstrap listens one port above peering by convention.
        let target = SocketAddr::new(peer.ip(), peer.port().wrapping_add(1));
        self.bootstrap.bootstrap(target)
    }

    // ---- internals ----

    fn begin_handshake(&self, endpoint: SocketAddr) {
        if let Some(cookie) = self.peers.assign_syn_cookie(endpoint) {
            self.send_handshake(
                endpoint,
                NodeIdHandshake {
                    query: Some(cookie),
                    response: None,
                },
            );
        }
    }

    fn send_handshake(&self, endpoint: SocketAddr, body: NodeIdHandshake) {
        let udp = self.udp.clone();
        self.runtime.spawn(async move {
            udp.send_handshake(endpoint, body).await;
        });
    }

    fn send_confirm_ack(&self, endpoint: SocketAddr, vote: Vote) {
        let udp = self.udp.clone();
        self.runtime.spawn(async move {
            udp.send_confirm_ack(endpoint, vote).await;
        });
    }

    /// Floods a block to a square-root fanout of random peers.
    fn republish(&self, block: Block) {
        let fanout = self.peers.fanout();
        if fanout == 0 {
            return;
        }
        let targets = self.peers.random_peers(fanout);
        let udp = self.udp.clone();
        self.runtime.spawn(async move {
            for target in targets {
                udp.send_publish(target, block.clone()).await;
            }
        });
    }

    /// Starts an election seeded with the chain's current block for the
    /// contested root.  Challenger blocks arrive with the votes.
    pub fn start_election(&self, existing: Block) {
        let glue = self.glue.clone();
        self.active.start(
            existing,
            Some(Box::new(move |status| {
                if let Some(node) = glue.node() {
                    node.election_confirmed(status.winner);
                }
            })),
        );
    }

    /// A decided election: make the ledger agree with the winner.
    fn election_confirmed(&self, winner: Block) {
        let root = winner.root();
        let result = {
            let txn = self.store.tx_begin_write();
            let result = self.apply_winner(&txn, &winner);
            match &result {
                Ok(()) => {
                    if let Err(e) = txn.commit() {
                        error!(err = %e, "fork resolution commit failed");
                    }
                }
                Err(e) => warn!(err = %e, "fork resolution failed"),
            }
            result
        };
        self.active.erase(&root);
        if result.is_ok() {
            self.republish(winner);
        }
    }

    fn apply_winner(
        &self,
        txn: &weave_store::StoreTransaction<'_>,
        winner: &Block,
    ) -> Result<(), DbError> {
        let outcome = self.ledger.process(txn, winner)?;
        match outcome.code {
            ProcessResult::Progress | ProcessResult::Old => Ok(()),
            ProcessResult::Fork => {
                let existing = self
                    .ledger
                    .forked_block(txn, winner)?
                    .ok_or(DbError::NotFound)?;
                if existing.hash() == winner.hash() {
                    return Ok(());
                }
                self.ledger.rollback(txn, &existing.hash())?;
                let retry = self.ledger.process(txn, winner)?;
                if retry.code != ProcessResult::Progress {
                    warn!(code = ?retry.code, "winner did not apply after rollback");
                }
                Ok(())
            }
            code => {
                debug!(?code, "election winner unusable");
                Ok(())
            }
        }
    }

    /// Signs votes for the block with every wallet account carrying
    /// weight.
    fn generate_votes(&self, block: &Block) -> Result<Vec<Vote>, DbError> {
        let mut votes = Vec::new();
        let txn = self.store.tx_begin_write();
        for account in self.wallet.accounts() {
            let weight = self.ledger.weight(&txn, &account)?;
            if weight.is_zero() {
                continue;
            }
            let sequence = self
                .store
                .vote_current(&txn, &account)?
                .map(|v| v.sequence + 1)
                .unwrap_or(1);
            let mut vote = Vote {
                account,
                sequence,
                block: block.clone(),
                signature: Signature::zero(),
            };
            let digest = vote.hash();
            match self.wallet.sign(&account, &digest) {
                Ok(signature) => vote.signature = signature,
                Err(_) => continue,
            }
            self.store.vote_put(&txn, &vote)?;
            votes.push(vote);
        }
        txn.commit()?;
        Ok(votes)
    }

    /// Post-processing for every ingested vote: persist the winner per rep
    /// and rebroadcast fresh votes to the rep list.
    fn vote_processed(&self, vote: &Vote, code: VoteCode) {
        if code != VoteCode::Vote {
            return;
        }
        self.observers.notify_vote(vote);
        {
            let txn = self.store.tx_begin_write();
            match self.store.vote_max(&txn, vote.clone()) {
                Ok(_) => {
                    if let Err(e) = txn.commit() {
                        warn!(err = %e, "vote persist failed");
                    }
                }
                Err(e) => warn!(err = %e, "vote persist failed"),
            }
        }
        let reps = self.peers.representatives(CONFIRM_REQ_REP_FANOUT);
        let udp = self.udp.clone();
        let vote = vote.clone();
        self.runtime.spawn(async move {
            for rep in reps {
                udp.send_confirm_ack(rep.endpoint, vote.clone()).await;
            }
        });
    }

    /// One epoch tick: drive the local committee round as far as our own
    /// keys allow.
    fn epoch_tick(&self) {
        let committee = {
            let txn = self.store.tx_begin_read();
            match self.witnesses.witnesses(&self.ledger, &txn) {
                Ok(committee) => committee,
                Err(e) => {
                    warn!(err = %e, "witness ranking failed");
                    return;
                }
            }
        };
        if committee.is_empty() {
            return;
        }
        let _ = self
            .epoch_pipeline
            .begin_round(committee.clone(), weave_ledger::now_seconds());

        // Contribute every committee seat our wallet controls.
        let held: Vec<_> = committee
            .iter()
            .filter(|account| self.wallet.contains(account))
            .copied()
            .collect();
        if held.is_empty() {
            return;
        }
        for phase in 0..2 {
            for account in &held {
                let Some(candidate) = self.epoch_pipeline.current_candidate() else {
                    break;
                };
                let digest = candidate.candidate_hash();
                let Ok(signature) = self.wallet.sign(account, &digest) else {
                    continue;
                };
                if phase == 0 {
                    self.epoch_pipeline.pre_vote(*account, signature);
                } else {
                    match self.epoch_pipeline.vote(*account, signature) {
                        Ok(Some(outcome)) => {
                            self.witnesses.on_epoch_committed();
                            if outcome.round_completed {
                                self.witnesses.on_round_completed(outcome.epoch.hash());
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(err = %e, "epoch commit failed"),
                    }
                }
            }
        }
    }
}

async fn keepalive_loop(node: Arc<Node>, mut stop: watch::Receiver<bool>) {
    let period = node.params.keepalive_period;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => if *stop.borrow() { return },
        }
        node.peers.purge(node.params.peer_cutoff);
        node.peers.purge_syn_cookies();
        for peer in node.peers.list() {
            node.send_keepalive(peer);
        }
    }
}

async fn announce_loop(node: Arc<Node>, mut stop: watch::Receiver<bool>) {
    let period = node.params.announce_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => if *stop.borrow() { return },
        }
        let actions = node.active.announce_tick();
        if actions.confirm_reqs.is_empty() && actions.confirmed.is_empty() {
            continue;
        }
        let mut targets: Vec<SocketAddr> = node
            .peers
            .representatives(CONFIRM_REQ_REP_FANOUT)
            .into_iter()
            .map(|p| p.endpoint)
            .collect();
        if targets.is_empty() {
            targets = node.peers.random_peers(node.peers.fanout().max(2));
        }
        for block in actions.confirm_reqs {
            let udp = node.udp.clone();
            let targets = targets.clone();
            node.runtime.spawn(async move {
                for target in targets {
                    udp.send_confirm_req(target, block.clone()).await;
                }
            });
        }
        for status in actions.confirmed {
            node.republish(status.winner);
        }
    }
}

async fn epoch_loop(node: Arc<Node>, mut stop: watch::Receiver<bool>) {
    let period = node.params.epoch_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => if *stop.borrow() { return },
        }
        node.epoch_tick();
    }
}

/// Solicits votes for a random stored block so rep weights attach to
/// peers.
async fn rep_crawl_loop(node: Arc<Node>, mut stop: watch::Receiver<bool>) {
    let period = node.params.keepalive_period;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => if *stop.borrow() { return },
        }
        let sample = {
            let txn = node.store.tx_begin_read();
            node.store.block_random(&txn).ok().flatten()
        };
        let Some(block) = sample else {
            continue;
        };
        for target in node.peers.random_peers(node.peers.fanout().max(2)) {
            let udp = node.udp.clone();
            let block = block.clone();
            node.runtime.spawn(async move {
                udp.send_confirm_req(target, block).await;
            });
        }
    }
}

/// Periodically re-syncs against the least-recently tried peer.
async fn ongoing_bootstrap_loop(node: Arc<Node>, mut stop: watch::Receiver<bool>) {
    let period = node.params.keepalive_period * 10;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => if *stop.borrow() { return },
        }
        if node.bootstrap.in_progress() || node.peers.is_empty() {
            continue;
        }
        let _ = node.bootstrap_any();
    }
}

/// Largest unchecked table we tolerate before evicting wholesale.
const UNCHECKED_BOUND: u64 = 64 * 1024;

/// Persists the vote cache and bounds the unchecked table on a slow
/// cadence.
async fn flush_loop(node: Arc<Node>, mut stop: watch::Receiver<bool>) {
    let period = node.params.keepalive_period * 2;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => if *stop.borrow() { return },
        }
        let txn = node.store.tx_begin_write();
        let flushed = node.store.flush(&txn);
        let over_bound = matches!(
            node.store.unchecked_count(&txn),
            Ok(count) if count > UNCHECKED_BOUND
        );
        if over_bound {
            debug!("unchecked table over bound, clearing");
            if let Err(e) = node.store.unchecked_clear(&txn) {
                warn!(err = %e, "unchecked cleanup failed");
            }
        }
        if flushed.is_ok() {
            if let Err(e) = txn.commit() {
                warn!(err = %e, "vote cache flush failed");
            }
        }
    }
}
