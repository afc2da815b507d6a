//! Bootstrap client: frontier diffing, pull/push streaming and the
//! attempt that orchestrates them over a pool of connections.
//!
//! Each connection is a plain async state machine (connect, send the
//! framed request, stream the response), so cancellation is just closing
//! the socket.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::*;

use weave_ledger::Ledger;
use weave_net::message::{BulkPull, EpochBulkPull, EpochReq, FrontierReq, Message};
use weave_net::NetError;
use weave_primitives::params::NetworkParams;
use weave_primitives::{Account, BlockHash, Buf32, EpochHash};
use weave_state::EpochBlock;
use weave_store::EpochStore;

use crate::server::BootstrapSink;
use crate::wire;

/// Most times a pull may be requeued before it is abandoned.
const PULL_RETRY_LIMIT: u32 = 16;
/// New connections allowed per spawn tick.
const MAX_NEW_CONNECTIONS_PER_TICK: usize = 10;
/// Pool scaling: target connections per outstanding pull.
const PULLS_PER_CONNECTION_SCALE: usize = 1;
/// Connections below this observed rate get culled under pressure.
const MIN_BLOCK_RATE: f64 = 10.0;
/// A connection below the minimum rate for this long is force-stopped.
const SLOW_CONNECTION_GRACE: Duration = Duration::from_secs(30);

/// One account chain to fetch: the peer's head and where our chain ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PullInfo {
    pub account: Account,
    /// Frontier the peer advertised.
    pub head: BlockHash,
    /// Our head for the account; the pull stops there.
    pub end: BlockHash,
    pub attempts: u32,
}

/// One account chain to push: blocks from our head down to theirs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushInfo {
    pub account: Account,
    pub head: BlockHash,
    /// The peer's head, or zero when it lacks the account entirely.
    pub end: BlockHash,
}

#[derive(Default)]
struct AttemptState {
    pulls: VecDeque<PullInfo>,
    pushes: Vec<PushInfo>,
    connections: usize,
}

/// A single bootstrap run against one peer.
pub struct BootstrapAttempt {
    params: NetworkParams,
    ledger: Arc<Ledger>,
    epoch_store: Arc<EpochStore>,
    sink: Arc<dyn BootstrapSink>,
    peer: SocketAddr,
    max_connections: usize,
    state: Mutex<AttemptState>,
    stopped: AtomicBool,
    pulled_blocks: AtomicU64,
}

impl BootstrapAttempt {
    pub fn new(
        params: NetworkParams,
        ledger: Arc<Ledger>,
        epoch_store: Arc<EpochStore>,
        sink: Arc<dyn BootstrapSink>,
        peer: SocketAddr,
        max_connections: usize,
    ) -> Self {
        Self {
            params,
            ledger,
            epoch_store,
            sink,
            peer,
            max_connections,
            state: Mutex::new(AttemptState::default()),
            stopped: AtomicBool::new(false),
            pulled_blocks: AtomicU64::new(0),
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn pulled_blocks(&self) -> u64 {
        self.pulled_blocks.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<TcpStream, NetError> {
        let stream = timeout(wire::IO_TIMEOUT, TcpStream::connect(self.peer))
            .await
            .map_err(|_| NetError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Full attempt: frontier diff, pulls, push, then the epoch chain.
    pub async fn run(self: Arc<Self>) -> Result<(), NetError> {
        info!(peer = %self.peer, "bootstrap attempt started");
        self.request_frontiers().await?;
        self.run_pulls().await?;
        if self.stopped() {
            return Ok(());
        }
        if let Err(e) = self.push_blocks().await {
            // Push failures don't fail the attempt.
            warn!(err = %e, "bulk push failed");
        }
        self.sync_epochs().await?;
        info!(
            peer = %self.peer,
            pulled = self.pulled_blocks(),
            "bootstrap attempt finished"
        );
        Ok(())
    }

    /// Streams the peer's frontiers and diffs them against ours.
    async fn request_frontiers(&self) -> Result<(), NetError> {
        let mut stream = self.connect().await?;
        wire::write_request(
            &mut stream,
            &self.params,
            &Message::FrontierReq(FrontierReq {
                start: Buf32::zero(),
                age: u32::MAX,
                count: u32::MAX,
            }),
        )
        .await?;

        let mut their_accounts = Vec::new();
        let mut pulls = Vec::new();
        let mut pushes = Vec::new();
        while let Some((account, their_head)) = wire::read_frontier_pair(&mut stream).await? {
            their_accounts.push(account);
            let txn = self.ledger.store().tx_begin_read();
            let our_head = self
                .ledger
                .latest(&txn, &account)
                .map_err(store_err)?
                .unwrap_or_else(BlockHash::zero);
            if our_head == their_head {
                continue;
            }
            let we_have_theirs = self
                .ledger
                .block_exists(&txn, &their_head)
                .map_err(store_err)?;
            if we_have_theirs {
                // Their frontier is inside our chain; we're ahead.
                pushes.push(PushInfo {
                    account,
                    head: our_head,
                    end: their_head,
                });
            } else {
                pulls.push(PullInfo {
                    account,
                    head: their_head,
                    end: our_head,
                    attempts: 0,
                });
            }
        }

        // Accounts the peer never listed are all push candidates.
        {
            let txn = self.ledger.store().tx_begin_read();
            for item in self.ledger.store().latest_begin(&txn).map_err(store_err)? {
                let (account, info) = item.map_err(store_err)?;
                if !their_accounts.contains(&account) {
                    pushes.push(PushInfo {
                        account,
                        head: info.head,
                        end: BlockHash::zero(),
                    });
                }
            }
        }

        debug!(pulls = pulls.len(), pushes = pushes.len(), "frontier diff");
        let mut state = self.state.lock();
        state.pulls = pulls.into();
        state.pushes = pushes;
        Ok(())
    }

    /// Runs pull workers until the queue drains, scaling the pool to the
    /// backlog.
    async fn run_pulls(self: &Arc<Self>) -> Result<(), NetError> {
        let mut workers = Vec::new();
        loop {
            if self.stopped() {
                break;
            }
            let (outstanding, connections) = {
                let state = self.state.lock();
                (state.pulls.len(), state.connections)
            };
            if outstanding == 0 && connections == 0 {
                break;
            }
            let target = self
                .max_connections
                .min(outstanding * PULLS_PER_CONNECTION_SCALE)
                .max(1);
            let mut to_spawn = target.saturating_sub(connections);
            to_spawn = to_spawn.min(MAX_NEW_CONNECTIONS_PER_TICK);
            if outstanding > 0 {
                for _ in 0..to_spawn {
                    self.state.lock().connections += 1;
                    let attempt = self.clone();
                    workers.push(tokio::spawn(async move {
                        attempt.pull_worker().await;
                    }));
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            workers.retain(|w| !w.is_finished());
        }
        for worker in workers {
            let _ = worker.await;
        }
        Ok(())
    }

    /// One pooled connection: pop pulls and stream them until the queue is
    /// empty or the connection goes cold.
    async fn pull_worker(self: Arc<Self>) {
        let started = Instant::now();
        let mut pulled: u64 = 0;
        loop {
            if self.stopped() {
                break;
            }
            let Some(pull) = self.state.lock().pulls.pop_front() else {
                break;
            };
            match self.run_single_pull(&pull).await {
                Ok(count) => {
                    pulled += count;
                    self.pulled_blocks.fetch_add(count, Ordering::SeqCst);
                }
                Err(e) => {
                    trace!(account = %pull.account, err = %e, "pull failed");
                    self.requeue_pull(pull);
                    break;
                }
            }
            // Cull a connection that has gone slow under pressure.
            let elapsed = started.elapsed();
            if elapsed > SLOW_CONNECTION_GRACE {
                let rate = pulled as f64 / elapsed.as_secs_f64();
                if rate < MIN_BLOCK_RATE {
                    debug!(rate, "dropping slow bootstrap connection");
                    break;
                }
            }
        }
        self.state.lock().connections -= 1;
    }

    /// Pulls one account chain; returns how many blocks streamed in.
    async fn run_single_pull(&self, pull: &PullInfo) -> Result<u64, NetError> {
        let mut stream = self.connect().await?;
        wire::write_request(
            &mut stream,
            &self.params,
            &Message::BulkPull(BulkPull {
                start: pull.account,
                end: pull.end,
            }),
        )
        .await?;

        let mut count = 0u64;
        let mut first = true;
        while let Some(block) = wire::read_block_entry(&mut stream).await? {
            if first {
                first = false;
                // The stream must start at the advertised frontier.
                if block.hash() != pull.head {
                    return Err(NetError::Closed);
                }
            }
            self.sink.block(block);
            count += 1;
        }
        trace!(account = %pull.account, count, "pull complete");
        Ok(count)
    }

    fn requeue_pull(&self, mut pull: PullInfo) {
        pull.attempts += 1;
        if pull.attempts >= PULL_RETRY_LIMIT {
            warn!(account = %pull.account, "pull abandoned after retries");
            return;
        }
        let mut state = self.state.lock();
        if pull.attempts + 1 == PULL_RETRY_LIMIT {
            // Last chance goes to the front so the frontier peer serves it.
            state.pulls.push_front(pull);
        } else {
            state.pulls.push_back(pull);
        }
    }

    /// Streams the chains the peer is missing.
    async fn push_blocks(&self) -> Result<(), NetError> {
        let pushes = std::mem::take(&mut self.state.lock().pushes);
        if pushes.is_empty() {
            return Ok(());
        }
        let mut stream = self.connect().await?;
        wire::write_request(&mut stream, &self.params, &Message::BulkPush).await?;
        let mut sent = 0u64;
        for push in pushes {
            let blocks = {
                let txn = self.ledger.store().tx_begin_read();
                let mut blocks = Vec::new();
                let mut current = push.head;
                while !current.is_zero() && current != push.end {
                    let Some(block) = self
                        .ledger
                        .store()
                        .block_get(&txn, &current)
                        .map_err(store_err)?
                    else {
                        break;
                    };
                    current = block.previous();
                    blocks.push(block);
                }
                blocks
            };
            // Oldest first so the receiving processor applies in order.
            for block in blocks.iter().rev() {
                wire::write_block_entry(&mut stream, block).await?;
                sent += 1;
            }
        }
        wire::write_block_terminator(&mut stream).await?;
        debug!(sent, "bulk push complete");
        Ok(())
    }

    /// Brings the epoch chain into sync, pulling what the peer has and
    /// pushing what it lacks.
    async fn sync_epochs(&self) -> Result<(), NetError> {
        let mut stream = self.connect().await?;
        wire::write_request(
            &mut stream,
            &self.params,
            &Message::EpochReq(EpochReq {
                start: Buf32::zero(),
                age: u32::MAX,
                count: 0,
            }),
        )
        .await?;
        // Tip-first listing of the peer's epoch chain.
        let mut their_chain = Vec::new();
        while let Some(hash) = wire::read_hash_entry(&mut stream).await? {
            their_chain.push(hash);
        }

        let (known, our_head) = {
            let txn = self.epoch_store.tx_begin_read();
            let mut known = Vec::new();
            let mut our_head = EpochHash::zero();
            for hash in &their_chain {
                if self.epoch_store.block_exists(&txn, hash).map_err(store_err)? {
                    known.push(*hash);
                }
            }
            for item in self.epoch_store.latest_begin(&txn).map_err(store_err)? {
                let (hash, _) = item.map_err(store_err)?;
                if self
                    .epoch_store
                    .block_successor(&txn, &hash)
                    .map_err(store_err)?
                    .is_zero()
                {
                    our_head = hash;
                }
            }
            (known, our_head)
        };

        match their_chain.first() {
            Some(their_head) if !known.contains(their_head) => {
                // They have epochs we lack: pull down to the newest common
                // ancestor.
                let common = known.first().copied().unwrap_or_else(EpochHash::zero);
                let epochs = self.pull_epochs(*their_head, common).await?;
                for epoch in epochs.into_iter().rev() {
                    self.sink.epoch(epoch);
                }
            }
            _ => {}
        }

        if !our_head.is_zero() && !their_chain.contains(&our_head) {
            // We're ahead; push our tail.
            let common = their_chain.first().copied().unwrap_or_else(EpochHash::zero);
            if let Err(e) = self.push_epochs(our_head, common).await {
                warn!(err = %e, "epoch push failed");
            }
        }
        Ok(())
    }

    async fn pull_epochs(
        &self,
        start: EpochHash,
        end: EpochHash,
    ) -> Result<Vec<EpochBlock>, NetError> {
        let mut stream = self.connect().await?;
        wire::write_request(
            &mut stream,
            &self.params,
            &Message::EpochBulkPull(EpochBulkPull { start, end }),
        )
        .await?;
        let mut epochs = Vec::new();
        while let Some(epoch) = wire::read_epoch_entry(&mut stream).await? {
            epochs.push(epoch);
        }
        Ok(epochs)
    }

    async fn push_epochs(&self, head: EpochHash, end: EpochHash) -> Result<(), NetError> {
        let epochs = {
            let txn = self.epoch_store.tx_begin_read();
            let mut epochs = Vec::new();
            let mut current = head;
            while !current.is_zero() && current != end {
                let Some(epoch) = self
                    .epoch_store
                    .block_get(&txn, &current)
                    .map_err(store_err)?
                else {
                    break;
                };
                current = epoch.previous;
                epochs.push(epoch);
            }
            epochs
        };
        let mut stream = self.connect().await?;
        wire::write_request(&mut stream, &self.params, &Message::EpochBulkPush).await?;
        for epoch in &epochs {
            wire::write_epoch_entry(&mut stream, epoch).await?;
        }
        wire::write_epoch_terminator(&mut stream).await
    }
}

/// Owns bootstrap attempts; one runs at a time.
pub struct BootstrapInitiator {
    params: NetworkParams,
    ledger: Arc<Ledger>,
    epoch_store: Arc<EpochStore>,
    sink: Arc<dyn BootstrapSink>,
    max_connections: usize,
    current: Mutex<Option<Arc<BootstrapAttempt>>>,
}

impl BootstrapInitiator {
    pub fn new(
        params: NetworkParams,
        ledger: Arc<Ledger>,
        epoch_store: Arc<EpochStore>,
        sink: Arc<dyn BootstrapSink>,
        max_connections: usize,
    ) -> Self {
        Self {
            params,
            ledger,
            epoch_store,
            sink,
            max_connections,
            current: Mutex::new(None),
        }
    }

    /// Starts an attempt against `peer` unless one is still running.
    /// Returns a handle that resolves when the attempt finishes.
    pub fn bootstrap(
        self: &Arc<Self>,
        peer: SocketAddr,
    ) -> Option<tokio::task::JoinHandle<bool>> {
        let mut current = self.current.lock();
        if current.is_some() {
            debug!("bootstrap already in progress");
            return None;
        }
        let attempt = Arc::new(BootstrapAttempt::new(
            self.params.clone(),
            self.ledger.clone(),
            self.epoch_store.clone(),
            self.sink.clone(),
            peer,
            self.max_connections,
        ));
        *current = Some(attempt.clone());
        let initiator = self.clone();
        Some(tokio::spawn(async move {
            let ok = match attempt.run().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(err = %e, "bootstrap attempt failed");
                    false
                }
            };
            initiator.current.lock().take();
            ok
        }))
    }

    pub fn in_progress(&self) -> bool {
        self.current.lock().is_some()
    }

    pub fn stop(&self) {
        if let Some(attempt) = self.current.lock().as_ref() {
            attempt.stop();
        }
    }
}

fn store_err(e: weave_db::DbError) -> NetError {
    NetError::Io(std::io::Error::other(e.to_string()))
}

/// One-shot range pull: every block whose hash falls in `[min, max]`.
pub async fn pull_blocks_list(
    params: &NetworkParams,
    peer: SocketAddr,
    min_hash: Buf32,
    max_hash: Buf32,
    max_count: u32,
) -> Result<Vec<weave_state::Block>, NetError> {
    let mut stream = timeout(wire::IO_TIMEOUT, TcpStream::connect(peer))
        .await
        .map_err(|_| NetError::Timeout)??;
    wire::write_request(
        &mut stream,
        params,
        &Message::BulkPullBlocks(weave_net::message::BulkPullBlocks {
            min_hash,
            max_hash,
            mode: weave_net::message::BulkPullBlocksMode::ListBlocks,
            max_count,
        }),
    )
    .await?;
    let mut blocks = Vec::new();
    while let Some(block) = wire::read_block_entry(&mut stream).await? {
        blocks.push(block);
    }
    Ok(blocks)
}

/// Asks a peer for the XOR of every block hash in `[min, max]`; a cheap
/// equality probe before committing to a full pull.
pub async fn remote_checksum(
    params: &NetworkParams,
    peer: SocketAddr,
    min_hash: Buf32,
    max_hash: Buf32,
) -> Result<Buf32, NetError> {
    let mut stream = timeout(wire::IO_TIMEOUT, TcpStream::connect(peer))
        .await
        .map_err(|_| NetError::Timeout)??;
    wire::write_request(
        &mut stream,
        params,
        &Message::BulkPullBlocks(weave_net::message::BulkPullBlocks {
            min_hash,
            max_hash,
            mode: weave_net::message::BulkPullBlocksMode::ChecksumBlocks,
            max_count: 0,
        }),
    )
    .await?;
    // Checksum responses are the bare terminator followed by the digest.
    if wire::read_block_entry(&mut stream).await?.is_some() {
        return Err(NetError::Closed);
    }
    wire::read_hash_entry(&mut stream)
        .await?
        .ok_or(NetError::Closed)
}
