//! Bootstrap server: accepts framed requests over TCP and streams store
//! contents back.  One request per connection; after a response completes
//! the server waits for the next request on the same socket.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::*;

use weave_ledger::Ledger;
use weave_net::message::{BulkPullBlocksMode, Message};
use weave_net::NetError;
use weave_primitives::params::NetworkParams;
use weave_primitives::{BlockHash, Buf32, EpochHash};
use weave_state::{Block, EpochBlock};
use weave_store::EpochStore;

use crate::wire;

/// Where pushed blocks and epochs land; the node routes them into its
/// processors.
pub trait BootstrapSink: Send + Sync {
    fn block(&self, block: Block);
    fn epoch(&self, epoch: EpochBlock);
}

/// TCP listener answering bootstrap requests from the stores.
pub struct BootstrapServer {
    params: NetworkParams,
    ledger: Arc<Ledger>,
    epoch_store: Arc<EpochStore>,
    sink: Arc<dyn BootstrapSink>,
    listener: TcpListener,
    local: SocketAddr,
}

impl BootstrapServer {
    pub async fn bind(
        addr: SocketAddr,
        params: NetworkParams,
        ledger: Arc<Ledger>,
        epoch_store: Arc<EpochStore>,
        sink: Arc<dyn BootstrapSink>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "bootstrap listener bound");
        Ok(Self {
            params,
            ledger,
            epoch_store,
            sink,
            listener,
            local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Accept loop; connections are served concurrently until `stop`.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        loop {
            let (stream, remote) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(err = %e, "bootstrap accept failed");
                        continue;
                    }
                },
                _ = stop.changed() => {
                    if *stop.borrow() {
                        debug!("bootstrap listener stopping");
                        return;
                    }
                    continue;
                }
            };
            trace!(%remote, "bootstrap connection");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(stream).await {
                    trace!(%remote, err = %e, "bootstrap connection closed");
                }
            });
        }
    }

    /// Serves framed requests on one socket until it closes or errors.
    async fn serve_connection(&self, mut stream: TcpStream) -> Result<(), NetError> {
        loop {
            let request = wire::read_request(&mut stream, &self.params).await?;
            match request {
                Message::FrontierReq(req) => {
                    self.serve_frontiers(&mut stream, req.start, req.age, req.count)
                        .await?
                }
                Message::BulkPull(req) => {
                    self.serve_bulk_pull(&mut stream, req.start, req.end).await?
                }
                Message::BulkPullBlocks(req) => {
                    self.serve_bulk_pull_blocks(
                        &mut stream,
                        req.min_hash,
                        req.max_hash,
                        req.mode,
                        req.max_count,
                    )
                    .await?
                }
                Message::BulkPush => self.serve_bulk_push(&mut stream).await?,
                Message::EpochReq(req) => {
                    self.serve_epoch_req(&mut stream, req.count).await?
                }
                Message::EpochBulkPull(req) => {
                    self.serve_epoch_bulk_pull(&mut stream, req.start, req.end)
                        .await?
                }
                Message::EpochBulkPush => self.serve_epoch_bulk_push(&mut stream).await?,
                _ => return Err(NetError::Parse(weave_net::ParseStatus::InvalidMessageType)),
            }
        }
    }

    async fn serve_frontiers(
        &self,
        stream: &mut TcpStream,
        start: Buf32,
        age: u32,
        count: u32,
    ) -> Result<(), NetError> {
        let now = weave_ledger::now_seconds();
        let rows = {
            let txn = self.ledger.store().tx_begin_read();
            let mut rows = Vec::new();
            for item in self
                .ledger
                .store()
                .latest_begin_at(&txn, &start)
                .map_err(store_err)?
            {
                let (account, info) = item.map_err(store_err)?;
                if age != u32::MAX && now.saturating_sub(info.modified) > age as u64 {
                    continue;
                }
                rows.push((account, info.head));
                if rows.len() as u32 >= count {
                    break;
                }
            }
            rows
        };
        for (account, head) in rows {
            wire::write_frontier_pair(stream, &account, &head).await?;
        }
        wire::write_frontier_pair(stream, &Buf32::zero(), &Buf32::zero()).await
    }

    async fn serve_bulk_pull(
        &self,
        stream: &mut TcpStream,
        start: Buf32,
        end: BlockHash,
    ) -> Result<(), NetError> {
        let blocks = {
            let txn = self.ledger.store().tx_begin_read();
            let mut current = match self.ledger.store().account_get(&txn, &start).map_err(store_err)? {
                Some(info) => info.head,
                // Not an account; treat the start as a block hash.
                None => start,
            };
            let mut blocks = Vec::new();
            while !current.is_zero() && current != end {
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
        for block in &blocks {
            wire::write_block_entry(stream, block).await?;
        }
        wire::write_block_terminator(stream).await
    }

    async fn serve_bulk_pull_blocks(
        &self,
        stream: &mut TcpStream,
        min_hash: BlockHash,
        max_hash: BlockHash,
        mode: BulkPullBlocksMode,
        max_count: u32,
    ) -> Result<(), NetError> {
        // Collect matching blocks across every variant table.
        let blocks = {
            let txn = self.ledger.store().tx_begin_read();
            let mut blocks: Vec<(BlockHash, Block)> = Vec::new();
            let in_range = |hash: &BlockHash| *hash >= min_hash && *hash <= max_hash;
            // Walk frontiers back; every stored block is reachable from an
            // account head.
            for item in self.ledger.store().latest_begin(&txn).map_err(store_err)? {
                let (_, info) = item.map_err(store_err)?;
                let mut current = info.head;
                while !current.is_zero() {
                    let Some(block) = self
                        .ledger
                        .store()
                        .block_get(&txn, &current)
                        .map_err(store_err)?
                    else {
                        break;
                    };
                    if in_range(&current) {
                        blocks.push((current, block.clone()));
                    }
                    current = block.previous();
                }
            }
            blocks
        };

        match mode {
            BulkPullBlocksMode::ListBlocks => {
                let limit = if max_count == 0 {
                    usize::MAX
                } else {
                    max_count as usize
                };
                for (_, block) in blocks.iter().take(limit) {
                    wire::write_block_entry(stream, block).await?;
                }
                wire::write_block_terminator(stream).await
            }
            BulkPullBlocksMode::ChecksumBlocks => {
                let mut checksum = Buf32::zero();
                for (hash, _) in &blocks {
                    checksum ^= *hash;
                }
                wire::write_block_terminator(stream).await?;
                wire::write_hash_entry(stream, &checksum).await
            }
        }
    }

    async fn serve_bulk_push(&self, stream: &mut TcpStream) -> Result<(), NetError> {
        let mut received = 0u64;
        while let Some(block) = wire::read_block_entry(stream).await? {
            self.sink.block(block);
            received += 1;
        }
        debug!(received, "bulk push drained");
        Ok(())
    }

    async fn serve_epoch_req(&self, stream: &mut TcpStream, count: u32) -> Result<(), NetError> {
        // List the epoch chain from the tip backward so the client can
        // find the common ancestor.
        let hashes = {
            let txn = self.epoch_store.tx_begin_read();
            let mut head = EpochHash::zero();
            for item in self.epoch_store.latest_begin(&txn).map_err(store_err)? {
                let (hash, _) = item.map_err(store_err)?;
                if self
                    .epoch_store
                    .block_successor(&txn, &hash)
                    .map_err(store_err)?
                    .is_zero()
                {
                    head = hash;
                }
            }
            let mut hashes = Vec::new();
            let mut current = head;
            while !current.is_zero() && (count == 0 || hashes.len() < count as usize) {
                hashes.push(current);
                match self
                    .epoch_store
                    .block_get(&txn, &current)
                    .map_err(store_err)?
                {
                    Some(epoch) => current = epoch.previous,
                    None => break,
                }
            }
            hashes
        };
        for hash in &hashes {
            wire::write_hash_entry(stream, hash).await?;
        }
        wire::write_hash_entry(stream, &Buf32::zero()).await
    }

    async fn serve_epoch_bulk_pull(
        &self,
        stream: &mut TcpStream,
        start: EpochHash,
        end: EpochHash,
    ) -> Result<(), NetError> {
        let epochs = {
            let txn = self.epoch_store.tx_begin_read();
            let mut current = start;
            let mut epochs = Vec::new();
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
        for epoch in &epochs {
            wire::write_epoch_entry(stream, epoch).await?;
        }
        wire::write_epoch_terminator(stream).await
    }

    async fn serve_epoch_bulk_push(&self, stream: &mut TcpStream) -> Result<(), NetError> {
        let mut received = 0u64;
        let mut batch = Vec::new();
        while let Some(epoch) = wire::read_epoch_entry(stream).await? {
            batch.push(epoch);
            received += 1;
        }
        // Pushed newest-first; apply oldest-first.
        for epoch in batch.into_iter().rev() {
            self.sink.epoch(epoch);
        }
        debug!(received, "epoch bulk push drained");
        Ok(())
    }
}

fn store_err(e: weave_db::DbError) -> NetError {
    NetError::Io(std::io::Error::other(e.to_string()))
}
