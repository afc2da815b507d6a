//! Single-writer block ingest.
//!
//! One worker thread drains a bounded queue, applies each block under a
//! write transaction and hands the verdicts to an observer.  A separate
//! forced queue lets operator-supplied blocks jump the line.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::*;

use weave_ledger::{Ledger, ProcessResult, ProcessReturn};
use weave_state::Block;

/// Queue bound; producers drop blocks past it and the drop is counted.
const QUEUE_BOUND: usize = 16 * 1024;

/// Gets told what happened to every block the worker touched.
pub trait ProcessorObserver: Send + Sync {
    /// A block went through the ledger; `result.code` says how it fared.
    fn block_processed(&self, block: &Block, result: &ProcessReturn);

    /// An incoming block contests a stored one for the same root.
    fn fork(&self, incoming: Block, existing: Block);
}

#[derive(Default)]
struct Queues {
    blocks: VecDeque<Block>,
    forced: VecDeque<Block>,
    /// Worker is between popping and finishing a batch.
    busy: bool,
    stopped: bool,
    dropped: u64,
}

struct Shared {
    queues: Mutex<Queues>,
    work: Condvar,
    idle: Condvar,
}

/// Concurrency-isolated ingest feeding the ledger.
pub struct BlockProcessor {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BlockProcessor {
    pub fn new(ledger: Arc<Ledger>, observer: Arc<dyn ProcessorObserver>) -> Self {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("blk-processor".into())
            .spawn(move || worker_loop(worker_shared, ledger, observer))
            .expect("spawn block processor");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Queues a block for processing.  Full queues drop and count.
    pub fn add(&self, block: Block) {
        let mut queues = self.shared.queues.lock();
        if queues.blocks.len() >= QUEUE_BOUND {
            queues.dropped += 1;
            return;
        }
        queues.blocks.push_back(block);
        self.shared.work.notify_one();
    }

    /// Queues a block ahead of normal ordering.
    pub fn force(&self, block: Block) {
        let mut queues = self.shared.queues.lock();
        queues.forced.push_back(block);
        self.shared.work.notify_one();
    }

    /// Barrier: returns once everything queued before the call has been
    /// processed.
    pub fn flush(&self) {
        let mut queues = self.shared.queues.lock();
        while !queues.stopped
            && (queues.busy || !queues.blocks.is_empty() || !queues.forced.is_empty())
        {
            self.shared.idle.wait(&mut queues);
        }
    }

    pub fn queue_len(&self) -> usize {
        let queues = self.shared.queues.lock();
        queues.blocks.len() + queues.forced.len()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.queues.lock().dropped
    }

    pub fn stop(&self) {
        let mut queues = self.shared.queues.lock();
        queues.stopped = true;
        self.shared.work.notify_all();
        self.shared.idle.notify_all();
    }
}

impl Drop for BlockProcessor {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, ledger: Arc<Ledger>, observer: Arc<dyn ProcessorObserver>) {
    loop {
        let batch = {
            let mut queues = shared.queues.lock();
            while !queues.stopped && queues.blocks.is_empty() && queues.forced.is_empty() {
                shared.work.wait(&mut queues);
            }
            if queues.stopped {
                return;
            }
            let mut batch: VecDeque<Block> = std::mem::take(&mut queues.forced);
            batch.extend(queues.blocks.drain(..));
            queues.busy = true;
            batch
        };

        if let Err(e) = process_batch(&ledger, &observer, batch) {
            // Store failure: the transaction aborted, nothing committed.
            error!(err = %e, "block batch aborted");
        }

        let mut queues = shared.queues.lock();
        queues.busy = false;
        shared.idle.notify_all();
    }
}

fn process_batch(
    ledger: &Ledger,
    observer: &Arc<dyn ProcessorObserver>,
    mut batch: VecDeque<Block>,
) -> weave_db::DbResult<()> {
    let store = ledger.store();
    let txn = store.tx_begin_write();
    while let Some(block) = batch.pop_front() {
        let hash = block.hash();
        let result = ledger.process(&txn, &block)?;
        match result.code {
            ProcessResult::Progress => {
                trace!(%hash, "processed");
                // Anything parked on this hash can run now.
                for parked in store.unchecked_get(&txn, &hash)? {
                    store.unchecked_del(&txn, &hash, &parked)?;
                    batch.push_back(parked);
                }
            }
            ProcessResult::GapPrevious => {
                trace!(%hash, "gap previous");
                store.unchecked_put(&txn, &block.previous(), &block)?;
            }
            ProcessResult::GapSource => {
                trace!(%hash, "gap source");
                store.unchecked_put(&txn, &block.source(), &block)?;
            }
            ProcessResult::Fork => {
                if let Some(existing) = ledger.forked_block(&txn, &block)? {
                    warn!(%hash, existing = %existing.hash(), "fork");
                    observer.fork(block.clone(), existing);
                }
            }
            ProcessResult::Old => trace!(%hash, "old"),
            code => debug!(%hash, ?code, "block rejected"),
        }
        observer.block_processed(&block, &result);
    }
    store.flush(&txn)?;
    txn.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;
    use weave_ledger::genesis::initialize;
    use weave_primitives::crypto::Keypair;
    use weave_primitives::params::Network;
    use weave_primitives::{Amount, Buf32};
    use weave_state::genesis::{genesis_amount, test_genesis_key, Genesis};
    use weave_state::{OpenBlock, SendBlock};
    use weave_store::test_utils::get_test_store;

    #[derive(Default)]
    struct Recorder {
        results: PMutex<Vec<(Buf32, ProcessResult)>>,
        forks: PMutex<Vec<(Buf32, Buf32)>>,
    }

    impl ProcessorObserver for Recorder {
        fn block_processed(&self, block: &Block, result: &ProcessReturn) {
            self.results.lock().push((block.hash(), result.code));
        }

        fn fork(&self, incoming: Block, existing: Block) {
            self.forks.lock().push((incoming.hash(), existing.hash()));
        }
    }

    fn setup() -> (
        tempfile::TempDir,
        Arc<Ledger>,
        Genesis,
        Arc<Recorder>,
        BlockProcessor,
    ) {
        let (dir, store) = get_test_store();
        let ledger = Arc::new(Ledger::new(store));
        let genesis = Genesis::new(Network::Test);
        let txn = ledger.store().tx_begin_write();
        initialize(&ledger, &txn, &genesis).unwrap();
        txn.commit().unwrap();
        let recorder = Arc::new(Recorder::default());
        let processor = BlockProcessor::new(ledger.clone(), recorder.clone());
        (dir, ledger, genesis, recorder, processor)
    }

    #[test]
    fn test_progress_and_flush() {
        let (_d, ledger, genesis, recorder, processor) = setup();
        let gkey = test_genesis_key();
        let send = Block::Send(SendBlock::new(
            genesis.hash(),
            Keypair::generate().public,
            Amount(genesis_amount().number() - 9),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        processor.add(send.clone());
        processor.flush();

        let txn = ledger.store().tx_begin_read();
        assert!(ledger.block_exists(&txn, &send.hash()).unwrap());
        assert_eq!(
            recorder.results.lock().as_slice(),
            &[(send.hash(), ProcessResult::Progress)]
        );
    }

    #[test]
    fn test_gap_heals_in_order() {
        let (_d, ledger, genesis, _recorder, processor) = setup();
        let gkey = test_genesis_key();
        let key2 = Keypair::generate();
        let send = Block::Send(SendBlock::new(
            genesis.hash(),
            key2.public,
            Amount(genesis_amount().number() - 5),
            &gkey.raw,
            &gkey.public,
            0,
        ));
        let open = Block::Open(OpenBlock::new(
            send.hash(),
            key2.public,
            &key2.raw,
            &key2.public,
            0,
        ));

        // Child first: parks as gap_source, then the send heals it.
        processor.add(open.clone());
        processor.flush();
        {
            let txn = ledger.store().tx_begin_read();
            assert!(!ledger.block_exists(&txn, &open.hash()).unwrap());
            assert_eq!(ledger.store().unchecked_count(&txn).unwrap(), 1);
        }

        processor.add(send.clone());
        processor.flush();
        let txn = ledger.store().tx_begin_read();
        assert!(ledger.block_exists(&txn, &send.hash()).unwrap());
        assert!(ledger.block_exists(&txn, &open.hash()).unwrap());
        assert_eq!(ledger.store().unchecked_count(&txn).unwrap(), 0);
    }

    #[test]
    fn test_fork_reported() {
        let (_d, _ledger, genesis, recorder, processor) = setup();
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
        processor.add(a.clone());
        processor.add(b.clone());
        processor.flush();
        assert_eq!(recorder.forks.lock().as_slice(), &[(b.hash(), a.hash())]);
    }
}
