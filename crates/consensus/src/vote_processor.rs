//! Arrival-ordered vote ingest feeding the elections.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::*;

use weave_state::{Vote, VoteCode};

use crate::active::ActiveElections;

/// Observer for processed votes; the node uses it to update the vote table
/// and rebroadcast fresh votes to the rep list.
pub type VoteObserver = Arc<dyn Fn(&Vote, VoteCode) + Send + Sync>;

struct Queue {
    votes: VecDeque<Vote>,
    busy: bool,
    stopped: bool,
}

struct Shared {
    queue: Mutex<Queue>,
    work: Condvar,
    idle: Condvar,
}

/// Votes are processed in arrival order but resolved per representative by
/// sequence, so reordering on the wire cannot regress a rep's choice.
pub struct VoteProcessor {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

impl VoteProcessor {
    pub fn new(active: Arc<ActiveElections>, observer: VoteObserver) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                votes: VecDeque::new(),
                busy: false,
                stopped: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let thread = thread::Builder::new()
            .name("vote-processor".into())
            .spawn(move || worker_loop(worker_shared, active, observer))
            .expect("spawn vote processor");
        Self {
            shared,
            thread: Some(thread),
        }
    }

    pub fn vote(&self, vote: Vote) {
        let mut queue = self.shared.queue.lock();
        queue.votes.push_back(vote);
        self.shared.work.notify_one();
    }

    /// Barrier over everything queued before the call.
    pub fn flush(&self) {
        let mut queue = self.shared.queue.lock();
        while !queue.stopped && (queue.busy || !queue.votes.is_empty()) {
            self.shared.idle.wait(&mut queue);
        }
    }

    pub fn stop(&self) {
        let mut queue = self.shared.queue.lock();
        queue.stopped = true;
        self.shared.work.notify_all();
        self.shared.idle.notify_all();
    }
}

impl Drop for VoteProcessor {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, active: Arc<ActiveElections>, observer: VoteObserver) {
    loop {
        let vote = {
            let mut queue = shared.queue.lock();
            while !queue.stopped && queue.votes.is_empty() {
                shared.work.wait(&mut queue);
            }
            if queue.stopped {
                return;
            }
            queue.busy = true;
            queue.votes.pop_front().expect("queue nonempty")
        };

        match active.vote(&vote) {
            Ok(code) => observer(&vote, code),
            Err(e) => error!(err = %e, "vote processing failed"),
        }

        let mut queue = shared.queue.lock();
        queue.busy = false;
        if queue.votes.is_empty() {
            shared.idle.notify_all();
        }
    }
}
