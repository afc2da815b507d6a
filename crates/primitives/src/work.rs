//! Proof-of-work nonce generation and validation.
//!
//! Work is a light anti-spam measure: an 8-byte Blake2b digest over
//! `nonce_le || root` must clear the network threshold.  The pool runs a few
//! OS threads that cooperate on the front request; cancellation bumps a
//! ticket that in-flight scans poll.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use rand::Rng;

use crate::buf::Buf32;
use crate::hash::hash64;

/// Threshold tuned for tests, ~instant.
pub const WORK_THRESHOLD_TEST: u64 = 0xff00_0000_0000_0000;
/// Live threshold, roughly five seconds of one CPU core.
pub const WORK_THRESHOLD_FULL: u64 = 0xffff_ffc0_0000_0000;

/// Digest value a `(root, nonce)` pair evaluates to.
pub fn work_value(root: &Buf32, work: u64) -> u64 {
    hash64(&[&work.to_le_bytes(), root.as_bytes()])
}

/// Whether the nonce clears `threshold` for `root`.
pub fn work_validate(root: &Buf32, work: u64, threshold: u64) -> bool {
    work_value(root, work) >= threshold
}

type WorkCallback = Box<dyn FnOnce(Option<u64>) + Send>;

struct WorkItem {
    root: Buf32,
    callback: WorkCallback,
}

struct PoolState {
    pending: VecDeque<WorkItem>,
    // Bumped whenever the front item changes so scanning threads restart.
    ticket: u64,
    done: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    producer: Condvar,
    threshold: u64,
}

/// Threaded nonce grinder.
pub struct WorkPool {
    shared: Arc<PoolShared>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl WorkPool {
    pub fn new(thread_count: usize, threshold: u64) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                pending: VecDeque::new(),
                ticket: 0,
                done: false,
            }),
            producer: Condvar::new(),
            threshold,
        });
        let threads = (0..thread_count.max(1))
            .map(|i| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("work-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("spawn work thread")
            })
            .collect();
        Self { shared, threads }
    }

    pub fn threshold(&self) -> u64 {
        self.shared.threshold
    }

    /// Queues a root and invokes `callback` with the nonce, or `None` if the
    /// request is cancelled or the pool stops.
    pub fn generate_async(&self, root: Buf32, callback: impl FnOnce(Option<u64>) + Send + 'static) {
        let mut state = self.shared.state.lock();
        state.pending.push_back(WorkItem {
            root,
            callback: Box::new(callback),
        });
        self.shared.producer.notify_all();
    }

    /// Blocking convenience wrapper around [`Self::generate_async`].
    pub fn generate(&self, root: Buf32) -> Option<u64> {
        let (tx, rx) = mpsc::channel();
        self.generate_async(root, move |work| {
            let _ = tx.send(work);
        });
        rx.recv().ok().flatten()
    }

    /// Drops any queued or in-flight request for `root`, completing its
    /// callbacks with `None`.
    pub fn cancel(&self, root: &Buf32) {
        let cancelled = {
            let mut state = self.shared.state.lock();
            let front_matches = state.pending.front().map(|i| i.root == *root) == Some(true);
            if front_matches {
                state.ticket += 1;
            }
            let mut removed = Vec::new();
            let mut keep = VecDeque::with_capacity(state.pending.len());
            for item in state.pending.drain(..) {
                if item.root == *root {
                    removed.push(item.callback);
                } else {
                    keep.push_back(item);
                }
            }
            state.pending = keep;
            removed
        };
        for cb in cancelled {
            cb(None);
        }
    }

    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.done = true;
        state.ticket += 1;
        self.shared.producer.notify_all();
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.stop();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    let mut rng = rand::thread_rng();
    loop {
        let (root, ticket) = {
            let mut state = shared.state.lock();
            while !state.done && state.pending.is_empty() {
                shared.producer.wait(&mut state);
            }
            if state.done {
                return;
            }
            // All threads grind the front item from independent starts.
            let front = state.pending.front().expect("pending nonempty");
            (front.root, state.ticket)
        };

        let mut nonce: u64 = rng.gen();
        let mut found = None;
        'scan: loop {
            for _ in 0..4096 {
                if work_value(&root, nonce) >= shared.threshold {
                    found = Some(nonce);
                    break 'scan;
                }
                nonce = nonce.wrapping_add(1);
            }
            if shared.state.lock().ticket != ticket {
                break;
            }
        }

        if let Some(work) = found {
            let callback = {
                let mut state = shared.state.lock();
                if state.ticket == ticket {
                    state.ticket += 1;
                    state.pending.pop_front().map(|i| i.callback)
                } else {
                    // Another thread or a cancel got there first.
                    None
                }
            };
            if let Some(cb) = callback {
                cb(Some(work));
            }
        }
    }
}
