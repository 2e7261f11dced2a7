//! Per-layer priority queue of attempts, bucketed by passes done
//!
//! One (queue, counter) pair per bucket. Dequeue drains the bucket with the
//! most passes first so nearly finished attempts complete before new ones
//! start. Pruning drops from the least advanced buckets.
//!
//! `size()` is the sum of the counters and can be briefly off while a clear
//! races an enqueue. It is only a back-pressure signal.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use snowfield_core::POW_LOOK_PASSES;

use super::partial::PartialWork;

/// Number of buckets
pub const SLOTS: usize = POW_LOOK_PASSES;

pub struct FaQueue {
    queues: [Mutex<VecDeque<PartialWork>>; SLOTS],
    counts: [AtomicI64; SLOTS],
    max_elements: usize,
    prune_lock: Mutex<()>,
}

fn lock(q: &Mutex<VecDeque<PartialWork>>) -> MutexGuard<'_, VecDeque<PartialWork>> {
    match q.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FaQueue {
    pub fn new(max_elements: usize) -> Self {
        Self {
            queues: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
            counts: std::array::from_fn(|_| AtomicI64::new(0)),
            max_elements,
            prune_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_elements
    }

    pub fn enqueue(&self, pw: PartialWork) {
        let slot = pw.passes_done.min(SLOTS - 1);
        lock(&self.queues[slot]).push_back(pw);
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    pub fn size(&self) -> usize {
        let total: i64 = self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        total.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop the least advanced attempts until back under capacity
    pub fn prune(&self) {
        let size = self.size();
        if size <= self.max_elements {
            return;
        }
        let mut excess = size - self.max_elements;
        for slot in 0..SLOTS {
            if excess == 0 {
                break;
            }
            let mut queue = lock(&self.queues[slot]);
            while excess > 0 && queue.pop_front().is_some() {
                excess -= 1;
                self.counts[slot].fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Prune unless another thread already is
    pub fn try_prune(&self) {
        if let Ok(_guard) = self.prune_lock.try_lock() {
            self.prune();
        }
    }

    /// Move up to `max` attempts into `out`, most advanced first
    pub fn super_poll(&self, max: usize, out: &mut Vec<PartialWork>) {
        let mut got = 0;
        for slot in (0..SLOTS).rev() {
            if got >= max {
                break;
            }
            let mut queue = lock(&self.queues[slot]);
            while got < max {
                match queue.pop_front() {
                    Some(pw) => {
                        self.counts[slot].fetch_sub(1, Ordering::Relaxed);
                        out.push(pw);
                        got += 1;
                    }
                    None => break,
                }
            }
        }
    }

    pub fn poll(&self) -> Option<PartialWork> {
        for slot in (0..SLOTS).rev() {
            if let Some(pw) = lock(&self.queues[slot]).pop_front() {
                self.counts[slot].fetch_sub(1, Ordering::Relaxed);
                return Some(pw);
            }
        }
        None
    }

    pub fn clear(&self) {
        for slot in 0..SLOTS {
            let mut queue = lock(&self.queues[slot]);
            queue.clear();
            self.counts[slot].store(0, Ordering::Relaxed);
        }
    }

    /// Sizes per bucket, for stats
    pub fn bucket_sizes(&self) -> [usize; SLOTS] {
        std::array::from_fn(|i| self.counts[i].load(Ordering::Relaxed).max(0) as usize)
    }
}
