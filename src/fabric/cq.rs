use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quanta::Instant;

use crate::rdma::cq::Wc;

/// Completion queue storage, shared between the fabric that produces
/// completions and the [`Cq`](crate::rdma::cq::Cq) handles that consume them.
pub(crate) struct CqShared {
    queue: Mutex<VecDeque<Wc>>,
    cond: Condvar,
    capacity: usize,
}

impl CqShared {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Wc>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a completion. Return `false` on CQ overrun.
    pub fn push(&self, wc: Wc) -> bool {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(wc);
        drop(queue);
        self.cond.notify_all();
        true
    }

    pub fn poll(&self, max: usize) -> Vec<Wc> {
        let mut queue = self.lock();
        let n = max.min(queue.len());
        queue.drain(..n).collect()
    }

    /// Park until a completion arrives or `timeout` elapses.
    pub fn wait_one(&self, timeout: Duration) -> Option<Wc> {
        let start = Instant::now();
        let mut queue = self.lock();
        loop {
            if let Some(wc) = queue.pop_front() {
                return Some(wc);
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                return None;
            }
            queue = self
                .cond
                .wait_timeout(queue, timeout - elapsed)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
