//! Transactor
//!
//! A reentrant batch-and-flush-once primitive. Work that should happen once
//! per logical write is registered with [`Transactor::finalize`] under a key;
//! the outermost [`Transactor::transact`] call runs each registered job once
//! after its operation returns.
//!
//! The transactor knows nothing about the graph. The runtime keys jobs by
//! node identity so repeated invalidation of one node collapses to one job.

use std::cell::{Cell, RefCell};
use std::fmt::Debug;
use std::hash::Hash;

use indexmap::IndexMap;
use tracing::trace;

use crate::graph::NodeId;

/// A deferred job.
pub type Job = Box<dyn FnOnce()>;

/// Batches deferred jobs until the outermost transaction completes.
pub struct Transactor<K = NodeId> {
    /// Nesting depth of the currently running transactions.
    depth: Cell<usize>,

    /// Jobs in first-scheduled order. Re-registering a key replaces the job
    /// but keeps its position.
    jobs: RefCell<IndexMap<K, Job>>,
}

impl<K> Transactor<K>
where
    K: Hash + Eq + Debug,
{
    /// Create a transactor with no active transaction.
    pub fn new() -> Self {
        Self {
            depth: Cell::new(0),
            jobs: RefCell::new(IndexMap::new()),
        }
    }

    /// Run `operation` inside a transaction.
    ///
    /// Nested calls run inline. Only the outermost call drains the queued
    /// jobs, after `operation` returns. If `operation` panics the depth is
    /// restored and queued jobs are kept for the next outermost drain.
    pub fn transact<R>(&self, operation: impl FnOnce() -> R) -> R {
        let outermost = self.depth.get() == 0;
        if outermost {
            trace!("transaction begin");
        }

        let result = {
            let _guard = DepthGuard::enter(&self.depth);
            operation()
        };

        if outermost {
            self.drain();
        }
        result
    }

    /// Register `operation` to run when the outermost transaction ends.
    ///
    /// Outside of any transaction the operation runs immediately.
    pub fn finalize(&self, key: K, operation: impl FnOnce() + 'static) {
        if self.is_transacting() {
            trace!(?key, "job scheduled");
            self.jobs.borrow_mut().insert(key, Box::new(operation));
        } else {
            operation();
        }
    }

    /// Cancel a job that has not run yet. Returns whether one was queued.
    pub fn unfinalize(&self, key: &K) -> bool {
        let removed = self.jobs.borrow_mut().shift_remove(key).is_some();
        if removed {
            trace!(?key, "job cancelled");
        }
        removed
    }

    /// Whether a transaction is currently running.
    pub fn is_transacting(&self) -> bool {
        self.depth.get() > 0
    }

    /// Number of jobs waiting for the outermost transaction to end.
    pub fn pending(&self) -> usize {
        self.jobs.borrow().len()
    }

    /// Run queued jobs one at a time, oldest first.
    ///
    /// Jobs are popped before they run, so a job that opens and closes its
    /// own transaction drains the remainder without running anything twice.
    fn drain(&self) {
        let mut ran = 0usize;
        loop {
            let next = self.jobs.borrow_mut().shift_remove_index(0);
            let Some((_, job)) = next else {
                break;
            };
            job();
            ran += 1;
        }
        trace!(ran, "transaction drained");
    }
}

impl<K> Default for Transactor<K>
where
    K: Hash + Eq + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Debug for Transactor<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactor")
            .field("depth", &self.depth.get())
            .field("pending", &self.jobs.borrow().len())
            .finish()
    }
}

/// Restores the depth counter when a transaction scope ends.
struct DepthGuard<'a> {
    depth: &'a Cell<usize>,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a Cell<usize>) -> Self {
        depth.set(depth.get() + 1);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}
