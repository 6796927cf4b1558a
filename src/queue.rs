//! Local run queue (per-worker, LIFO owner / FIFO thief) and the global
//! injection queue (spec.md §3 "Local queue" / "Global queue", §4.2).
//!
//! `crossbeam_deque::Worker`/`Stealer`/`Injector` is the same work-stealing
//! trio `tokio` and `rayon` build their own schedulers on; it gives us the
//! push-at-head / steal-batch-from-tail behavior spec.md describes without
//! hand-rolling the ring buffer and its CAS protocol. The teacher has no
//! multi-worker scheduler to generalize from (`ExecutorCore` is a single
//! thread-local `Vec` ready queue) so this module's data structure choice
//! is grounded in the wider pack's convention rather than the teacher's
//! own code.

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

use crate::task::TaskRef;

/// Local queues drain half their contents to the global queue once they
/// exceed this many pending tasks (spec.md §3: "power of two, e.g. 256").
pub(crate) const LOCAL_QUEUE_CAPACITY: usize = 256;

/// A worker's local run queue plus the stealer handle peers use to steal
/// from it.
pub(crate) struct LocalQueue {
    worker: Worker<TaskRef>,
    capacity: usize,
}

impl LocalQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            worker: Worker::new_lifo(),
            capacity,
        }
    }

    pub(crate) fn stealer(&self) -> Stealer<TaskRef> {
        self.worker.stealer()
    }

    /// Push a task owned by this worker. When this pushes the queue past
    /// capacity, drains half of it into `global` (spec.md §3 "Overflow
    /// pushes drain half the queue into the global queue").
    pub(crate) fn push(&self, task: TaskRef, global: &Injector<TaskRef>) {
        self.worker.push(task);
        if self.worker.len() > self.capacity {
            let drain = self.worker.len() / 2;
            for _ in 0..drain {
                match self.worker.pop() {
                    Some(overflow) => global.push(overflow),
                    None => break,
                }
            }
        }
    }

    /// Pop the most recently pushed task (LIFO — cache-hot, spec.md §4.2
    /// "Tie-breaking").
    pub(crate) fn pop(&self) -> Option<TaskRef> {
        self.worker.pop()
    }

    pub(crate) fn len(&self) -> usize {
        self.worker.len()
    }

    /// Pull a batch of work from the global injection queue into this
    /// local queue, returning one task to run immediately (spec.md §4.2
    /// step 2, "Global pull").
    pub(crate) fn pull_from_global(&self, global: &Injector<TaskRef>) -> Option<TaskRef> {
        loop {
            match global.steal_batch_and_pop(&self.worker) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Steal up to half of `victim`'s queue into this one, returning one
    /// task to run immediately (spec.md §4.2 step 3, "Steal").
    pub(crate) fn steal_from(&self, victim: &Stealer<TaskRef>) -> Option<TaskRef> {
        loop {
            match victim.steal_batch_and_pop(&self.worker) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}
