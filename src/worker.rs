//! The multi-threaded work-stealing worker loop (spec.md §4.2).
//!
//! The teacher's `archived/reactor-executor/src/runtime/executor.rs` is a
//! single thread-local `ExecutorCore` with one `Vec`-based ready queue and
//! no stealing ("executors are not work stealing in current
//! implementation", per its own doc comment). This module keeps the
//! teacher's `thread_local!` trick for giving each OS thread its own
//! scheduler context, and its `thread::park`/`unpark` parking mechanism,
//! but generalizes the single-executor ready queue into the
//! local/global/steal trio spec.md §4.2 requires.

use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::queue::LocalQueue;
use crate::runtime::Shared;
use crate::task::TaskRef;

/// Local pops between mandatory global-queue pulls (spec.md §4.2 step 2,
/// "N ≈ 61").
const GLOBAL_POLL_INTERVAL: u32 = 61;

thread_local! {
    /// Raw pointer to the calling thread's own [`LocalQueue`], set for the
    /// duration of [`WorkerContext::run`]. Lets a task's `spawn` call push
    /// onto its own worker's queue instead of the global injector, per
    /// spec.md §4.5 ("From inside a worker: push to local queue").
    static CURRENT: Cell<*const LocalQueue> = Cell::new(std::ptr::null());
}

/// Push `task` onto the calling thread's local queue if it is a worker
/// thread; returns `false` if called from outside any worker (the caller
/// should fall back to the global injection queue).
///
/// # Safety
/// The pointer stored in `CURRENT` is set by [`WorkerContext::run`] at the
/// top of its loop and cleared before returning, and is only ever
/// dereferenced from that same thread while the loop is still running, so
/// the `LocalQueue` it points at is always alive and not aliased mutably
/// elsewhere.
pub(crate) fn push_to_current_local(task: TaskRef, global: &crossbeam_deque::Injector<TaskRef>) -> bool {
    CURRENT.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return false;
        }
        let local = unsafe { &*ptr };
        local.push(task, global);
        true
    })
}

struct CurrentGuard;

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        CURRENT.with(|cell| cell.set(std::ptr::null()));
    }
}

pub(crate) struct WorkerContext {
    pub(crate) id: usize,
    pub(crate) local: LocalQueue,
    pub(crate) shared: Arc<Shared>,
}

impl WorkerContext {
    pub(crate) fn run(self) {
        if let Some(hook) = self.shared.on_thread_start.as_ref() {
            hook();
        }

        CURRENT.with(|cell| cell.set(&self.local as *const LocalQueue));
        let _guard = CurrentGuard;

        let mut local_pops: u32 = 0;

        loop {
            if let Some(task) = self.local.pop() {
                local_pops = local_pops.wrapping_add(1);
                self.run_task(task);
                if local_pops % GLOBAL_POLL_INTERVAL == 0 {
                    if let Some(task) = self.local.pull_from_global(&self.shared.injector) {
                        self.run_task(task);
                    }
                }
                continue;
            }

            if let Some(task) = self.local.pull_from_global(&self.shared.injector) {
                self.run_task(task);
                continue;
            }

            if let Some(task) = self.steal() {
                self.run_task(task);
                continue;
            }

            if self.shared.is_stopped() {
                break;
            }

            self.park();

            if self.shared.is_stopped() && self.local.len() == 0 {
                break;
            }
        }

        self.drain_for_shutdown();
    }

    fn run_task(&self, task: TaskRef) {
        if self.shared.is_stopped() {
            task.cancel();
            return;
        }
        task.poll();
    }

    /// Randomized steal (spec.md §4.2 step 3): try every peer once, in a
    /// random order, taking up to half of the first non-empty one found.
    fn steal(&self) -> Option<TaskRef> {
        self.shared.searching.fetch_add(1, Ordering::AcqRel);
        let result = (|| {
            let n = self.shared.stealers.len();
            if n <= 1 {
                return None;
            }
            let start = fastrand::usize(0..n);
            for offset in 0..n {
                let idx = (start + offset) % n;
                if idx == self.id {
                    continue;
                }
                if let Some(task) = self.local.steal_from(&self.shared.stealers[idx]) {
                    return Some(task);
                }
            }
            // One last look at the global queue: a task may have landed
            // there while we were scanning peers.
            self.local.pull_from_global(&self.shared.injector)
        })();
        self.shared.searching.fetch_sub(1, Ordering::AcqRel);
        result
    }

    /// Sleep until woken by new work (spec.md §4.2 step 4, "Park").
    ///
    /// Timer deadlines don't need a bounded wait here: the reactor's
    /// background thread (`crate::reactor::event_loop`) drives the timer
    /// wheel independently and, on firing a timer's waker, reschedules the
    /// waiting task through the same [`Shared::schedule`] path a spawn or
    /// I/O wake uses — which unparks a worker explicitly. A park with a
    /// short safety-net timeout guards against any missed wakeup racing
    /// with a thread entering `park` just after `unpark` was called for a
    /// wakeup it narrowly missed recording.
    fn park(&self) {
        {
            let mut idle = self.shared.idle.lock().expect("idle list poisoned");
            idle.push(self.id);
        }

        std::thread::park_timeout(Duration::from_millis(100));

        let mut idle = self.shared.idle.lock().expect("idle list poisoned");
        idle.retain(|&id| id != self.id);
    }

    /// On shutdown: cancel whatever is left in this worker's local queue.
    /// The global queue is drained cooperatively by whichever worker pops
    /// each remaining entry.
    fn drain_for_shutdown(&self) {
        while let Some(task) = self.local.pop() {
            task.cancel();
        }
        loop {
            match self.local.pull_from_global(&self.shared.injector) {
                Some(task) => task.cancel(),
                None => break,
            }
        }
    }
}
