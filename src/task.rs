//! Task representation and poll protocol (spec.md §3, §4.1).
//!
//! Grounded in the teacher's `archived/reactor-executor/src/runtime/executor.rs`
//! (`ExecutorCore` owns a `HashMap<usize, Task>` plus a ready queue, and a
//! `Waker` re-enqueues a task id on wake) generalized from the teacher's
//! thread-local single-executor model to tasks that can migrate between
//! worker threads, per spec.md §4.1 ("future payload must not depend on
//! thread-local state between suspensions").

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use crate::error::JoinError;
use crate::waker::waker_for;

/// One of the six states a task's status word can hold (spec.md §3).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Idle = 0,
    Scheduled = 1,
    Running = 2,
    /// A wake arrived while `Running`; the worker must re-poll on exit
    /// instead of releasing the task.
    Notified = 3,
    Complete = 4,
    Cancelled = 5,
}

impl TaskState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskState::Idle,
            1 => TaskState::Scheduled,
            2 => TaskState::Running,
            3 => TaskState::Notified,
            4 => TaskState::Complete,
            _ => TaskState::Cancelled,
        }
    }
}

/// Anything that can accept a runnable task back onto a queue. Implemented
/// by the runtime's shared scheduler state; tasks hold only a `Weak`
/// reference to it so a task never keeps the runtime alive (spec.md §3
/// "scheduler back-reference (weak in the ownership sense)").
pub(crate) trait Schedule: Send + Sync {
    fn schedule(&self, task: TaskRef);
}

pub(crate) struct Header {
    state: AtomicU8,
    scheduler: Weak<dyn Schedule>,
}

impl Header {
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// Type-erased handle to a scheduled task. Queues and wakers hold clones of
/// this; the task payload and header are freed together once the last
/// clone drops (spec.md §9 "cyclic ownership").
pub(crate) type TaskRef = Arc<dyn RawTask>;

pub(crate) trait RawTask: Send + Sync {
    /// Drive the task once. Never called concurrently with itself for the
    /// same task (spec.md §4.1) — enforced by the `Running` state below.
    fn poll(self: Arc<Self>);

    fn header(&self) -> &Header;

    /// Perform the `Idle -> Scheduled` / `Running -> Notified` transition
    /// and, on the first such transition, hand the task back to the
    /// scheduler. Safe to call after completion (no-op), matching the
    /// waker contract in spec.md §6.
    fn schedule(self: Arc<Self>);

    /// Cooperative cancellation: marks the task `Cancelled` so the next
    /// scheduled poll drops the future payload without polling it and
    /// resolves the join slot with `JoinError::Cancelled` (spec.md §4.1).
    fn cancel(self: Arc<Self>);
}

/// What a [`crate::join::JoinHandle<T>`] polls. Implemented by
/// `TaskImpl<F>` for `T = F::Output`, so the join handle can stay generic
/// over only the output type while the task itself stays generic over the
/// whole future.
pub(crate) trait JoinSource<T>: Send + Sync {
    fn poll_join(&self, cx: &mut Context<'_>) -> Poll<Result<T, JoinError>>;
}

enum JoinSlot<T> {
    Empty,
    Waiting(std::task::Waker),
    Ready(Result<T, JoinError>),
}

pub(crate) struct TaskImpl<F: Future> {
    header: Header,
    future: Mutex<Option<Pin<Box<F>>>>,
    join: Mutex<JoinSlot<F::Output>>,
}

impl<F> RawTask for TaskImpl<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn poll(self: Arc<Self>) {
        // Running is only ever observed by the worker currently holding
        // the task (spec.md §3 invariant); set it up front so a wake that
        // races in during this poll is recorded as `Notified`, not lost.
        loop {
            let state = self.header.state();
            if matches!(state, TaskState::Cancelled) {
                self.complete_cancelled();
                return;
            }
            if self
                .header
                .state
                .compare_exchange(
                    state as u8,
                    TaskState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }

        let waker = waker_for(self.clone() as TaskRef);
        let mut cx = Context::from_waker(&waker);

        let mut guard = self.future.lock().expect("task future mutex poisoned");
        let fut = match guard.as_mut() {
            Some(fut) => fut,
            // Dropped already (cancelled mid-flight); nothing to do.
            None => return,
        };

        // A panic inside `poll` aborts the task, not the worker thread:
        // the join handle resolves with `JoinError::Panicked` instead of
        // the panic unwinding into the worker's run loop (spec.md §7
        // "Propagation policy").
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)));

        match outcome {
            Ok(Poll::Ready(value)) => {
                *guard = None;
                drop(guard);
                self.complete(Ok(value));
            }
            Ok(Poll::Pending) => {
                drop(guard);
                // If a wake already arrived while we were running, the
                // state is `Notified`: re-enqueue immediately instead of
                // going idle, so the wake is never lost (spec.md §8
                // "no lost wake-up").
                let prev = self
                    .header
                    .state
                    .swap(TaskState::Idle as u8, Ordering::AcqRel);
                if TaskState::from_u8(prev) == TaskState::Notified {
                    Arc::clone(&self).schedule();
                }
            }
            Err(payload) => {
                *guard = None;
                drop(guard);
                let message = panic_message(&payload);
                self.complete(Err(JoinError::Panicked(message)));
            }
        }
    }

    fn header(&self) -> &Header {
        &self.header
    }

    fn schedule(self: Arc<Self>) {
        loop {
            let state = self.header.state();
            match state {
                TaskState::Complete | TaskState::Cancelled => return,
                TaskState::Running => {
                    if self
                        .header
                        .state
                        .compare_exchange(
                            TaskState::Running as u8,
                            TaskState::Notified as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        // The running worker will observe `Notified` on
                        // exit and re-enqueue; nothing to push now.
                        return;
                    }
                }
                TaskState::Notified => return,
                TaskState::Idle => {
                    if self
                        .header
                        .state
                        .compare_exchange(
                            TaskState::Idle as u8,
                            TaskState::Scheduled as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        if let Some(scheduler) = self.header.scheduler.upgrade() {
                            scheduler.schedule(self as TaskRef);
                        }
                        return;
                    }
                }
                TaskState::Scheduled => return,
            }
        }
    }

    fn cancel(self: Arc<Self>) {
        let prev = self
            .header
            .state
            .swap(TaskState::Cancelled as u8, Ordering::AcqRel);
        if matches!(
            TaskState::from_u8(prev),
            TaskState::Complete | TaskState::Cancelled
        ) {
            // Already finished; restore the terminal state and leave the
            // join result untouched.
            self.header.state.store(prev, Ordering::Release);
            return;
        }
        self.complete_cancelled();
    }
}

impl<F> JoinSource<F::Output> for TaskImpl<F>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn poll_join(&self, cx: &mut Context<'_>) -> Poll<Result<F::Output, JoinError>> {
        let mut slot = self.join.lock().expect("join mutex poisoned");
        match std::mem::replace(&mut *slot, JoinSlot::Empty) {
            JoinSlot::Ready(result) => Poll::Ready(result),
            JoinSlot::Empty | JoinSlot::Waiting(_) => {
                *slot = JoinSlot::Waiting(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<F: Future> TaskImpl<F> {
    fn complete(&self, result: Result<F::Output, JoinError>) {
        self.header
            .state
            .store(TaskState::Complete as u8, Ordering::Release);
        let waiter = {
            let mut slot = self.join.lock().expect("join mutex poisoned");
            match std::mem::replace(&mut *slot, JoinSlot::Ready(result)) {
                JoinSlot::Waiting(w) => Some(w),
                _ => None,
            }
        };
        if let Some(w) = waiter {
            w.wake();
        }
    }

    fn complete_cancelled(&self) {
        *self.future.lock().expect("task future mutex poisoned") = None;
        self.header
            .state
            .store(TaskState::Cancelled as u8, Ordering::Release);
        let waiter = {
            let mut slot = self.join.lock().expect("join mutex poisoned");
            match std::mem::replace(&mut *slot, JoinSlot::Ready(Err(JoinError::Cancelled))) {
                JoinSlot::Waiting(w) => Some(w),
                _ => None,
            }
        };
        if let Some(w) = waiter {
            w.wake();
        }
    }
}

/// Extract a human-readable message from a caught panic payload. Mirrors
/// what the default panic hook prints for the common `&str`/`String`
/// payloads; anything else gets a generic placeholder.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// Allocate a task for `future`, scheduled via `scheduler`. Returns both
/// the type-erased [`TaskRef`] (for the run queue) and the concrete
/// `Arc<TaskImpl<F>>` (for the [`crate::join::JoinHandle`], which needs to
/// call both `RawTask::cancel` and `JoinSource::poll_join` on the same
/// task).
pub(crate) fn new_task<F>(
    future: F,
    scheduler: Weak<dyn Schedule>,
) -> (TaskRef, Arc<TaskImpl<F>>)
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let task = Arc::new(TaskImpl {
        header: Header {
            state: AtomicU8::new(TaskState::Scheduled as u8),
            scheduler,
        },
        future: Mutex::new(Some(Box::pin(future))),
        join: Mutex::new(JoinSlot::Empty),
    });
    (task.clone() as TaskRef, task)
}
