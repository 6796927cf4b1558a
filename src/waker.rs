//! Builds a [`std::task::Waker`] over a task reference.
//!
//! `spec.md` §4.1 describes a waker as "a pair `(task pointer, vtable)`"
//! exposing `wake`/`wake_by_ref`/`clone`/`drop`. `std::task::Wake` is that
//! vtable already, stabilized since Rust 1.51 — no reason to hand-roll
//! `RawWaker` when the standard trait gives us the exact same shape.

use std::sync::Arc;
use std::task::Wake;

use crate::task::TaskRef;

/// Wraps a task reference so it can be turned into a `std::task::Waker`.
///
/// `wake`/`wake_by_ref` forward to [`TaskRef::schedule`], which performs the
/// `Idle -> Scheduled` / `Running -> Notified` transition spec.md §3
/// describes and is a no-op if the task already completed.
pub(crate) struct TaskWaker(pub(crate) TaskRef);

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.0.clone().schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.clone().schedule();
    }
}

pub(crate) fn waker_for(task: TaskRef) -> std::task::Waker {
    std::task::Waker::from(Arc::new(TaskWaker(task)))
}
