//! `JoinHandle<T>` — spec.md §4.1 "Join is itself pollable".
//!
//! The teacher never exposes a join handle (`block_on` just runs the
//! top-level future to completion); this is new surface required by
//! spec.md §6 (`JoinHandle<T>::poll`, `::abort`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::JoinError;
use crate::task::{JoinSource, TaskRef};

/// A pollable handle to a spawned task's eventual result.
///
/// Also implements [`Future`] directly (spec.md §6 "Future trait
/// contract"), so it composes with `.await` inside other tasks the same
/// way any other leaf future does.
pub struct JoinHandle<T> {
    task: TaskRef,
    source: Arc<dyn JoinSource<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(task: TaskRef, source: Arc<dyn JoinSource<T>>) -> Self {
        Self { task, source }
    }

    /// Cooperatively cancel the task. The next time it is scheduled, its
    /// future payload is dropped without being polled and this handle
    /// resolves with `JoinError::Cancelled` (spec.md §4.1).
    pub fn abort(&self) {
        self.task.clone().cancel();
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.source.poll_join(cx)
    }
}
