//! Hierarchical timer wheel (spec.md §4.4).
//!
//! The teacher has no timer of its own; this is built directly from
//! spec.md's description (1ms base tick, 6 cascading levels of 64 slots)
//! behind a `std::sync::Mutex`, matching spec.md §5's "Timer wheel:
//! protected by a single mutex (contention is low; the wheel is touched
//! only on insert/cancel/advance)".

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use slab::Slab;

use crate::error::RuntimeError;

const TICK: Duration = Duration::from_millis(1);
const SLOTS: usize = 64;
const SLOT_BITS: u32 = 6; // 2^6 == SLOTS
const LEVELS: usize = 6;

#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Pending = 0,
    Fired = 1,
    Cancelled = 2,
}

struct Entry {
    deadline_tick: u64,
    waker: Mutex<Option<Waker>>,
    state: AtomicU8,
}

/// Handle returned by [`TimerWheel::insert`]; pass to
/// [`TimerWheel::cancel`] to cancel cooperatively (removal is lazy, on
/// next expiry sweep of that slot — spec.md §3 "Timer entry").
#[derive(Clone, Copy)]
pub(crate) struct TimerHandle(usize);

struct WheelInner {
    epoch: Instant,
    current_tick: u64,
    entries: Slab<Entry>,
    levels: [Vec<Vec<usize>>; LEVELS],
}

impl WheelInner {
    fn level_for(&self, delta_ticks: u64) -> Option<usize> {
        (0..LEVELS).find(|&l| delta_ticks < (1u64 << (SLOT_BITS as u64 * (l as u64 + 1))))
    }

    fn slot_for(&self, target_tick: u64, level: usize) -> usize {
        ((target_tick >> (SLOT_BITS as u64 * level as u64)) & (SLOTS as u64 - 1)) as usize
    }

    fn bucket(&mut self, target_tick: u64) -> Result<(usize, usize), RuntimeError> {
        let delta = target_tick.saturating_sub(self.current_tick);
        let level = self.level_for(delta).ok_or(RuntimeError::TimerOverflow)?;
        let slot = self.slot_for(target_tick, level);
        Ok((level, slot))
    }
}

/// A hierarchical timing wheel keyed on a monotonic clock (spec.md §4.4).
/// Insertion and cancellation are O(1) amortized; `advance` cascades
/// entries from higher levels down as the current tick crosses a level's
/// boundary.
pub(crate) struct TimerWheel {
    inner: Mutex<WheelInner>,
}

impl TimerWheel {
    pub(crate) fn new() -> Self {
        let levels = std::array::from_fn(|_| vec![Vec::new(); SLOTS]);
        Self {
            inner: Mutex::new(WheelInner {
                epoch: Instant::now(),
                current_tick: 0,
                entries: Slab::new(),
                levels,
            }),
        }
    }

    fn tick_of(&self, inner: &WheelInner, instant: Instant) -> u64 {
        let elapsed = instant.saturating_duration_since(inner.epoch);
        (elapsed.as_nanos() / TICK.as_nanos()) as u64
    }

    pub(crate) fn insert(&self, deadline: Instant, waker: Waker) -> Result<TimerHandle, RuntimeError> {
        let mut inner = self.inner.lock().expect("timer wheel mutex poisoned");
        let target_tick = self.tick_of(&inner, deadline).max(inner.current_tick);
        let (level, slot) = inner.bucket(target_tick)?;
        let id = inner.entries.insert(Entry {
            deadline_tick: target_tick,
            waker: Mutex::new(Some(waker)),
            state: AtomicU8::new(EntryState::Pending as u8),
        });
        inner.levels[level][slot].push(id);
        Ok(TimerHandle(id))
    }

    pub(crate) fn cancel(&self, handle: TimerHandle) {
        let inner = self.inner.lock().expect("timer wheel mutex poisoned");
        if let Some(entry) = inner.entries.get(handle.0) {
            entry.state.store(EntryState::Cancelled as u8, Ordering::Release);
        }
    }

    /// Earliest pending deadline, used to bound the reactor's park timeout
    /// (spec.md §4.4 `next_deadline`).
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock().expect("timer wheel mutex poisoned");
        inner
            .entries
            .iter()
            .filter(|(_, e)| e.state.load(Ordering::Acquire) == EntryState::Pending as u8)
            .map(|(_, e)| inner.epoch + TICK * (e.deadline_tick as u32))
            .min()
    }

    /// Advance the wheel to `now`, firing (and cascading) entries whose
    /// deadline has passed (spec.md §4.4 `advance`). Monotonic: never
    /// moves `current_tick` backwards, so wall-clock regressions cannot
    /// retroactively fire timers (spec.md §4.4 "Monotonic time is
    /// mandatory").
    pub(crate) fn advance(&self, now: Instant) {
        let mut inner = self.inner.lock().expect("timer wheel mutex poisoned");
        let target_tick = self.tick_of(&inner, now);
        while inner.current_tick < target_tick {
            inner.current_tick += 1;
            let tick = inner.current_tick;

            let due = std::mem::take(&mut inner.levels[0][(tick as usize) & (SLOTS - 1)]);
            for id in due {
                if let Some(entry) = inner.entries.try_remove(id) {
                    if entry.state.swap(EntryState::Fired as u8, Ordering::AcqRel)
                        == EntryState::Pending as u8
                    {
                        if let Some(w) = entry.waker.lock().expect("timer waker mutex poisoned").take() {
                            w.wake();
                        }
                    }
                }
            }

            // Cascade each higher level's slot down once its cycle wraps.
            for level in 1..LEVELS {
                if tick & ((1u64 << (SLOT_BITS as u64 * level as u64)) - 1) != 0 {
                    break;
                }
                let slot = ((tick >> (SLOT_BITS as u64 * level as u64)) & (SLOTS as u64 - 1)) as usize;
                let cascaded = std::mem::take(&mut inner.levels[level][slot]);
                for id in cascaded {
                    let target = match inner.entries.get(id) {
                        Some(e) if e.state.load(Ordering::Acquire) == EntryState::Pending as u8 => {
                            e.deadline_tick
                        }
                        _ => {
                            inner.entries.try_remove(id);
                            continue;
                        }
                    };
                    if let Ok((new_level, new_slot)) = inner.bucket(target) {
                        inner.levels[new_level][new_slot].push(id);
                    } else {
                        inner.entries.try_remove(id);
                    }
                }
            }
        }
    }
}

/// A future that resolves once `deadline` has passed (spec.md §6
/// `Timer handle: deadline(instant)`).
pub struct Deadline {
    wheel: Arc<TimerWheel>,
    deadline: Instant,
    handle: Option<TimerHandle>,
}

impl Future for Deadline {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.deadline {
            if let Some(h) = self.handle.take() {
                self.wheel.cancel(h);
            }
            return Poll::Ready(());
        }
        match self.wheel.insert(self.deadline, cx.waker().clone()) {
            Ok(handle) => {
                self.handle = Some(handle);
                Poll::Pending
            }
            // Horizon exceeded (spec.md §7 `TimerOverflow`): the wheel's
            // horizon is ~2 years at the 1ms/64-slot/6-level configuration,
            // so in practice this only fires for deliberately absurd
            // deadlines. `Future<Output = ()>` has no error channel per
            // spec.md §6's literal signature, so we complete rather than
            // hang the awaiting task forever.
            Err(err) => {
                tracing::error!(error = %err, "timer deadline exceeds wheel horizon, firing immediately");
                Poll::Ready(())
            }
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            self.wheel.cancel(h);
        }
    }
}

pub(crate) fn deadline_future(wheel: Arc<TimerWheel>, deadline: Instant) -> Deadline {
    Deadline {
        wheel,
        deadline,
        handle: None,
    }
}

pub(crate) fn sleep_future(wheel: Arc<TimerWheel>, duration: Duration) -> Deadline {
    deadline_future(wheel, Instant::now() + duration)
}
