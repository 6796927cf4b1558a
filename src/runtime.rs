//! Runtime handle, builder, `spawn`, `block_on`, `stop` (spec.md §4.5,
//! §6).
//!
//! Grounded in the teacher's `archived/reactor-executor/src/runtime/mod.rs`
//! (`runtime::init()` starts the reactor thread then hands back an
//! `Executor`) and `executor.rs`'s `block_on` (drive the future directly,
//! park the calling thread between polls), generalized from one
//! thread-local executor to the `Builder`-configured worker pool spec.md
//! §4.5 specifies.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle as ThreadJoinHandle, Thread};

use crossbeam_deque::{Injector, Stealer};
use mio::Interest;

use crate::error::RuntimeError;
use crate::join::JoinHandle;
use crate::queue::{LocalQueue, LOCAL_QUEUE_CAPACITY};
use crate::reactor::{Reactor, Token};
use crate::task::{new_task, Schedule, TaskRef};
use crate::timer::TimerWheel;
use crate::worker::{push_to_current_local, WorkerContext};

enum WorkerCount {
    Auto,
    Fixed(usize),
}

/// Configures and constructs a [`Runtime`] (spec.md §4.5 "Construction").
pub struct Builder {
    worker_count: WorkerCount,
    local_queue_capacity: usize,
    enable_io: bool,
    enable_timer: bool,
    thread_name_prefix: String,
    on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            worker_count: WorkerCount::Auto,
            local_queue_capacity: LOCAL_QUEUE_CAPACITY,
            enable_io: true,
            enable_timer: true,
            thread_name_prefix: "taskloop-worker".to_string(),
            on_thread_start: None,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.worker_count = WorkerCount::Fixed(n);
        self
    }

    pub fn local_queue_capacity(mut self, capacity: usize) -> Self {
        self.local_queue_capacity = capacity;
        self
    }

    pub fn enable_io(mut self, enable: bool) -> Self {
        self.enable_io = enable;
        self
    }

    pub fn enable_timer(mut self, enable: bool) -> Self {
        self.enable_timer = enable;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn on_thread_start<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_thread_start = Some(Arc::new(hook));
        self
    }

    /// Build the reactor (if enabled), timer (if enabled), allocate `N`
    /// worker structures and start `N` threads running the worker loop
    /// (spec.md §4.5).
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let n = match self.worker_count {
            WorkerCount::Fixed(n) => n.max(1),
            WorkerCount::Auto => thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        };

        let timers = if self.enable_timer {
            Some(Arc::new(TimerWheel::new()))
        } else {
            None
        };

        let reactor = if self.enable_io {
            let timers_for_reactor = timers.clone().unwrap_or_else(|| Arc::new(TimerWheel::new()));
            Some(Reactor::start(timers_for_reactor)?)
        } else {
            None
        };

        let injector = Injector::new();
        let locals: Vec<LocalQueue> = (0..n)
            .map(|_| LocalQueue::new(self.local_queue_capacity))
            .collect();
        let stealers: Vec<Stealer<TaskRef>> = locals.iter().map(|l| l.stealer()).collect();

        let shared = Arc::new(Shared {
            injector,
            stealers,
            threads: Mutex::new(Vec::with_capacity(n)),
            idle: Mutex::new(Vec::new()),
            searching: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            reactor,
            timers,
            on_thread_start: self.on_thread_start.clone(),
        });

        let mut join_handles = Vec::with_capacity(n);
        for (id, local) in locals.into_iter().enumerate() {
            let ctx = WorkerContext {
                id,
                local,
                shared: shared.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("{}-{id}", self.thread_name_prefix))
                .spawn(move || ctx.run())
                .expect("failed to spawn worker thread");
            shared
                .threads
                .lock()
                .expect("thread list poisoned")
                .push(handle.thread().clone());
            join_handles.push(handle);
        }

        Ok(Runtime {
            shared,
            join_handles: Mutex::new(Some(join_handles)),
        })
    }
}

/// Shared scheduler state: the injector, every worker's stealer, and the
/// wake-up bookkeeping (spec.md §4.2 "Wake-up protocol").
pub(crate) struct Shared {
    pub(crate) injector: Injector<TaskRef>,
    pub(crate) stealers: Vec<Stealer<TaskRef>>,
    threads: Mutex<Vec<Thread>>,
    pub(crate) idle: Mutex<Vec<usize>>,
    pub(crate) searching: AtomicUsize,
    stopped: AtomicBool,
    reactor: Option<Reactor>,
    pub(crate) timers: Option<Arc<TimerWheel>>,
    pub(crate) on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl Shared {
    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Wake exactly one parked worker, but only if none is already
    /// searching for work (spec.md §4.2: "wakes exactly one parked worker
    /// when work is newly available and no other worker is currently
    /// searching", avoiding a thundering herd while preserving the
    /// lost-wake-up invariant).
    fn notify_one(&self) {
        if self.searching.load(Ordering::Acquire) > 0 {
            return;
        }
        let victim = self.idle.lock().expect("idle list poisoned").pop();
        if let Some(id) = victim {
            if let Some(thread) = self.threads.lock().expect("thread list poisoned").get(id) {
                thread.unpark();
            }
        }
    }

    fn wake_all(&self) {
        for thread in self.threads.lock().expect("thread list poisoned").iter() {
            thread.unpark();
        }
    }
}

impl Schedule for Shared {
    fn schedule(&self, task: TaskRef) {
        // A woken task may or may not be running on a worker thread right
        // now; always route re-schedules through the global queue so the
        // wake-up protocol's single source of truth (the idle list) stays
        // correct regardless of which thread called `wake`.
        self.injector.push(task);
        self.notify_one();
    }
}

/// Process-wide control object: owns the worker pool, reactor and timer,
/// and orchestrates shutdown (spec.md §2 component H).
pub struct Runtime {
    shared: Arc<Shared>,
    join_handles: Mutex<Option<Vec<ThreadJoinHandle<()>>>>,
}

/// A cheaply-cloneable reference to a running [`Runtime`], usable to
/// `spawn` from inside a task without holding the owning `Runtime` value.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl Runtime {
    /// Spawn a future onto the pool (spec.md §4.5 "Spawn").
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        spawn_on(&self.shared, future)
    }

    /// Drive `future` to completion on the calling thread without
    /// requiring the worker pool (spec.md §4.5 "Block-on").
    pub fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future,
    {
        block_on(future)
    }

    /// A cloneable handle usable to `spawn` from contexts that don't own
    /// the `Runtime` value itself.
    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }

    /// Register interest in a raw file descriptor's readiness. Returns
    /// `None` if the runtime was built with `enable_io(false)`.
    pub fn register(&self, fd: std::os::fd::RawFd, interest: Interest) -> Option<std::io::Result<Token>> {
        self.shared.reactor.as_ref().map(|r| r.register(fd, interest))
    }

    /// Change a registration's interest mask without re-allocating its
    /// token (spec.md §4.3 `reregister`).
    pub fn reregister(&self, fd: std::os::fd::RawFd, token: Token, interest: Interest) -> Option<std::io::Result<()>> {
        self.shared.reactor.as_ref().map(|r| r.reregister(fd, token, interest))
    }

    /// Drop a registration (spec.md §4.3 `deregister`).
    pub fn deregister(&self, fd: std::os::fd::RawFd, token: Token) -> Option<std::io::Result<()>> {
        self.shared.reactor.as_ref().map(|r| r.deregister(fd, token))
    }

    /// Arm the waker for `token`'s given direction so the reactor invokes
    /// it the next time that direction becomes ready (spec.md §4.3's
    /// "take-on-fire discipline": a future must re-install its waker on
    /// every `Pending` return). Mirrors the teacher's own
    /// `reactor().set_waker(waker, id)` call in its HTTP future.
    pub fn want(&self, token: Token, interest: Interest, waker: &std::task::Waker) {
        if let Some(r) = self.shared.reactor.as_ref() {
            r.want(token, interest, waker);
        }
    }

    /// `sleep(duration) -> Future<Output = ()>` (spec.md §6).
    pub fn sleep(&self, duration: std::time::Duration) -> crate::timer::Deadline {
        let wheel = self
            .shared
            .timers
            .clone()
            .expect("enable_timer(false): no timer wheel configured");
        crate::timer::sleep_future(wheel, duration)
    }

    /// Signal all workers to drain and exit after finishing their
    /// currently-running poll; cancel everything left in the queues; join
    /// every worker thread (spec.md §4.5 "Shutdown").
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.wake_all();

        // Cancel whatever remains in the global queue; workers cancel
        // their own local queues as they notice `stopped` (see
        // `WorkerContext::drain_for_shutdown`).
        loop {
            match self.shared.injector.steal() {
                crossbeam_deque::Steal::Success(task) => task.cancel(),
                crossbeam_deque::Steal::Empty => break,
                crossbeam_deque::Steal::Retry => continue,
            }
        }

        if let Some(handles) = self.join_handles.lock().expect("join handle list poisoned").take() {
            for handle in handles {
                let _ = handle.join();
            }
        }
    }
}

impl Handle {
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        spawn_on(&self.shared, future)
    }

    pub fn register(&self, fd: std::os::fd::RawFd, interest: Interest) -> Option<std::io::Result<Token>> {
        self.shared.reactor.as_ref().map(|r| r.register(fd, interest))
    }

    pub fn want(&self, token: Token, interest: Interest, waker: &std::task::Waker) {
        if let Some(r) = self.shared.reactor.as_ref() {
            r.want(token, interest, waker);
        }
    }

    pub fn sleep(&self, duration: std::time::Duration) -> crate::timer::Deadline {
        let wheel = self
            .shared
            .timers
            .clone()
            .expect("enable_timer(false): no timer wheel configured");
        crate::timer::sleep_future(wheel, duration)
    }
}

fn spawn_on<F>(shared: &Arc<Shared>, future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let scheduler = Arc::downgrade(shared) as std::sync::Weak<dyn Schedule>;
    let (task_ref, concrete) = new_task(future, scheduler);

    if !push_to_current_local(task_ref.clone(), &shared.injector) {
        shared.injector.push(task_ref.clone());
    }
    shared.notify_one();

    JoinHandle::new(task_ref, concrete)
}

/// Drive `future` to completion on the calling thread, independent of any
/// worker pool (spec.md §4.5: "Block-on does not require the worker
/// pool"). Installs a blocking parker as the waker, exactly like the
/// teacher's own `block_on` parks the calling thread between polls.
pub fn block_on<F: Future>(future: F) -> F::Output {
    use std::pin::pin;
    use std::sync::Arc as StdArc;
    use std::task::{Context, Wake};

    struct ThreadWaker(Thread);
    impl Wake for ThreadWaker {
        fn wake(self: StdArc<Self>) {
            self.0.unpark();
        }
        fn wake_by_ref(self: &StdArc<Self>) {
            self.0.unpark();
        }
    }

    let waker = std::task::Waker::from(StdArc::new(ThreadWaker(thread::current())));
    let mut cx = Context::from_waker(&waker);
    let mut future = pin!(future);

    loop {
        match future.as_mut().poll(&mut cx) {
            std::task::Poll::Ready(value) => return value,
            std::task::Poll::Pending => thread::park(),
        }
    }
}
