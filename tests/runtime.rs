//! End-to-end scenarios from spec.md §8, one test per scenario. Plain
//! `#[test]` functions, no custom harness — the teacher carries no test
//! suite of its own, but other crates retrieved alongside it (`mini-mio`'s
//! `poll.rs`) test schedulers this way, and this suite follows that.

use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::Interest;
use taskloop::{Builder, JoinError};

#[test]
fn spawn_and_join() {
    let runtime = Builder::new().worker_count(2).build().unwrap();
    let handle = runtime.spawn(async { 1 + 2 });
    assert_eq!(runtime.block_on(handle).unwrap(), 3);
    runtime.stop();
}

#[test]
fn cooperative_yield_of_many_tasks() {
    let runtime = Builder::new().worker_count(4).build().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..1_000)
        .map(|_| {
            let counter = counter.clone();
            runtime.spawn(async move {
                counter.fetch_add(1, Ordering::AcqRel);
            })
        })
        .collect();

    for h in handles {
        runtime.block_on(h).unwrap();
    }

    assert_eq!(counter.load(Ordering::Acquire), 1_000);
    runtime.stop();
}

#[test]
fn timer_precision() {
    let runtime = Builder::new().worker_count(1).build().unwrap();
    let start = Instant::now();
    runtime.block_on(runtime.sleep(Duration::from_millis(50)));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(50), "fired early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(50) + Duration::from_millis(500), "fired far too late: {elapsed:?}");
    runtime.stop();
}

#[test]
fn work_stealing_fairness() {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    let runtime = Builder::new().worker_count(4).build().unwrap();
    let completions: Arc<Mutex<HashMap<ThreadId, usize>>> = Arc::new(Mutex::new(HashMap::new()));

    let handles: Vec<_> = (0..10_000)
        .map(|_| {
            let completions = completions.clone();
            runtime.spawn(async move {
                *completions
                    .lock()
                    .unwrap()
                    .entry(std::thread::current().id())
                    .or_insert(0) += 1;
            })
        })
        .collect();

    for h in handles {
        runtime.block_on(h).unwrap();
    }

    let counts: Vec<usize> = completions.lock().unwrap().values().copied().collect();
    assert_eq!(counts.iter().sum::<usize>(), 10_000);
    let max = *counts.iter().max().unwrap();
    let min = *counts.iter().min().unwrap();
    assert!(
        max as f64 / min.max(1) as f64 <= 3.0,
        "imbalanced per-worker completion counts: {counts:?}"
    );
    runtime.stop();
}

#[test]
fn cancellation() {
    let runtime = Builder::new().worker_count(2).build().unwrap();
    let handle_ref = runtime.handle();
    let join = runtime.spawn(async move {
        handle_ref.sleep(Duration::from_secs(1)).await;
    });

    std::thread::sleep(Duration::from_millis(10));
    join.abort();

    let before = Instant::now();
    match runtime.block_on(join) {
        Err(JoinError::Cancelled) => {}
        other => panic!("expected Cancelled, got {other:?}"),
    }
    assert!(
        before.elapsed() < Duration::from_millis(200),
        "cancellation took far longer than one scheduler tick: {:?}",
        before.elapsed()
    );
    runtime.stop();
}

#[test]
fn io_readiness() {
    let runtime = Builder::new().worker_count(2).build().unwrap();

    let (mut reader, mut writer) = std::os::unix::net::UnixStream::pair().unwrap();
    reader.set_nonblocking(true).unwrap();
    let fd = reader.as_raw_fd();

    let handle = runtime.handle();
    let token = handle.register(fd, Interest::READABLE).unwrap().unwrap();

    let join = runtime.spawn(async move {
        std::future::poll_fn(move |cx| {
            let mut buf = [0u8; 1];
            match reader.read(&mut buf) {
                Ok(1) => std::task::Poll::Ready(buf[0]),
                Ok(_) => std::task::Poll::Pending,
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    handle.want(token, Interest::READABLE, cx.waker());
                    std::task::Poll::Pending
                }
                Err(e) => panic!("unexpected read error: {e}"),
            }
        })
        .await
    });

    std::thread::sleep(Duration::from_millis(20));
    writer.write_all(&[42u8]).unwrap();

    assert_eq!(runtime.block_on(join).unwrap(), 42);
    runtime.stop();
}

