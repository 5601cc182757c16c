//! End-to-end scenarios exercising the runtime the way application code would: submit work,
//! await it, compose results, drive timers, and serialize coroutines through the async lock.

use coro_core::engine::{Engine, EngineOptions};
use coro_core::error::CoroError;
use coro_core::executor::{Executor, ExecutorExt};
use coro_core::result::{self, when_all, when_any};
use coro_core::sync::lock::AsyncLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    let mut fut = std::pin::pin!(fut);
    let waker = std::task::Waker::noop();
    let mut cx = std::task::Context::from_waker(waker);
    loop {
        if let std::task::Poll::Ready(v) = fut.as_mut().poll(&mut cx) {
            return v;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn submit_and_await_a_successful_task() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool = engine.cpu_pool();
    let future = pool.submit(|| Ok(21 * 2)).unwrap();
    assert_eq!(future.wait(), Ok(42));
    engine.shutdown_all();
}

#[test]
fn submit_and_await_a_failing_task() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool = engine.cpu_pool();
    let future = pool
        .submit(|| -> coro_core::error::CoroResult<i32> {
            Err(CoroError::TaskFailed("division by zero".into()))
        })
        .unwrap();
    assert_eq!(future.wait(), Err(CoroError::TaskFailed("division by zero".into())));
    engine.shutdown_all();
}

#[test]
fn shared_result_fans_out_to_many_awaiters() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool = engine.cpu_pool();
    let future = pool.submit(|| Ok(7)).unwrap();
    let shared = result::SharedResult::new(future);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let shared = shared.clone();
            std::thread::spawn(move || block_on(shared.wait()))
        })
        .collect();
    for h in handles {
        assert_eq!(h.join().unwrap(), Ok(7));
    }
    engine.shutdown_all();
}

#[test]
fn when_any_over_three_background_tasks_picks_the_fastest() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool = engine.background_pool();

    let slow = pool
        .submit(|| {
            std::thread::sleep(Duration::from_millis(40));
            Ok(1)
        })
        .unwrap();
    let fast = pool
        .submit(|| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(2)
        })
        .unwrap();
    let medium = pool
        .submit(|| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(3)
        })
        .unwrap();

    let (outcome, survivors) = block_on(when_any(vec![slow, fast, medium]));
    assert_eq!(outcome.index, 1);
    assert_eq!(outcome.value, Ok(2));

    // The losing participants are still live and can be awaited for their own value.
    assert_eq!(survivors.len(), 3);
    assert_eq!(survivors.into_iter().next().unwrap().wait(), Ok(1));
    engine.shutdown_all();
}

#[test]
fn when_all_collects_every_background_task_result() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool = engine.background_pool();

    let futures = pool
        .bulk_submit(vec![
            (|| -> coro_core::error::CoroResult<i32> { Ok(10) }) as fn() -> coro_core::error::CoroResult<i32>,
            || Ok(20),
            || Ok(30),
        ])
        .unwrap();

    let results = block_on(when_all(futures));
    assert_eq!(results, vec![Ok(10), Ok(20), Ok(30)]);
    engine.shutdown_all();
}

#[test]
fn periodic_timer_fires_on_the_cpu_pool_until_cancelled() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool: Arc<dyn Executor> = engine.cpu_pool();
    let timers = engine.timers();

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let id = timers
        .make_timer(pool, Duration::from_millis(10), move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    std::thread::sleep(Duration::from_millis(55));
    timers.cancel(id);
    let seen = calls.load(Ordering::SeqCst);
    assert!(seen >= 3, "expected several firings, saw {seen}");
    engine.shutdown_all();
}

#[test]
fn shutdown_cascades_to_every_executor_the_engine_tracked() {
    let engine = Engine::with_options(EngineOptions::default());
    let inline = engine.inline_executor();
    let cpu = engine.cpu_pool();
    let background = engine.background_pool();
    let thread_per_task = engine.thread_per_task_executor();
    let manual = engine.make_manual_executor();
    let worker = engine.make_worker_thread_executor();

    engine.shutdown_all();

    assert!(inline.shutdown_requested());
    assert!(cpu.shutdown_requested());
    assert!(background.shutdown_requested());
    assert!(thread_per_task.shutdown_requested());
    assert!(manual.shutdown_requested());
    assert!(worker.shutdown_requested());

    assert!(inline.post(|| {}).is_err());
    assert!(cpu.post(|| {}).is_err());
}

#[test]
fn async_lock_serializes_many_coroutines_across_the_thread_pool() {
    let engine = Engine::with_options(EngineOptions::default());
    let pool: Arc<dyn Executor> = engine.cpu_pool();
    let lock = AsyncLock::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let max_observed_concurrency = Arc::new(AtomicUsize::new(0));
    let in_section = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let lock = lock.clone();
        let pool = pool.clone();
        let counter = counter.clone();
        let in_section = in_section.clone();
        let max_observed = max_observed_concurrency.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..20 {
                let guard = lock.lock(pool.clone()).wait().unwrap();
                let now_in_section = in_section.fetch_add(1, Ordering::AcqRel) + 1;
                max_observed.fetch_max(now_in_section, Ordering::AcqRel);
                let seen = counter.load(Ordering::Acquire);
                counter.store(seen + 1, Ordering::Release);
                in_section.fetch_sub(1, Ordering::AcqRel);
                drop(guard);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(counter.load(Ordering::Acquire), 200);
    assert_eq!(max_observed_concurrency.load(Ordering::Acquire), 1);
    engine.shutdown_all();
}
