//! Integration tests for core-async.
//!
//! These cover the executor surface the reader relies on: spawning, timeouts,
//! the watch/cancellation pair used to park pending seeks, and promise
//! settlement across tasks.

use core_async::promise::{Abandoned, Promise, PromiseHolder, RequestHolder};
use core_async::sync::{mpsc, watch, CancellationToken};
use core_async::{task, time};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[core_async::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    let result = handle.await.unwrap();
    assert_eq!(result, 42);
}

#[core_async::test]
async fn test_timeout_failure() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(100)).await;
        42
    })
    .await;

    assert!(result.is_err());
}

#[core_async::test]
async fn test_promise_resolved_from_other_task() {
    let (resolver, promise) = Promise::<&'static str, Abandoned>::pending();

    task::spawn(async move {
        time::sleep(time::Duration::from_millis(5)).await;
        resolver.resolve("decoded");
    });

    assert_eq!(promise.await, Ok("decoded"));
}

#[core_async::test]
async fn test_promise_abandoned_when_task_drops_holder() {
    let (resolver, promise) = Promise::<u32, Abandoned>::pending();

    task::spawn(async move {
        let mut holder = PromiseHolder::new();
        holder.hold(resolver).ok();
        // holder dropped here without settling
    });

    assert_eq!(promise.await, Err(Abandoned));
}

#[core_async::test]
async fn test_request_holder_abort_stops_task() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let mut holder = RequestHolder::new();

    holder
        .begin(move |_| async move {
            time::sleep(time::Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    assert!(holder.disconnect());

    time::sleep(time::Duration::from_millis(80)).await;
    assert!(!finished.load(Ordering::SeqCst));
}

#[core_async::test]
async fn test_request_completion_round_trip() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut holder = RequestHolder::new();

    let issued = holder
        .begin(move |id| async move {
            let _ = tx.send((id, 3_u32));
        })
        .unwrap();

    let (id, samples) = rx.recv().await.unwrap();
    assert_eq!(id, issued);
    assert_eq!(samples, 3);
    assert!(holder.complete(id));
    assert!(!holder.complete(id));
}

#[core_async::test]
async fn test_watch_wakes_parked_waiter() {
    let (tx, mut rx) = watch::channel(0_u64);
    rx.borrow_and_update();

    task::spawn(async move {
        time::sleep(time::Duration::from_millis(10)).await;
        tx.send_modify(|generation| *generation += 1);
        // keep the sender alive until the waiter observed the change
        time::sleep(time::Duration::from_millis(20)).await;
    });

    assert!(rx.changed().await.is_ok());
    assert_eq!(*rx.borrow(), 1);
}

#[core_async::test]
async fn test_cancellation_token_interrupts_select() {
    let token = CancellationToken::new();
    let child = token.clone();

    task::spawn(async move {
        time::sleep(time::Duration::from_millis(10)).await;
        token.cancel();
    });

    let outcome = core_async::select! {
        _ = child.cancelled() => "cancelled",
        _ = time::sleep(time::Duration::from_secs(5)) => "timed out",
    };
    assert_eq!(outcome, "cancelled");
}
