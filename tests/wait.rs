use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use deferred::{Deferred, PoolDefer, TaskQueue, WaitError};

#[tokio::test(flavor = "multi_thread")]
async fn awaits_value_settled_from_another_task() {
    let defer = PoolDefer::new().unwrap();
    let (value, resolver, _) = Deferred::<String, String>::pending(defer);

    let chained = value.then(|v| Ok(v + "!")).then(|v| Ok(v + "!"));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        resolver.resolve("Done".to_string());
    });

    assert_eq!(chained.await, Ok("Done!!".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn awaits_rejection() {
    let defer = PoolDefer::new().unwrap();
    let value = Deferred::<u32, String>::rejected(defer, "boom".to_string());

    let result = value.then(|v| Ok(v + 1)).wait().await;
    assert_eq!(result, Err(WaitError::Rejected("boom".to_string())));

    let error = result.unwrap_err();
    assert_eq!(error.to_string(), "Deferred value was rejected: boom");
    assert_eq!(error.into_rejection(), Some("boom".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn awaits_nested_adoption() {
    let defer = PoolDefer::new().unwrap();
    let (inner, inner_resolver, _) = Deferred::<String, String>::pending(defer.clone());
    let outer = Deferred::<String, String>::new(defer, |resolver, _| {
        resolver.adopt(inner);
        Ok(())
    });

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        inner_resolver.resolve("X".to_string());
    });

    assert_eq!(outer.await, Ok("X".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_settlement_applies_once() {
    let defer = PoolDefer::new().unwrap();
    let (value, resolver, rejecter) = Deferred::<usize, usize>::pending(defer);
    let calls = Arc::new(AtomicU8::new(0));

    let calls_cl = Arc::clone(&calls);
    let observed = value.finally(move || {
        calls_cl.fetch_add(1, Ordering::Relaxed);
    });

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let resolver = resolver.clone();
            let rejecter = rejecter.clone();
            std::thread::spawn(move || {
                if i % 2 == 0 {
                    resolver.resolve(i);
                } else {
                    rejecter.reject(i);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let first = observed.wait().await;
    // `PoolDefer` runs jobs one at a time in submission order, and every
    // settlement attempt was submitted before the threads were joined, so all
    // of them have been applied or ignored by the time `observed` settles.
    let again = value.wait().await;
    assert_eq!(first, again, "All observers should see one outcome");
    assert_eq!(
        value.peek().map(|outcome| outcome.map_err(WaitError::Rejected)),
        Some(first),
        "Later attempts should not have changed the outcome"
    );
    assert_eq!(calls.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_pending_value_is_abandoned() {
    let defer = PoolDefer::new().unwrap();
    let (value, resolver, rejecter) = Deferred::<u32, String>::pending(defer);

    let wait = value.wait();
    drop(value);
    drop(resolver);
    drop(rejecter);

    let result = wait.await;
    assert_eq!(result, Err(WaitError::Abandoned));
    assert_eq!(
        result.unwrap_err().to_string(),
        "Deferred value was dropped before it settled"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_keeps_running_after_a_panicking_handler() {
    let defer = PoolDefer::new().unwrap();

    let exploded = Deferred::<u32, String>::resolved(defer.clone(), 1)
        .then(|_| -> Result<u32, String> { panic!("handler exploded") });
    let sibling = Deferred::<u32, String>::resolved(defer.clone(), 1).then(|v| Ok(v + 1));
    let unrelated = Deferred::<u32, String>::resolved(defer, 5).then(|v| Ok(v + 1));

    assert_eq!(sibling.await, Ok(2));
    assert_eq!(unrelated.await, Ok(6), "Worker should survive the panic");
    assert!(exploded.is_pending(), "Nothing settles a panicked step");
}

#[test]
fn awaits_on_smol() {
    smol::block_on(async {
        let defer = PoolDefer::with_name_prefix("smol-deferred-").unwrap();
        let value = Deferred::<u32, String>::resolved(defer, 20).then(|v| Ok(v * 2));
        assert_eq!(value.await, Ok(40));
    });
}

#[test]
fn awaits_task_queue_once_drained() {
    let queue = TaskQueue::new();
    let value = Deferred::<u32, String>::resolved(queue.clone(), 1).then(|v| Ok(v + 1));
    let wait = value.wait();

    // Nothing settles until the owner of the queue runs it.
    queue.run_until_idle();
    assert_eq!(futures_lite::future::block_on(wait), Ok(2));
}
