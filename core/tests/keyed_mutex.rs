use gateway_core::KeyedMutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn same_key_runs_in_arrival_order() {
    let mutex = Arc::new(KeyedMutex::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..5u64 {
        let mutex = mutex.clone();
        let order = order.clone();
        handles.push(tokio::spawn(async move {
            mutex
                .with_lock("k", async {
                    order.lock().unwrap().push(i);
                    sleep(Duration::from_millis(5)).await;
                    i * 10
                })
                .await
        }));
        // let each task enqueue before spawning the next
        sleep(Duration::from_millis(1)).await;
    }
    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    assert_eq!(results, vec![0, 10, 20, 30, 40]);
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(mutex.active_keys(), 0);
}

#[tokio::test]
async fn bodies_never_overlap_on_one_key() {
    let mutex = Arc::new(KeyedMutex::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let (mutex, inside, max_seen) = (mutex.clone(), inside.clone(), max_seen.clone());
            tokio::spawn(async move {
                mutex
                    .with_lock("refresh", async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::task::yield_now().await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn distinct_keys_run_concurrently() {
    let mutex = Arc::new(KeyedMutex::new());
    let started = tokio::time::Instant::now();
    let a = {
        let mutex = mutex.clone();
        tokio::spawn(async move { mutex.with_lock("a", sleep(Duration::from_secs(1))).await })
    };
    let b = {
        let mutex = mutex.clone();
        tokio::spawn(async move { mutex.with_lock("b", sleep(Duration::from_secs(1))).await })
    };
    a.await.unwrap();
    b.await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1_500));
}

#[tokio::test]
async fn dropped_waiter_leaves_queue() {
    let mutex = Arc::new(KeyedMutex::new());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let holder = {
        let mutex = mutex.clone();
        tokio::spawn(async move {
            mutex
                .with_lock("k", async {
                    let _ = release_rx.await;
                    "holder"
                })
                .await
        })
    };
    tokio::task::yield_now().await;

    let waiter = tokio::time::timeout(Duration::from_millis(20), mutex.with_lock("k", async { "dropped" }));
    assert!(waiter.await.is_err());

    release_tx.send(()).unwrap();
    assert_eq!(holder.await.unwrap(), "holder");
    assert_eq!(mutex.with_lock("k", async { "next" }).await, "next");
    assert_eq!(mutex.active_keys(), 0);
}
