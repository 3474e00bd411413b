/// End-to-end pipeline tests driving the controller with an in-process
/// watch feed instead of a live cluster: events flow store -> bridge ->
/// queue -> workers -> reconciler, with retry and drop behavior observable
/// through a recording reconciler and drop observer.
use bugwatch::config::ControllerConfig;
use bugwatch::controller::{
    Controller, DeploymentSnapshot, DeploymentStore, EventBridge, WorkQueue,
};
use bugwatch::error::{Error, Result};
use bugwatch::notify::{DropObserver, Reconciler};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct TestReconciler {
    /// key and virtual delivery time of every reconcile call
    calls: Mutex<Vec<(String, Instant)>>,
    /// bug annotation values observed on delivered snapshots
    seen_bugs: Mutex<Vec<String>>,
    fail: bool,
    /// how long each reconcile holds its key in flight
    hold: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait::async_trait]
impl Reconciler for TestReconciler {
    async fn reconcile(&self, key: &str, snapshot: &DeploymentSnapshot) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((key.to_string(), Instant::now()));
        if let Some(bug) = snapshot.annotation("a8r.io/bugs") {
            self.seen_bugs.lock().unwrap().push(bug.to_string());
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(hold) = self.hold {
            tokio::time::sleep(hold).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            Err(Error::Custom("reconcile failed".to_string()))
        } else {
            Ok(())
        }
    }
}

impl TestReconciler {
    fn deliveries(&self, key: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, at)| *at)
            .collect()
    }
}

#[derive(Default)]
struct TestObserver {
    dropped: Mutex<Vec<String>>,
}

impl DropObserver for TestObserver {
    fn key_dropped(&self, key: &str, _error: &Error) {
        self.dropped.lock().unwrap().push(key.to_string());
    }
}

struct Pipeline {
    store: Arc<DeploymentStore>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<TestReconciler>,
    observer: Arc<TestObserver>,
    controller: Arc<Controller>,
}

fn pipeline(reconciler: TestReconciler, config: ControllerConfig) -> Pipeline {
    let store = Arc::new(DeploymentStore::new());
    let queue = Arc::new(WorkQueue::new(
        config.retry_base_delay,
        config.retry_max_delay,
    ));
    let reconciler = Arc::new(reconciler);
    let observer = Arc::new(TestObserver::default());
    let controller = Arc::new(Controller::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        Arc::clone(&reconciler) as Arc<dyn Reconciler>,
        Arc::clone(&observer) as Arc<dyn DropObserver>,
        config,
    ));
    Pipeline {
        store,
        queue,
        reconciler,
        observer,
        controller,
    }
}

fn config(workers: usize) -> ControllerConfig {
    ControllerConfig {
        workers,
        ..ControllerConfig::default()
    }
}

fn snapshot_with_bug(name: &str, generation: i64, bug: &str) -> Arc<DeploymentSnapshot> {
    Arc::new(DeploymentSnapshot::new("default", name, generation).with_annotation("a8r.io/bugs", bug))
}

/// Scenario A: an added deployment carrying the bug annotation is reconciled
/// once, the annotation is observed, and the retry counter stays zero.
#[tokio::test(start_paused = true)]
async fn test_annotated_add_reconciles_once() -> anyhow::Result<()> {
    let p = pipeline(TestReconciler::default(), config(2));
    let stop = CancellationToken::new();

    let watch = {
        let (store, queue) = (Arc::clone(&p.store), Arc::clone(&p.queue));
        async move {
            let bridge = EventBridge::new(queue);
            let snap = snapshot_with_bug("api", 1, "BUG-1");
            store.insert(Arc::clone(&snap));
            bridge.on_add(&snap);
            store.mark_synced();
        }
    };
    let run = {
        let (controller, stop) = (Arc::clone(&p.controller), stop.clone());
        tokio::spawn(async move { controller.run(watch, stop).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.cancel();
    run.await??;

    assert_eq!(p.reconciler.deliveries("default/api").len(), 1);
    assert_eq!(*p.reconciler.seen_bugs.lock().unwrap(), vec!["BUG-1"]);
    assert_eq!(p.queue.num_requeues("default/api"), 0);
    assert!(p.observer.dropped.lock().unwrap().is_empty());
    Ok(())
}

/// Scenario B: two updates with an unchanged generation produce exactly one
/// enqueue; a genuine generation bump produces another.
#[tokio::test(start_paused = true)]
async fn test_duplicate_generation_updates_enqueue_once() -> anyhow::Result<()> {
    let p = pipeline(TestReconciler::default(), config(1));
    let stop = CancellationToken::new();

    let watch = {
        let (store, queue) = (Arc::clone(&p.store), Arc::clone(&p.queue));
        async move {
            let bridge = EventBridge::new(queue);
            let v1 = snapshot_with_bug("api", 1, "BUG-1");
            store.insert(Arc::clone(&v1));
            bridge.on_add(&v1);
            store.mark_synced();
            tokio::time::sleep(Duration::from_millis(100)).await;

            // metadata-only churn: generation unchanged
            let churn = snapshot_with_bug("api", 1, "BUG-1");
            store.insert(Arc::clone(&churn));
            bridge.on_update(&v1, &churn);
            bridge.on_update(&v1, &churn);
            tokio::time::sleep(Duration::from_millis(100)).await;

            let v2 = snapshot_with_bug("api", 2, "BUG-2");
            store.insert(Arc::clone(&v2));
            bridge.on_update(&churn, &v2);
        }
    };
    let run = {
        let (controller, stop) = (Arc::clone(&p.controller), stop.clone());
        tokio::spawn(async move { controller.run(watch, stop).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.cancel();
    run.await??;

    // one delivery for the add, one for the real update, none for the churn
    assert_eq!(p.reconciler.deliveries("default/api").len(), 2);
    assert_eq!(
        *p.reconciler.seen_bugs.lock().unwrap(),
        vec!["BUG-1", "BUG-2"]
    );
    Ok(())
}

/// Scenario C: a key whose resource is gone from the cache is treated as
/// success without invoking the reconciler.
#[tokio::test(start_paused = true)]
async fn test_deleted_resource_skips_reconcile() -> anyhow::Result<()> {
    let p = pipeline(TestReconciler::default(), config(1));
    let stop = CancellationToken::new();

    let watch = {
        let queue = Arc::clone(&p.queue);
        let store = Arc::clone(&p.store);
        async move {
            let bridge = EventBridge::new(queue);
            store.mark_synced();
            // tombstone: never present in the store
            bridge.on_delete("default/ghost");
        }
    };
    let run = {
        let (controller, stop) = (Arc::clone(&p.controller), stop.clone());
        tokio::spawn(async move { controller.run(watch, stop).await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.cancel();
    run.await??;

    assert!(p.reconciler.calls.lock().unwrap().is_empty());
    assert_eq!(p.queue.num_requeues("default/ghost"), 0);
    assert!(p.observer.dropped.lock().unwrap().is_empty());
    Ok(())
}

/// Scenario D: an always-failing key is delivered exactly five times with
/// strictly increasing gaps, then dropped and reported exactly once.
#[tokio::test(start_paused = true)]
async fn test_persistent_failure_drops_after_retry_budget() -> anyhow::Result<()> {
    let p = pipeline(
        TestReconciler {
            fail: true,
            ..TestReconciler::default()
        },
        config(2),
    );
    let stop = CancellationToken::new();

    let watch = {
        let (store, queue) = (Arc::clone(&p.store), Arc::clone(&p.queue));
        async move {
            let bridge = EventBridge::new(queue);
            let snap = snapshot_with_bug("api", 1, "BUG-1");
            store.insert(Arc::clone(&snap));
            bridge.on_add(&snap);
            store.mark_synced();
        }
    };
    let run = {
        let (controller, stop) = (Arc::clone(&p.controller), stop.clone());
        tokio::spawn(async move { controller.run(watch, stop).await })
    };

    // long enough for every backoff delay to play out
    tokio::time::sleep(Duration::from_secs(30)).await;

    let deliveries = p.reconciler.deliveries("default/api");
    assert_eq!(deliveries.len(), 5);
    let gaps: Vec<Duration> = deliveries.windows(2).map(|w| w[1] - w[0]).collect();
    for pair in gaps.windows(2) {
        assert!(pair[1] > pair[0], "backoff gaps must grow: {gaps:?}");
    }

    assert_eq!(*p.observer.dropped.lock().unwrap(), vec!["default/api"]);
    assert_eq!(p.queue.num_requeues("default/api"), 0);

    // dropped for good: no further automatic delivery
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(p.reconciler.deliveries("default/api").len(), 5);
    assert_eq!(p.observer.dropped.lock().unwrap().len(), 1);

    stop.cancel();
    run.await??;
    Ok(())
}

/// A sync that never lands is fatal: `run` returns `SyncTimeout` and no
/// worker ever calls the reconciler, even with work already queued.
#[tokio::test(start_paused = true)]
async fn test_no_reconcile_before_cache_sync() {
    let p = pipeline(
        TestReconciler::default(),
        ControllerConfig {
            workers: 2,
            sync_timeout: Duration::from_millis(50),
            ..ControllerConfig::default()
        },
    );
    let stop = CancellationToken::new();

    let watch = {
        let (store, queue) = (Arc::clone(&p.store), Arc::clone(&p.queue));
        async move {
            let bridge = EventBridge::new(queue);
            let snap = snapshot_with_bug("api", 1, "BUG-1");
            store.insert(Arc::clone(&snap));
            bridge.on_add(&snap);
            // sync never marked
            std::future::pending::<()>().await;
        }
    };

    let result = p.controller.run(watch, stop).await;
    assert!(matches!(result, Err(Error::SyncTimeout)));
    assert!(p.reconciler.calls.lock().unwrap().is_empty());
}

/// A key re-added while in flight is redelivered exactly once after the
/// current attempt completes, never processed concurrently with itself.
#[tokio::test(start_paused = true)]
async fn test_in_flight_key_is_never_processed_concurrently() -> anyhow::Result<()> {
    let p = pipeline(
        TestReconciler {
            hold: Some(Duration::from_millis(100)),
            ..TestReconciler::default()
        },
        config(3),
    );
    let stop = CancellationToken::new();

    let watch = {
        let (store, queue) = (Arc::clone(&p.store), Arc::clone(&p.queue));
        async move {
            let bridge = EventBridge::new(queue);
            let snap = snapshot_with_bug("api", 1, "BUG-1");
            store.insert(Arc::clone(&snap));
            bridge.on_add(&snap);
            store.mark_synced();
        }
    };
    let run = {
        let (controller, stop) = (Arc::clone(&p.controller), stop.clone());
        tokio::spawn(async move { controller.run(watch, stop).await })
    };

    // wait until the first attempt is mid-flight, then pile on adds
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(p.reconciler.deliveries("default/api").len(), 1);
    p.queue.add("default/api");
    p.queue.add("default/api");

    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.cancel();
    run.await??;

    // exactly one redelivery, and never two workers on the same key at once
    assert_eq!(p.reconciler.deliveries("default/api").len(), 2);
    assert_eq!(p.reconciler.max_active.load(Ordering::SeqCst), 1);
    Ok(())
}
