/**
 * Worker pool, retry policy, and controller lifecycle
 *
 * `run` starts the watch future, blocks until the initial cache sync lands
 * (fatal on timeout, no workers start), then drives N workers that drain
 * the shared queue until the stop signal fires.
 */
use super::queue::WorkQueue;
use super::store::DeploymentStore;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::notify::{DropObserver, Reconciler};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct Controller {
    store: Arc<DeploymentStore>,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconciler>,
    observer: Arc<dyn DropObserver>,
    config: ControllerConfig,
}

/// Releases a key back to the queue when the delivery scope exits, even if
/// the reconcile attempt unwinds
struct DoneGuard<'a> {
    queue: &'a WorkQueue,
    key: &'a str,
}

impl Drop for DoneGuard<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

impl Controller {
    #[must_use]
    pub fn new(
        store: Arc<DeploymentStore>,
        queue: Arc<WorkQueue>,
        reconciler: Arc<dyn Reconciler>,
        observer: Arc<dyn DropObserver>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            reconciler,
            observer,
            config,
        }
    }

    /// Run the controller until `stop` fires. `watch` is the already-wired
    /// watch future feeding the store and queue; it is expected to observe
    /// the same stop signal.
    ///
    /// # Errors
    ///
    /// Returns `Error::SyncTimeout` if the initial listing does not land
    /// within the configured bound; no workers are started in that case.
    pub async fn run(
        &self,
        watch: impl Future<Output = ()> + Send + 'static,
        stop: CancellationToken,
    ) -> Result<()> {
        info!("Starting deployment controller");
        let watch_handle = tokio::spawn(watch);

        if let Err(e) = self.store.wait_for_sync(self.config.sync_timeout).await {
            error!("Timed out waiting for caches to sync");
            self.queue.shut_down();
            watch_handle.abort();
            return Err(e);
        }

        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let store = Arc::clone(&self.store);
            let queue = Arc::clone(&self.queue);
            let reconciler = Arc::clone(&self.reconciler);
            let observer = Arc::clone(&self.observer);
            let max_retries = self.config.max_retries;
            workers.push(tokio::spawn(async move {
                worker_loop(id, &store, &queue, reconciler.as_ref(), observer.as_ref(), max_retries)
                    .await;
            }));
        }

        stop.cancelled().await;
        info!("Stopping deployment controller");
        self.queue.shut_down();
        for worker in workers {
            let _ = worker.await;
        }
        watch_handle.abort();
        Ok(())
    }
}

async fn worker_loop(
    id: usize,
    store: &DeploymentStore,
    queue: &Arc<WorkQueue>,
    reconciler: &dyn Reconciler,
    observer: &dyn DropObserver,
    max_retries: u32,
) {
    debug!("worker {id} started");
    while let Some(key) = queue.get().await {
        process(&key, store, queue, reconciler, observer, max_retries).await;
    }
    debug!("worker {id} exiting");
}

/// Handle one delivery of a key
async fn process(
    key: &str,
    store: &DeploymentStore,
    queue: &Arc<WorkQueue>,
    reconciler: &dyn Reconciler,
    observer: &dyn DropObserver,
    max_retries: u32,
) {
    let _done = DoneGuard {
        queue: queue.as_ref(),
        key,
    };

    let Some(snapshot) = store.get(key) else {
        // resource already gone, nothing to reconcile
        queue.forget(key);
        return;
    };

    // a panic inside reconcile counts as a failed attempt; the worker loop
    // must keep draining other keys
    let outcome = AssertUnwindSafe(reconciler.reconcile(key, &snapshot))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(Error::Custom(format!("reconcile for {key} panicked"))));

    match outcome {
        Ok(()) => queue.forget(key),
        Err(e) => {
            // this delivery counts against the budget
            let attempts = queue.num_requeues(key) + 1;
            if attempts < max_retries {
                info!("Error syncing deployment {key} (attempt {attempts}): {e}");
                queue.add_rate_limited(key);
            } else {
                queue.forget(key);
                observer.key_dropped(key, &e);
                info!("Dropping deployment {key:?} out of the queue: {e}");
            }
        }
    }
}
