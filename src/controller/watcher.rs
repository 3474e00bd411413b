/**
 * Deployment watch stream
 *
 * Performs a full list to seed the store, marks it synced, then applies
 * incremental watch events. Stream interruption is recoverable: the loop
 * re-lists and resumes with exponential restart backoff.
 */
use super::bridge::EventBridge;
use super::snapshot::DeploymentSnapshot;
use super::store::DeploymentStore;
use crate::config::{
    INITIAL_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS, MAX_WATCH_RESTARTS, RESTART_DELAY_SECONDS,
    WATCH_TIMEOUT_SECONDS,
};
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct DeploymentWatcher {
    api: Api<Deployment>,
    store: Arc<DeploymentStore>,
    bridge: EventBridge,
}

impl DeploymentWatcher {
    #[must_use]
    pub fn new(
        client: Client,
        namespace: &str,
        store: Arc<DeploymentStore>,
        bridge: EventBridge,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            store,
            bridge,
        }
    }

    /// Drive the list-then-watch loop until cancelled or the restart budget
    /// is exhausted
    pub async fn run(self, stop: CancellationToken) {
        info!("🔍 Starting Deployment watcher");

        let mut backoff_seconds = INITIAL_BACKOFF_SECONDS;
        let mut restart_count = 0;

        loop {
            if restart_count >= MAX_WATCH_RESTARTS {
                error!(
                    "❌ Deployment watcher exceeded maximum restart attempts ({}), stopping",
                    MAX_WATCH_RESTARTS
                );
                break;
            }

            tokio::select! {
                () = stop.cancelled() => {
                    info!("🔍 Deployment watcher shutting down");
                    break;
                }
                result = self.sync_and_watch() => match result {
                    Ok(()) => {
                        // watch timeout elapsed, re-list and resume
                        backoff_seconds = INITIAL_BACKOFF_SECONDS;
                        restart_count = 0;
                    }
                    Err(e) => {
                        restart_count += 1;
                        warn!(
                            "❌ Deployment watcher failed (attempt {}/{}): {}, restarting in {}s",
                            restart_count, MAX_WATCH_RESTARTS, e, backoff_seconds
                        );
                        sleep(Duration::from_secs(backoff_seconds)).await;
                        backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
                    }
                }
            }

            sleep(Duration::from_secs(RESTART_DELAY_SECONDS)).await;
        }
    }

    /// One full cycle: list, reconcile the store against the listing, mark
    /// synced, then consume watch events until the stream ends
    async fn sync_and_watch(&self) -> Result<()> {
        use futures::{pin_mut, TryStreamExt};

        let listing = self.api.list(&ListParams::default()).await?;
        let resource_version = listing
            .metadata
            .resource_version
            .clone()
            .unwrap_or_else(|| "0".to_string());

        let mut listed = HashSet::new();
        for deployment in &listing.items {
            if let Some(snapshot) = DeploymentSnapshot::from_deployment(deployment) {
                listed.insert(snapshot.key.clone());
                self.apply(snapshot);
            }
        }
        // anything cached but absent from the fresh listing vanished while
        // the stream was down
        for key in self.store.keys() {
            if !listed.contains(&key) {
                self.store.remove(&key);
                self.bridge.on_delete(&key);
            }
        }

        self.store.mark_synced();
        info!(
            "📋 Listed {} deployments at resource version {}",
            listed.len(),
            resource_version
        );

        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);
        let stream = self.api.watch(&wp, &resource_version).await?;
        pin_mut!(stream);

        while let Some(event) = stream.try_next().await? {
            match event {
                WatchEvent::Added(deployment) | WatchEvent::Modified(deployment) => {
                    if let Some(snapshot) = DeploymentSnapshot::from_deployment(&deployment) {
                        self.apply(snapshot);
                    }
                }
                WatchEvent::Deleted(deployment) => {
                    if let Some(snapshot) = DeploymentSnapshot::from_deployment(&deployment) {
                        self.store.remove(&snapshot.key);
                        self.bridge.on_delete(&snapshot.key);
                    }
                }
                WatchEvent::Error(e) => return Err(Error::Kube(kube::Error::Api(e))),
                WatchEvent::Bookmark(_) => {}
            }
        }

        Ok(())
    }

    fn apply(&self, snapshot: DeploymentSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.store.insert(Arc::clone(&snapshot)) {
            None => self.bridge.on_add(&snapshot),
            Some(previous) => self.bridge.on_update(&previous, &snapshot),
        }
    }
}
