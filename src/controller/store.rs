/**
 * Local mirror of watched deployment state
 *
 * Single writer (the watch task), concurrent readers (the workers).
 * Snapshots are replaced wholesale; readers never observe partial state.
 */
use super::snapshot::DeploymentSnapshot;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug)]
pub struct DeploymentStore {
    entries: RwLock<HashMap<String, Arc<DeploymentSnapshot>>>,
    // latches false -> true exactly once, after the initial listing lands
    synced: watch::Sender<bool>,
}

impl Default for DeploymentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeploymentStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            synced: watch::Sender::new(false),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<DeploymentSnapshot>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Replace the snapshot for a key, returning the previous one
    pub fn insert(&self, snapshot: Arc<DeploymentSnapshot>) -> Option<Arc<DeploymentSnapshot>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.key.clone(), snapshot)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<DeploymentSnapshot>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Mark the initial listing as fully delivered. One-shot; never reverts.
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Block until `has_synced` is true or the timeout expires
    ///
    /// # Errors
    ///
    /// Returns `Error::SyncTimeout` if the initial sync does not land in time
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.synced.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|synced| *synced))
            .await
            .map_err(|_| Error::SyncTimeout)?
            .map_err(|e| Error::Custom(format!("sync channel closed: {e}")))?;
        Ok(())
    }
}
