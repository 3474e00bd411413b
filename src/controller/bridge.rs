/**
 * Translates cache mutation events into work-queue keys
 *
 * Updates with an unchanged generation are suppressed: the API server emits
 * duplicate notifications for metadata-only churn, and without this filter
 * the same logical change would be reconciled twice.
 */
use super::queue::WorkQueue;
use super::snapshot::DeploymentSnapshot;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct EventBridge {
    queue: Arc<WorkQueue>,
}

impl EventBridge {
    #[must_use]
    pub fn new(queue: Arc<WorkQueue>) -> Self {
        Self { queue }
    }

    pub fn on_add(&self, resource: &DeploymentSnapshot) {
        debug!("deployment added: {}", resource.key);
        self.queue.add(&resource.key);
    }

    pub fn on_update(&self, old: &DeploymentSnapshot, new: &DeploymentSnapshot) {
        if new.generation == old.generation {
            trace!("suppressing no-op update for {}", new.key);
            return;
        }
        debug!("deployment updated: {}", new.key);
        self.queue.add(&new.key);
    }

    /// Deletions enqueue the key derived from the event object itself, so a
    /// tombstone for a resource already gone from the cache still resolves.
    pub fn on_delete(&self, key: &str) {
        debug!("deployment deleted: {key}");
        self.queue.add(key);
    }
}
