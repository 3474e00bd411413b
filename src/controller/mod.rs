pub mod bridge;
pub mod queue;
pub mod snapshot;
pub mod store;
pub mod watcher;
pub mod worker;

pub use bridge::EventBridge;
pub use queue::WorkQueue;
pub use snapshot::DeploymentSnapshot;
pub use store::DeploymentStore;
pub use watcher::DeploymentWatcher;
pub use worker::Controller;
