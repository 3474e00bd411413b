use bugwatch::config::{self, ControllerConfig};
use bugwatch::controller::{Controller, DeploymentStore, DeploymentWatcher, EventBridge, WorkQueue};
use bugwatch::error::Error;
use bugwatch::k8s;
use bugwatch::notify::{BugFixNotifier, LogDropObserver};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Absolute path to the kubeconfig file
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubernetes api server url override
    #[arg(long)]
    api_server: Option<String>,

    /// Name of the namespace whose deployments are watched
    #[arg(short, long, default_value = "default")]
    namespace: String,

    /// Number of parallel reconcile workers
    #[arg(short, long, default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,

    /// Chat webhook url for bug fix notifications
    #[arg(long)]
    webhook_url: Option<String>,

    /// Annotation holding the bug tracker reference
    #[arg(long, default_value = config::DEFAULT_BUG_ANNOTATION)]
    bug_annotation: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::aws_lc_rs::default_provider(),
    );

    let args = Args::parse();
    let client = k8s::client::new(args.kubeconfig.as_deref(), args.api_server.as_deref()).await?;

    let controller_config = ControllerConfig {
        workers: args.workers,
        ..ControllerConfig::default()
    };

    let store = Arc::new(DeploymentStore::new());
    let queue = Arc::new(WorkQueue::new(
        controller_config.retry_base_delay,
        controller_config.retry_max_delay,
    ));
    let bridge = EventBridge::new(Arc::clone(&queue));
    let watcher = DeploymentWatcher::new(client, &args.namespace, Arc::clone(&store), bridge);
    let reconciler = Arc::new(BugFixNotifier::new(args.bug_annotation, args.webhook_url));
    let controller = Controller::new(
        store,
        queue,
        reconciler,
        Arc::new(LogDropObserver),
        controller_config,
    );

    let stop = CancellationToken::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, shutting down");
            signal_stop.cancel();
        }
    });

    controller.run(watcher.run(stop.clone()), stop).await
}
