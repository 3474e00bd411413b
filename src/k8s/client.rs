use crate::error::Result;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;

/// Create a new k8s client to interact with the k8s cluster api
///
/// Uses the given kubeconfig path when provided, otherwise infers the
/// configuration from the environment. An explicit api server url overrides
/// whatever the config resolved.
///
/// # Errors
///
/// Will return `Err` if the kubeconfig cannot be read or the client cannot
/// be constructed
pub async fn new(kubeconfig: Option<&Path>, api_server: Option<&str>) -> Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };

    if let Some(server) = api_server {
        config.cluster_url = server.parse()?;
    }

    let client = Client::try_from(config)?;

    Ok(client)
}
