use k8s_openapi::api::apps::v1::Deployment;
use std::collections::BTreeMap;

/// Last observed state of one deployment, narrowed to the fields the
/// controller acts on. Replaced wholesale on every observed change, never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSnapshot {
    /// `namespace/name` identity of the deployment
    pub key: String,
    /// Monotonically increasing spec generation, used to filter no-op updates
    pub generation: i64,
    /// Deployment metadata annotations
    pub annotations: BTreeMap<String, String>,
}

impl DeploymentSnapshot {
    #[must_use]
    pub fn new(namespace: &str, name: &str, generation: i64) -> Self {
        Self {
            key: format!("{namespace}/{name}"),
            generation,
            annotations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Build a snapshot from a watched deployment object. Returns `None` for
    /// objects with no name, which cannot be keyed.
    #[must_use]
    pub fn from_deployment(deployment: &Deployment) -> Option<Self> {
        let name = deployment.metadata.name.as_deref()?;
        let namespace = deployment.metadata.namespace.as_deref().unwrap_or("default");

        Some(Self {
            key: format!("{namespace}/{name}"),
            generation: deployment.metadata.generation.unwrap_or(0),
            annotations: deployment.metadata.annotations.clone().unwrap_or_default(),
        })
    }

    /// Look up an annotation value, treating an empty string as absent
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
