/**
 * Business logic invoked per reconciled deployment
 *
 * The bundled reconciler looks for the bug-tracker annotation on the
 * deployment and posts a "bug fixed" text message to a chat webhook when a
 * deployment carrying it rolls out.
 */
use crate::controller::snapshot::DeploymentSnapshot;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::serde_json::{json, Value};
use tracing::{error, info, warn};

/// Caller-supplied business logic, invoked once per delivered key. Must be
/// idempotent: deliveries for distinct keys run in parallel and a key may be
/// redelivered after transient failures.
#[async_trait]
pub trait Reconciler: Send + Sync {
    async fn reconcile(&self, key: &str, snapshot: &DeploymentSnapshot) -> Result<()>;
}

/// Sink for keys dropped after exhausting their retry budget. Used for
/// logging and alerting, never for control flow.
pub trait DropObserver: Send + Sync {
    fn key_dropped(&self, key: &str, error: &Error);
}

/// Default observer: report the terminal error and move on
pub struct LogDropObserver;

impl DropObserver for LogDropObserver {
    fn key_dropped(&self, key: &str, error: &Error) {
        error!("Retry budget exhausted for {key}: {error}");
    }
}

pub struct BugFixNotifier {
    http: reqwest::Client,
    annotation: String,
    webhook_url: Option<String>,
}

impl BugFixNotifier {
    #[must_use]
    pub fn new(annotation: String, webhook_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            annotation,
            webhook_url,
        }
    }

    /// POST a text message to the chat webhook and check the reply code
    async fn post_message(&self, url: &str, message: &str) -> Result<()> {
        let payload = json!({
            "msgtype": "text",
            "text": { "content": message },
        });

        let response = self.http.post(url).json(&payload).send().await?;
        let body: Value = response.json().await?;

        match body.get("errcode").and_then(Value::as_i64) {
            Some(code) if code != 0 => Err(Error::Custom(format!(
                "webhook rejected message with errcode {code}"
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Reconciler for BugFixNotifier {
    async fn reconcile(&self, key: &str, snapshot: &DeploymentSnapshot) -> Result<()> {
        let Some(bug) = snapshot.annotation(&self.annotation) else {
            return Ok(());
        };

        let message = format!("bug fix notice: {bug} has been fixed by deployment {key}");
        info!("{message}");

        match self.webhook_url.as_deref() {
            None => warn!("no webhook url configured, skipping notification for {key}"),
            Some(url) => {
                // notification failures are logged, not retried: the rollout
                // itself succeeded and redelivery would repost the message
                if let Err(e) = self.post_message(url, &message).await {
                    error!("send webhook notify message failed: {e}");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deployment_without_annotation_is_a_no_op() {
        let notifier = BugFixNotifier::new("a8r.io/bugs".to_string(), None);
        let snapshot = DeploymentSnapshot::new("default", "api", 1);
        assert!(notifier.reconcile("default/api", &snapshot).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_webhook_url_still_succeeds() {
        let notifier = BugFixNotifier::new("a8r.io/bugs".to_string(), None);
        let snapshot =
            DeploymentSnapshot::new("default", "api", 1).with_annotation("a8r.io/bugs", "BUG-1");
        assert!(notifier.reconcile("default/api", &snapshot).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_does_not_fail_reconcile() {
        let notifier = BugFixNotifier::new(
            "a8r.io/bugs".to_string(),
            Some("http://127.0.0.1:1/webhook".to_string()),
        );
        let snapshot =
            DeploymentSnapshot::new("default", "api", 1).with_annotation("a8r.io/bugs", "BUG-1");
        assert!(notifier.reconcile("default/api", &snapshot).await.is_ok());
    }
}
