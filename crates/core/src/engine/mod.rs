//! Labelled container-engine client
//!
//! A thin wrapper over the Docker daemon API with one contract: every
//! list/filter/prune call automatically carries the `managed=true` label
//! filter, and every create call merges the managed identity labels into
//! the caller's set. Unlabelled resources are invisible to clawker and can
//! never be addressed through this layer.
//!
//! All operations take a cancellation handle as their first parameter; the
//! handle is never stored.

pub mod containers;
pub mod exec;
pub mod images;
pub mod networks;
pub mod volumes;

pub use containers::{AttachOptions, ContainerInfo, ContainerSpec};
pub use exec::{ExecSpec, ExecStatus};
pub use images::ImageBuildRequest;

use crate::errors::{ClawkerError, EngineError, Result};
use bollard::Docker;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// How long an engine reachability probe may take
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Labelled client over the local container daemon
#[derive(Clone)]
pub struct Engine {
    docker: Docker,
}

impl Engine {
    /// Connect using the platform's default socket
    pub fn connect() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| EngineError::Unavailable {
                message: e.to_string(),
            })?;
        Ok(Self { docker })
    }

    /// Wrap an already-connected client
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    /// Probe daemon reachability with a short deadline
    #[instrument(skip_all)]
    pub async fn ping(&self, ctx: &CancellationToken) -> Result<()> {
        let probe = tokio::time::timeout(PING_TIMEOUT, self.docker.ping());
        match cancellable(ctx, probe).await? {
            Ok(Ok(_)) => {
                debug!("engine reachable");
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::Unavailable {
                message: e.to_string(),
            }
            .into()),
            Err(_) => Err(EngineError::Unavailable {
                message: format!("ping timed out after {}s", PING_TIMEOUT.as_secs()),
            }
            .into()),
        }
    }

    pub(crate) fn docker(&self) -> &Docker {
        &self.docker
    }
}

/// Race a future against the cancellation handle.
///
/// Cancellation wins ties; the pending side is dropped, which aborts the
/// underlying request.
pub(crate) async fn cancellable<T>(
    ctx: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(ClawkerError::Cancelled),
        value = fut => Ok(value),
    }
}

/// Add the managed-identity filter to a user filter map
pub(crate) fn managed_filters(
    mut filters: HashMap<String, Vec<String>>,
) -> HashMap<String, Vec<String>> {
    let (key, values) = crate::naming::managed_filter();
    filters.entry(key).or_default().extend(values);
    filters
}

/// Merge managed identity labels into a user label set.
///
/// Identity keys win over user-provided values of the same name.
pub(crate) fn merged_labels(
    project: &str,
    agent: &str,
    user: HashMap<String, String>,
) -> HashMap<String, String> {
    let mut labels = user;
    for (key, value) in crate::naming::base_labels(project, agent) {
        labels.insert(key, value);
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{LABEL_AGENT, LABEL_MANAGED, LABEL_PROJECT};

    #[tokio::test]
    async fn test_cancellable_returns_value() {
        let ctx = CancellationToken::new();
        let value = cancellable(&ctx, async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let result = cancellable(&ctx, std::future::pending::<()>()).await;
        assert!(matches!(result, Err(ClawkerError::Cancelled)));
    }

    #[test]
    fn test_managed_filter_always_added() {
        let filters = managed_filters(HashMap::new());
        assert_eq!(filters["label"], vec!["managed=true".to_string()]);

        let mut user = HashMap::new();
        user.insert("label".to_string(), vec!["agent=ralph".to_string()]);
        let filters = managed_filters(user);
        assert!(filters["label"].contains(&"managed=true".to_string()));
        assert!(filters["label"].contains(&"agent=ralph".to_string()));
    }

    #[test]
    fn test_identity_labels_override_user_labels() {
        let mut user = HashMap::new();
        user.insert(LABEL_MANAGED.to_string(), "false".to_string());
        user.insert("custom".to_string(), "kept".to_string());
        let labels = merged_labels("myapp", "ralph", user);
        assert_eq!(labels[LABEL_MANAGED], "true");
        assert_eq!(labels[LABEL_PROJECT], "myapp");
        assert_eq!(labels[LABEL_AGENT], "ralph");
        assert_eq!(labels["custom"], "kept");
    }
}
