//! Network operations
//!
//! All managed containers share one bridge network. `ensure_network` is
//! idempotent and tolerates the create-vs-exists race between concurrent
//! clawker processes.

use super::{cancellable, managed_filters, Engine};
use crate::errors::{EngineError, Result};
use crate::naming;
use bollard::models::Network;
use bollard::network::{
    CreateNetworkOptions, InspectNetworkOptions, ListNetworksOptions, PruneNetworksOptions,
};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

impl Engine {
    /// Create the shared network when missing, otherwise no-op
    #[instrument(skip_all)]
    pub async fn ensure_network(&self, ctx: &CancellationToken) -> Result<()> {
        let name = naming::network_name();
        let existing = self.list_networks(ctx).await?;
        if existing.iter().any(|n| n.name.as_deref() == Some(&name)) {
            return Ok(());
        }

        let mut labels = HashMap::new();
        labels.insert(naming::LABEL_MANAGED.to_string(), "true".to_string());
        let options = CreateNetworkOptions {
            name: name.clone(),
            check_duplicate: true,
            driver: "bridge".to_string(),
            labels,
            ..CreateNetworkOptions::default()
        };

        match cancellable(ctx, self.docker().create_network(options)).await? {
            Ok(_) => {
                debug!(network = %name, "network created");
                Ok(())
            }
            // Lost the race to another process; the network exists now.
            Err(e) => match EngineError::from_bollard(e, "network", &name) {
                EngineError::AlreadyExists { .. } => Ok(()),
                other => Err(other.into()),
            },
        }
    }

    /// List managed networks, oldest first
    pub async fn list_networks(&self, ctx: &CancellationToken) -> Result<Vec<Network>> {
        let options = ListNetworksOptions {
            filters: managed_filters(HashMap::new()),
        };
        let mut networks = cancellable(ctx, self.docker().list_networks(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "network", "<list>"))?;
        networks.sort_by(|a, b| {
            a.created
                .cmp(&b.created)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(networks)
    }

    pub async fn inspect_network(&self, ctx: &CancellationToken, name: &str) -> Result<Network> {
        cancellable(
            ctx,
            self.docker()
                .inspect_network(name, None::<InspectNetworkOptions<String>>),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "network", name).into())
    }

    pub async fn remove_network(&self, ctx: &CancellationToken, name: &str) -> Result<()> {
        cancellable(ctx, self.docker().remove_network(name))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "network", name))?;
        Ok(())
    }

    /// Remove unused managed networks; returns deleted names
    pub async fn prune_networks(&self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let options = PruneNetworksOptions {
            filters: managed_filters(HashMap::new()),
        };
        let response = cancellable(ctx, self.docker().prune_networks(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "network", "<prune>"))?;
        Ok(response.networks_deleted.unwrap_or_default())
    }
}
