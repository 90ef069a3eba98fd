//! Volume operations
//!
//! Volumes back the snapshot workspace mode plus the per-agent config and
//! history volumes. Creates merge identity labels; listing and prune are
//! scoped to managed volumes and ordered by creation time, ties by name.

use super::{cancellable, managed_filters, merged_labels, Engine};
use crate::errors::{EngineError, Result};
use bollard::models::Volume;
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, PruneVolumesOptions};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

impl Engine {
    /// Create (or return existing) managed volume with identity labels
    #[instrument(skip(self, ctx, labels))]
    pub async fn create_volume(
        &self,
        ctx: &CancellationToken,
        name: &str,
        project: &str,
        agent: &str,
        labels: HashMap<String, String>,
    ) -> Result<Volume> {
        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: merged_labels(project, agent, labels),
            ..CreateVolumeOptions::default()
        };
        let volume = cancellable(ctx, self.docker().create_volume(options))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "volume", name))?;
        debug!(volume = %name, "volume ready");
        Ok(volume)
    }

    pub async fn inspect_volume(&self, ctx: &CancellationToken, name: &str) -> Result<Volume> {
        cancellable(ctx, self.docker().inspect_volume(name))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "volume", name).into())
    }

    /// Whether a managed volume exists
    pub async fn volume_exists(&self, ctx: &CancellationToken, name: &str) -> Result<bool> {
        match cancellable(ctx, self.docker().inspect_volume(name)).await? {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(EngineError::from_bollard(e, "volume", name).into()),
        }
    }

    /// List managed volumes, oldest first
    pub async fn list_volumes(&self, ctx: &CancellationToken) -> Result<Vec<Volume>> {
        let options = ListVolumesOptions {
            filters: managed_filters(HashMap::new()),
        };
        let response = cancellable(ctx, self.docker().list_volumes(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "volume", "<list>"))?;
        let mut volumes = response.volumes.unwrap_or_default();
        volumes.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(volumes)
    }

    pub async fn remove_volume(
        &self,
        ctx: &CancellationToken,
        name: &str,
        force: bool,
    ) -> Result<()> {
        let options = bollard::volume::RemoveVolumeOptions { force };
        cancellable(ctx, self.docker().remove_volume(name, Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "volume", name))?;
        Ok(())
    }

    /// Remove unused managed volumes; returns deleted names
    pub async fn prune_volumes(&self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let options = PruneVolumesOptions {
            filters: managed_filters(HashMap::new()),
        };
        let response = cancellable(ctx, self.docker().prune_volumes(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "volume", "<prune>"))?;
        Ok(response.volumes_deleted.unwrap_or_default())
    }
}
