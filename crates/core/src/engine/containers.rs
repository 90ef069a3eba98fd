//! Container operations
//!
//! Create merges identity labels and joins the shared network; every list
//! and prune call is scoped to managed containers. Listing order is
//! deterministic: creation time ascending, ties broken by name.

use super::{cancellable, managed_filters, merged_labels, Engine};
use crate::errors::{EngineError, Result};
use crate::naming;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    PruneContainersOptions, RemoveContainerOptions, ResizeContainerTtyOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::models::{ContainerInspectResponse, HostConfig, Mount};
use futures_util::Stream;
use futures_util::StreamExt;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Everything needed to create a managed container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Project slug; may be empty for anonymous projects
    pub project: String,
    /// Agent name within the project
    pub agent: String,
    /// Image reference to run
    pub image: String,
    /// Command override; empty keeps the image default
    pub cmd: Vec<String>,
    /// Extra environment entries, `KEY=value`
    pub env: Vec<String>,
    /// User labels; identity labels are merged on top
    pub labels: HashMap<String, String>,
    /// Mount set from the workspace strategy
    pub mounts: Vec<Mount>,
    /// Allocate a TTY and open stdin
    pub interactive: bool,
    /// Ask the daemon to remove the container when it exits
    pub auto_remove: bool,
    /// Extra `host:ip` entries (`host-gateway` supported)
    pub extra_hosts: Vec<String>,
    /// Working directory override inside the container
    pub working_dir: Option<String>,
}

/// Summary of a managed container
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub created: i64,
    pub labels: HashMap<String, String>,
}

/// Options for opening the hijacked attach stream
#[derive(Debug, Clone)]
pub struct AttachOptions {
    /// Open the write half
    pub stdin: bool,
    /// Replay buffered output before streaming
    pub logs: bool,
    /// Detach key sequence, daemon syntax (default `ctrl-p,ctrl-q`)
    pub detach_keys: Option<String>,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            stdin: true,
            logs: false,
            detach_keys: Some("ctrl-p,ctrl-q".to_string()),
        }
    }
}

impl Engine {
    /// Create a managed container.
    ///
    /// The canonical name is derived from `(project, agent)`; the shared
    /// network is ensured first so attachment cannot fail on a fresh host.
    #[instrument(skip(self, ctx, spec), fields(project = %spec.project, agent = %spec.agent))]
    pub async fn create_container(
        &self,
        ctx: &CancellationToken,
        spec: ContainerSpec,
    ) -> Result<String> {
        self.ensure_network(ctx).await?;

        let name = naming::container_name(&spec.project, &spec.agent);
        let labels = merged_labels(&spec.project, &spec.agent, spec.labels);

        let host_config = HostConfig {
            mounts: Some(spec.mounts),
            network_mode: Some(naming::network_name()),
            auto_remove: Some(spec.auto_remove),
            extra_hosts: if spec.extra_hosts.is_empty() {
                None
            } else {
                Some(spec.extra_hosts)
            },
            init: Some(true),
            ..HostConfig::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd)
            },
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env)
            },
            labels: Some(labels),
            tty: Some(spec.interactive),
            open_stdin: Some(spec.interactive),
            stdin_once: Some(spec.interactive),
            attach_stdin: Some(spec.interactive),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: spec.working_dir,
            host_config: Some(host_config),
            ..Config::default()
        };

        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = cancellable(ctx, self.docker().create_container(Some(options), config))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "container", &name))?;
        for warning in &response.warnings {
            warn!(container = %name, %warning, "daemon warning on create");
        }
        debug!(container = %name, id = %response.id, "container created");
        Ok(response.id)
    }

    pub async fn start_container(&self, ctx: &CancellationToken, name: &str) -> Result<()> {
        cancellable(
            ctx,
            self.docker()
                .start_container(name, None::<StartContainerOptions<String>>),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(())
    }

    /// Stop with a grace period before the daemon escalates to SIGKILL
    pub async fn stop_container(
        &self,
        ctx: &CancellationToken,
        name: &str,
        timeout_secs: i64,
    ) -> Result<()> {
        cancellable(
            ctx,
            self.docker()
                .stop_container(name, Some(StopContainerOptions { t: timeout_secs })),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(())
    }

    pub async fn kill_container(&self, ctx: &CancellationToken, name: &str) -> Result<()> {
        cancellable(
            ctx,
            self.docker().kill_container(
                name,
                Some(KillContainerOptions {
                    signal: "SIGKILL".to_string(),
                }),
            ),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(())
    }

    pub async fn pause_container(&self, ctx: &CancellationToken, name: &str) -> Result<()> {
        cancellable(ctx, self.docker().pause_container(name))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(())
    }

    pub async fn unpause_container(&self, ctx: &CancellationToken, name: &str) -> Result<()> {
        cancellable(ctx, self.docker().unpause_container(name))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(())
    }

    pub async fn remove_container(
        &self,
        ctx: &CancellationToken,
        name: &str,
        force: bool,
    ) -> Result<()> {
        cancellable(
            ctx,
            self.docker().remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    v: false,
                    ..RemoveContainerOptions::default()
                }),
            ),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(())
    }

    /// Full inspect, including the TTY flag the attach pipeline branches on
    pub async fn inspect_container(
        &self,
        ctx: &CancellationToken,
        name: &str,
    ) -> Result<ContainerInspectResponse> {
        let response = cancellable(
            ctx,
            self.docker()
                .inspect_container(name, None::<InspectContainerOptions>),
        )
        .await?
        .map_err(|e| EngineError::from_bollard(e, "container", name))?;
        Ok(response)
    }

    /// List managed containers, optionally narrowed by extra filters
    #[instrument(skip(self, ctx, filters))]
    pub async fn list_containers(
        &self,
        ctx: &CancellationToken,
        all: bool,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerInfo>> {
        let options = ListContainersOptions {
            all,
            filters: managed_filters(filters),
            ..ListContainersOptions::default()
        };
        let summaries = cancellable(ctx, self.docker().list_containers(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "container", "<list>"))?;

        let mut infos: Vec<ContainerInfo> = summaries
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.unwrap_or_default(),
                status: c.status.unwrap_or_default(),
                created: c.created.unwrap_or_default(),
                labels: c.labels.unwrap_or_default(),
            })
            .collect();
        infos.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)));
        Ok(infos)
    }

    /// Remove all stopped managed containers; returns removed names
    pub async fn prune_containers(&self, ctx: &CancellationToken) -> Result<Vec<String>> {
        let options = PruneContainersOptions {
            filters: managed_filters(HashMap::new()),
        };
        let response = cancellable(ctx, self.docker().prune_containers(Some(options)))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "container", "<prune>"))?;
        Ok(response.containers_deleted.unwrap_or_default())
    }

    /// Open the hijacked bidirectional byte stream
    pub async fn attach_container(
        &self,
        ctx: &CancellationToken,
        name: &str,
        options: AttachOptions,
    ) -> Result<AttachContainerResults> {
        let attach = self.docker().attach_container(
            name,
            Some(AttachContainerOptions::<String> {
                stdin: Some(options.stdin),
                stdout: Some(true),
                stderr: Some(true),
                stream: Some(true),
                logs: Some(options.logs),
                detach_keys: options.detach_keys,
                ..AttachContainerOptions::default()
            }),
        );
        cancellable(ctx, attach)
            .await?
            .map_err(|e| EngineError::AttachFailed {
                message: format!("{name}: {e}"),
            }
            .into())
    }

    /// Fire-and-forget TTY resize; errors are logged, never propagated
    pub async fn resize_container(&self, name: &str, height: u16, width: u16) {
        if let Err(e) = self
            .docker()
            .resize_container_tty(name, ResizeContainerTtyOptions { height, width })
            .await
        {
            debug!(container = %name, error = %e, "resize ignored");
        }
    }

    /// Follow or dump container logs
    pub fn container_logs(
        &self,
        name: &str,
        follow: bool,
        tail: Option<String>,
    ) -> impl Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> {
        self.docker().logs(
            name,
            Some(LogsOptions {
                follow,
                stdout: true,
                stderr: true,
                tail: tail.unwrap_or_else(|| "all".to_string()),
                ..LogsOptions::<String>::default()
            }),
        )
    }

    /// Await container exit; yields the exit code
    pub async fn wait_container(&self, ctx: &CancellationToken, name: &str) -> Result<i64> {
        let mut stream = self
            .docker()
            .wait_container(name, None::<WaitContainerOptions<String>>);
        match cancellable(ctx, stream.next()).await? {
            Some(Ok(response)) => Ok(response.status_code),
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(EngineError::from_bollard(e, "container", name).into()),
            None => Ok(0),
        }
    }
}
