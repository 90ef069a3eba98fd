//! Run lifecycle orchestration
//!
//! Sequences one container run as an explicit state machine:
//!
//! ```text
//! Resolve → BuildIfNeeded → EnsureNetwork → MaterialiseWorkspace
//!        → StartHostProxy → ContainerCreate → ContainerStart
//!        → AttachOrDetach → Cleanup
//! ```
//!
//! Steps before create are idempotent, so a create failure unwinds nothing.
//! A start failure removes the container it created. An attach failure
//! leaves the container running. Cleanup runs under a fresh context with a
//! hard deadline so cancellation cannot leak containers or a raw terminal.

use crate::attach::{self, AttachConfig, AttachOutcome};
use crate::build_context;
use crate::config::{Config, WorkspaceMode, IMAGE_REF_DEFAULT};
use crate::engine::{ContainerSpec, Engine, ImageBuildRequest};
use crate::engine::images::BUILD_TIMEOUT;
use crate::errors::{EngineError, Result};
use crate::host_proxy::{HostProxy, ProxyOptions};
use crate::naming;
use crate::workspace;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Deadline for cleanup under a fresh, non-cancellable context
const CLEANUP_DEADLINE: Duration = Duration::from_secs(5);

/// Parameters for one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Agent name; pairs with the project for identity
    pub agent: String,
    /// Image reference; `@` resolves to the project's generated image
    pub image: String,
    /// Workspace strategy override; `None` uses the configured default
    pub mode: Option<WorkspaceMode>,
    /// Print the container id and return instead of attaching
    pub detach: bool,
    /// Remove the container when it exits
    pub auto_remove: bool,
    /// Command override
    pub cmd: Vec<String>,
    /// Extra environment entries
    pub env: Vec<String>,
    /// Detach key sequence override
    pub detach_keys: Option<String>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            agent: "ralph".to_string(),
            image: IMAGE_REF_DEFAULT.to_string(),
            mode: None,
            detach: false,
            auto_remove: false,
            cmd: Vec::new(),
            env: Vec::new(),
            detach_keys: None,
        }
    }
}

/// What a run produced
#[derive(Debug, Clone)]
pub struct RunResult {
    pub container_id: String,
    /// `None` in detached mode
    pub outcome: Option<AttachOutcome>,
}

/// Build the project image from its configuration; returns the tag.
///
/// The base image is pulled when absent locally. On failure the rendered
/// Dockerfile is logged at debug level.
#[instrument(skip(ctx, engine, config), fields(project = %config.project))]
pub async fn build_image(
    ctx: &CancellationToken,
    engine: &Engine,
    config: &Config,
) -> Result<String> {
    let base = config.build.image.clone();
    if !engine.image_exists(ctx, &base).await? {
        info!(image = %base, "pulling base image");
        engine.pull_image(ctx, &base).await?;
    }

    let context = build_context::assemble(config, &base)?;
    let tag = naming::image_tag(&config.project);
    let request = ImageBuildRequest {
        project: config.project.clone(),
        tag: tag.clone(),
        labels: HashMap::new(),
        tar: context.tar,
    };
    if let Err(e) = engine.build_image(ctx, request, BUILD_TIMEOUT).await {
        debug!(dockerfile = %context.dockerfile, "failed build rendered from");
        return Err(e);
    }
    Ok(tag)
}

/// Resolve a run-level image reference, building the project image if it
/// is missing locally
async fn ensure_image(
    ctx: &CancellationToken,
    engine: &Engine,
    config: &Config,
    reference: &str,
) -> Result<String> {
    if reference == IMAGE_REF_DEFAULT {
        let tag = naming::image_tag(&config.project);
        if !engine.image_exists(ctx, &tag).await? {
            info!(tag = %tag, "project image missing, building");
            build_image(ctx, engine, config)
                .await
                .map_err(|e| match e {
                    crate::errors::ClawkerError::Cancelled => e,
                    other => EngineError::ImageUnavailable {
                        reference: tag.clone(),
                        message: other.to_string(),
                    }
                    .into(),
                })?;
        }
        return Ok(tag);
    }
    if !engine.image_exists(ctx, reference).await? {
        engine
            .pull_image(ctx, reference)
            .await
            .map_err(|e| EngineError::ImageUnavailable {
                reference: reference.to_string(),
                message: e.to_string(),
            })?;
    }
    Ok(reference.to_string())
}

/// Run one container through the full state machine
#[instrument(skip(ctx, engine, config, workdir, request), fields(project = %config.project, agent = %request.agent))]
pub async fn run_container(
    ctx: &CancellationToken,
    engine: &Engine,
    config: &Config,
    workdir: &Path,
    request: RunRequest,
) -> Result<RunResult> {
    // BuildIfNeeded
    let image = ensure_image(ctx, engine, config, &request.image).await?;

    // EnsureNetwork
    engine.ensure_network(ctx).await?;

    // MaterialiseWorkspace
    let mode = request.mode.unwrap_or(config.workspace.default_mode);
    let mounts =
        workspace::materialize(ctx, engine, config, workdir, &request.agent, mode).await?;

    // StartHostProxy
    let proxy = HostProxy::ensure_running(
        ctx,
        ProxyOptions {
            browser: None,
            git_credentials: config.security.git_credentials.clone(),
        },
    )
    .await?;

    // ContainerCreate
    let mut env = request.env.clone();
    env.push(proxy.container_env());
    if !config.project.is_empty() {
        env.push(format!("CLAWKER_PROJECT={}", config.project));
    }
    env.push(format!("CLAWKER_AGENT={}", request.agent));

    let spec = ContainerSpec {
        project: config.project.clone(),
        agent: request.agent.clone(),
        image,
        cmd: request.cmd.clone(),
        env,
        labels: HashMap::new(),
        mounts,
        interactive: !request.detach,
        auto_remove: false,
        extra_hosts: vec!["host.docker.internal:host-gateway".to_string()],
        working_dir: Some(config.workspace.remote_path.clone()),
    };
    let container_id = engine.create_container(ctx, spec).await?;

    // ContainerStart: failure unwinds the container we just created.
    if let Err(e) = engine.start_container(ctx, &container_id).await {
        warn!(container = %container_id, "start failed, removing container");
        remove_best_effort(engine, &container_id).await;
        return Err(e);
    }

    // AttachOrDetach
    if request.detach {
        info!(container = %container_id, "started detached");
        return Ok(RunResult {
            container_id,
            outcome: None,
        });
    }

    let mut attach_config = AttachConfig::default();
    if let Some(keys) = &request.detach_keys {
        attach_config.detach_keys = keys.clone();
    }
    // An attach error leaves the container running.
    let outcome = attach::attach(ctx, engine, &container_id, attach_config).await?;

    // Cleanup
    if request.auto_remove && outcome == AttachOutcome::Exited {
        remove_best_effort(engine, &container_id).await;
    }

    Ok(RunResult {
        container_id,
        outcome: Some(outcome),
    })
}

/// Remove under a fresh context with a hard deadline; absence is success
async fn remove_best_effort(engine: &Engine, container: &str) {
    let cleanup = CancellationToken::new();
    let removal = tokio::time::timeout(
        CLEANUP_DEADLINE,
        engine.remove_container(&cleanup, container, true),
    )
    .await;
    match removal {
        Ok(Ok(())) | Ok(Err(crate::errors::ClawkerError::Engine(EngineError::NotFound {
            ..
        }))) => {}
        Ok(Err(e)) => warn!(container, error = %e, "cleanup removal failed"),
        Err(_) => warn!(container, "cleanup removal timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_request_defaults() {
        let request = RunRequest::default();
        assert_eq!(request.image, "@");
        assert_eq!(request.agent, "ralph");
        assert!(!request.detach);
        assert!(!request.auto_remove);
        assert!(request.mode.is_none());
    }
}
