//! Workspace strategy: bind vs snapshot
//!
//! Bind mode mounts the host working directory read/write at the configured
//! remote path. Snapshot mode materialises a named volume once by copying
//! the working directory into it through a short-lived helper container,
//! then reuses the volume on later starts. Both modes add the per-agent
//! config and history volumes.

use crate::config::{Config, WorkspaceMode};
use crate::engine::{ContainerSpec, Engine};
use crate::errors::Result;
use crate::naming;
use bollard::models::{Mount, MountTypeEnum};
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Volume purpose suffix for the snapshot workspace
pub const PURPOSE_WORKSPACE: &str = "workspace";
/// Volume purpose suffix for agent-private state
pub const PURPOSE_CONFIG: &str = "config";
/// Volume purpose suffix for shell history
pub const PURPOSE_HISTORY: &str = "history";

/// Where agent-private state lives inside the container
const CONFIG_TARGET: &str = "/home/agent/.claude";
/// Where shell history is persisted inside the container
const HISTORY_TARGET: &str = "/commandhistory";

/// Image used by the one-shot snapshot seeding container
const SEED_IMAGE: &str = "busybox:stable";

/// Materialise the mount set for one run.
///
/// Snapshot volumes are seeded on first use only; an existing volume is
/// reused untouched, leaving the host directory out of the picture.
#[instrument(skip(ctx, engine, config, workdir), fields(project = %config.project, agent))]
pub async fn materialize(
    ctx: &CancellationToken,
    engine: &Engine,
    config: &Config,
    workdir: &Path,
    agent: &str,
    mode: WorkspaceMode,
) -> Result<Vec<Mount>> {
    let project = &config.project;
    let mut mounts = Vec::new();

    match mode {
        WorkspaceMode::Bind => {
            mounts.push(bind_mount(
                &workdir.to_string_lossy(),
                &config.workspace.remote_path,
                false,
            ));
        }
        WorkspaceMode::Snapshot => {
            let volume = naming::volume_name(project, agent, PURPOSE_WORKSPACE);
            let fresh = !engine.volume_exists(ctx, &volume).await?;
            engine
                .create_volume(ctx, &volume, project, agent, HashMap::new())
                .await?;
            if fresh {
                seed_volume(ctx, engine, project, agent, workdir, &volume).await?;
                info!(volume = %volume, "snapshot volume materialised");
            } else {
                debug!(volume = %volume, "reusing snapshot volume");
            }
            mounts.push(volume_mount(&volume, &config.workspace.remote_path));
        }
    }

    for (purpose, target) in [(PURPOSE_CONFIG, CONFIG_TARGET), (PURPOSE_HISTORY, HISTORY_TARGET)] {
        let volume = naming::volume_name(project, agent, purpose);
        engine
            .create_volume(ctx, &volume, project, agent, HashMap::new())
            .await?;
        mounts.push(volume_mount(&volume, target));
    }

    if config.security.docker_socket {
        mounts.push(bind_mount(
            "/var/run/docker.sock",
            "/var/run/docker.sock",
            false,
        ));
    }

    Ok(mounts)
}

/// Copy the working directory's contents into a fresh volume
async fn seed_volume(
    ctx: &CancellationToken,
    engine: &Engine,
    project: &str,
    agent: &str,
    workdir: &Path,
    volume: &str,
) -> Result<()> {
    if !engine.image_exists(ctx, SEED_IMAGE).await? {
        engine.pull_image(ctx, SEED_IMAGE).await?;
    }

    let seed_agent = format!("{agent}-seed");
    let spec = ContainerSpec {
        project: project.to_string(),
        agent: seed_agent.clone(),
        image: SEED_IMAGE.to_string(),
        cmd: vec![
            "sh".to_string(),
            "-c".to_string(),
            "cp -a /seed-src/. /seed-dest/".to_string(),
        ],
        mounts: vec![
            bind_mount(&workdir.to_string_lossy(), "/seed-src", true),
            volume_mount(volume, "/seed-dest"),
        ],
        ..ContainerSpec::default()
    };

    let id = engine.create_container(ctx, spec).await?;
    engine.start_container(ctx, &id).await?;
    let code = engine.wait_container(ctx, &id).await;
    engine.remove_container(ctx, &id, true).await?;
    match code? {
        0 => Ok(()),
        status => Err(crate::errors::EngineError::Api {
            message: format!("snapshot seed container exited with status {status}"),
        }
        .into()),
    }
}

/// A host bind mount
pub fn bind_mount(source: &str, target: &str, read_only: bool) -> Mount {
    Mount {
        typ: Some(MountTypeEnum::BIND),
        source: Some(source.to_string()),
        target: Some(target.to_string()),
        read_only: Some(read_only),
        ..Mount::default()
    }
}

/// A named-volume mount
pub fn volume_mount(volume: &str, target: &str) -> Mount {
    Mount {
        typ: Some(MountTypeEnum::VOLUME),
        source: Some(volume.to_string()),
        target: Some(target.to_string()),
        read_only: Some(false),
        ..Mount::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_mount_shape() {
        let mount = bind_mount("/home/dev/proj", "/workspace", false);
        assert_eq!(mount.typ, Some(MountTypeEnum::BIND));
        assert_eq!(mount.source.as_deref(), Some("/home/dev/proj"));
        assert_eq!(mount.target.as_deref(), Some("/workspace"));
        assert_eq!(mount.read_only, Some(false));
    }

    #[test]
    fn test_volume_mount_shape() {
        let mount = volume_mount("clawker.myapp.ralph-config", CONFIG_TARGET);
        assert_eq!(mount.typ, Some(MountTypeEnum::VOLUME));
        assert_eq!(
            mount.source.as_deref(),
            Some("clawker.myapp.ralph-config")
        );
        assert_eq!(mount.target.as_deref(), Some("/home/agent/.claude"));
    }

    #[test]
    fn test_purpose_volume_names() {
        assert_eq!(
            naming::volume_name("myapp", "ralph", PURPOSE_WORKSPACE),
            "clawker.myapp.ralph-workspace"
        );
        assert_eq!(
            naming::volume_name("", "ralph", PURPOSE_HISTORY),
            "clawker.ralph-history"
        );
    }
}
