//! In-container command execution
//!
//! Exec sessions drive the Ralph loop: each loop is one exec with captured
//! stdout. The attached variant exposes the same hijacked stream shape as
//! container attach.

use super::{cancellable, Engine};
use crate::errors::{EngineError, Result};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecResults};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Parameters for one exec session
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    /// Argv to run
    pub cmd: Vec<String>,
    /// Extra environment, `KEY=value`
    pub env: Vec<String>,
    pub working_dir: Option<String>,
    /// Run as this user instead of the container default
    pub user: Option<String>,
    /// Allocate a TTY for the session
    pub tty: bool,
    /// Open the write half
    pub attach_stdin: bool,
}

/// Point-in-time exec state
#[derive(Debug, Clone, Copy)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

impl Engine {
    /// Create an exec session inside a running container
    #[instrument(skip(self, ctx, spec), fields(cmd = ?spec.cmd.first()))]
    pub async fn exec_create(
        &self,
        ctx: &CancellationToken,
        container: &str,
        spec: ExecSpec,
    ) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd),
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env)
            },
            working_dir: spec.working_dir,
            user: spec.user,
            tty: Some(spec.tty),
            attach_stdin: Some(spec.attach_stdin),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..CreateExecOptions::default()
        };
        let created = cancellable(ctx, self.docker().create_exec(container, options))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "container", container))?;
        debug!(exec_id = %created.id, container, "exec created");
        Ok(created.id)
    }

    /// Start the session attached; yields the hijacked output/input pair
    pub async fn exec_start(
        &self,
        ctx: &CancellationToken,
        exec_id: &str,
    ) -> Result<StartExecResults> {
        cancellable(ctx, self.docker().start_exec(exec_id, None))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "exec", exec_id).into())
    }

    /// Inspect a session, typically after its stream ended
    pub async fn exec_inspect(
        &self,
        ctx: &CancellationToken,
        exec_id: &str,
    ) -> Result<ExecStatus> {
        let response = cancellable(ctx, self.docker().inspect_exec(exec_id))
            .await?
            .map_err(|e| EngineError::from_bollard(e, "exec", exec_id))?;
        Ok(ExecStatus {
            running: response.running.unwrap_or(false),
            exit_code: response.exit_code,
        })
    }

    /// Fire-and-forget exec TTY resize
    pub async fn resize_exec(&self, exec_id: &str, height: u16, width: u16) {
        if let Err(e) = self
            .docker()
            .resize_exec(exec_id, ResizeExecOptions { height, width })
            .await
        {
            debug!(exec_id, error = %e, "exec resize ignored");
        }
    }
}
