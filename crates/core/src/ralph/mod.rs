//! Ralph: the autonomous agent loop
//!
//! A bounded outer loop around in-container invocations of the coding
//! agent. Each iteration starts an exec session, captures stdout, parses
//! the trailing RALPH_STATUS block, updates persistent session history, and
//! decides whether to continue, stop on completion, or trip the circuit
//! breaker on stagnation. Operates only on a container that is already
//! running.

pub mod circuit;
pub mod session;
pub mod status;

pub use circuit::{CircuitBreaker, CircuitState, LoopObservation};
pub use session::{Session, SessionEntry, SessionEvent, SessionStore};
pub use status::{LoopStatus, RalphStatus};

use crate::config::Config;
use crate::engine::{Engine, ExecSpec};
use crate::errors::{ClawkerError, EngineError, LoopError, Result};
use bollard::container::LogOutput;
use bollard::exec::StartExecResults;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Options for one loop run
#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub project: String,
    pub agent: String,
    /// Name or id of the running container to exec into
    pub container: String,
    /// Appended to the first invocation only
    pub prompt: Option<String>,
    pub max_loops: u32,
    pub stagnation_threshold: u32,
    /// Per-invocation ceiling
    pub timeout: Duration,
    pub skip_permissions: bool,
    /// Agent command line; may carry its own arguments
    pub agent_command: String,
}

impl LoopOptions {
    /// Derive options from a project configuration
    pub fn from_config(
        config: &Config,
        container: &str,
        agent: &str,
        prompt: Option<String>,
    ) -> Self {
        Self {
            project: config.project.clone(),
            agent: agent.to_string(),
            container: container.to_string(),
            prompt,
            max_loops: config.ralph.max_loops,
            stagnation_threshold: config.ralph.stagnation_threshold,
            timeout: Duration::from_secs(config.ralph.timeout_minutes * 60),
            skip_permissions: config.ralph.skip_permissions,
            agent_command: config.agent.command.clone(),
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    AgentComplete,
    MaxLoops,
    CircuitTripped,
    Error,
}

/// Final report of a loop run; serialised as the stdout JSON payload
#[derive(Debug, Clone, Serialize)]
pub struct LoopResult {
    pub reason: ExitReason,
    pub loops_run: u32,
    pub tasks_completed: u64,
    pub files_modified: u64,
    /// Last nonzero exit code the agent's exec returned, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Callback invoked after every completed iteration
pub type LoopHook = Box<dyn FnMut(u32, &RalphStatus) + Send>;

/// The loop engine
pub struct Ralph {
    engine: Engine,
    store: SessionStore,
}

impl Ralph {
    pub fn new(engine: Engine, store: SessionStore) -> Self {
        Self { engine, store }
    }

    /// Drive the agent until completion, max loops, a tripped breaker, or
    /// an error
    #[instrument(skip(self, ctx, options, on_loop_end), fields(project = %options.project, agent = %options.agent))]
    pub async fn run(
        &self,
        ctx: &CancellationToken,
        options: LoopOptions,
        mut on_loop_end: Option<LoopHook>,
    ) -> Result<LoopResult> {
        let inspect = self.engine.inspect_container(ctx, &options.container).await?;
        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            return Err(EngineError::NotRunning {
                name: options.container.clone(),
            }
            .into());
        }

        let _lock = self.store.lock_pair(&options.project, &options.agent)?;
        let mut session = self.store.load_session(&options.project, &options.agent)?;
        let mut breaker = self.store.load_circuit(&options.project, &options.agent)?;

        if breaker.is_tripped() {
            return Err(LoopError::CircuitTripped {
                reason: "breaker is tripped from a previous run; run `clawker ralph reset`"
                    .to_string(),
            }
            .into());
        }

        let mut result = LoopResult {
            reason: ExitReason::MaxLoops,
            loops_run: 0,
            tasks_completed: 0,
            files_modified: 0,
            agent_exit_code: None,
            error: None,
        };

        for loop_count in 1..=options.max_loops {
            let invocation = build_invocation(&options, loop_count)?;
            debug!(loop_count, ?invocation, "starting agent invocation");

            let (parsed, error) = match self
                .invoke_agent(ctx, &options, invocation, loop_count)
                .await
            {
                Ok((stdout, exit_code)) => {
                    let parsed = status::parse_status(&stdout);
                    let error = match exit_code {
                        Some(0) | None => None,
                        Some(code) => {
                            result.agent_exit_code = Some(code);
                            Some(format!("agent exited with status {code}"))
                        }
                    };
                    (parsed, error)
                }
                Err(ClawkerError::Loop(LoopError::AgentTimeout { minutes, .. })) => {
                    warn!(loop_count, minutes, "agent invocation timed out");
                    (
                        RalphStatus::default(),
                        Some(format!("agent timed out after {minutes} minutes")),
                    )
                }
                Err(ClawkerError::Cancelled) => {
                    record_iteration(&mut session, loop_count, None, Some("cancelled"));
                    self.store.save_session(&session)?;
                    return Err(ClawkerError::Cancelled);
                }
                Err(e) => {
                    record_iteration(&mut session, loop_count, None, Some(&e.to_string()));
                    self.store.save_session(&session)?;
                    return Err(e);
                }
            };

            result.loops_run = loop_count;
            session.tasks_completed += u64::from(parsed.tasks_completed);
            session.files_modified += u64::from(parsed.files_modified);
            result.tasks_completed = session.tasks_completed;
            result.files_modified = session.files_modified;

            record_iteration(
                &mut session,
                loop_count,
                parsed.has_status.then(|| parsed.status.as_str()),
                error.as_deref(),
            );

            let observation = LoopObservation {
                status: parsed.clone(),
                error: error.clone(),
            };
            let tripped = breaker.observe(&observation, options.stagnation_threshold);

            self.store.save_session(&session)?;
            self.store.save_circuit(&breaker)?;

            if parsed.requested_exit() {
                info!(loop_count, "agent requested exit");
                result.reason = ExitReason::AgentComplete;
                return Ok(result);
            }

            if tripped {
                info!(loop_count, "circuit breaker tripped, stopping loop");
                result.reason = ExitReason::CircuitTripped;
                result.error = breaker.entries.last().map(|e| e.reason.clone());
                return Ok(result);
            }

            if let Some(hook) = on_loop_end.as_mut() {
                hook(loop_count, &parsed);
            }
        }

        info!(max_loops = options.max_loops, "maximum loop count reached");
        result.reason = ExitReason::MaxLoops;
        Ok(result)
    }

    /// Run one exec session and capture its stdout
    async fn invoke_agent(
        &self,
        ctx: &CancellationToken,
        options: &LoopOptions,
        cmd: Vec<String>,
        loop_count: u32,
    ) -> Result<(String, Option<i64>)> {
        let exec_id = self
            .engine
            .exec_create(
                ctx,
                &options.container,
                ExecSpec {
                    cmd,
                    tty: false,
                    attach_stdin: false,
                    ..ExecSpec::default()
                },
            )
            .await?;

        let started = self.engine.exec_start(ctx, &exec_id).await?;
        let StartExecResults::Attached { mut output, .. } = started else {
            return Err(EngineError::Api {
                message: "exec unexpectedly started detached".to_string(),
            }
            .into());
        };

        let drain = async {
            let mut stdout = Vec::new();
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        stdout.extend_from_slice(&message);
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        debug!(target: "clawker::agent", "{}", String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ClawkerError::from(EngineError::Api {
                            message: format!("exec stream failed: {e}"),
                        }))
                    }
                }
            }
            Ok(stdout)
        };

        let stdout = tokio::select! {
            _ = ctx.cancelled() => return Err(ClawkerError::Cancelled),
            drained = tokio::time::timeout(options.timeout, drain) => match drained {
                Ok(bytes) => bytes?,
                Err(_) => {
                    return Err(LoopError::AgentTimeout {
                        loop_count,
                        minutes: options.timeout.as_secs() / 60,
                    }
                    .into())
                }
            },
        };

        let fresh = CancellationToken::new();
        let status = self.engine.exec_inspect(&fresh, &exec_id).await?;
        Ok((String::from_utf8_lossy(&stdout).into_owned(), status.exit_code))
    }
}

/// Compose the agent invocation for one iteration.
///
/// Loop 1 carries the optional prompt; later loops pass a continue flag so
/// the agent resumes its own session.
fn build_invocation(options: &LoopOptions, loop_count: u32) -> Result<Vec<String>> {
    let mut cmd = shell_words::split(&options.agent_command).map_err(|e| {
        crate::errors::ConfigError::Invalid {
            field: "agent.command".to_string(),
            message: e.to_string(),
        }
    })?;
    if loop_count == 1 {
        if let Some(prompt) = &options.prompt {
            cmd.push("-p".to_string());
            cmd.push(prompt.clone());
        }
    } else {
        cmd.push("--continue".to_string());
    }
    if options.skip_permissions {
        cmd.push("--dangerously-skip-permissions".to_string());
    }
    Ok(cmd)
}

fn record_iteration(
    session: &mut Session,
    loop_count: u32,
    status: Option<&str>,
    error: Option<&str>,
) {
    let event = if session.entries.is_empty() {
        SessionEvent::Created
    } else {
        SessionEvent::Updated
    };
    session.push_entry(SessionEntry {
        timestamp: Utc::now(),
        event,
        loop_count,
        status: status.unwrap_or("NO_STATUS").to_string(),
        error: error.map(|e| e.to_string()),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(prompt: Option<&str>, skip: bool) -> LoopOptions {
        LoopOptions {
            project: "myapp".to_string(),
            agent: "ralph".to_string(),
            container: "clawker.myapp.ralph".to_string(),
            prompt: prompt.map(|p| p.to_string()),
            max_loops: 20,
            stagnation_threshold: 3,
            timeout: Duration::from_secs(900),
            skip_permissions: skip,
            agent_command: "claude".to_string(),
        }
    }

    #[test]
    fn test_first_invocation_carries_prompt() {
        let cmd = build_invocation(&options(Some("fix the tests"), false), 1).unwrap();
        assert_eq!(cmd, vec!["claude", "-p", "fix the tests"]);
    }

    #[test]
    fn test_later_invocations_continue() {
        let cmd = build_invocation(&options(Some("fix the tests"), false), 2).unwrap();
        assert_eq!(cmd, vec!["claude", "--continue"]);
    }

    #[test]
    fn test_skip_permissions_flag_appended() {
        let cmd = build_invocation(&options(None, true), 3).unwrap();
        assert_eq!(cmd, vec!["claude", "--continue", "--dangerously-skip-permissions"]);
    }

    #[test]
    fn test_agent_command_may_carry_arguments() {
        let mut opts = options(None, false);
        opts.agent_command = "claude --model sonnet".to_string();
        let cmd = build_invocation(&opts, 1).unwrap();
        assert_eq!(cmd, vec!["claude", "--model", "sonnet"]);
    }

    #[test]
    fn test_record_iteration_first_is_created() {
        let mut session = Session::new("myapp", "ralph");
        record_iteration(&mut session, 1, Some("IN_PROGRESS"), None);
        record_iteration(&mut session, 2, None, Some("boom"));
        assert_eq!(session.entries[0].event, SessionEvent::Created);
        assert_eq!(session.entries[1].event, SessionEvent::Updated);
        assert_eq!(session.entries[1].status, "NO_STATUS");
        assert_eq!(session.entries[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_loop_result_json_shape() {
        let result = LoopResult {
            reason: ExitReason::AgentComplete,
            loops_run: 3,
            tasks_completed: 7,
            files_modified: 12,
            agent_exit_code: Some(2),
            error: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["reason"], "agent_complete");
        assert_eq!(json["loops_run"], 3);
        assert_eq!(json["agent_exit_code"], 2);
        assert!(json.get("error").is_none());
    }
}
