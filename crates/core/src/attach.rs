//! Bidirectional container attach pipeline
//!
//! Two paths share the same task structure: an output writer, a stdin
//! forwarder, and (TTY only) a resize observer, coordinated by a
//! cancellation token whose first trigger wins.
//!
//! TTY path: the local terminal goes raw behind a guard that restores it on
//! every exit path, resetting alternate screen, cursor and colours before
//! termios. Two immediate resizes (`h+1,w+1` then `h,w`) force full-screen
//! guest programs to redraw. Window-change signals forward to the daemon.
//!
//! Non-TTY path: the daemon multiplexes stdout/stderr frames over the
//! hijacked stream; they are routed to the local streams in daemon order.
//!
//! A read error on the output side is terminal. A read error on stdin only
//! closes the write half; the container keeps running.

use crate::engine::{AttachOptions, Engine};
use crate::errors::{ClawkerError, EngineError, Result};
use bollard::container::LogOutput;
use crossterm::terminal;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Deadline for post-run cleanup under a fresh, non-cancellable context
const CLEANUP_DEADLINE: Duration = Duration::from_secs(5);

/// How an attach session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    /// The user detached; the container keeps running
    Detached,
    /// The container exited while attached
    Exited,
}

/// Attach pipeline configuration
#[derive(Debug, Clone)]
pub struct AttachConfig {
    /// Forward the local stdin into the container
    pub forward_stdin: bool,
    /// Detach key sequence in daemon syntax
    pub detach_keys: String,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            forward_stdin: true,
            detach_keys: "ctrl-p,ctrl-q".to_string(),
        }
    }
}

/// Attach to a container and stream until exit or detach
#[instrument(skip(ctx, engine, config))]
pub async fn attach(
    ctx: &CancellationToken,
    engine: &Engine,
    container: &str,
    config: AttachConfig,
) -> Result<AttachOutcome> {
    let inspect = engine.inspect_container(ctx, container).await?;
    let tty = inspect
        .config
        .as_ref()
        .and_then(|c| c.tty)
        .unwrap_or(false);
    let open_stdin = inspect
        .config
        .as_ref()
        .and_then(|c| c.open_stdin)
        .unwrap_or(false);
    let forward_stdin = config.forward_stdin && open_stdin;

    let streams = engine
        .attach_container(
            ctx,
            container,
            AttachOptions {
                stdin: forward_stdin,
                logs: false,
                detach_keys: Some(config.detach_keys.clone()),
            },
        )
        .await?;

    let result = if tty && forward_stdin {
        attach_tty(ctx, engine, container, streams.output, streams.input).await
    } else {
        attach_plain(ctx, streams.output, streams.input, forward_stdin).await
    };
    result?;

    // The stream has ended; decide detach vs exit under a fresh context so
    // cleanup survives cancellation of the run.
    let cleanup = CancellationToken::new();
    let state = tokio::time::timeout(
        CLEANUP_DEADLINE,
        engine.inspect_container(&cleanup, container),
    )
    .await;
    let running = match state {
        Ok(Ok(inspect)) => inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false),
        _ => false,
    };
    Ok(if running {
        AttachOutcome::Detached
    } else {
        AttachOutcome::Exited
    })
}

type OutputStream =
    Pin<Box<dyn Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Send>>;
type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// TTY path: raw terminal, resize forwarding, raw byte passthrough
async fn attach_tty(
    ctx: &CancellationToken,
    engine: &Engine,
    container: &str,
    output: OutputStream,
    input: InputSink,
) -> Result<()> {
    let guard = RawModeGuard::enable()?;

    // The ±1 resize pair forces a redraw of any full-screen UI that cached
    // its previous size.
    if let Ok((width, height)) = terminal::size() {
        engine
            .resize_container(container, height + 1, width + 1)
            .await;
        engine.resize_container(container, height, width).await;
    }

    let done = ctx.child_token();

    let resize_task = {
        let done = done.clone();
        let engine = engine.clone();
        let container = container.to_string();
        async move {
            let Ok(mut sigwinch) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
            else {
                return;
            };
            while run_until_cancelled(sigwinch.recv(), &done).await.flatten().is_some() {
                if let Ok((width, height)) = terminal::size() {
                    engine.resize_container(&container, height, width).await;
                }
            }
        }
    };

    let stdin_task = forward_stdin_task(tokio::io::stdin(), input, done.clone());
    let output_task = write_output_task(output, done.clone(), false);

    let (_, _, output_result) = tokio::join!(resize_task, stdin_task, output_task);
    drop(guard);

    output_result
}

/// Non-TTY path: demultiplexed frame routing plus optional raw stdin copy
async fn attach_plain(
    ctx: &CancellationToken,
    output: OutputStream,
    input: InputSink,
    forward_stdin: bool,
) -> Result<()> {
    let done = ctx.child_token();

    let stdin_task: Pin<Box<dyn std::future::Future<Output = ()> + Send>> = if forward_stdin {
        Box::pin(forward_stdin_task(tokio::io::stdin(), input, done.clone()))
    } else {
        // Dropping the write half signals EOF to the container.
        drop(input);
        Box::pin(std::future::ready(()))
    };
    let output_task = write_output_task(output, done.clone(), true);

    let (_, output_result) = tokio::join!(stdin_task, output_task);
    output_result
}

/// Copy local stdin into the container's write half.
///
/// EOF and read errors both half-close the stream; neither is terminal for
/// the pipeline.
async fn forward_stdin_task(
    mut stdin: impl AsyncRead + Unpin,
    mut input: InputSink,
    done: CancellationToken,
) {
    let mut buf = [0u8; 8192];
    loop {
        match run_until_cancelled(stdin.read(&mut buf), &done).await {
            Some(Ok(0)) | None => break,
            Some(Ok(n)) => {
                if input.write_all(&buf[..n]).await.is_err() {
                    break;
                }
                let _ = input.flush().await;
            }
            Some(Err(e)) => {
                debug!(error = %e, "stdin read failed, closing write half");
                break;
            }
        }
    }
    let _ = input.shutdown().await;
}

/// Drain the hijacked output stream into the local stdout/stderr.
///
/// `demux` routes stderr frames separately; the TTY path writes everything
/// to stdout. Completion (EOF or error) cancels the pipeline.
async fn write_output_task(
    mut output: OutputStream,
    done: CancellationToken,
    demux: bool,
) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let result = loop {
        match run_until_cancelled(output.next(), &done).await {
            Some(Some(Ok(frame))) => {
                let to_stderr = demux && matches!(frame, LogOutput::StdErr { .. });
                let bytes = frame.into_bytes();
                let write = if to_stderr {
                    stderr.write_all(&bytes).await
                } else {
                    stdout.write_all(&bytes).await
                };
                if let Err(e) = write {
                    break Err(ClawkerError::Io(e));
                }
                let _ = stdout.flush().await;
            }
            Some(Some(Err(e))) => {
                break Err(EngineError::AttachFailed {
                    message: e.to_string(),
                }
                .into())
            }
            // EOF or cancellation both end the pipeline.
            Some(None) => break Ok(()),
            None => break Err(ClawkerError::Cancelled),
        }
    };
    done.cancel();
    result
}

async fn run_until_cancelled<T>(
    fut: impl std::future::Future<Output = T>,
    done: &CancellationToken,
) -> Option<T> {
    tokio::select! {
        _ = done.cancelled() => None,
        value = fut => Some(value),
    }
}

/// Restores the local terminal on every exit path.
///
/// Reset escapes (leave alternate screen, show cursor, reset colours) go
/// out before termios is restored so a crashed full-screen guest cannot
/// leave the terminal unusable.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode().map_err(|e| EngineError::AttachFailed {
            message: format!("failed to enable raw mode: {e}"),
        })?;
        Ok(Self { active: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        use std::io::Write;
        let mut stdout = std::io::stdout();
        // leave alt screen, show cursor, reset colours
        let _ = stdout.write_all(b"\x1b[?1049l\x1b[?25h\x1b[0m");
        let _ = stdout.flush();
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "failed to restore terminal");
        }
        self.active = false;
    }
}

/// Route a demultiplexed frame stream into separate sinks.
///
/// Frames are written in stream order; stdout and stderr payloads are
/// byte-exact subsequences of the multiplexed payload.
pub async fn route_frames<S>(
    mut frames: S,
    stdout: &mut (impl AsyncWrite + Unpin),
    stderr: &mut (impl AsyncWrite + Unpin),
) -> Result<()>
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|e| EngineError::AttachFailed {
            message: e.to_string(),
        })?;
        match frame {
            LogOutput::StdErr { message } => stderr.write_all(&message).await?,
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => stdout.write_all(&message).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    fn frame_out(payload: &str) -> std::result::Result<LogOutput, bollard::errors::Error> {
        Ok(LogOutput::StdOut {
            message: Bytes::copy_from_slice(payload.as_bytes()),
        })
    }

    fn frame_err(payload: &str) -> std::result::Result<LogOutput, bollard::errors::Error> {
        Ok(LogOutput::StdErr {
            message: Bytes::copy_from_slice(payload.as_bytes()),
        })
    }

    #[tokio::test]
    async fn test_route_frames_demultiplexes_channels() {
        let frames = stream::iter(vec![
            frame_out("hello\n"),
            frame_err("warn\n"),
            frame_out("world\n"),
        ]);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        route_frames(frames, &mut stdout, &mut stderr).await.unwrap();
        assert_eq!(stdout, b"hello\nworld\n");
        assert_eq!(stderr, b"warn\n");
    }

    #[tokio::test]
    async fn test_route_frames_empty_stream() {
        let frames = stream::iter(Vec::new());
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        route_frames(frames, &mut stdout, &mut stderr).await.unwrap();
        assert!(stdout.is_empty());
        assert!(stderr.is_empty());
    }

    #[tokio::test]
    async fn test_stdin_eof_half_closes_write_side() {
        let stdin: &[u8] = b"payload";
        let (sink, mut rx) = tokio::io::duplex(64);
        let done = CancellationToken::new();
        forward_stdin_task(stdin, Box::pin(sink), done).await;

        let mut received = Vec::new();
        rx.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"payload");
    }

    #[tokio::test]
    async fn test_output_eof_cancels_pipeline() {
        let done = CancellationToken::new();
        let output: OutputStream = Box::pin(stream::iter(Vec::new()));
        write_output_task(output, done.clone(), true).await.unwrap();
        assert!(done.is_cancelled());
    }

    #[test]
    fn test_default_detach_keys() {
        assert_eq!(AttachConfig::default().detach_keys, "ctrl-p,ctrl-q");
    }
}
