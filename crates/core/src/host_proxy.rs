//! Host proxy: container-to-host side channel
//!
//! A small loopback TCP server started on demand before a container run.
//! Container helper scripts talk a line-delimited protocol, one request per
//! connection:
//!
//! - `OPEN <url>`: open the URL in the host browser
//! - `CRED <protocol> <host>`: answer in `git credential fill` format
//! - `CALLBACK <port>`: capture one browser redirect on the host port and
//!   hand the path back for replay inside the container
//!
//! Only one instance binds per host; `ensure_running` takes a file lock and
//! joins an already-running server instead of racing it.

use crate::config::GitCredentialsConfig;
use crate::errors::{EngineError, Result};
use crate::paths;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long a CALLBACK capture waits for the browser redirect
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// On-disk record of the running proxy
#[derive(Debug, Serialize, Deserialize)]
struct ProxyState {
    port: u16,
    pid: u32,
}

/// Proxy startup options
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    /// Browser command; autodetected when `None` and detection is allowed
    pub browser: Option<String>,
    pub git_credentials: GitCredentialsConfig,
}

/// Handle to the running (or joined) host proxy
pub struct HostProxy {
    port: u16,
    /// Held while this process owns the accept loop
    _owner: Option<CancellationToken>,
}

impl HostProxy {
    /// The loopback port containers dial through `host.docker.internal`
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Environment entry telling container scripts where to dial
    pub fn container_env(&self) -> String {
        format!("CLAWKER_HOST_PROXY=host.docker.internal:{}", self.port)
    }

    /// Start the proxy or join the instance already bound on this host.
    ///
    /// Idempotent: the singleton is enforced with an exclusive lock on a
    /// sidecar file; losers read the winner's port from the state file.
    #[instrument(skip(ctx, options))]
    pub async fn ensure_running(
        ctx: &CancellationToken,
        options: ProxyOptions,
    ) -> Result<HostProxy> {
        let state_path = paths::proxy_state_path()?;
        Self::ensure_running_at(ctx, options, state_path).await
    }

    /// As [`Self::ensure_running`] with an explicit state path (tests)
    pub async fn ensure_running_at(
        ctx: &CancellationToken,
        options: ProxyOptions,
        state_path: PathBuf,
    ) -> Result<HostProxy> {
        if let Some(parent) = state_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(state_path.with_extension("lock"))?;

        if lock_file.try_lock_exclusive().is_err() {
            // Another process owns the server; join it.
            let contents = std::fs::read_to_string(&state_path)?;
            let state: ProxyState =
                serde_json::from_str(&contents).map_err(|e| EngineError::Api {
                    message: format!("corrupt proxy state: {e}"),
                })?;
            debug!(port = state.port, "joining running host proxy");
            return Ok(HostProxy {
                port: state.port,
                _owner: None,
            });
        }

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let state = ProxyState {
            port,
            pid: std::process::id(),
        };
        let contents = serde_json::to_string_pretty(&state).map_err(|e| EngineError::Api {
            message: e.to_string(),
        })?;
        std::fs::write(&state_path, contents)?;

        let owner = ctx.child_token();
        let loop_token = owner.clone();
        tokio::spawn(async move {
            // Lock lives as long as the accept loop.
            let _lock = lock_file;
            accept_loop(listener, loop_token, options).await;
        });

        info!(port, "host proxy listening");
        Ok(HostProxy {
            port,
            _owner: Some(owner),
        })
    }
}

async fn accept_loop(listener: TcpListener, ctx: CancellationToken, options: ProxyOptions) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                debug!("host proxy shutting down");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let options = options.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, options).await {
                                warn!(error = %e, "proxy connection failed");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "proxy accept failed");
                        return;
                    }
                }
            }
        }
    }
}

/// One request per connection; requests are serialised by the reader
async fn handle_connection(stream: TcpStream, options: ProxyOptions) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    match parse_request(line.trim_end()) {
        Some(ProxyRequest::Open(url)) => {
            open_in_browser(&options, &url).await;
            write_half.write_all(b"OK\n").await?;
        }
        Some(ProxyRequest::Cred { protocol, host }) => {
            let response = fill_credentials(&options.git_credentials, &protocol, &host).await;
            write_half.write_all(response.as_bytes()).await?;
        }
        Some(ProxyRequest::Callback(port)) => match capture_callback(port).await {
            Ok(path) => {
                write_half.write_all(path.as_bytes()).await?;
                write_half.write_all(b"\n").await?;
            }
            Err(e) => {
                warn!(port, error = %e, "callback capture failed");
            }
        },
        None => {
            write_half.write_all(b"ERR unknown request\n").await?;
        }
    }
    write_half.shutdown().await
}

/// A parsed protocol line
#[derive(Debug, PartialEq)]
enum ProxyRequest {
    Open(String),
    Cred { protocol: String, host: String },
    Callback(u16),
}

fn parse_request(line: &str) -> Option<ProxyRequest> {
    let mut parts = line.splitn(3, ' ');
    match parts.next()? {
        "OPEN" => Some(ProxyRequest::Open(parts.next()?.to_string())),
        "CRED" => Some(ProxyRequest::Cred {
            protocol: parts.next()?.to_string(),
            host: parts.next()?.to_string(),
        }),
        "CALLBACK" => parts.next()?.parse().ok().map(ProxyRequest::Callback),
        _ => None,
    }
}

async fn open_in_browser(options: &ProxyOptions, url: &str) {
    let command = match &options.browser {
        Some(command) => command.clone(),
        None => {
            if cfg!(target_os = "macos") {
                "open".to_string()
            } else {
                "xdg-open".to_string()
            }
        }
    };
    info!(url, command, "opening URL on host");
    if let Err(e) = tokio::process::Command::new(&command).arg(url).spawn() {
        warn!(error = %e, command, "failed to launch browser");
    }
}

/// Ask the host's git for credentials, honouring the forwarding config
async fn fill_credentials(config: &GitCredentialsConfig, protocol: &str, host: &str) -> String {
    if protocol == "https" && !config.forward_https {
        return String::new();
    }
    if protocol == "ssh" && !config.forward_ssh {
        return String::new();
    }
    let input = format!("protocol={protocol}\nhost={host}\n\n");
    let result = async {
        let mut child = tokio::process::Command::new("git")
            .args(["credential", "fill"])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        Ok::<_, std::io::Error>(String::from_utf8_lossy(&output.stdout).into_owned())
    }
    .await;
    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "git credential fill failed");
            String::new()
        }
    }
}

/// Bind the redirect port, wait for one browser request, answer it, and
/// return the request path (with query) for replay inside the container
async fn capture_callback(port: u16) -> std::io::Result<String> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let accept = tokio::time::timeout(CALLBACK_TIMEOUT, listener.accept());
    let (mut stream, _) = accept.await.map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::TimedOut, "no callback received")
    })??;

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    stream
        .write_all(
            b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n\
              Authentication complete. You can close this tab.\n",
        )
        .await?;
    let _ = stream.shutdown().await;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_request() {
        assert_eq!(
            parse_request("OPEN https://example.com/auth?x=1"),
            Some(ProxyRequest::Open("https://example.com/auth?x=1".to_string()))
        );
        assert_eq!(
            parse_request("CRED https github.com"),
            Some(ProxyRequest::Cred {
                protocol: "https".to_string(),
                host: "github.com".to_string()
            })
        );
        assert_eq!(parse_request("CALLBACK 8765"), Some(ProxyRequest::Callback(8765)));
        assert_eq!(parse_request("NOPE"), None);
        assert_eq!(parse_request("CALLBACK nan"), None);
    }

    #[tokio::test]
    async fn test_ensure_running_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("proxy.json");
        let ctx = CancellationToken::new();

        let first = HostProxy::ensure_running_at(&ctx, ProxyOptions::default(), state.clone())
            .await
            .unwrap();
        let second = HostProxy::ensure_running_at(&ctx, ProxyOptions::default(), state)
            .await
            .unwrap();
        assert_eq!(first.port(), second.port());
        assert!(second._owner.is_none());
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_unknown_request_gets_error_line() {
        let dir = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        let proxy = HostProxy::ensure_running_at(
            &ctx,
            ProxyOptions::default(),
            dir.path().join("proxy.json"),
        )
        .await
        .unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();
        stream.write_all(b"BOGUS line\n").await.unwrap();
        let mut response = String::new();
        BufReader::new(stream).read_line(&mut response).await.unwrap();
        assert!(response.starts_with("ERR"));
        ctx.cancel();
    }

    #[tokio::test]
    async fn test_cred_disabled_yields_empty_response() {
        let dir = TempDir::new().unwrap();
        let ctx = CancellationToken::new();
        // forward_https defaults to false
        let proxy = HostProxy::ensure_running_at(
            &ctx,
            ProxyOptions::default(),
            dir.path().join("proxy.json"),
        )
        .await
        .unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap();
        stream.write_all(b"CRED https github.com\n").await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        assert!(response.is_empty());
        ctx.cancel();
    }

    #[test]
    fn test_container_env_points_at_gateway() {
        let proxy = HostProxy {
            port: 43210,
            _owner: None,
        };
        assert_eq!(
            proxy.container_env(),
            "CLAWKER_HOST_PROXY=host.docker.internal:43210"
        );
    }
}
