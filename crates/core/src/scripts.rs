//! Embedded container helper scripts
//!
//! These blobs ship unmodified into every build context with executable
//! bits set; the core never interprets their contents.

/// Container entrypoint: firewall init, proxy env wiring, exec
pub const ENTRYPOINT: &str = include_str!("../scripts/entrypoint.sh");

/// Egress firewall init, consumes `/etc/clawker/allowed-domains.txt`
pub const INIT_FIREWALL: &str = include_str!("../scripts/init-firewall.sh");

/// Prompt status segment for the agent shell
pub const STATUSLINE: &str = include_str!("../scripts/statusline.sh");

/// `$BROWSER` shim that opens URLs on the host via the proxy
pub const HOST_OPEN: &str = include_str!("../scripts/host-open.sh");

/// Replays a host-captured OAuth redirect into the container
pub const CALLBACK_FORWARDER: &str = include_str!("../scripts/callback-forwarder.sh");

/// git credential helper backed by the host proxy
pub const GIT_CREDENTIAL_HELPER: &str = include_str!("../scripts/git-credential-clawker.sh");

/// Static settings document for the agent
pub const AGENT_SETTINGS: &str = include_str!("../scripts/agent-settings.json");

/// An embedded file destined for the build context
pub struct EmbeddedFile {
    /// Path inside the build context
    pub name: &'static str,
    pub contents: &'static str,
    /// Unix permission bits applied in the tar header
    pub mode: u32,
}

/// Every embedded file, scripts first.
///
/// Scripts are 0755, data files 0644.
pub fn embedded_files() -> Vec<EmbeddedFile> {
    vec![
        EmbeddedFile {
            name: "entrypoint.sh",
            contents: ENTRYPOINT,
            mode: 0o755,
        },
        EmbeddedFile {
            name: "init-firewall.sh",
            contents: INIT_FIREWALL,
            mode: 0o755,
        },
        EmbeddedFile {
            name: "statusline.sh",
            contents: STATUSLINE,
            mode: 0o755,
        },
        EmbeddedFile {
            name: "host-open.sh",
            contents: HOST_OPEN,
            mode: 0o755,
        },
        EmbeddedFile {
            name: "callback-forwarder.sh",
            contents: CALLBACK_FORWARDER,
            mode: 0o755,
        },
        EmbeddedFile {
            name: "git-credential-clawker.sh",
            contents: GIT_CREDENTIAL_HELPER,
            mode: 0o755,
        },
        EmbeddedFile {
            name: "agent-settings.json",
            contents: AGENT_SETTINGS,
            mode: 0o644,
        },
    ]
}
