//! Dockerfile rendering from project configuration
//!
//! A single embedded template is driven by [`Config`]: base image slot,
//! OS-family-aware package install, the fixed agent user, the firewall and
//! entrypoint scripts, six verbatim injection points, and structured
//! instructions rendered as proper directives. Structured instructions are
//! emitted inside marked regions so a rendered file can be parsed back and
//! re-rendered identically.

use crate::config::{Config, CopyInstruction, Instructions, RunInstruction};
use crate::errors::{EngineError, Result};
use crate::naming::is_alpine_image;
use indexmap::IndexMap;
use tracing::{debug, instrument};

/// The agent user baked into every image
pub const AGENT_USER: &str = "agent";
/// Fixed uid/gid of the agent user
pub const AGENT_UID: u32 = 1001;
/// Login shell of the agent user
pub const AGENT_SHELL: &str = "/bin/zsh";

/// Packages the template base layer already guarantees on Alpine
const ALPINE_BASE_PACKAGES: &[&str] = &[
    "bash",
    "ca-certificates",
    "curl",
    "git",
    "iptables",
    "netcat-openbsd",
    "sudo",
    "zsh",
];

/// Packages the template base layer already guarantees on Debian derivatives
const DEBIAN_BASE_PACKAGES: &[&str] = &[
    "ca-certificates",
    "curl",
    "git",
    "iptables",
    "netcat-openbsd",
    "sudo",
    "zsh",
];

const ROOT_REGION_BEGIN: &str = "# >>> instructions (root)";
const ROOT_REGION_END: &str = "# <<< instructions (root)";
const USER_REGION_BEGIN: &str = "# >>> instructions (user)";
const USER_REGION_END: &str = "# <<< instructions (user)";

/// Render the full Dockerfile for a configuration.
///
/// `base_image` must already be resolved (never the `@` sentinel).
#[instrument(skip(config))]
pub fn render(config: &Config, base_image: &str) -> Result<String> {
    if base_image == crate::config::IMAGE_REF_DEFAULT {
        return Err(EngineError::BuildFailed {
            message: "base image reference was not resolved before rendering".to_string(),
        }
        .into());
    }
    let alpine = is_alpine_image(base_image);
    debug!(base_image, alpine, "rendering dockerfile");

    let mut out = String::new();
    out.push_str("# syntax=docker/dockerfile:1\n");
    out.push_str(&format!("FROM {base_image}\n"));
    push_lines(&mut out, &config.build.inject.after_from);
    out.push('\n');

    let packages = filter_packages(&config.build.packages, alpine);
    out.push_str(&render_package_install(alpine, &packages));
    push_lines(&mut out, &config.build.inject.after_packages);
    out.push('\n');

    out.push_str(&render_user_setup(alpine, config));
    out.push_str(ROOT_REGION_BEGIN);
    out.push('\n');
    out.push_str(&render_root_instructions(
        &config.build.instructions,
        alpine,
    ));
    out.push_str(ROOT_REGION_END);
    out.push('\n');
    push_lines(&mut out, &config.build.inject.after_user_setup);
    out.push('\n');

    out.push_str(&format!("USER {AGENT_USER}\n"));
    out.push_str(&format!("WORKDIR {}\n", config.workspace.remote_path));
    push_lines(&mut out, &config.build.inject.after_user_switch);
    out.push('\n');

    out.push_str(&render_agent_setup(config));
    push_lines(&mut out, &config.build.inject.after_agent_install);
    out.push('\n');

    out.push_str(USER_REGION_BEGIN);
    out.push('\n');
    out.push_str(&render_user_instructions(
        &config.build.instructions,
        alpine,
    ));
    out.push_str(USER_REGION_END);
    out.push('\n');
    push_lines(&mut out, &config.build.inject.before_entrypoint);
    out.push('\n');

    out.push_str("ENTRYPOINT [\"/usr/local/bin/entrypoint.sh\"]\n");
    Ok(out)
}

/// Append each verbatim injection line followed by a newline.
fn push_lines(out: &mut String, lines: &[String]) {
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
}

/// Drop user packages the template base already installs for the family
pub fn filter_packages(requested: &[String], alpine: bool) -> Vec<String> {
    let base = if alpine {
        ALPINE_BASE_PACKAGES
    } else {
        DEBIAN_BASE_PACKAGES
    };
    requested
        .iter()
        .filter(|p| !base.contains(&p.as_str()))
        .cloned()
        .collect()
}

fn render_package_install(alpine: bool, extra: &[String]) -> String {
    let mut packages: Vec<&str> = if alpine {
        ALPINE_BASE_PACKAGES.to_vec()
    } else {
        DEBIAN_BASE_PACKAGES.to_vec()
    };
    packages.extend(extra.iter().map(|s| s.as_str()));
    let list = packages.join(" ");
    if alpine {
        format!("RUN apk add --no-cache {list}\n")
    } else {
        format!(
            "RUN apt-get update && apt-get install -y --no-install-recommends {list} \
             && rm -rf /var/lib/apt/lists/*\n"
        )
    }
}

fn render_user_setup(alpine: bool, config: &Config) -> String {
    let mut out = String::new();
    if alpine {
        out.push_str(&format!(
            "RUN addgroup -g {AGENT_UID} {AGENT_USER} \
             && adduser -D -u {AGENT_UID} -G {AGENT_USER} -s {AGENT_SHELL} {AGENT_USER}\n"
        ));
    } else {
        out.push_str(&format!(
            "RUN groupadd -g {AGENT_UID} {AGENT_USER} \
             && useradd -m -u {AGENT_UID} -g {AGENT_UID} -s {AGENT_SHELL} {AGENT_USER}\n"
        ));
    }
    out.push_str(
        "COPY entrypoint.sh statusline.sh host-open.sh callback-forwarder.sh \
         git-credential-clawker.sh /usr/local/bin/\n",
    );
    if config.security.firewall.enable {
        out.push_str("COPY init-firewall.sh /usr/local/bin/init-firewall.sh\n");
        out.push_str("COPY allowed-domains.txt /etc/clawker/allowed-domains.txt\n");
        out.push_str(&format!(
            "RUN echo '{AGENT_USER} ALL=(root) NOPASSWD: /usr/local/bin/init-firewall.sh' \
             > /etc/sudoers.d/clawker-firewall\n"
        ));
    }
    out
}

fn render_agent_setup(config: &Config) -> String {
    let mut out = String::new();
    out.push_str(&format!("RUN mkdir -p /home/{AGENT_USER}/.claude\n"));
    out.push_str(&format!(
        "COPY --chown={AGENT_UID}:{AGENT_UID} agent-settings.json \
         /home/{AGENT_USER}/.claude/settings.json\n"
    ));
    let firewall = if config.security.firewall.enable {
        "1"
    } else {
        "0"
    };
    out.push_str(&format!("ENV CLAWKER_FIREWALL={firewall}\n"));
    if let Some(editor) = &config.agent.editor {
        out.push_str(&format!("ENV EDITOR={}\n", quote(editor)));
    }
    if let Some(visual) = &config.agent.visual {
        out.push_str(&format!("ENV VISUAL={}\n", quote(visual)));
    }
    for (key, value) in &config.agent.env {
        out.push_str(&format!("ENV {key}={}\n", quote(value)));
    }
    out
}

fn render_root_instructions(instructions: &Instructions, alpine: bool) -> String {
    let mut out = String::new();
    for (key, value) in &instructions.args {
        out.push_str(&format!("ARG {key}={}\n", quote(value)));
    }
    for run in &instructions.root_run {
        if let Some(cmd) = run.for_family(alpine) {
            out.push_str(&format!("RUN {cmd}\n"));
        }
    }
    out
}

fn render_user_instructions(instructions: &Instructions, alpine: bool) -> String {
    let mut out = String::new();
    for copy in &instructions.copy {
        out.push_str(&format!("COPY {} {}\n", copy.src, copy.dest));
    }
    for (key, value) in &instructions.env {
        out.push_str(&format!("ENV {key}={}\n", quote(value)));
    }
    for (key, value) in &instructions.labels {
        out.push_str(&format!("LABEL {key}={}\n", quote(value)));
    }
    for port in &instructions.expose {
        out.push_str(&format!("EXPOSE {port}\n"));
    }
    for volume in &instructions.volumes {
        out.push_str(&format!("VOLUME {volume}\n"));
    }
    if let Some(workdir) = &instructions.workdir {
        out.push_str(&format!("WORKDIR {workdir}\n"));
    }
    if let Some(shell) = &instructions.shell {
        out.push_str(&format!(
            "SHELL {}\n",
            serde_json::to_string(shell).unwrap_or_default()
        ));
    }
    if let Some(healthcheck) = &instructions.healthcheck {
        out.push_str(&format!("HEALTHCHECK CMD {healthcheck}\n"));
    }
    for run in &instructions.user_run {
        if let Some(cmd) = run.for_family(alpine) {
            out.push_str(&format!("RUN {cmd}\n"));
        }
    }
    out
}

/// Parse the structured-instruction regions back out of a rendered file.
///
/// Only the marked regions are inspected; directives the template itself
/// emits are invisible here. Re-rendering the parsed instructions produces
/// the regions byte-for-byte.
pub fn parse_instructions(dockerfile: &str) -> Instructions {
    let mut instructions = Instructions {
        copy: Vec::new(),
        env: IndexMap::new(),
        labels: IndexMap::new(),
        expose: Vec::new(),
        args: IndexMap::new(),
        volumes: Vec::new(),
        workdir: None,
        healthcheck: None,
        shell: None,
        user_run: Vec::new(),
        root_run: Vec::new(),
    };

    #[derive(PartialEq)]
    enum Region {
        None,
        Root,
        User,
    }
    let mut region = Region::None;

    for line in dockerfile.lines() {
        match line {
            ROOT_REGION_BEGIN => {
                region = Region::Root;
                continue;
            }
            USER_REGION_BEGIN => {
                region = Region::User;
                continue;
            }
            ROOT_REGION_END | USER_REGION_END => {
                region = Region::None;
                continue;
            }
            _ => {}
        }
        if region == Region::None {
            continue;
        }
        let Some((directive, rest)) = line.split_once(' ') else {
            continue;
        };
        match directive {
            "ARG" => {
                if let Some((key, value)) = rest.split_once('=') {
                    instructions
                        .args
                        .insert(key.to_string(), unquote(value));
                }
            }
            "RUN" => {
                let run = RunInstruction::Shared(rest.to_string());
                if region == Region::Root {
                    instructions.root_run.push(run);
                } else {
                    instructions.user_run.push(run);
                }
            }
            "COPY" => {
                if let Some((src, dest)) = rest.split_once(' ') {
                    instructions.copy.push(CopyInstruction {
                        src: src.to_string(),
                        dest: dest.to_string(),
                    });
                }
            }
            "ENV" => {
                if let Some((key, value)) = rest.split_once('=') {
                    instructions.env.insert(key.to_string(), unquote(value));
                }
            }
            "LABEL" => {
                if let Some((key, value)) = rest.split_once('=') {
                    instructions
                        .labels
                        .insert(key.to_string(), unquote(value));
                }
            }
            "EXPOSE" => instructions.expose.push(rest.to_string()),
            "VOLUME" => instructions.volumes.push(rest.to_string()),
            "WORKDIR" => instructions.workdir = Some(rest.to_string()),
            "SHELL" => {
                instructions.shell = serde_json::from_str(rest).ok();
            }
            "HEALTHCHECK" => {
                instructions.healthcheck =
                    rest.strip_prefix("CMD ").map(|s| s.to_string());
            }
            _ => {}
        }
    }
    instructions
}

/// Quote a directive value when it needs it
fn quote(value: &str) -> String {
    if value.is_empty() || value.contains(' ') || value.contains('"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\\\", "\\")
    } else {
        value.to_string()
    }
}
