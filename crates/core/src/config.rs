//! Project configuration model and loader
//!
//! A project is described by a `clawker.yaml` at its filesystem root. The
//! loader produces a validated, immutable [`Config`]; the `project` key is
//! injected from the [`crate::resolver::Resolution`] and never persisted in
//! the file itself. Unknown fields are tolerated so older binaries can read
//! newer documents.

use crate::errors::{ConfigError, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// File name of the per-project configuration document
pub const CONFIG_FILE_NAME: &str = "clawker.yaml";

/// Sentinel image reference meaning "the project's generated image"
pub const IMAGE_REF_DEFAULT: &str = "@";

/// Validated per-project configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Project slug, injected by the loader from the resolution
    #[serde(skip)]
    pub project: String,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub ralph: RalphConfig,
}

/// Image build section
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Base image the template builds on
    #[serde(default = "default_base_image")]
    pub image: String,

    /// Extra OS packages to install on top of the template base set
    #[serde(default)]
    pub packages: Vec<String>,

    /// Structured Dockerfile instructions (preferred over `inject`)
    #[serde(default)]
    pub instructions: Instructions,

    /// Raw Dockerfile lines emitted verbatim at fixed points
    #[serde(default)]
    pub inject: InjectPoints,

    /// Use this Dockerfile instead of the embedded template
    #[serde(default)]
    pub dockerfile: Option<PathBuf>,

    /// Extra build-context directory copied into the tar stream
    #[serde(default)]
    pub context: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            image: default_base_image(),
            packages: Vec::new(),
            instructions: Instructions::default(),
            inject: InjectPoints::default(),
            dockerfile: None,
            context: None,
        }
    }
}

fn default_base_image() -> String {
    "node:22-bookworm".to_string()
}

/// Structured instructions rendered as proper Dockerfile directives
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub copy: Vec<CopyInstruction>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
    #[serde(default)]
    pub expose: Vec<String>,
    #[serde(default)]
    pub args: IndexMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub workdir: Option<String>,
    #[serde(default)]
    pub healthcheck: Option<String>,
    #[serde(default)]
    pub shell: Option<Vec<String>>,
    /// RUN directives executed after the switch to the agent user
    #[serde(default)]
    pub user_run: Vec<RunInstruction>,
    /// RUN directives executed as root, before the user switch
    #[serde(default)]
    pub root_run: Vec<RunInstruction>,
}

impl Instructions {
    /// True when no structured instruction is present
    pub fn is_empty(&self) -> bool {
        self.copy.is_empty()
            && self.env.is_empty()
            && self.labels.is_empty()
            && self.expose.is_empty()
            && self.args.is_empty()
            && self.volumes.is_empty()
            && self.workdir.is_none()
            && self.healthcheck.is_none()
            && self.shell.is_none()
            && self.user_run.is_empty()
            && self.root_run.is_empty()
    }
}

/// A COPY directive source/destination pair
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CopyInstruction {
    pub src: String,
    pub dest: String,
}

/// A RUN directive, either shared across OS families or split per family
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RunInstruction {
    /// One command for every base image family
    Shared(String),
    /// Family-specific variants; the one matching the base image is emitted
    PerFamily {
        #[serde(default)]
        alpine: Option<String>,
        #[serde(default)]
        debian: Option<String>,
    },
}

impl RunInstruction {
    /// Select the command for the given base-image family
    pub fn for_family(&self, alpine: bool) -> Option<&str> {
        match self {
            RunInstruction::Shared(cmd) => Some(cmd),
            RunInstruction::PerFamily {
                alpine: a,
                debian: d,
            } => {
                if alpine {
                    a.as_deref()
                } else {
                    d.as_deref()
                }
            }
        }
    }
}

/// Raw Dockerfile lines injected verbatim at fixed template points
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct InjectPoints {
    #[serde(default)]
    pub after_from: Vec<String>,
    #[serde(default)]
    pub after_packages: Vec<String>,
    #[serde(default)]
    pub after_user_setup: Vec<String>,
    #[serde(default)]
    pub after_user_switch: Vec<String>,
    #[serde(default)]
    pub after_agent_install: Vec<String>,
    #[serde(default)]
    pub before_entrypoint: Vec<String>,
}

/// In-container agent section
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// The agent binary invoked by the Ralph loop
    #[serde(default = "default_agent_command")]
    pub command: String,

    /// Extra host files shipped into the build context for the agent
    #[serde(default)]
    pub includes: Vec<PathBuf>,

    /// Environment exported to the agent process
    #[serde(default)]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub editor: Option<String>,

    #[serde(default)]
    pub visual: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            includes: Vec::new(),
            env: IndexMap::new(),
            editor: None,
            visual: None,
        }
    }
}

fn default_agent_command() -> String {
    "claude".to_string()
}

/// Workspace binding section
#[derive(Debug, Clone, Deserialize)]
pub struct WorkspaceConfig {
    /// Where the workspace surfaces inside the container
    #[serde(default = "default_remote_path")]
    pub remote_path: String,

    /// Strategy used when the CLI does not override it
    #[serde(default)]
    pub default_mode: WorkspaceMode,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            remote_path: default_remote_path(),
            default_mode: WorkspaceMode::default(),
        }
    }
}

fn default_remote_path() -> String {
    "/workspace".to_string()
}

/// How the project filesystem is exposed to the container
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceMode {
    /// Host directory mounted read/write; mutations visible immediately
    #[default]
    Bind,
    /// Named volume materialised once from the host directory
    Snapshot,
}

impl std::str::FromStr for WorkspaceMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bind" => Ok(WorkspaceMode::Bind),
            "snapshot" => Ok(WorkspaceMode::Snapshot),
            _ => Err(ConfigError::Invalid {
                field: "workspace.default_mode".to_string(),
                message: format!("unsupported mode '{s}', expected bind or snapshot"),
            }),
        }
    }
}

/// Security section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub firewall: FirewallConfig,

    /// Bind the host docker socket into the container
    #[serde(default)]
    pub docker_socket: bool,

    #[serde(default)]
    pub git_credentials: GitCredentialsConfig,
}

/// Egress firewall section
#[derive(Debug, Clone, Deserialize)]
pub struct FirewallConfig {
    #[serde(default = "default_true")]
    pub enable: bool,

    #[serde(default)]
    pub add_domains: Vec<String>,

    #[serde(default)]
    pub remove_domains: Vec<String>,

    /// When non-empty, replaces the computed set verbatim
    #[serde(default)]
    pub override_domains: Vec<String>,
}

impl Default for FirewallConfig {
    fn default() -> Self {
        Self {
            enable: true,
            add_domains: Vec::new(),
            remove_domains: Vec::new(),
            override_domains: Vec::new(),
        }
    }
}

/// Git credential forwarding section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitCredentialsConfig {
    #[serde(default)]
    pub forward_https: bool,
    #[serde(default)]
    pub forward_ssh: bool,
    #[serde(default)]
    pub copy_git_config: bool,
}

/// Ralph loop section
#[derive(Debug, Clone, Deserialize)]
pub struct RalphConfig {
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    #[serde(default = "default_stagnation_threshold")]
    pub stagnation_threshold: u32,

    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    #[serde(default)]
    pub skip_permissions: bool,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            stagnation_threshold: default_stagnation_threshold(),
            timeout_minutes: default_timeout_minutes(),
            skip_permissions: false,
        }
    }
}

fn default_max_loops() -> u32 {
    20
}

fn default_stagnation_threshold() -> u32 {
    3
}

fn default_timeout_minutes() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

/// Load and validate the configuration for a resolved project.
///
/// A missing `clawker.yaml` yields the default document; anonymous projects
/// (empty key, no registered root) always take this path.
#[instrument]
pub fn load_config(project: &str, root: Option<&Path>) -> Result<Config> {
    let mut config = match root.map(|r| r.join(CONFIG_FILE_NAME)) {
        Some(path) if path.exists() => {
            debug!(path = %path.display(), "loading project configuration");
            let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
                source: e,
            })?;
            parse_config(&contents)?
        }
        _ => {
            debug!("no configuration file, using defaults");
            Config::default()
        }
    };
    config.project = project.to_string();
    validate(&config)?;
    Ok(config)
}

/// Parse a configuration document from YAML
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = serde_yaml_ng::from_str(contents).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !config.workspace.remote_path.starts_with('/') {
        return Err(ConfigError::Invalid {
            field: "workspace.remote_path".to_string(),
            message: format!(
                "must be an absolute container path, got '{}'",
                config.workspace.remote_path
            ),
        }
        .into());
    }
    if config.ralph.max_loops == 0 {
        return Err(ConfigError::Invalid {
            field: "ralph.max_loops".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }
    if config.ralph.stagnation_threshold == 0 {
        return Err(ConfigError::Invalid {
            field: "ralph.stagnation_threshold".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }
    if config.build.image.trim().is_empty() || config.build.image == IMAGE_REF_DEFAULT {
        return Err(ConfigError::Invalid {
            field: "build.image".to_string(),
            message: "must name a concrete base image".to_string(),
        }
        .into());
    }
    if config.agent.command.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "agent.command".to_string(),
            message: "must not be empty".to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = parse_config("{}").unwrap();
        assert_eq!(config.build.image, "node:22-bookworm");
        assert_eq!(config.workspace.remote_path, "/workspace");
        assert_eq!(config.workspace.default_mode, WorkspaceMode::Bind);
        assert!(config.security.firewall.enable);
        assert_eq!(config.ralph.max_loops, 20);
        assert_eq!(config.ralph.stagnation_threshold, 3);
        assert_eq!(config.ralph.timeout_minutes, 15);
        assert!(!config.ralph.skip_permissions);
        assert_eq!(config.agent.command, "claude");
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
build:
  image: debian:bookworm-slim
  packages: [ripgrep, jq]
  instructions:
    env:
      LANG: C.UTF-8
    user_run:
      - alpine: apk add --no-cache fzf
        debian: apt-get install -y fzf
  inject:
    after_packages:
      - RUN echo hello
workspace:
  remote_path: /src
  default_mode: snapshot
security:
  firewall:
    enable: true
    add_domains: [crates.io]
    remove_domains: [example.com]
ralph:
  max_loops: 5
  stagnation_threshold: 2
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.build.image, "debian:bookworm-slim");
        assert_eq!(config.build.packages, vec!["ripgrep", "jq"]);
        assert_eq!(config.workspace.default_mode, WorkspaceMode::Snapshot);
        assert_eq!(config.ralph.max_loops, 5);
        assert_eq!(
            config.build.inject.after_packages,
            vec!["RUN echo hello".to_string()]
        );
        let run = &config.build.instructions.user_run[0];
        assert_eq!(run.for_family(true), Some("apk add --no-cache fzf"));
        assert_eq!(run.for_family(false), Some("apt-get install -y fzf"));
    }

    #[test]
    fn test_validate_remote_path_must_be_absolute() {
        let mut config = Config::default();
        config.workspace.remote_path = "relative/path".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("workspace.remote_path"));
    }

    #[test]
    fn test_validate_zero_loops_rejected() {
        let mut config = Config::default();
        config.ralph.max_loops = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("ralph.max_loops"));
    }

    #[test]
    fn test_load_missing_file_yields_defaults_with_project() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config("myapp", Some(dir.path())).unwrap();
        assert_eq!(config.project, "myapp");
        assert_eq!(config.build.image, "node:22-bookworm");
    }

    #[test]
    fn test_shared_run_instruction() {
        let yaml = r#"
build:
  instructions:
    root_run:
      - corepack enable
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(
            config.build.instructions.root_run[0].for_family(true),
            Some("corepack enable")
        );
    }
}
