//! Build-context assembly
//!
//! Produces the tar stream fed to the engine's image build: the rendered
//! Dockerfile, the embedded helper scripts (executable), the firewall
//! allowlist, the agent's static settings, any `agent.includes` files, and
//! an optional user context directory. `.git` directories never enter the
//! context.

use crate::config::Config;
use crate::dockerfile;
use crate::errors::{EngineError, Result};
use crate::firewall;
use crate::scripts;
use std::path::Path;
use tar::{Builder, Header};
use tracing::{debug, instrument};

/// A fully assembled build context
pub struct BuildContext {
    /// The Dockerfile text that went into the stream (surfaced on build
    /// failure for debugging)
    pub dockerfile: String,
    /// Complete tar stream
    pub tar: Vec<u8>,
}

/// Assemble the tar build context for a configuration.
///
/// `base_image` must be the resolved base reference (never `@`).
#[instrument(skip(config))]
pub fn assemble(config: &Config, base_image: &str) -> Result<BuildContext> {
    let dockerfile_text = match &config.build.dockerfile {
        Some(path) => std::fs::read_to_string(path).map_err(|e| EngineError::BuildFailed {
            message: format!("cannot read dockerfile {}: {e}", path.display()),
        })?,
        None => dockerfile::render(config, base_image)?,
    };

    let mut builder = Builder::new(Vec::new());

    append_file(&mut builder, "Dockerfile", dockerfile_text.as_bytes(), 0o644)?;

    for file in scripts::embedded_files() {
        append_file(&mut builder, file.name, file.contents.as_bytes(), file.mode)?;
    }

    if config.security.firewall.enable {
        let mut allowlist = firewall::allowed_domains(&config.security.firewall).join("\n");
        allowlist.push('\n');
        append_file(
            &mut builder,
            "allowed-domains.txt",
            allowlist.as_bytes(),
            0o644,
        )?;
    }

    for include in &config.agent.includes {
        let name = include
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| EngineError::BuildFailed {
                message: format!("include path has no file name: {}", include.display()),
            })?;
        let contents = std::fs::read(include).map_err(|e| EngineError::BuildFailed {
            message: format!("cannot read include {}: {e}", include.display()),
        })?;
        append_file(&mut builder, &format!("includes/{name}"), &contents, 0o644)?;
    }

    if let Some(context_dir) = &config.build.context {
        append_dir(&mut builder, context_dir, Path::new(""))?;
    }

    let tar = builder.into_inner().map_err(|e| EngineError::BuildFailed {
        message: format!("tar assembly failed: {e}"),
    })?;
    debug!(bytes = tar.len(), "build context assembled");

    Ok(BuildContext {
        dockerfile: dockerfile_text,
        tar,
    })
}

fn append_file(
    builder: &mut Builder<Vec<u8>>,
    name: &str,
    contents: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_cksum();
    builder
        .append_data(&mut header, name, contents)
        .map_err(|e| EngineError::BuildFailed {
            message: format!("tar append {name}: {e}"),
        })?;
    Ok(())
}

fn append_dir(builder: &mut Builder<Vec<u8>>, dir: &Path, prefix: &Path) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| EngineError::BuildFailed {
        message: format!("cannot read context directory {}: {e}", dir.display()),
    })?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let path = entry.path();
        let rel = prefix.join(&name);
        if path.is_dir() {
            append_dir(builder, &path, &rel)?;
        } else {
            let contents = std::fs::read(&path)?;
            let rel_name = rel.to_string_lossy().into_owned();
            append_file(builder, &rel_name, &contents, 0o644)?;
        }
    }
    Ok(())
}
