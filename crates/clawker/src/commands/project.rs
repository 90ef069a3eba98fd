//! Project registry management

use anyhow::{Context, Result};
use clap::Subcommand;
use clawker_core::paths;
use clawker_core::registry::ProjectRegistry;
use std::path::PathBuf;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum ProjectCommand {
    /// Register a project root under a slug
    Register {
        /// Project root; defaults to the working directory
        path: Option<PathBuf>,

        /// Slug; defaults to the directory name
        #[arg(long)]
        slug: Option<String>,

        /// Register even when the path is covered by an existing project
        #[arg(long)]
        force: bool,
    },
    /// List registered projects
    List,
}

pub async fn execute(command: ProjectCommand) -> Result<()> {
    let registry_path = paths::registry_path()?;
    match command {
        ProjectCommand::Register { path, slug, force } => {
            let root = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            let root = root
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", root.display()))?;
            let slug = match slug {
                Some(slug) => slug,
                None => default_slug(&root)?,
            };

            let mut registry = ProjectRegistry::load(&registry_path)?;
            registry.register(&slug, &root, force)?;
            registry.save(&registry_path)?;
            info!(slug, root = %root.display(), "project registered");
            println!("{slug}");
            Ok(())
        }
        ProjectCommand::List => {
            let registry = ProjectRegistry::load(&registry_path)?;
            for entry in registry.projects.values() {
                println!("{}\t{}", entry.slug, entry.root.display());
            }
            Ok(())
        }
    }
}

/// Derive a slug from the directory name
fn default_slug(root: &std::path::Path) -> Result<String> {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .context("project root has no usable name; pass --slug")?;
    let slug: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    Ok(slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_slug_sanitises() {
        assert_eq!(default_slug(Path::new("/tmp/My App")).unwrap(), "my-app");
        assert_eq!(default_slug(Path::new("/tmp/api_v2")).unwrap(), "api_v2");
    }
}
