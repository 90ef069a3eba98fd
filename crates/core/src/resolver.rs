//! Working-directory to project resolution
//!
//! Maps the current working directory onto a registered project by longest
//! prefix match against the user registry. The resolution supplies the
//! project key that the config loader injects into [`crate::config::Config`].

use crate::config::{self, Config};
use crate::errors::{ConfigError, Result};
use crate::registry::{ProjectEntry, ProjectRegistry};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// The outcome of resolving a working directory
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Project slug; empty for an anonymous project
    pub project: String,
    /// The matched registry entry, if any
    pub entry: Option<ProjectEntry>,
    /// Canonicalised working directory
    pub workdir: PathBuf,
}

impl Resolution {
    /// The project root to load configuration from, when registered
    pub fn root(&self) -> Option<&Path> {
        self.entry.as_ref().map(|e| e.root.as_path())
    }
}

/// Resolve `workdir` against the registry.
///
/// Symlinks are resolved before matching. When no entry covers the
/// directory and `allow_anonymous` is set, an empty project key is
/// returned; otherwise resolution fails.
#[instrument(skip(registry))]
pub fn resolve(
    workdir: &Path,
    registry: &ProjectRegistry,
    allow_anonymous: bool,
) -> Result<Resolution> {
    let canonical = workdir
        .canonicalize()
        .unwrap_or_else(|_| workdir.to_path_buf());

    match registry.longest_prefix(&canonical) {
        Some(entry) => {
            debug!(project = %entry.slug, root = %entry.root.display(), "resolved project");
            Ok(Resolution {
                project: entry.slug.clone(),
                entry: Some(entry.clone()),
                workdir: canonical,
            })
        }
        None if allow_anonymous => {
            debug!("no registered project, resolving anonymously");
            Ok(Resolution {
                project: String::new(),
                entry: None,
                workdir: canonical,
            })
        }
        None => Err(ConfigError::Invalid {
            field: "project".to_string(),
            message: format!(
                "{} is not inside a registered project; run `clawker project register`",
                canonical.display()
            ),
        }
        .into()),
    }
}

/// Load the validated configuration for a resolution.
///
/// Postcondition: `config.project == resolution.project`.
pub fn load_config(resolution: &Resolution) -> Result<Config> {
    config::load_config(&resolution.project, resolution.root())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_with_root(slug: &str, root: &Path) -> ProjectRegistry {
        let mut registry = ProjectRegistry::default();
        registry.register(slug, root, true).unwrap();
        registry
    }

    #[test]
    fn test_resolves_nested_workdir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("c").join("d");
        std::fs::create_dir_all(&nested).unwrap();

        let registry = registry_with_root("proj", dir.path());
        let resolution = resolve(&nested, &registry, false).unwrap();
        assert_eq!(resolution.project, "proj");
        assert!(resolution.entry.is_some());
    }

    #[test]
    fn test_parent_of_root_does_not_resolve() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("a").join("b");
        std::fs::create_dir_all(&root).unwrap();

        let registry = registry_with_root("proj", &root);
        let parent = dir.path().join("a");
        assert!(resolve(&parent, &registry, false).is_err());
    }

    #[test]
    fn test_anonymous_fallback() {
        let dir = TempDir::new().unwrap();
        let registry = ProjectRegistry::default();
        let resolution = resolve(dir.path(), &registry, true).unwrap();
        assert_eq!(resolution.project, "");
        assert!(resolution.entry.is_none());
    }

    #[test]
    fn test_symlinked_workdir_resolves_through_target() {
        let dir = TempDir::new().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(&real).unwrap();

        let registry = registry_with_root("proj", &real);

        #[cfg(unix)]
        {
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&real, &link).unwrap();
            let resolution = resolve(&link, &registry, false).unwrap();
            assert_eq!(resolution.project, "proj");
        }
    }

    #[test]
    fn test_config_project_matches_resolution() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_root("proj", dir.path());
        let resolution = resolve(dir.path(), &registry, false).unwrap();
        let config = load_config(&resolution).unwrap();
        assert_eq!(config.project, resolution.project);
    }
}
