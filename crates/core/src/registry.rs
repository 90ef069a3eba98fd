//! User-scoped project registry
//!
//! The registry maps project slugs to filesystem roots and is persisted as
//! YAML at `<home>/.local/clawker/projects.yaml`. Writes go through a
//! write-temp-then-rename sequence under an exclusive file lock; readers
//! take a shared lock on the same sidecar so a rename never races a read.

use crate::errors::{ConfigError, Result};
use fs2::FileExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// A registered project: slug plus filesystem root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub slug: String,
    pub root: PathBuf,
}

/// The registry document: slug → entry, insertion order preserved
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRegistry {
    #[serde(default)]
    pub projects: IndexMap<String, ProjectEntry>,
}

impl ProjectRegistry {
    /// Load the registry from `path`; an absent file is an empty registry.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("registry file absent, starting empty");
            return Ok(Self::default());
        }
        let _guard = LockGuard::shared(path)?;
        let contents = std::fs::read_to_string(path)?;
        let registry: ProjectRegistry =
            serde_yaml_ng::from_str(&contents).map_err(|e| ConfigError::Parse {
                message: format!("{}: {e}", path.display()),
            })?;
        Ok(registry)
    }

    /// Persist the registry atomically: marshal, write temp, rename over.
    #[instrument(skip(self))]
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_yaml_ng::to_string(self).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        let guard = LockGuard::exclusive(path)?;
        let tmp = path.with_extension("yaml.tmp");
        match write_new(&tmp, &contents) {
            Ok(()) => {}
            // A stale temp file from an interrupted writer; replace it.
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                std::fs::remove_file(&tmp)?;
                write_new(&tmp, &contents)?;
            }
            Err(e) => return Err(e.into()),
        }
        std::fs::rename(&tmp, path)?;
        drop(guard);
        debug!(path = %path.display(), "registry saved");
        Ok(())
    }

    /// Register a project root under `slug`.
    ///
    /// Refuses a path that is already covered by an existing entry (equal or
    /// nested) unless `force` is set.
    pub fn register(&mut self, slug: &str, root: &Path, force: bool) -> Result<()> {
        validate_slug(slug)?;
        let root = root
            .canonicalize()
            .unwrap_or_else(|_| root.to_path_buf());
        if !force {
            if let Some(existing) = self.covering_entry(&root) {
                return Err(ConfigError::Invalid {
                    field: "project.root".to_string(),
                    message: format!(
                        "{} is already covered by project '{}' ({}); pass --force to register anyway",
                        root.display(),
                        existing.slug,
                        existing.root.display()
                    ),
                }
                .into());
            }
        }
        info!(slug, root = %root.display(), "registering project");
        self.projects.insert(
            slug.to_string(),
            ProjectEntry {
                slug: slug.to_string(),
                root,
            },
        );
        Ok(())
    }

    /// Find the entry whose root is the longest path-prefix of `dir`
    pub fn longest_prefix(&self, dir: &Path) -> Option<&ProjectEntry> {
        self.projects
            .values()
            .filter(|entry| dir.starts_with(&entry.root))
            .max_by_key(|entry| entry.root.components().count())
    }

    /// The entry whose root equals or contains `dir`, if any
    fn covering_entry(&self, dir: &Path) -> Option<&ProjectEntry> {
        self.projects
            .values()
            .find(|entry| dir.starts_with(&entry.root))
    }
}

fn write_new(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents.as_bytes())
}

fn validate_slug(slug: &str) -> Result<()> {
    let ok = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: "project.slug".to_string(),
            message: format!(
                "'{slug}' must be non-empty lowercase alphanumeric with '-' or '_'"
            ),
        }
        .into())
    }
}

/// File lock held for the lifetime of a registry read or write.
///
/// The lock lives on a `.lock` sidecar, never on the registry file itself,
/// so the rename-over-original does not invalidate the held descriptor.
struct LockGuard {
    file: File,
}

impl LockGuard {
    fn shared(path: &Path) -> Result<Self> {
        let file = Self::open_sidecar(path)?;
        file.lock_shared()?;
        Ok(Self { file })
    }

    fn exclusive(path: &Path) -> Result<Self> {
        let file = Self::open_sidecar(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }

    fn open_sidecar(path: &Path) -> Result<File> {
        let lock_path = path.with_extension("yaml.lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)?)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_with(entries: &[(&str, &str)]) -> ProjectRegistry {
        let mut registry = ProjectRegistry::default();
        for (slug, root) in entries {
            registry.projects.insert(
                slug.to_string(),
                ProjectEntry {
                    slug: slug.to_string(),
                    root: PathBuf::from(root),
                },
            );
        }
        registry
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("projects.yaml");

        let mut registry = ProjectRegistry::default();
        registry
            .register("myapp", dir.path(), false)
            .unwrap();
        registry.save(&path).unwrap();

        let loaded = ProjectRegistry::load(&path).unwrap();
        assert_eq!(loaded.projects.len(), 1);
        assert_eq!(loaded.projects["myapp"].slug, "myapp");
    }

    #[test]
    fn test_load_absent_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = ProjectRegistry::load(&dir.path().join("projects.yaml")).unwrap();
        assert!(registry.projects.is_empty());
    }

    #[test]
    fn test_register_rejects_nested_path() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("sub");
        std::fs::create_dir_all(&nested).unwrap();

        let mut registry = ProjectRegistry::default();
        registry.register("outer", dir.path(), false).unwrap();
        let err = registry.register("inner", &nested, false).unwrap_err();
        assert!(err.to_string().contains("already covered"));

        // force overrides
        registry.register("inner", &nested, true).unwrap();
        assert_eq!(registry.projects.len(), 2);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let registry = registry_with(&[("a", "/a"), ("ab", "/a/b")]);
        let hit = registry.longest_prefix(Path::new("/a/b/c/d")).unwrap();
        assert_eq!(hit.slug, "ab");
        let hit = registry.longest_prefix(Path::new("/a/x")).unwrap();
        assert_eq!(hit.slug, "a");
        assert!(registry.longest_prefix(Path::new("/z")).is_none());
    }

    #[test]
    fn test_prefix_match_is_component_wise() {
        // /a/bc must not match the /a/b root
        let registry = registry_with(&[("ab", "/a/b")]);
        assert!(registry.longest_prefix(Path::new("/a/bc")).is_none());
    }

    #[test]
    fn test_invalid_slug_rejected() {
        let mut registry = ProjectRegistry::default();
        for bad in ["", "My App", "UPPER", "dot.dot"] {
            assert!(registry.register(bad, Path::new("/tmp"), true).is_err());
        }
    }

    #[test]
    fn test_save_overwrites_stale_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("projects.yaml");
        std::fs::write(path.with_extension("yaml.tmp"), "stale").unwrap();

        let registry = registry_with(&[("a", "/a")]);
        registry.save(&path).unwrap();
        let loaded = ProjectRegistry::load(&path).unwrap();
        assert_eq!(loaded.projects.len(), 1);
    }
}
