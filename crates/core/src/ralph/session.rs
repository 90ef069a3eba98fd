//! Session and circuit persistence
//!
//! Two pretty-printed JSON files per `(project, agent)` under
//! `<home>/.local/clawker/loop/history/`:
//! `<project>.<agent>.session.json` and `<project>.<agent>.circuit.json`.
//! Writes are marshal-to-buffer, write-temp, rename-over-original. Reads
//! tolerate absent files and return the zero value. A loop run holds an
//! exclusive lock on the pair; cross-process contention is not supported.

use super::circuit::CircuitBreaker;
use crate::errors::{LoopError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use tracing::{debug, instrument};

/// Bound on recorded session entries
pub const MAX_SESSION_ENTRIES: usize = 50;

/// Lifecycle events recorded in session history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEvent {
    Created,
    Updated,
    Expired,
    Deleted,
}

/// One recorded loop iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub timestamp: DateTime<Utc>,
    pub event: SessionEvent,
    pub loop_count: u32,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The persistent session document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub project: String,
    pub agent: String,
    /// Running total across all loops
    #[serde(default)]
    pub tasks_completed: u64,
    /// Running total across all loops
    #[serde(default)]
    pub files_modified: u64,
    #[serde(default)]
    pub entries: Vec<SessionEntry>,
}

impl Session {
    pub fn new(project: &str, agent: &str) -> Self {
        Self {
            project: project.to_string(),
            agent: agent.to_string(),
            ..Self::default()
        }
    }

    /// Append an entry, keeping only the latest bound
    pub fn push_entry(&mut self, entry: SessionEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_SESSION_ENTRIES {
            let excess = self.entries.len() - MAX_SESSION_ENTRIES;
            self.entries.drain(..excess);
        }
    }
}

/// Load/Save/Delete for the session and circuit pair
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Store rooted at the user's history directory
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: paths::history_dir()?,
        })
    }

    /// Store rooted at an explicit directory (tests)
    pub fn with_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[instrument(skip(self))]
    pub fn load_session(&self, project: &str, agent: &str) -> Result<Session> {
        let path = self.file_path(project, agent, "session");
        match self.read_json::<Session>(&path)? {
            Some(session) => Ok(session),
            None => Ok(Session::new(project, agent)),
        }
    }

    pub fn save_session(&self, session: &Session) -> Result<()> {
        let path = self.file_path(&session.project, &session.agent, "session");
        self.write_json(&path, session)
    }

    pub fn delete_session(&self, project: &str, agent: &str) -> Result<()> {
        self.delete(&self.file_path(project, agent, "session"))
    }

    #[instrument(skip(self))]
    pub fn load_circuit(&self, project: &str, agent: &str) -> Result<CircuitBreaker> {
        let path = self.file_path(project, agent, "circuit");
        match self.read_json::<CircuitBreaker>(&path)? {
            Some(circuit) => Ok(circuit),
            None => Ok(CircuitBreaker::new(project, agent)),
        }
    }

    pub fn save_circuit(&self, circuit: &CircuitBreaker) -> Result<()> {
        let path = self.file_path(&circuit.project, &circuit.agent, "circuit");
        self.write_json(&path, circuit)
    }

    pub fn delete_circuit(&self, project: &str, agent: &str) -> Result<()> {
        self.delete(&self.file_path(project, agent, "circuit"))
    }

    /// Take the exclusive lock a loop run holds on the history pair
    pub fn lock_pair(&self, project: &str, agent: &str) -> Result<HistoryLock> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.lock", stem(project, agent)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(HistoryLock { file })
    }

    fn file_path(&self, project: &str, agent: &str, kind: &str) -> PathBuf {
        self.dir.join(format!("{}.{kind}.json", stem(project, agent)))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &PathBuf) -> Result<Option<T>> {
        if !path.exists() {
            debug!(path = %path.display(), "history file absent, zero value");
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let value = serde_json::from_str(&contents).map_err(|e| LoopError::Parse {
            message: format!("{}: {e}", path.display()),
        })?;
        Ok(Some(value))
    }

    fn write_json<T: Serialize>(&self, path: &PathBuf, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let contents = serde_json::to_string_pretty(value).map_err(|e| LoopError::Parse {
            message: e.to_string(),
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn delete(&self, path: &PathBuf) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Dotted file stem with empty-project collapse
fn stem(project: &str, agent: &str) -> String {
    if project.is_empty() {
        agent.to_string()
    } else {
        format!("{project}.{agent}")
    }
}

/// Held for the duration of a loop run
pub struct HistoryLock {
    file: File,
}

impl Drop for HistoryLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(loop_count: u32) -> SessionEntry {
        SessionEntry {
            timestamp: Utc::now(),
            event: SessionEvent::Updated,
            loop_count,
            status: "IN_PROGRESS".to_string(),
            error: None,
        }
    }

    #[test]
    fn test_absent_files_load_zero_values() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());
        let session = store.load_session("myapp", "ralph").unwrap();
        assert_eq!(session.project, "myapp");
        assert!(session.entries.is_empty());
        let circuit = store.load_circuit("myapp", "ralph").unwrap();
        assert!(!circuit.is_tripped());
    }

    #[test]
    fn test_session_round_trip_pretty_json() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());

        let mut session = Session::new("myapp", "ralph");
        session.push_entry(entry(1));
        session.tasks_completed = 3;
        store.save_session(&session).unwrap();

        let on_disk = dir.path().join("myapp.ralph.session.json");
        let raw = std::fs::read_to_string(&on_disk).unwrap();
        // pretty-printed, parseable
        assert!(raw.contains('\n'));
        let loaded = store.load_session("myapp", "ralph").unwrap();
        assert_eq!(loaded.tasks_completed, 3);
        assert_eq!(loaded.entries.len(), 1);
    }

    #[test]
    fn test_sixty_appends_retain_last_fifty() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());

        let mut session = Session::new("myapp", "ralph");
        for i in 1..=60 {
            session.push_entry(entry(i));
            store.save_session(&session).unwrap();
        }

        let loaded = store.load_session("myapp", "ralph").unwrap();
        assert_eq!(loaded.entries.len(), MAX_SESSION_ENTRIES);
        assert_eq!(loaded.entries.first().unwrap().loop_count, 11);
        assert_eq!(loaded.entries.last().unwrap().loop_count, 60);
        // ordering preserved
        let counts: Vec<u32> = loaded.entries.iter().map(|e| e.loop_count).collect();
        let mut sorted = counts.clone();
        sorted.sort_unstable();
        assert_eq!(counts, sorted);
    }

    #[test]
    fn test_empty_project_collapses_file_stem() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());
        store
            .save_session(&Session::new("", "ralph"))
            .unwrap();
        assert!(dir.path().join("ralph.session.json").exists());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());
        store.delete_session("myapp", "ralph").unwrap();
        store.save_session(&Session::new("myapp", "ralph")).unwrap();
        store.delete_session("myapp", "ralph").unwrap();
        assert!(!dir.path().join("myapp.ralph.session.json").exists());
    }

    #[test]
    fn test_circuit_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());

        let mut circuit = CircuitBreaker::new("myapp", "ralph");
        circuit.observe(&Default::default(), 1);
        assert!(circuit.is_tripped());
        store.save_circuit(&circuit).unwrap();

        let loaded = store.load_circuit("myapp", "ralph").unwrap();
        assert!(loaded.is_tripped());
        assert_eq!(loaded.entries.len(), 1);
    }

    #[test]
    fn test_lock_pair_is_exclusive_within_process_scope() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::with_dir(dir.path().to_path_buf());
        let lock = store.lock_pair("myapp", "ralph").unwrap();
        drop(lock);
        // Relockable after release.
        let _again = store.lock_pair("myapp", "ralph").unwrap();
    }
}
