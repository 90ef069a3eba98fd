//! Well-known user-scoped filesystem locations
//!
//! Everything clawker persists lives under `<home>/.local/clawker/`.

use crate::errors::Result;
use directories_next::BaseDirs;
use std::io;
use std::path::PathBuf;

/// Application directory name under `<home>/.local/`
const APP_DIR: &str = "clawker";

/// `<home>/.local/clawker`
pub fn data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "cannot determine home directory")
    })?;
    Ok(base.home_dir().join(".local").join(APP_DIR))
}

/// The user project registry file
pub fn registry_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("projects.yaml"))
}

/// Directory holding per-agent session and circuit history
pub fn history_dir() -> Result<PathBuf> {
    Ok(data_dir()?.join("loop").join("history"))
}

/// State file recording the running host proxy (port + pid)
pub fn proxy_state_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("proxy.json"))
}
