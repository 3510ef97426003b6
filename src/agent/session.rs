//! Persisted agent session record.
//!
//! One JSON file per user holds the endpoint of the agent this tool started
//! last, when it expires and which key fingerprints were loaded into it.
//! Writers replace the file atomically; readers treat anything unparseable
//! as "no session".

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::{AgentHandle, Endpoint};
use crate::error::{Error, Result};

/// A running agent this tool started, as recorded on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    /// Agent process id, when the agent announced one.
    pub agent_pid: Option<u32>,
    /// Where the agent listens.
    pub endpoint: Endpoint,
    /// When the agent was started.
    pub created_at: DateTime<Utc>,
    /// After this instant the session is replaced instead of reused.
    pub expires_at: DateTime<Utc>,
    /// Fingerprints of keys known to be loaded.
    #[serde(default)]
    pub fingerprints: BTreeSet<String>,
}

impl AgentSession {
    /// Records a freshly started agent that expires `ttl` after `now`.
    pub fn new(handle: &AgentHandle, now: DateTime<Utc>, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            agent_pid: handle.pid,
            endpoint: handle.endpoint.clone(),
            created_at: now,
            expires_at,
            fingerprints: BTreeSet::new(),
        }
    }

    /// Whether the session is past its expiry at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Handle for talking to the recorded agent.
    pub fn handle(&self) -> AgentHandle {
        AgentHandle {
            pid: self.agent_pid,
            endpoint: self.endpoint.clone(),
        }
    }
}

/// File-backed store for the single [`AgentSession`].
#[derive(Debug, Clone)]
pub struct AgentSessionStore {
    path: PathBuf,
}

impl AgentSessionStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the session record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the session record.
    ///
    /// Missing, unreadable, unparseable or self-contradictory records all
    /// come back as `None`.
    pub fn load(&self) -> Option<AgentSession> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("[session] Ignoring unreadable {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<AgentSession>(&content) {
            Ok(session) if session.expires_at >= session.created_at => Some(session),
            Ok(_) => {
                log::warn!("[session] Ignoring record that expires before it was created");
                None
            }
            Err(e) => {
                log::warn!("[session] Ignoring corrupted {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Writes `session` through a temporary sibling renamed over the target.
    pub fn save(&self, session: &AgentSession) -> Result<()> {
        let json = serde_json::to_vec_pretty(session)?;
        write_private(&self.path, &json)?;
        log::debug!("[session] Saved session to {}", self.path.display());
        Ok(())
    }

    /// Removes the record. A missing record is not an error.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                log::info!("[session] Removed {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("Failed to remove {}", self.path.display()), e)),
        }
    }
}

/// Replaces `path` with `contents` via a temporary sibling and a rename.
///
/// The file is owner read/write only on Unix; the parent directory is
/// created owner-only when missing.
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    create_private_dir(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".psa")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::io(format!("Failed to create temp file in {}", dir.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io("Failed to set file permissions", e))?;
    }

    tmp.write_all(contents)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| Error::io(format!("Failed to write {}", path.display()), e))?;

    tmp.persist(path)
        .map_err(|e| Error::io(format!("Failed to replace {}", path.display()), e.error))?;
    Ok(())
}

/// Creates `dir` (and parents) with owner-only permissions on Unix.
pub(crate) fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .map_err(|e| Error::io(format!("Failed to create {}", dir.display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| Error::io(format!("Failed to restrict {}", dir.display()), e))?;
    }
    Ok(())
}
