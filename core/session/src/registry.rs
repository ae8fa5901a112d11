//! Enumerates session sockets in a directory and classifies them.

use crate::dir;
use crate::error::{Result, SessionError};
use crate::probe::{probe, SessionStatus};
use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::Serialize;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub name: String,
    pub path: PathBuf,
    pub status: SessionStatus,
    /// Last modification of the socket file, roughly when the daemon bound it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

impl SessionEntry {
    pub fn is_alive(&self) -> bool {
        self.status.is_alive()
    }
}

/// Names of every `<name>.sock` socket in `dir`, sorted. Regular files
/// with that extension are skipped. A missing directory has no sessions.
pub fn socket_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(SessionError::io("failed to read session directory", err)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SessionError::io("failed to read session directory", err))?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str().and_then(dir::session_name_from_file) else {
            continue;
        };
        match entry.file_type() {
            Ok(file_type) if file_type.is_socket() => names.push(name.to_string()),
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, path = %entry.path().display(), "Failed to stat session file")
            }
        }
    }
    names.sort();
    Ok(names)
}

/// Probes every session socket in `dir`.
pub fn list(dir: &Path, deadline: Duration) -> Result<Vec<SessionEntry>> {
    let names = socket_names(dir)?;
    let mut entries = Vec::with_capacity(names.len());
    for name in names {
        let path = dir::socket_path(dir, &name)?;
        let since = std::fs::symlink_metadata(&path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from);
        let status = probe(&path, deadline);
        entries.push(SessionEntry {
            name,
            path,
            status,
            since,
        });
    }
    Ok(entries)
}

/// Removes the socket (and daemon log) of every dead session. Returns the
/// removed session names.
pub fn clean(dir: &Path, deadline: Duration) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    for entry in list(dir, deadline)? {
        if entry.is_alive() {
            continue;
        }
        match fs::remove_file(&entry.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(error = %err, path = %entry.path.display(), "Failed to remove dead socket");
                continue;
            }
        }
        if let Ok(log) = dir::log_path(dir, &entry.name) {
            let _ = fs::remove_file(log);
        }
        info!(session = %entry.name, status = %entry.status, "Removed dead session socket");
        removed.push(entry.name);
    }
    Ok(removed)
}
