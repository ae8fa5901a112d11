//! Starts a detached session daemon and waits until it answers probes.
//!
//! The name check before spawning is best-effort: two concurrent `start`
//! calls for the same name can both pass it. The loser fails to bind (or
//! finds the winner alive) and is reported as not ready.

use crate::config::Timings;
use crate::dir;
use crate::error::{Result, SessionError};
use crate::probe::{probe, DeadReason, SessionStatus};
use crate::registry;
use fs_err as fs;
use std::env;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub name: String,
    pub socket: PathBuf,
}

pub struct Launcher {
    program: PathBuf,
    timings: Timings,
}

impl Launcher {
    /// `program` is re-invoked as `<program> background serve --name N --dir D`.
    pub fn new(program: impl Into<PathBuf>, timings: Timings) -> Self {
        Self {
            program: program.into(),
            timings,
        }
    }

    pub fn start(&self, dir: &Path, name: Option<&str>) -> Result<Started> {
        let dir = absolute(dir)?;
        dir::ensure(&dir)?;

        let name = match name {
            Some(name) => dir::sanitize_name(name)?,
            None => next_session_name(&registry::socket_names(&dir)?),
        };
        let socket = dir::socket_path(&dir, &name)?;

        match probe(&socket, self.timings.probe_deadline) {
            SessionStatus::Alive => return Err(SessionError::AlreadyRunning(name)),
            SessionStatus::Dead(DeadReason::MissingFile) => {}
            SessionStatus::Dead(reason) => {
                info!(session = %name, reason = %reason, "Removing stale session socket");
                remove_if_present(&socket)?;
            }
        }

        let mut child = self.spawn(&dir, &name)?;
        match self.wait_ready(&socket, &mut child) {
            Ok(()) => {
                info!(session = %name, pid = child.id(), "Session daemon ready");
                // The daemon outlives this process; the handle is only ours.
                drop(child);
                Ok(Started { name, socket })
            }
            Err(reason) => {
                abandon(&mut child, &socket, self.timings);
                Err(SessionError::NotReady { name, reason })
            }
        }
    }

    fn spawn(&self, dir: &Path, name: &str) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .arg("background")
            .arg("serve")
            .arg("--name")
            .arg(name)
            .arg("--dir")
            .arg(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        command.spawn().map_err(SessionError::Spawn)
    }

    /// Polls until the daemon answers. Returns the last failure on timeout.
    fn wait_ready(&self, socket: &Path, child: &mut Child) -> std::result::Result<(), String> {
        let deadline = Instant::now() + self.timings.ready_timeout;
        loop {
            let last = match probe(socket, self.timings.probe_deadline) {
                SessionStatus::Alive => return Ok(()),
                SessionStatus::Dead(reason) => reason.to_string(),
            };
            if let Ok(Some(status)) = child.try_wait() {
                return Err(format!("daemon exited early ({}); last probe: {}", status, last));
            }
            if Instant::now() >= deadline {
                return Err(last);
            }
            thread::sleep(self.timings.ready_poll);
        }
    }
}

/// Kills a daemon that never became ready and clears anything it bound.
fn abandon(child: &mut Child, socket: &Path, timings: Timings) {
    if let Err(err) = child.kill() {
        if err.kind() != io::ErrorKind::InvalidInput {
            warn!(error = %err, pid = child.id(), "Failed to kill unready daemon");
        }
    }
    let _ = child.wait();
    if !probe(socket, timings.probe_deadline).is_alive() {
        let _ = remove_if_present(socket);
    }
}

fn remove_if_present(socket: &Path) -> Result<()> {
    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SessionError::io("failed to remove stale socket", err)),
    }
}

fn absolute(dir: &Path) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir.to_path_buf());
    }
    let cwd = env::current_dir()
        .map_err(|err| SessionError::io("failed to resolve current directory", err))?;
    Ok(cwd.join(dir))
}

/// One more than the largest numeric session name, or `"1"`.
pub fn next_session_name(existing: &[String]) -> String {
    existing
        .iter()
        .filter_map(|name| name.parse::<u64>().ok())
        .max()
        .map(|max| max.saturating_add(1))
        .unwrap_or(1)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn first_generated_name_is_one() {
        assert_eq!(next_session_name(&[]), "1");
        assert_eq!(next_session_name(&names(&["demo", "work"])), "1");
    }

    #[test]
    fn generated_name_follows_highest_number() {
        assert_eq!(next_session_name(&names(&["1", "3", "demo"])), "4");
        assert_eq!(next_session_name(&names(&["2"])), "3");
    }

    #[test]
    fn failed_daemon_is_reported_not_ready() {
        let temp = TempDir::new().unwrap();
        let timings = Timings {
            ready_timeout: Duration::from_millis(300),
            ..Timings::default()
        };
        let launcher = Launcher::new("/bin/false", timings);

        let started = Instant::now();
        let result = launcher.start(temp.path(), Some("broken"));
        assert!(matches!(result, Err(SessionError::NotReady { ref name, .. }) if name == "broken"));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!temp.path().join("broken.sock").exists());
    }

    #[test]
    fn hung_daemon_is_killed_on_timeout() {
        let temp = TempDir::new().unwrap();
        let timings = Timings {
            ready_timeout: Duration::from_millis(200),
            ..Timings::default()
        };
        let script = temp.path().join("hang.sh");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let launcher = Launcher::new(&script, timings);
        let started = Instant::now();
        match launcher.start(&temp.path().join("sockets"), None) {
            Err(SessionError::NotReady { name, reason }) => {
                assert_eq!(name, "1");
                assert_eq!(reason, "socket file missing");
            }
            other => panic!("expected NotReady, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
