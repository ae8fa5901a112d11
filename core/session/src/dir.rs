//! Session directory resolution and socket naming.

use crate::error::{Result, SessionError};
use std::env;
use std::fs::DirBuilder;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

pub const SOCKET_DIR_ENV: &str = "SHINEYSHOT_SOCKET_DIR";
pub const RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";
pub const SOCKET_EXTENSION: &str = "sock";
pub const LOG_EXTENSION: &str = "log";

const RUNTIME_SUBDIR: &str = "shineyshot";
const HOME_SUBDIR: &str = ".shineyshot";
const HOME_SOCKETS: &str = "sockets";
const DIR_MODE: u32 = 0o700;

/// Resolves the directory holding session sockets.
///
/// Order: explicit value, `SHINEYSHOT_SOCKET_DIR`, `$XDG_RUNTIME_DIR/shineyshot`,
/// then `~/.shineyshot/sockets`.
pub fn resolve(explicit: Option<&Path>) -> Result<PathBuf> {
    resolve_from(
        explicit,
        non_empty_env(SOCKET_DIR_ENV),
        non_empty_env(RUNTIME_DIR_ENV),
        dirs::home_dir(),
    )
}

fn resolve_from(
    explicit: Option<&Path>,
    override_dir: Option<PathBuf>,
    runtime_dir: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = override_dir {
        return Ok(path);
    }
    if let Some(runtime) = runtime_dir {
        return Ok(runtime.join(RUNTIME_SUBDIR));
    }
    let home = home.ok_or(SessionError::HomeNotFound)?;
    Ok(home.join(HOME_SUBDIR).join(HOME_SOCKETS))
}

fn non_empty_env(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Creates the session directory if needed.
///
/// Directories created here are owner-only. An existing directory keeps
/// whatever mode it already has.
pub fn ensure(dir: &Path) -> Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(dir)
        .map_err(|err| {
            SessionError::io(
                format!("failed to create session directory {}", dir.display()),
                err,
            )
        })
}

/// Maps a session name to a safe file stem.
pub fn sanitize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidName(name.to_string()));
    }
    let sanitized: String = trimmed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.chars().all(|ch| ch == '.') {
        return Err(SessionError::InvalidName(name.to_string()));
    }
    Ok(sanitized)
}

pub fn socket_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let stem = sanitize_name(name)?;
    Ok(dir.join(format!("{}.{}", stem, SOCKET_EXTENSION)))
}

/// Daemon log file that sits next to a session's socket.
pub fn log_path(dir: &Path, name: &str) -> Result<PathBuf> {
    let stem = sanitize_name(name)?;
    Ok(dir.join(format!("{}.{}", stem, LOG_EXTENSION)))
}

/// Returns the session name for a `<name>.sock` file name.
pub fn session_name_from_file(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(SOCKET_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .filter(|stem| !stem.is_empty())
}
