//! Picks a target session when the caller does not name one.

use crate::dir;
use crate::error::{Result, SessionError};
use crate::registry::SessionEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    pub name: String,
    pub command: Vec<String>,
}

/// A preferred name must be alive; otherwise exactly one alive session is
/// picked automatically.
pub fn select_running(entries: &[SessionEntry], preferred: Option<&str>) -> Result<String> {
    if let Some(preferred) = preferred {
        let wanted = dir::sanitize_name(preferred)?;
        return entries
            .iter()
            .find(|entry| entry.name == wanted && entry.is_alive())
            .map(|entry| entry.name.clone())
            .ok_or_else(|| SessionError::NotRunning(preferred.to_string()));
    }

    let alive = alive_names(entries);
    match alive.as_slice() {
        [] => Err(SessionError::NoneRunning),
        [only] => Ok(only.clone()),
        _ => Err(SessionError::Ambiguous(alive)),
    }
}

/// Like [`select_running`], but a lone known session is picked even when
/// dead so its socket can still be cleaned up.
pub fn select_for_stop(entries: &[SessionEntry], preferred: Option<&str>) -> Result<String> {
    if let Some(preferred) = preferred {
        return dir::sanitize_name(preferred);
    }
    if let [only] = entries {
        return Ok(only.name.clone());
    }

    let alive = alive_names(entries);
    match alive.as_slice() {
        [only] => Ok(only.clone()),
        [] if entries.is_empty() => Err(SessionError::NoneRunning),
        [] => Err(SessionError::Ambiguous(
            entries.iter().map(|entry| entry.name.clone()).collect(),
        )),
        _ => Err(SessionError::Ambiguous(alive)),
    }
}

/// Without `--name`, a leading argument that names an alive session is
/// taken as the target and the rest is the command.
pub fn resolve_run_target(
    entries: &[SessionEntry],
    preferred: Option<&str>,
    args: &[String],
) -> Result<RunTarget> {
    if preferred.is_none() {
        if let Some((first, rest)) = args.split_first() {
            let named = entries
                .iter()
                .any(|entry| entry.is_alive() && entry.name == *first);
            if named {
                return Ok(RunTarget {
                    name: first.clone(),
                    command: rest.to_vec(),
                });
            }
        }
    }

    Ok(RunTarget {
        name: select_running(entries, preferred)?,
        command: args.to_vec(),
    })
}

fn alive_names(entries: &[SessionEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|entry| entry.is_alive())
        .map(|entry| entry.name.clone())
        .collect()
}
