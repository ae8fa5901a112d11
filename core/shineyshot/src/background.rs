//! `shineyshot background ...` verbs.

use crate::logging;
use crate::tools::ToolSession;
use clap::{Args, Subcommand};
use shineyshot_session::select::{resolve_run_target, select_for_stop, select_running};
use shineyshot_session::{client, dir, registry, server, SessionEntry, SessionError, StopOutcome};
use shineyshot_session::{Launcher, Timings};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("failed to encode session list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Args, Debug, Clone)]
pub struct Target {
    /// Session name
    #[arg(long)]
    pub name: Option<String>,

    /// Directory holding session sockets
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DirOnly {
    /// Directory holding session sockets
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum BackgroundCommand {
    /// Start a detached session (named 1, 2, ... unless --name is given)
    Start(Target),

    /// Ask a session to shut down and remove its socket
    Stop(Target),

    /// Show every session socket and whether it answers
    List {
        #[command(flatten)]
        dir: DirOnly,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove sockets whose daemon is gone
    Clean(DirOnly),

    /// Interactive prompt against a running session
    Attach(Target),

    /// Run commands against a running session
    ///
    /// Separate several commands with ';'. With no command, one command is
    /// read per line from stdin.
    Run {
        #[command(flatten)]
        target: Target,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Daemon entry point used by `start`
    #[command(hide = true)]
    Serve {
        #[arg(long)]
        name: String,

        #[arg(long)]
        dir: PathBuf,
    },
}

impl BackgroundCommand {
    pub fn is_daemon(&self) -> bool {
        matches!(self, BackgroundCommand::Serve { .. })
    }
}

pub fn execute(command: BackgroundCommand) -> Result<(), CliError> {
    let timings = Timings::from_env();
    match command {
        BackgroundCommand::Start(target) => start(&target, timings),
        BackgroundCommand::Stop(target) => stop(&target, timings),
        BackgroundCommand::List { dir, json } => list(dir.dir.as_deref(), json, timings),
        BackgroundCommand::Clean(dir) => clean(dir.dir.as_deref(), timings),
        BackgroundCommand::Attach(target) => attach(&target, timings),
        BackgroundCommand::Run { target, command } => run(&target, &command, timings),
        BackgroundCommand::Serve { name, dir } => serve(&dir, &name, timings),
    }
}

fn start(target: &Target, timings: Timings) -> Result<(), CliError> {
    let dir = dir::resolve(target.dir.as_deref())?;
    let program = std::env::current_exe()?;
    let started = Launcher::new(program, timings).start(&dir, target.name.as_deref())?;
    println!(
        "started background session {} at {}",
        started.name,
        started.socket.display()
    );
    Ok(())
}

fn stop(target: &Target, timings: Timings) -> Result<(), CliError> {
    let dir = dir::resolve(target.dir.as_deref())?;
    let entries = registry::list(&dir, timings.probe_deadline)?;
    let name = select_for_stop(&entries, target.name.as_deref())?;
    let socket = dir::socket_path(&dir, &name)?;

    match client::stop(&socket)? {
        StopOutcome::Stopped => println!("stop requested for {}", name),
        StopOutcome::AlreadyStopped => println!("session {} was not running", name),
    }
    Ok(())
}

fn list(explicit: Option<&Path>, json: bool, timings: Timings) -> Result<(), CliError> {
    let dir = dir::resolve(explicit)?;
    let entries = registry::list(&dir, timings.probe_deadline)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &entries)?;
        writeln!(out)?;
    } else if entries.is_empty() {
        writeln!(out, "no sockets found")?;
    } else {
        for entry in &entries {
            writeln!(out, "{}", format_entry(entry))?;
        }
    }
    Ok(())
}

fn format_entry(entry: &SessionEntry) -> String {
    let mut line = format!("{}\t{}\t{}", entry.name, entry.status, entry.path.display());
    if let Some(since) = entry.since {
        line.push_str(&format!("\tsince {}", since.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    line
}

fn clean(explicit: Option<&Path>, timings: Timings) -> Result<(), CliError> {
    let dir = dir::resolve(explicit)?;
    let removed = registry::clean(&dir, timings.probe_deadline)?;
    if removed.is_empty() {
        println!("no dead sockets found");
    } else {
        println!(
            "removed {} dead socket(s): {}",
            removed.len(),
            removed.join(", ")
        );
    }
    Ok(())
}

fn attach(target: &Target, timings: Timings) -> Result<(), CliError> {
    let dir = dir::resolve(target.dir.as_deref())?;
    let entries = registry::list(&dir, timings.probe_deadline)?;
    let name = select_running(&entries, target.name.as_deref())?;
    let socket = dir::socket_path(&dir, &name)?;

    let stdin = io::stdin();
    client::attach(
        &socket,
        &mut stdin.lock(),
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )?;
    Ok(())
}

fn run(target: &Target, args: &[String], timings: Timings) -> Result<(), CliError> {
    let dir = dir::resolve(target.dir.as_deref())?;
    let entries = registry::list(&dir, timings.probe_deadline)?;
    let resolved = resolve_run_target(&entries, target.name.as_deref(), args)?;
    let socket = dir::socket_path(&dir, &resolved.name)?;

    let commands = if resolved.command.is_empty() {
        read_commands(io::stdin().lock())?
    } else {
        split_commands(&resolved.command)
    };

    client::run(
        &socket,
        &commands,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )?;
    Ok(())
}

fn serve(dir: &Path, name: &str, timings: Timings) -> Result<(), CliError> {
    dir::ensure(dir)?;
    let _log_guard = logging::init_daemon(&dir::log_path(dir, name)?);
    server::serve(dir, name, ToolSession::new(), timings)?;
    Ok(())
}

/// Joins the arguments back into one line and splits it on `;` and line
/// breaks.
fn split_commands(args: &[String]) -> Vec<String> {
    args.join(" ")
        .split([';', '\n', '\r'])
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_commands<R: BufRead>(input: R) -> io::Result<Vec<String>> {
    let mut commands = Vec::new();
    for line in input.lines() {
        let line = line?;
        let command = line.trim();
        if !command.is_empty() {
            commands.push(command.to_string());
        }
    }
    Ok(commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shineyshot_session::{DeadReason, SessionStatus};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn commands_split_on_semicolons() {
        assert_eq!(
            split_commands(&args(&["capture", "screen;", "rect", "1", "2", "3", "4"])),
            args(&["capture screen", "rect 1 2 3 4"])
        );
        assert_eq!(
            split_commands(&args(&["status;;", ";echo", "hi"])),
            args(&["status", "echo hi"])
        );
        assert_eq!(
            split_commands(&args(&["echo one\necho", "two"])),
            args(&["echo one", "echo two"])
        );
    }

    #[test]
    fn stdin_commands_skip_blank_lines() {
        let input = "capture screen\n\n  status  \n";
        assert_eq!(
            read_commands(input.as_bytes()).unwrap(),
            args(&["capture screen", "status"])
        );
    }

    #[test]
    fn list_line_shows_status_and_path() {
        let entry = SessionEntry {
            name: "demo".to_string(),
            path: PathBuf::from("/run/user/1000/shineyshot/demo.sock"),
            status: SessionStatus::Dead(DeadReason::Other("connection refused".to_string())),
            since: None,
        };
        assert_eq!(
            format_entry(&entry),
            "demo\tdead (connection refused)\t/run/user/1000/shineyshot/demo.sock"
        );
    }

    #[test]
    fn only_serve_is_a_daemon() {
        let serve = BackgroundCommand::Serve {
            name: "1".to_string(),
            dir: PathBuf::from("/tmp"),
        };
        assert!(serve.is_daemon());
        assert!(!BackgroundCommand::Clean(DirOnly { dir: None }).is_daemon());
    }
}
