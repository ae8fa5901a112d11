//! Background sessions for shineyshot.
//!
//! A session is a daemon process that keeps one command executor (open
//! image plus tool state) alive behind a Unix socket at
//! `<session-dir>/<name>.sock`. Separate CLI invocations start it, send it
//! commands and stop it.
//!
//! ## Modules
//!
//! - [`dir`]: where session sockets live and how names map to files
//! - [`dial`]: socket connect with a timeout
//! - [`probe`]: READY/PING/PONG liveness check
//! - [`registry`]: list and clean the sockets in a directory
//! - [`launcher`]: spawn a detached daemon and wait for it
//! - [`server`]: the daemon's accept loop and connection handling
//! - [`client`]: `run`, `attach` and `stop`
//! - [`select`]: pick a session when none is named

pub mod client;
pub mod config;
pub mod dial;
pub mod dir;
pub mod error;
pub mod executor;
pub mod launcher;
pub mod probe;
pub mod registry;
pub mod select;
pub mod server;

pub use client::{attach, run, stop, StopOutcome};
pub use config::Timings;
pub use error::{Result, SessionError};
pub use executor::{CommandExecutor, ExecError, Outcome};
pub use launcher::{Launcher, Started};
pub use probe::{probe, DeadReason, SessionStatus};
pub use registry::SessionEntry;
pub use server::{serve, SessionServer, ShutdownGate};
