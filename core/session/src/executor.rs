//! Call contract for the component that interprets session commands.
//!
//! The daemon owns exactly one executor and hands it the output sinks of
//! whichever connection currently holds the lock. Sinks are parameters of
//! the call, so an executor never keeps a reference to a connection.

use std::io::{self, Write};

/// What the session should do after a command completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// The command asked to end the session (for example `quit`).
    EndSession,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExecError {
    message: String,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for ExecError {
    fn from(err: io::Error) -> Self {
        ExecError::new(format!("output failed: {}", err))
    }
}

pub trait CommandExecutor: Send {
    /// Runs one command line. Everything written to `out` and `err` during
    /// the call belongs to this command only.
    fn execute(
        &mut self,
        command: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Outcome, ExecError>;
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for Box<E> {
    fn execute(
        &mut self,
        command: &str,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<Outcome, ExecError> {
        (**self).execute(command, out, err)
    }
}
