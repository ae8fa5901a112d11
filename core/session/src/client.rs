//! Client side of the session protocol: `run`, `attach` and `stop`.

use crate::dial::{self, CONNECT_TIMEOUT};
use crate::error::{Result, SessionError};
use fs_err as fs;
use shineyshot_session_protocol::{read_frame, write_frame, Done, FrameError, Reply, Request};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const GREETING_TIMEOUT: Duration = Duration::from_secs(2);
pub const PROMPT: &str = "shineyshot> ";

/// An open connection that has already received `READY`.
pub struct SessionConnection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl SessionConnection {
    pub fn open(socket: &Path) -> Result<Self> {
        let stream = dial::connect(socket, CONNECT_TIMEOUT).map_err(|source| SessionError::Connect {
            path: socket.to_path_buf(),
            source,
        })?;
        let reader = stream
            .try_clone()
            .map_err(|err| SessionError::io("failed to clone session stream", err))?;
        let mut connection = Self {
            reader: BufReader::new(reader),
            writer: stream,
        };

        connection.set_read_timeout(Some(GREETING_TIMEOUT))?;
        match connection.next_reply()? {
            Reply::Ready => {}
            other => {
                return Err(FrameError::UnexpectedFrame(other.to_string()).into());
            }
        }
        // Commands may legitimately run for a long time.
        connection.set_read_timeout(None)?;
        Ok(connection)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.writer
            .set_read_timeout(timeout)
            .map_err(|err| SessionError::io("failed to set read timeout", err))
    }

    fn send(&mut self, request: &Request) -> Result<()> {
        write_frame(&mut self.writer, request)
            .map_err(|err| SessionError::io("failed to send request", err))
    }

    fn next_reply(&mut self) -> Result<Reply> {
        let frame = read_frame(&mut self.reader).map_err(|err| match err {
            FrameError::Io(source) => SessionError::io("failed to read from session", source),
            other => other.into(),
        })?;
        match frame {
            Some(line) => Ok(Reply::parse(&line)?),
            None => Err(SessionError::Disconnected),
        }
    }

    /// Sends one `EXEC` and copies its output to `out`/`err` until `DONE`.
    pub fn exec<O, E>(&mut self, command: &str, out: &mut O, err: &mut E) -> Result<Done>
    where
        O: Write + ?Sized,
        E: Write + ?Sized,
    {
        self.send(&Request::exec(command)?)?;
        loop {
            match self.next_reply()? {
                Reply::Out(text) => writeln!(out, "{}", text)
                    .map_err(|e| SessionError::io("failed to write output", e))?,
                Reply::Err(text) => writeln!(err, "{}", text)
                    .map_err(|e| SessionError::io("failed to write error output", e))?,
                Reply::Done(done) => {
                    let _ = out.flush();
                    return Ok(done);
                }
                other => return Err(FrameError::UnexpectedFrame(other.to_string()).into()),
            }
        }
    }
}

/// Runs `commands` in order, stopping at the first failure or at a
/// `DONE OK CLOSE`.
pub fn run<O, E>(socket: &Path, commands: &[String], out: &mut O, err: &mut E) -> Result<()>
where
    O: Write + ?Sized,
    E: Write + ?Sized,
{
    let mut connection = SessionConnection::open(socket)?;
    for command in commands {
        match connection.exec(command, out, err)? {
            Done::Ok => {}
            Done::OkClose => {
                debug!(command = %command, "Session closed the batch");
                return Ok(());
            }
            Done::Err(message) => return Err(SessionError::Remote(message)),
        }
    }
    Ok(())
}

/// Forwards lines from `input` until it ends or the session closes.
///
/// A failing command is reported on `err` and the loop continues.
pub fn attach<R, O, E>(socket: &Path, input: &mut R, out: &mut O, err: &mut E) -> Result<()>
where
    R: BufRead + ?Sized,
    O: Write + ?Sized,
    E: Write + ?Sized,
{
    let mut connection = SessionConnection::open(socket)?;
    let mut line = String::new();
    loop {
        write!(out, "{}", PROMPT)
            .and_then(|_| out.flush())
            .map_err(|e| SessionError::io("failed to write prompt", e))?;

        line.clear();
        let read = input
            .read_line(&mut line)
            .map_err(|e| SessionError::io("failed to read input", e))?;
        if read == 0 {
            let _ = writeln!(out);
            return Ok(());
        }
        let command = line.trim();
        if command.is_empty() {
            continue;
        }

        match connection.exec(command, out, err)? {
            Done::Ok => {}
            Done::OkClose => return Ok(()),
            Done::Err(message) => {
                writeln!(err, "error: {}", message)
                    .map_err(|e| SessionError::io("failed to write error output", e))?;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The daemon acknowledged the shutdown request.
    Stopped,
    /// Nothing was listening on the socket.
    AlreadyStopped,
}

/// Asks the daemon to shut down, then removes the socket file whatever the
/// handshake did.
pub fn stop(socket: &Path) -> Result<StopOutcome> {
    let outcome = shutdown_handshake(socket);
    match fs::remove_file(socket) {
        Ok(()) => debug!(path = %socket.display(), "Removed session socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(error = %err, "Failed to remove session socket"),
    }
    outcome
}

fn shutdown_handshake(socket: &Path) -> Result<StopOutcome> {
    let mut connection = match SessionConnection::open(socket) {
        Ok(connection) => connection,
        Err(SessionError::Connect { source, .. }) => {
            debug!(error = %source, "Session not reachable; treating as stopped");
            return Ok(StopOutcome::AlreadyStopped);
        }
        Err(err) => return Err(err),
    };

    connection.send(&Request::Shutdown)?;
    loop {
        match connection.next_reply() {
            Ok(Reply::Done(_)) | Err(SessionError::Disconnected) => return Ok(StopOutcome::Stopped),
            Ok(Reply::Out(_)) | Ok(Reply::Err(_)) => continue,
            Ok(other) => return Err(FrameError::UnexpectedFrame(other.to_string()).into()),
            Err(err) => return Err(err),
        }
    }
}
