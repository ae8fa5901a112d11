//! Liveness probing for session sockets.
//!
//! A probe is a throwaway connection: wait for `READY`, send `PING`, expect
//! `PONG`. Only a completed round trip counts as alive; a socket file with
//! nothing behind it is just a file.

use crate::dial::{self, CONNECT_TIMEOUT};
use serde::Serialize;
use shineyshot_session_protocol::{read_frame, write_frame, Reply, Request};
use std::fmt;
use std::io::{self, BufReader};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum DeadReason {
    MissingFile,
    PermissionDenied,
    Other(String),
}

impl DeadReason {
    fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => DeadReason::MissingFile,
            io::ErrorKind::PermissionDenied => DeadReason::PermissionDenied,
            io::ErrorKind::ConnectionRefused => DeadReason::Other("connection refused".to_string()),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                DeadReason::Other("timed out".to_string())
            }
            _ => DeadReason::Other(err.to_string()),
        }
    }
}

impl fmt::Display for DeadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeadReason::MissingFile => f.write_str("socket file missing"),
            DeadReason::PermissionDenied => f.write_str("permission denied"),
            DeadReason::Other(detail) => f.write_str(detail),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SessionStatus {
    Alive,
    Dead(DeadReason),
}

impl SessionStatus {
    pub fn is_alive(&self) -> bool {
        matches!(self, SessionStatus::Alive)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Alive => f.write_str("alive"),
            SessionStatus::Dead(reason) => write!(f, "dead ({})", reason),
        }
    }
}

/// Probes a socket once within `deadline`.
pub fn probe(socket: &Path, deadline: Duration) -> SessionStatus {
    match handshake(socket, deadline) {
        Ok(()) => SessionStatus::Alive,
        Err(reason) => {
            tracing::debug!(path = %socket.display(), reason = %reason, "Probe failed");
            SessionStatus::Dead(reason)
        }
    }
}

fn handshake(socket: &Path, deadline: Duration) -> Result<(), DeadReason> {
    let started = Instant::now();
    let stream = dial::connect(socket, deadline.min(CONNECT_TIMEOUT))
        .map_err(|err| DeadReason::from_io(&err))?;
    let mut reader = BufReader::new(stream.try_clone().map_err(|err| DeadReason::from_io(&err))?);
    let mut writer = stream;

    expect_reply(&mut reader, &writer, started, deadline, Reply::Ready)?;
    arm_timeout(&writer, started, deadline)?;
    write_frame(&mut writer, &Request::Ping).map_err(|err| DeadReason::from_io(&err))?;
    expect_reply(&mut reader, &writer, started, deadline, Reply::Pong)
}

fn expect_reply(
    reader: &mut BufReader<UnixStream>,
    stream: &UnixStream,
    started: Instant,
    deadline: Duration,
    expected: Reply,
) -> Result<(), DeadReason> {
    arm_timeout(stream, started, deadline)?;
    let line = match read_frame(reader) {
        Ok(Some(line)) => line,
        Ok(None) => return Err(DeadReason::Other("connection closed".to_string())),
        Err(shineyshot_session_protocol::FrameError::Io(err)) => {
            return Err(DeadReason::from_io(&err))
        }
        Err(err) => return Err(DeadReason::Other(err.to_string())),
    };
    match Reply::parse(&line) {
        Ok(reply) if reply == expected => Ok(()),
        _ => Err(DeadReason::Other(format!(
            "expected {}, got {:?}",
            expected, line
        ))),
    }
}

/// Applies whatever is left of the overall deadline to the next read/write.
fn arm_timeout(stream: &UnixStream, started: Instant, deadline: Duration) -> Result<(), DeadReason> {
    let remaining = deadline
        .checked_sub(started.elapsed())
        .filter(|left| !left.is_zero())
        .ok_or_else(|| DeadReason::Other("timed out".to_string()))?;
    stream
        .set_read_timeout(Some(remaining))
        .and_then(|_| stream.set_write_timeout(Some(remaining)))
        .map_err(|err| DeadReason::from_io(&err))
}
