//! Line protocol frames for shineyshot background sessions.
//!
//! Shared by the session daemon and its clients so both sides agree on the
//! exact frame text. Every frame is one newline-terminated UTF-8 line; the
//! daemon opens each connection with `READY` and then answers requests in
//! order.

use std::fmt;
use std::io::{self, BufRead, Read, Write};

pub const MAX_FRAME_BYTES: usize = 1024 * 1024; // 1MB
pub const UNKNOWN_REQUEST: &str = "unknown request";
pub const REQUEST_TOO_LARGE: &str = "request too large";

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("command text must fit on one line")]
    MultiLine,

    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    #[error("frame exceeded {MAX_FRAME_BYTES} bytes")]
    TooLarge,

    #[error("frame was not valid UTF-8")]
    InvalidUtf8,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Request keywords a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Ping,
    Shutdown,
    Exec,
}

impl Verb {
    pub const ALL: [Verb; 3] = [Verb::Ping, Verb::Shutdown, Verb::Exec];

    pub fn keyword(self) -> &'static str {
        match self {
            Verb::Ping => "PING",
            Verb::Shutdown => "SHUTDOWN",
            Verb::Exec => "EXEC",
        }
    }

    fn takes_body(self) -> bool {
        matches!(self, Verb::Exec)
    }

    /// Splits a request line into its verb and body.
    ///
    /// Verbs without a body must match the whole line.
    pub fn split(line: &str) -> Option<(Verb, &str)> {
        Verb::ALL.into_iter().find_map(|verb| {
            let rest = line.strip_prefix(verb.keyword())?;
            if rest.is_empty() {
                return Some((verb, ""));
            }
            if !verb.takes_body() {
                return None;
            }
            rest.strip_prefix(' ').map(|body| (verb, body))
        })
    }
}

/// A request as a client sends it. `EXEC` bodies travel verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Shutdown,
    Exec(String),
}

impl Request {
    /// Builds an `EXEC` request. The command is sent as written, so it
    /// cannot contain a line break.
    pub fn exec(command: &str) -> Result<Self, FrameError> {
        if command.contains(['\n', '\r']) {
            return Err(FrameError::MultiLine);
        }
        Ok(Request::Exec(command.to_string()))
    }

    fn verb(&self) -> Verb {
        match self {
            Request::Ping => Verb::Ping,
            Request::Shutdown => Verb::Shutdown,
            Request::Exec(_) => Verb::Exec,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Exec(command) => write!(f, "EXEC {}", command),
            other => f.write_str(other.verb().keyword()),
        }
    }
}

/// How the daemon finished one `EXEC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Done {
    Ok,
    OkClose,
    Err(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ready,
    Pong,
    Out(String),
    Err(String),
    Done(Done),
}

impl Reply {
    pub fn unknown_request() -> Self {
        Reply::Err(UNKNOWN_REQUEST.to_string())
    }

    pub fn parse(line: &str) -> Result<Self, FrameError> {
        match line {
            "READY" => return Ok(Reply::Ready),
            "PONG" => return Ok(Reply::Pong),
            "DONE OK" => return Ok(Reply::Done(Done::Ok)),
            "DONE OK CLOSE" => return Ok(Reply::Done(Done::OkClose)),
            "OUT" => return Ok(Reply::Out(String::new())),
            "ERR" => return Ok(Reply::Err(String::new())),
            _ => {}
        }

        if let Some(message) = line.strip_prefix("DONE ERR ") {
            return Ok(Reply::Done(Done::Err(unescape(message))));
        }
        if let Some(text) = line.strip_prefix("OUT ") {
            return Ok(Reply::Out(text.to_string()));
        }
        if let Some(text) = line.strip_prefix("ERR ") {
            return Ok(Reply::Err(text.to_string()));
        }
        Err(FrameError::UnexpectedFrame(line.to_string()))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Ready => f.write_str("READY"),
            Reply::Pong => f.write_str("PONG"),
            Reply::Out(text) => write!(f, "OUT {}", text),
            Reply::Err(text) => write!(f, "ERR {}", text),
            Reply::Done(Done::Ok) => f.write_str("DONE OK"),
            Reply::Done(Done::OkClose) => f.write_str("DONE OK CLOSE"),
            Reply::Done(Done::Err(message)) => write!(f, "DONE ERR {}", escape(message)),
        }
    }
}

/// Encodes a `DONE ERR` message so it fits on one frame line. Newlines
/// become the two characters `\n`; nothing else changes.
pub fn escape(text: &str) -> String {
    text.replace('\n', "\\n")
}

/// Reverses [`escape`].
pub fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Reads one frame, without its line terminator.
///
/// Returns `Ok(None)` on a clean end of stream.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<String>, FrameError> {
    let mut buffer = Vec::new();
    let limit = MAX_FRAME_BYTES as u64 + 1;
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut buffer)?;
    if read == 0 {
        return Ok(None);
    }

    if buffer.last() == Some(&b'\n') {
        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }
    } else if buffer.len() > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge);
    }

    String::from_utf8(buffer)
        .map(Some)
        .map_err(|_| FrameError::InvalidUtf8)
}

/// Writes one frame followed by a newline and flushes.
pub fn write_frame<W: Write, F: fmt::Display>(writer: &mut W, frame: &F) -> io::Result<()> {
    writeln!(writer, "{}", frame)?;
    writer.flush()
}
