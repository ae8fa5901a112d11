//! Session daemon: socket listener and per-connection protocol handling.
//!
//! One listener thread accepts connections and hands each one to its own
//! worker thread. Workers share nothing but the executor mutex and the
//! shutdown gate. Every `EXEC` runs while holding the executor lock, so
//! commands from different connections never interleave their output.

use crate::config::Timings;
use crate::dir;
use crate::error::{Result, SessionError};
use crate::executor::{CommandExecutor, Outcome};
use crate::probe::{probe, DeadReason, SessionStatus};
use fs_err as fs;
use shineyshot_session_protocol::{
    read_frame, write_frame, Done, FrameError, Reply, Verb, REQUEST_TOO_LARGE,
};
use std::collections::HashMap;
use std::io::{self, BufReader, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

const ACCEPT_POLL: Duration = Duration::from_millis(25);

type SharedExecutor = Arc<Mutex<dyn CommandExecutor>>;

/// Binds `<dir>/<name>.sock` and serves it until a `SHUTDOWN` arrives.
pub fn serve<E>(dir: &Path, name: &str, executor: E, timings: Timings) -> Result<()>
where
    E: CommandExecutor + 'static,
{
    SessionServer::bind(dir, name, executor, timings)?.run()
}

pub struct SessionServer {
    name: String,
    socket: PathBuf,
    listener: UnixListener,
    executor: SharedExecutor,
    gate: Arc<ShutdownGate>,
}

impl SessionServer {
    pub fn bind<E>(dir: &Path, name: &str, executor: E, timings: Timings) -> Result<Self>
    where
        E: CommandExecutor + 'static,
    {
        dir::ensure(dir)?;
        let socket = dir::socket_path(dir, name)?;
        clear_stale_socket(name, &socket, timings)?;

        let listener = UnixListener::bind(&socket).map_err(|err| {
            SessionError::io(format!("failed to bind {}", socket.display()), err)
        })?;
        info!(session = %name, path = %socket.display(), "Session daemon listening");

        let executor: SharedExecutor = Arc::new(Mutex::new(executor));
        Ok(Self {
            name: name.to_string(),
            gate: Arc::new(ShutdownGate::new(socket.clone())),
            socket,
            listener,
            executor,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket
    }

    /// Handle that stops the server from outside the accept loop.
    pub fn shutdown_gate(&self) -> Arc<ShutdownGate> {
        Arc::clone(&self.gate)
    }

    /// Runs the accept loop until shutdown, then releases the socket.
    pub fn run(self) -> Result<()> {
        let result = self.accept_loop();
        self.gate.fire();
        info!(session = %self.name, "Session daemon stopped");
        result
    }

    fn accept_loop(&self) -> Result<()> {
        self.listener
            .set_nonblocking(true)
            .map_err(|err| SessionError::io("failed to configure listener", err))?;

        loop {
            if self.gate.is_fired() {
                return Ok(());
            }
            match self.listener.accept() {
                Ok((stream, _)) => self.spawn_connection(stream),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut
                    ) =>
                {
                    debug!(error = %err, "Transient accept error; retrying");
                }
                Err(_) if self.gate.is_fired() => return Ok(()),
                Err(err) => return Err(SessionError::io("failed to accept connection", err)),
            }
        }
    }

    fn spawn_connection(&self, stream: UnixStream) {
        if let Err(err) = stream.set_nonblocking(false) {
            warn!(error = %err, "Failed to configure accepted connection");
            return;
        }
        let Some(id) = self.gate.register(&stream) else {
            return;
        };

        let connection = Connection {
            id,
            stream,
            executor: Arc::clone(&self.executor),
            gate: Arc::clone(&self.gate),
        };
        let spawned = thread::Builder::new()
            .name(format!("session-conn-{}", id))
            .spawn(move || connection.serve());
        if let Err(err) = spawned {
            warn!(error = %err, "Failed to spawn connection worker");
            self.gate.deregister(id);
        }
    }
}

fn clear_stale_socket(name: &str, socket: &Path, timings: Timings) -> Result<()> {
    match probe(socket, timings.probe_deadline) {
        SessionStatus::Alive => Err(SessionError::AlreadyRunning(name.to_string())),
        SessionStatus::Dead(DeadReason::MissingFile) => Ok(()),
        SessionStatus::Dead(reason) => {
            info!(path = %socket.display(), reason = %reason, "Removing stale session socket");
            match fs::remove_file(socket) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(SessionError::io("failed to remove stale socket", err)),
            }
        }
    }
}

/// One-shot shutdown signal shared by the listener and every connection.
///
/// Firing removes the socket file and closes every registered connection.
/// Only the first call does anything.
pub struct ShutdownGate {
    fired: AtomicBool,
    socket: PathBuf,
    peers: Mutex<Peers>,
}

#[derive(Default)]
struct Peers {
    next_id: u64,
    streams: HashMap<u64, UnixStream>,
}

impl ShutdownGate {
    fn new(socket: PathBuf) -> Self {
        Self {
            fired: AtomicBool::new(false),
            socket,
            peers: Mutex::new(Peers::default()),
        }
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Returns `true` for the call that actually shut the server down.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        match fs::remove_file(&self.socket) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(error = %err, "Failed to remove session socket"),
        }

        let streams: Vec<UnixStream> = {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.streams.drain().map(|(_, stream)| stream).collect()
        };
        for stream in &streams {
            let _ = stream.shutdown(Shutdown::Both);
        }
        info!(
            path = %self.socket.display(),
            connections = streams.len(),
            "Session shutdown triggered"
        );
        true
    }

    fn register(&self, stream: &UnixStream) -> Option<u64> {
        let clone = match stream.try_clone() {
            Ok(clone) => clone,
            Err(err) => {
                warn!(error = %err, "Failed to track connection");
                return None;
            }
        };
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_fired() {
            let _ = clone.shutdown(Shutdown::Both);
            return None;
        }
        peers.next_id += 1;
        let id = peers.next_id;
        peers.streams.insert(id, clone);
        Some(id)
    }

    fn deregister(&self, id: u64) {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.streams.remove(&id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

type Handler = fn(&Connection, &str) -> io::Result<Flow>;

static HANDLERS: [(Verb, Handler); 3] = [
    (Verb::Ping, handle_ping),
    (Verb::Shutdown, handle_shutdown),
    (Verb::Exec, handle_exec),
];

fn handler_for(verb: Verb) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(candidate, _)| *candidate == verb)
        .map(|(_, handler)| *handler)
}

struct Connection {
    id: u64,
    stream: UnixStream,
    executor: SharedExecutor,
    gate: Arc<ShutdownGate>,
}

impl Connection {
    fn serve(self) {
        debug!(connection = self.id, "Connection opened");
        if let Err(err) = self.run() {
            if !self.gate.is_fired() {
                debug!(connection = self.id, error = %err, "Connection ended with error");
            }
        }
        self.gate.deregister(self.id);
        debug!(connection = self.id, "Connection closed");
    }

    fn run(&self) -> io::Result<()> {
        let mut reader = BufReader::new(self.stream.try_clone()?);
        self.reply(&Reply::Ready)?;

        loop {
            let line = match read_frame(&mut reader) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(FrameError::TooLarge) => {
                    self.reply(&Reply::Err(REQUEST_TOO_LARGE.to_string()))?;
                    return Ok(());
                }
                Err(FrameError::Io(err)) => return Err(err),
                Err(_) => {
                    self.reply(&Reply::unknown_request())?;
                    continue;
                }
            };

            let flow = match Verb::split(&line).and_then(|(verb, body)| {
                handler_for(verb).map(|handler| (handler, body))
            }) {
                Some((handler, body)) => handler(self, body)?,
                None => {
                    debug!(connection = self.id, request = %line, "Unknown request");
                    self.reply(&Reply::unknown_request())?;
                    Flow::Continue
                }
            };
            if flow == Flow::Close {
                return Ok(());
            }
        }
    }

    fn reply(&self, reply: &Reply) -> io::Result<()> {
        let mut writer = &self.stream;
        write_frame(&mut writer, reply)
    }
}

fn handle_ping(conn: &Connection, _body: &str) -> io::Result<Flow> {
    conn.reply(&Reply::Pong)?;
    Ok(Flow::Continue)
}

fn handle_shutdown(conn: &Connection, _body: &str) -> io::Result<Flow> {
    info!(connection = conn.id, "Shutdown requested");
    let replied = conn.reply(&Reply::Done(Done::OkClose));
    conn.gate.fire();
    replied.map(|_| Flow::Close)
}

fn handle_exec(conn: &Connection, command: &str) -> io::Result<Flow> {
    debug!(connection = conn.id, command = %command, "Executing command");

    let (result, flushed) = {
        let mut executor = conn.executor.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = FrameSink::new(&conn.stream, Reply::Out);
        let mut err = FrameSink::new(&conn.stream, Reply::Err);
        let result = executor.execute(command, &mut out, &mut err);
        let flushed = out.finish().and_then(|_| err.finish());
        (result, flushed)
    };
    flushed?;

    match result {
        Ok(Outcome::Continue) => {
            conn.reply(&Reply::Done(Done::Ok))?;
            Ok(Flow::Continue)
        }
        Ok(Outcome::EndSession) => {
            conn.reply(&Reply::Done(Done::OkClose))?;
            Ok(Flow::Close)
        }
        Err(exec_err) => {
            warn!(
                connection = conn.id,
                command = %command,
                error = %exec_err,
                "Command failed"
            );
            conn.reply(&Reply::Done(Done::Err(exec_err.message().to_string())))?;
            Ok(Flow::Continue)
        }
    }
}

/// Turns executor output into tagged frames, one per completed line.
struct FrameSink<'a> {
    stream: &'a UnixStream,
    frame: fn(String) -> Reply,
    pending: Vec<u8>,
}

impl<'a> FrameSink<'a> {
    fn new(stream: &'a UnixStream, frame: fn(String) -> Reply) -> Self {
        Self {
            stream,
            frame,
            pending: Vec::new(),
        }
    }

    fn emit(&mut self, line: &[u8]) -> io::Result<()> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let text = String::from_utf8_lossy(line).into_owned();
        let mut writer = self.stream;
        write_frame(&mut writer, &(self.frame)(text))
    }

    /// Sends whatever is left after the last newline.
    fn finish(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let rest = std::mem::take(&mut self.pending);
        self.emit(&rest)
    }
}

impl Write for FrameSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(index) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=index).collect();
            self.emit(&line[..index])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut writer = self.stream;
        writer.flush()
    }
}
