use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tempfile::TempDir;

/// Stops every session it started when the test ends, pass or fail.
struct SessionsGuard {
    dir: PathBuf,
    names: Vec<String>,
}

impl SessionsGuard {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            names: Vec::new(),
        }
    }

    fn start(&mut self, name: &str) {
        let output = start_detached(&self.dir, Some(name));
        assert!(
            output.status.success(),
            "start {} failed: {}",
            name,
            String::from_utf8_lossy(&output.stdout)
        );
        self.names.push(name.to_string());
    }
}

impl Drop for SessionsGuard {
    fn drop(&mut self) {
        for name in &self.names {
            let _ = shineyshot(&self.dir, &["stop", "--name", name]);
        }
    }
}

fn command(dir: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_shineyshot"));
    cmd.arg("background")
        .args(&args[..1])
        .arg("--dir")
        .arg(dir)
        .args(&args[1..])
        .env_remove("SHINEYSHOT_SOCKET_DIR")
        .env_remove("SHINEYSHOT_LOG")
        .env_remove("SHINEYSHOT_DEBUG_LOG");
    cmd
}

fn shineyshot(dir: &Path, args: &[&str]) -> Output {
    command(dir, args)
        .stdin(Stdio::null())
        .output()
        .expect("Failed to run shineyshot")
}

/// The daemon inherits stderr, so `start` must not hand it a pipe that
/// `output()` would wait on.
fn start_detached(dir: &Path, name: Option<&str>) -> Output {
    let mut args = vec!["start"];
    if let Some(name) = name {
        args.extend(["--name", name]);
    }
    command(dir, &args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .expect("Failed to run shineyshot start")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn start_run_stop_round_trip() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);

    let output = start_detached(dir, Some("demo"));
    assert!(output.status.success());
    assert_eq!(
        stdout(&output),
        format!(
            "started background session demo at {}\n",
            dir.join("demo.sock").display()
        )
    );
    guard.names.push("demo".to_string());

    let output = shineyshot(dir, &["run", "demo", "capture", "screen"]);
    assert!(output.status.success(), "run failed: {}", stderr(&output));
    assert_eq!(stdout(&output), "captured screen (1920x1080)\n");

    let output = shineyshot(dir, &["stop", "--name", "demo"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "stop requested for demo\n");
    assert!(!dir.join("demo.sock").exists());

    let output = shineyshot(dir, &["list"]);
    assert_eq!(stdout(&output), "no sockets found\n");
}

#[test]
fn daemon_speaks_line_protocol() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let mut guard = SessionsGuard::new(temp.path());
    guard.start("wire");

    let stream = UnixStream::connect(temp.path().join("wire.sock")).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("set timeout");
    let mut writer = stream.try_clone().expect("clone stream");
    let mut reader = BufReader::new(stream);
    let mut next = || {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read frame");
        line
    };

    assert_eq!(next(), "READY\n");
    writer.write_all(b"PING\n").expect("write");
    assert_eq!(next(), "PONG\n");

    writer.write_all(b"EXEC capture screen\n").expect("write");
    assert_eq!(next(), "OUT captured screen (1920x1080)\n");
    assert_eq!(next(), "DONE OK\n");

    writer.write_all(b"EXEC rect 10 10 200 200\n").expect("write");
    assert_eq!(next(), "OUT rect 10,10 200x200\n");
    assert_eq!(next(), "DONE OK\n");

    writer.write_all(b"EXEC frobnicate\n").expect("write");
    assert_eq!(next(), "DONE ERR unknown command: frobnicate\n");

    writer.write_all(b"HELLO\n").expect("write");
    assert_eq!(next(), "ERR unknown request\n");

    writer.write_all(b"EXEC status\n").expect("write");
    assert_eq!(next(), "OUT image: screen 1920x1080, 1 annotation(s)\n");
}

#[test]
fn state_persists_between_run_invocations() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("keep");

    let output = shineyshot(dir, &["run", "keep", "capture", "region", "0", "0", "100", "100;", "color", "blue"]);
    assert!(output.status.success(), "run failed: {}", stderr(&output));
    assert_eq!(
        stdout(&output),
        "captured region 0,0 (100x100)\ncolor set to blue\n"
    );

    let output = shineyshot(dir, &["run", "--name", "keep", "status"]);
    assert_eq!(
        stdout(&output),
        "image: region 0,0 100x100, 0 annotation(s)\ncolor: blue\nwidth: 3\n"
    );
}

#[test]
fn run_reads_commands_from_stdin() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("piped");

    let mut child = command(dir, &["run", "--name", "piped"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn run");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"echo one\n\necho two\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait for run");
    assert!(output.status.success());
    assert_eq!(stdout(&output), "one\ntwo\n");
}

#[test]
fn failing_command_exits_nonzero_with_message() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("strict");

    let output = shineyshot(dir, &["run", "strict", "rect", "1", "1", "5", "5"]);
    assert!(!output.status.success());
    assert_eq!(
        stderr(&output),
        "shineyshot: no image open; run capture first\n"
    );
}

#[test]
fn arbitration_depends_on_number_of_sessions() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();

    let output = shineyshot(dir, &["run", "status"]);
    assert!(!output.status.success());
    assert_eq!(stderr(&output), "shineyshot: no background sessions running\n");

    let mut guard = SessionsGuard::new(dir);
    guard.start("alpha");
    let output = shineyshot(dir, &["run", "echo", "hi"]);
    assert!(output.status.success(), "run failed: {}", stderr(&output));
    assert_eq!(stdout(&output), "hi\n");

    guard.start("beta");
    let output = shineyshot(dir, &["run", "echo", "hi"]);
    assert!(!output.status.success());
    assert_eq!(
        stderr(&output),
        "shineyshot: multiple background sessions running (alpha, beta); use --name to pick one\n"
    );

    let output = shineyshot(dir, &["run", "beta", "echo", "picked"]);
    assert_eq!(stdout(&output), "picked\n");
}

#[test]
fn stopping_one_session_leaves_the_other() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("n1");
    guard.start("n2");

    let output = shineyshot(dir, &["stop", "--name", "n1"]);
    assert_eq!(stdout(&output), "stop requested for n1\n");

    let output = shineyshot(dir, &["list"]);
    let listing = stdout(&output);
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines.len(), 1, "unexpected listing: {}", listing);
    assert!(lines[0].starts_with("n2\talive\t"));

    let output = shineyshot(dir, &["list", "--json"]);
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(entries[0]["name"], "n2");
    assert_eq!(entries[0]["status"]["state"], "alive");
}

#[test]
fn concurrent_runs_do_not_interleave() {
    const MARKS: usize = 300;
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path().to_path_buf();
    let mut guard = SessionsGuard::new(&dir);
    guard.start("shared");

    let mut setup = vec!["run".to_string(), "shared".to_string(), "capture".to_string(), "screen".to_string()];
    for i in 0..MARKS {
        setup.push(format!("; rect {} {} 10 10", i, i));
    }
    let setup: Vec<&str> = setup.iter().map(String::as_str).collect();
    let output = shineyshot(&dir, &setup);
    assert!(output.status.success(), "setup failed: {}", stderr(&output));

    let expected: String = (0..MARKS)
        .map(|i| format!("{}: rect {},{} 10x10 red 3px\n", i + 1, i, i))
        .collect();

    let lister = {
        let dir = dir.clone();
        std::thread::spawn(move || {
            (0..5)
                .map(|_| stdout(&shineyshot(&dir, &["run", "shared", "marks"])))
                .collect::<Vec<_>>()
        })
    };
    let echoer = {
        let dir = dir.clone();
        std::thread::spawn(move || {
            (0..20)
                .map(|_| stdout(&shineyshot(&dir, &["run", "shared", "echo", "ping"])))
                .collect::<Vec<_>>()
        })
    };

    for listing in lister.join().expect("lister thread") {
        assert_eq!(listing, expected);
    }
    for echoed in echoer.join().expect("echo thread") {
        assert_eq!(echoed, "ping\n");
    }
}

#[test]
fn generated_names_count_up() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);

    for expected in ["1", "2"] {
        let output = start_detached(dir, None);
        assert!(output.status.success());
        guard.names.push(expected.to_string());
        assert!(
            stdout(&output).starts_with(&format!("started background session {} at", expected)),
            "unexpected output: {}",
            stdout(&output)
        );
    }
}

#[test]
fn duplicate_start_is_rejected() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("solo");

    // Rejected before anything is spawned, so stderr can be captured.
    let output = shineyshot(dir, &["start", "--name", "solo"]);
    assert!(!output.status.success());
    assert_eq!(stderr(&output), "shineyshot: session solo is already running\n");
}

#[test]
fn stop_is_idempotent() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("twice");

    let first = shineyshot(dir, &["stop", "--name", "twice"]);
    assert!(first.status.success());
    let second = shineyshot(dir, &["stop", "--name", "twice"]);
    assert!(second.status.success());
    assert_eq!(stdout(&second), "session twice was not running\n");
    assert!(!dir.join("twice.sock").exists());
}

#[test]
fn quit_ends_the_session() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("brief");

    let output = shineyshot(dir, &["run", "brief", "echo", "bye;", "quit;", "echo", "never"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output), "bye\n");

    // Only the connection closed; the daemon keeps serving.
    let output = shineyshot(dir, &["run", "brief", "echo", "still", "here"]);
    assert_eq!(stdout(&output), "still here\n");
}

#[test]
fn clean_removes_only_dead_sockets() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("live");

    drop(UnixListener::bind(dir.join("stale.sock")).expect("bind stale socket"));
    std::fs::write(dir.join("stale.log"), "old log").expect("write stale log");

    let output = shineyshot(dir, &["clean"]);
    assert_eq!(stdout(&output), "removed 1 dead socket(s): stale\n");
    assert!(!dir.join("stale.sock").exists());
    assert!(!dir.join("stale.log").exists());
    assert!(dir.join("live.sock").exists());
    assert!(dir.join("live.log").exists());

    let output = shineyshot(dir, &["clean"]);
    assert_eq!(stdout(&output), "no dead sockets found\n");
}

#[test]
fn attach_prompts_until_input_ends() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let dir = temp.path();
    let mut guard = SessionsGuard::new(dir);
    guard.start("tty");

    let mut child = command(dir, &["attach"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn attach");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(b"echo hello\nwidth abc\n")
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait for attach");

    assert!(output.status.success());
    assert_eq!(
        stdout(&output),
        "shineyshot> hello\nshineyshot> shineyshot> \n"
    );
    assert_eq!(stderr(&output), "error: invalid size \"abc\"\n");
}
