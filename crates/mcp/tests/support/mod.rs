#![forbid(unsafe_code)]
#![allow(dead_code)]

use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

pub(crate) const BIN: &str = env!("CARGO_BIN_EXE_gm_mcp");

/// Short-lived app directory under /tmp, so socket paths stay well below `sun_path` limits.
pub(crate) struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    /// Returns `None` when the environment forbids unix domain sockets (EPERM).
    pub(crate) fn new() -> Option<Self> {
        let base = if Path::new("/tmp").is_dir() {
            PathBuf::from("/tmp")
        } else {
            std::env::temp_dir()
        };
        let dir = tempfile::Builder::new()
            .prefix("gm")
            .tempdir_in(base)
            .expect("create sandbox dir");

        let preflight = dir.path().join("preflight.sock");
        match UnixListener::bind(&preflight) {
            Ok(listener) => {
                drop(listener);
                let _ = std::fs::remove_file(&preflight);
            }
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return None,
            Err(err) => panic!("unix socket bind preflight failed: {err}"),
        }
        Some(Self { dir })
    }

    pub(crate) fn app_dir(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn socket_path(&self) -> PathBuf {
        self.dir.path().join("graph_memory.sock")
    }

    pub(crate) fn pid_file(&self) -> PathBuf {
        self.dir.path().join("clients.json")
    }

    pub(crate) fn data_file(&self) -> PathBuf {
        self.dir.path().join("memory.jsonl")
    }

    /// Launcher command with fast health probing and a `sleep` stand-in for the worker.
    pub(crate) fn launcher(&self) -> Command {
        let mut command = Command::new(BIN);
        command
            .arg("--app-dir")
            .arg(self.app_dir())
            .arg("--socket")
            .arg(self.socket_path())
            .env("GRAPH_MEMORY_HEALTH_ATTEMPTS", "40")
            .env("GRAPH_MEMORY_HEALTH_INTERVAL_MS", "50")
            .env("RUST_LOG", "gm_mcp=debug,gm_storage=debug")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    pub(crate) fn spawn_sleeping_client(&self) -> Child {
        self.launcher()
            .arg("--")
            .arg("sleep")
            .arg("30")
            .spawn()
            .expect("spawn launcher")
    }

    pub(crate) fn spawn_daemon(&self) -> Child {
        Command::new(BIN)
            .arg("--daemon")
            .arg("--socket")
            .arg(self.socket_path())
            .arg("--data-file")
            .arg(self.data_file())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn daemon")
    }

    pub(crate) fn read_pids(&self) -> Vec<u32> {
        let raw = match std::fs::read_to_string(self.pid_file()) {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };
        let value: Value = serde_json::from_str(&raw).expect("pid file is json");
        value
            .get("pids")
            .and_then(Value::as_array)
            .expect("pids array")
            .iter()
            .map(|v| v.as_u64().expect("numeric pid") as u32)
            .collect()
    }

    /// Like `read_pids`, but `None` while the file is missing or not yet a valid registry.
    pub(crate) fn read_pids_lenient(&self) -> Option<Vec<u32>> {
        let raw = std::fs::read_to_string(self.pid_file()).ok()?;
        let value: Value = serde_json::from_str(&raw).ok()?;
        value
            .get("pids")?
            .as_array()?
            .iter()
            .map(|v| v.as_u64().map(|pid| pid as u32))
            .collect()
    }

    pub(crate) fn endpoint_exists(&self) -> bool {
        std::fs::symlink_metadata(self.socket_path()).is_ok()
    }

    pub(crate) fn rpc(&self, method: &str) -> Value {
        let stream = wait_for_socket(&self.socket_path());
        let mut reader = BufReader::new(stream);
        send_frame(
            reader.get_mut(),
            json!({ "jsonrpc": "2.0", "id": 1, "method": method }),
        );
        recv_frame(&mut reader)
    }

    pub(crate) fn backend_pid(&self) -> u32 {
        let resp = self.rpc("backend_info");
        resp.pointer("/result/pid")
            .and_then(Value::as_u64)
            .expect("backend_info pid") as u32
    }
}

pub(crate) fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

pub(crate) fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().expect("try_wait") {
            return Some(status);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
}

pub(crate) fn terminate(child: &mut Child) -> ExitStatus {
    stop_with(child, &[nix::sys::signal::Signal::SIGTERM])
}

/// Delivers `signals` back to back, then waits for the process to exit.
pub(crate) fn stop_with(child: &mut Child, signals: &[nix::sys::signal::Signal]) -> ExitStatus {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    for signal in signals {
        kill(Pid::from_raw(child.id() as i32), *signal).expect("send signal");
    }
    match wait_for_exit(child, Duration::from_secs(10)) {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            panic!("process {} ignored {signals:?}", child.id());
        }
    }
}

pub(crate) fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Zombies count as dead: an orphaned backend may wait a while for its new parent to reap it.
pub(crate) fn is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        let state = stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.trim_start().chars().next());
        return !matches!(state, Some('Z') | Some('X'));
    }
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub(crate) fn wait_for_socket(path: &Path) -> UnixStream {
    for _ in 0..200 {
        if let Ok(stream) = UnixStream::connect(path) {
            return stream;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("socket did not become ready");
}

pub(crate) fn send_frame(stream: &mut UnixStream, value: Value) {
    let body = serde_json::to_vec(&value).expect("serialize request");
    write!(stream, "Content-Length: {}\r\n\r\n", body.len()).expect("write header");
    stream.write_all(&body).expect("write body");
    stream.flush().expect("flush request");
}

pub(crate) fn recv_frame(reader: &mut BufReader<UnixStream>) -> Value {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).expect("read header line");
        assert!(read > 0, "unexpected EOF reading response headers");
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some((key, value)) = trimmed.split_once(':')
            && key.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = Some(value.trim().parse().expect("content length"));
        }
    }
    let len = content_length.expect("missing content length");
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).expect("read response body");
    serde_json::from_slice(&body).expect("parse response json")
}

/// Live (non-zombie) processes whose command line mentions `needle`.
pub(crate) fn live_processes_mentioning(needle: &str) -> Vec<u32> {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<u32>().ok())
        .filter(|pid| {
            std::fs::read(format!("/proc/{pid}/cmdline"))
                .map(|raw| String::from_utf8_lossy(&raw).contains(needle))
                .unwrap_or(false)
        })
        .collect()
}
