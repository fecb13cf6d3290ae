#![forbid(unsafe_code)]

use crate::RuntimeConfig;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

const DEFAULT_EXE_NAME: &str = "gm_mcp";
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProcessRole {
    Backend,
    Worker,
}

impl ProcessRole {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Backend => "backend",
            Self::Worker => "worker",
        }
    }
}

/// Executables to try for a role served by this binary. An explicit override is the only
/// candidate; otherwise the running binary, then argv[0], then `gm_mcp` on PATH.
fn exe_candidates(explicit: Option<&PathBuf>) -> Vec<PathBuf> {
    if let Some(exe) = explicit {
        return vec![exe.clone()];
    }
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        candidates.push(exe);
    }
    if let Some(argv0) = std::env::args_os().next() {
        let argv0 = PathBuf::from(argv0);
        if !candidates.iter().any(|p| p == &argv0) {
            candidates.push(argv0);
        }
    }
    let fallback = PathBuf::from(DEFAULT_EXE_NAME);
    if !candidates.iter().any(|p| p == &fallback) {
        candidates.push(fallback);
    }
    candidates
}

fn spawn_first(
    candidates: Vec<PathBuf>,
    mut build: impl FnMut(&PathBuf) -> Command,
) -> std::io::Result<Child> {
    let mut last_err: Option<std::io::Error> = None;
    for exe in candidates {
        match build(&exe).spawn() {
            Ok(child) => return Ok(child),
            Err(err) => {
                tracing::debug!(exe = %exe.display(), error = %err, "spawn candidate failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "spawn failed")))
}

/// Starts the shared backend in its own process group, so a terminal interrupt aimed at one
/// client does not reach a backend other clients still use.
pub(crate) fn spawn_backend(config: &RuntimeConfig) -> std::io::Result<Child> {
    let paths = &config.paths;
    spawn_first(exe_candidates(config.backend_bin.as_ref()), |exe| {
        let mut command = Command::new(exe);
        command
            .arg("--daemon")
            .arg("--app-dir")
            .arg(&paths.app_dir)
            .arg("--socket")
            .arg(&paths.socket_path)
            .arg("--data-file")
            .arg(&paths.data_file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
        command
    })
}

/// Starts this client's own worker. It inherits stdio: the worker owns the client protocol.
pub(crate) fn spawn_worker(config: &RuntimeConfig) -> std::io::Result<Child> {
    if let Some((program, args)) = config
        .worker_command
        .as_ref()
        .and_then(|argv| argv.split_first())
    {
        return Command::new(program).args(args).spawn();
    }

    let paths = &config.paths;
    spawn_first(exe_candidates(None), |exe| {
        let mut command = Command::new(exe);
        command
            .arg("--worker")
            .arg("--app-dir")
            .arg(&paths.app_dir)
            .arg("--socket")
            .arg(&paths.socket_path);
        command
    })
}

/// Sends SIGTERM to `pid`. Failure (e.g. already gone) is logged, never fatal.
pub(crate) fn signal_terminate(pid: u32, role: ProcessRole) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::debug!(pid, role = role.as_str(), error = %err, "SIGTERM not delivered");
    }
}

/// SIGTERM, a short grace period, then SIGKILL. Always reaps the child.
pub(crate) fn terminate_child(mut child: Child, role: ProcessRole) {
    let pid = child.id();
    signal_terminate(pid, role);
    let start = Instant::now();
    while start.elapsed() < TERMINATE_GRACE {
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!(pid, role = role.as_str(), %status, "child exited");
                return;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(25)),
            Err(_) => break,
        }
    }
    let _ = child.kill();
    let _ = child.wait();
    tracing::debug!(pid, role = role.as_str(), "child killed");
}

/// Leaves a still-needed child running. The handle is released without killing or waiting.
pub(crate) fn detach_child(child: Child) {
    tracing::debug!(pid = child.id(), "detaching child");
    drop(child);
}
