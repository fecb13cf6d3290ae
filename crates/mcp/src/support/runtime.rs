#![forbid(unsafe_code)]

use gm_core::retry::RetryPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub(crate) const APP_DIR_NAME: &str = ".graph_memory";
pub(crate) const SOCKET_FILE_NAME: &str = "graph_memory.sock";
pub(crate) const DATA_FILE_NAME: &str = "memory.jsonl";

pub(crate) const ENV_APP_DIR: &str = "GRAPH_MEMORY_DIR";
pub(crate) const ENV_SOCKET: &str = "GRAPH_MEMORY_SOCKET";
pub(crate) const ENV_DATA_FILE: &str = "GRAPH_MEMORY_FILE";
pub(crate) const ENV_BACKEND_BIN: &str = "GRAPH_MEMORY_BACKEND_BIN";
pub(crate) const ENV_HEALTH_ATTEMPTS: &str = "GRAPH_MEMORY_HEALTH_ATTEMPTS";
pub(crate) const ENV_HEALTH_INTERVAL_MS: &str = "GRAPH_MEMORY_HEALTH_INTERVAL_MS";
pub(crate) const ENV_PROBE_TIMEOUT_MS: &str = "GRAPH_MEMORY_PROBE_TIMEOUT_MS";

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Mode {
    Launcher,
    Daemon,
    Worker,
}

impl Mode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Launcher => "launcher",
            Self::Daemon => "daemon",
            Self::Worker => "worker",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct AppPaths {
    pub(crate) app_dir: PathBuf,
    pub(crate) socket_path: PathBuf,
    pub(crate) pid_file: PathBuf,
    pub(crate) data_file: PathBuf,
}

impl AppPaths {
    fn resolve(app_dir: PathBuf, socket_path: Option<PathBuf>, data_file: Option<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.unwrap_or_else(|| app_dir.join(SOCKET_FILE_NAME)),
            pid_file: app_dir.join(gm_storage::PID_FILE_NAME),
            data_file: data_file.unwrap_or_else(|| app_dir.join(DATA_FILE_NAME)),
            app_dir,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) mode: Mode,
    pub(crate) paths: AppPaths,
    /// Explicit backend executable. When unset the launcher tries its own binary.
    pub(crate) backend_bin: Option<PathBuf>,
    /// Everything after `--`: replaces the default `--worker` proxy.
    pub(crate) worker_command: Option<Vec<String>>,
    pub(crate) health_policy: RetryPolicy,
    pub(crate) probe_timeout: Duration,
}

impl RuntimeConfig {
    pub(crate) fn from_process() -> Self {
        let args = std::env::args().skip(1).collect::<Vec<_>>();
        Self::from_sources(&args, |key| std::env::var(key).ok())
    }

    /// CLI flags win over environment, environment wins over defaults.
    pub(crate) fn from_sources<E>(args: &[String], env: E) -> Self
    where
        E: Fn(&str) -> Option<String>,
    {
        let (flags, worker_command) = split_worker_command(args);

        let mode = if has_flag(flags, "--daemon") {
            Mode::Daemon
        } else if has_flag(flags, "--worker") {
            Mode::Worker
        } else {
            Mode::Launcher
        };

        let app_dir = flag_value(flags, "--app-dir")
            .or_else(|| non_empty(env(ENV_APP_DIR)))
            .map(PathBuf::from)
            .unwrap_or_else(|| default_app_dir(env("HOME").as_deref()));
        let socket_path = flag_value(flags, "--socket")
            .or_else(|| non_empty(env(ENV_SOCKET)))
            .map(PathBuf::from);
        let data_file = flag_value(flags, "--data-file")
            .or_else(|| non_empty(env(ENV_DATA_FILE)))
            .map(PathBuf::from);
        let backend_bin = flag_value(flags, "--backend-bin")
            .or_else(|| non_empty(env(ENV_BACKEND_BIN)))
            .map(PathBuf::from);

        let attempts = parse_positive_u64(env(ENV_HEALTH_ATTEMPTS))
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(RetryPolicy::DEFAULT_MAX_ATTEMPTS);
        let interval = parse_positive_u64(env(ENV_HEALTH_INTERVAL_MS))
            .map(Duration::from_millis)
            .unwrap_or(RetryPolicy::DEFAULT_INTERVAL);
        let probe_timeout = parse_positive_u64(env(ENV_PROBE_TIMEOUT_MS))
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_PROBE_TIMEOUT);

        Self {
            mode,
            paths: AppPaths::resolve(app_dir, socket_path, data_file),
            backend_bin,
            worker_command,
            health_policy: RetryPolicy::new(attempts, interval),
            probe_timeout,
        }
    }
}

fn split_worker_command(args: &[String]) -> (&[String], Option<Vec<String>>) {
    match args.iter().position(|arg| arg == "--") {
        Some(idx) => {
            let rest = &args[idx + 1..];
            let command = (!rest.is_empty()).then(|| rest.to_vec());
            (&args[..idx], command)
        }
        None => (args, None),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag
            && let Some(value) = iter.next()
        {
            return Some(value.clone());
        }
    }
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_positive_u64(value: Option<String>) -> Option<u64> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn default_app_dir(home: Option<&str>) -> PathBuf {
    match home.map(str::trim).filter(|h| !h.is_empty()) {
        Some(home) => Path::new(home).join(APP_DIR_NAME),
        None => std::env::temp_dir().join("graph_memory"),
    }
}
