#![forbid(unsafe_code)]

#[cfg(unix)]
mod entry;
#[cfg(unix)]
mod probe;
#[cfg(unix)]
mod supervisor;
mod support;

pub(crate) use support::*;

use tracing_subscriber::EnvFilter;

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "gm_mcp=info,gm_storage=info";

fn usage() -> &'static str {
    "gm_mcp: shared graph-memory backend launcher\n\n\
USAGE:\n\
  gm_mcp [--app-dir DIR] [--socket PATH] [--data-file PATH] [--backend-bin EXE] [-- CMD ARGS...]\n\
  gm_mcp --daemon [--socket PATH] [--data-file PATH]\n\
  gm_mcp --worker [--socket PATH]\n\
\n\
FLAGS:\n\
  -h, --help       Print this help and exit\n\
  -V, --version    Print version and exit\n\
\n\
ENV:\n\
  GRAPH_MEMORY_DIR, GRAPH_MEMORY_SOCKET, GRAPH_MEMORY_FILE, GRAPH_MEMORY_BACKEND_BIN,\n\
  GRAPH_MEMORY_HEALTH_ATTEMPTS, GRAPH_MEMORY_HEALTH_INTERVAL_MS, GRAPH_MEMORY_PROBE_TIMEOUT_MS,\n\
  RUST_LOG (default: gm_mcp=info,gm_storage=info)\n"
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // stdout carries the worker protocol; logs always go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let own_flags = args.iter().take_while(|arg| arg.as_str() != "--");
    for arg in own_flags {
        match arg.as_str() {
            "-h" | "--help" => {
                print!("{}", usage());
                return Ok(());
            }
            "-V" | "--version" => {
                println!("gm_mcp {SERVER_VERSION}");
                return Ok(());
            }
            _ => {}
        }
    }

    init_logging();
    let config = RuntimeConfig::from_process();
    install_crash_reporter(config.paths.app_dir.clone(), config.mode.as_str());

    let app_dir = config.paths.app_dir.clone();
    let mode = config.mode;
    let result = run(config);
    if let Err(err) = &result {
        tracing::error!(mode = mode.as_str(), error = %err, "fatal");
        write_last_crash(&app_dir, mode.as_str(), "error", &format!("{err:?}"));
    }
    result
}

#[cfg(unix)]
fn run(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.mode {
        Mode::Daemon => entry::run_socket_daemon(entry::DaemonConfig {
            socket_path: config.paths.socket_path,
            data_file: config.paths.data_file,
        }),
        Mode::Worker => entry::run_worker(entry::WorkerConfig {
            socket_path: config.paths.socket_path,
        }),
        Mode::Launcher => run_launcher(config),
    }
}

#[cfg(not(unix))]
fn run(_config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error>> {
    Err("gm_mcp is only supported on unix targets".into())
}

/// Exit codes: 0 after a clean teardown (worker exit or SIGINT/SIGTERM), 1 when the launch
/// itself fails (returned error).
#[cfg(unix)]
fn run_launcher(config: RuntimeConfig) -> Result<(), Box<dyn std::error::Error>> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::sync::Arc;

    let supervisor = Arc::new(supervisor::Supervisor::new(config));

    // Registered before startup so an interrupt mid-launch still deregisters.
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let for_signals = Arc::clone(&supervisor);
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            tracing::info!(signal, "termination signal received");
            for_signals.cancel();
            std::process::exit(0);
        }
    });

    let mut worker = match supervisor.start() {
        Ok(worker) => worker,
        // The signal thread finished teardown and is exiting the process.
        Err(supervisor::LaunchError::Cancelled) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    match worker.wait() {
        Ok(status) => {
            supervisor.on_worker_exit(status);
            Ok(())
        }
        Err(err) => {
            supervisor.teardown();
            Err(err.into())
        }
    }
}
