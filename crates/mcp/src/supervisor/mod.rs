#![forbid(unsafe_code)]

//! Launcher state machine: register, reuse-or-spawn the shared backend, spawn this client's
//! worker, and tear everything down exactly once.

mod spawn;

use crate::RuntimeConfig;
use crate::probe::HealthProbe;
use gm_core::health::HealthStatus;
use gm_core::phase::SupervisorPhase;
use gm_core::pids::PidSet;
use gm_core::retry::RetryPolicy;
use gm_storage::process::is_process_alive;
use gm_storage::{Endpoint, PidRegistry, StoreError};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

pub(crate) use spawn::ProcessRole;

#[derive(Debug)]
pub(crate) enum LaunchError {
    Registry(StoreError),
    Endpoint(StoreError),
    SpawnFailure {
        role: ProcessRole,
        source: std::io::Error,
    },
    HealthProbeExhausted {
        attempts: u32,
    },
    /// Teardown already ran (signal during startup); nothing more may be started.
    Cancelled,
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(err) => write!(f, "pid registry: {err}"),
            Self::Endpoint(err) => write!(f, "endpoint: {err}"),
            Self::SpawnFailure { role, source } => {
                write!(f, "failed to spawn {}: {source}", role.as_str())
            }
            Self::HealthProbeExhausted { attempts } => {
                write!(f, "backend not healthy after {attempts} attempts")
            }
            Self::Cancelled => write!(f, "launch cancelled by teardown"),
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Registry(err) | Self::Endpoint(err) => Some(err),
            Self::SpawnFailure { source, .. } => Some(source),
            Self::HealthProbeExhausted { .. } | Self::Cancelled => None,
        }
    }
}

/// A backend spawned by this launcher. `healthy` flips once a health check succeeded.
struct OwnedBackend {
    child: Child,
    healthy: bool,
}

pub(crate) struct Supervisor {
    config: RuntimeConfig,
    self_pid: u32,
    registry: PidRegistry,
    endpoint: Endpoint,
    probe: HealthProbe,
    phase: Mutex<SupervisorPhase>,
    /// Filled right after spawn, before the health wait. Reused backends are never owned.
    backend: Mutex<Option<OwnedBackend>>,
    /// 0 until the worker is running.
    worker_pid: AtomicU32,
    /// One-shot teardown guard. Held for the whole teardown so a concurrent caller waits for
    /// it to finish instead of exiting the process halfway through.
    torn_down: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Supervisor {
    pub(crate) fn new(config: RuntimeConfig) -> Self {
        Self::with_pid(config, std::process::id())
    }

    fn with_pid(config: RuntimeConfig, self_pid: u32) -> Self {
        let registry = PidRegistry::new(&config.paths.pid_file);
        let endpoint = Endpoint::new(&config.paths.socket_path);
        let probe = HealthProbe::new(&config.paths.socket_path, config.probe_timeout);
        Self {
            config,
            self_pid,
            registry,
            endpoint,
            probe,
            phase: Mutex::new(SupervisorPhase::NoBackend),
            backend: Mutex::new(None),
            worker_pid: AtomicU32::new(0),
            torn_down: Mutex::new(false),
        }
    }

    pub(crate) fn phase(&self) -> SupervisorPhase {
        *lock(&self.phase)
    }

    pub(crate) fn owns_backend(&self) -> bool {
        lock(&self.backend).is_some()
    }

    fn enter(&self, next: SupervisorPhase) {
        let mut phase = lock(&self.phase);
        let from = *phase;
        match phase.advance(next) {
            Ok(()) => tracing::debug!(from = from.as_str(), to = next.as_str(), "supervisor phase"),
            Err(err) => tracing::warn!(error = %err, "ignored supervisor transition"),
        }
    }

    /// Registers this client, makes sure a healthy backend is reachable, then starts the
    /// worker. Any failure deregisters before returning, so the caller can exit right away.
    /// Returns `Cancelled` when a concurrent teardown won; whatever this call started by then
    /// is stopped.
    pub(crate) fn start(&self) -> Result<Child, LaunchError> {
        self.registry
            .add(self.self_pid)
            .map_err(LaunchError::Registry)?;
        tracing::info!(pid = self.self_pid, "client registered");
        if self.is_torn_down() {
            // Teardown ran before the entry existed.
            if let Err(err) = self.registry.remove(self.self_pid, is_process_alive) {
                tracing::warn!(error = %err, "failed to deregister cancelled client");
            }
            return Err(LaunchError::Cancelled);
        }

        if let Err(err) = self.ensure_backend() {
            self.teardown();
            return Err(err);
        }
        if self.is_torn_down() {
            return Err(LaunchError::Cancelled);
        }

        let worker = match spawn::spawn_worker(&self.config) {
            Ok(worker) => worker,
            Err(source) => {
                self.teardown();
                return Err(LaunchError::SpawnFailure {
                    role: ProcessRole::Worker,
                    source,
                });
            }
        };
        self.worker_pid.store(worker.id(), Ordering::SeqCst);
        if self.is_torn_down() {
            self.worker_pid.store(0, Ordering::SeqCst);
            spawn::terminate_child(worker, ProcessRole::Worker);
            return Err(LaunchError::Cancelled);
        }
        self.enter(SupervisorPhase::Running);
        tracing::info!(
            worker_pid = worker.id(),
            owns_backend = self.owns_backend(),
            "worker started"
        );
        Ok(worker)
    }

    /// Blocks while a teardown is in progress, so `true` means it has fully finished.
    fn is_torn_down(&self) -> bool {
        *lock(&self.torn_down)
    }

    fn ensure_backend(&self) -> Result<(), LaunchError> {
        if !self.endpoint.exists() {
            self.enter(SupervisorPhase::StartingBackend);
            return self.start_backend();
        }

        self.enter(SupervisorPhase::ProbingExisting);
        match self.probe.check() {
            HealthStatus::Healthy => {
                self.enter(SupervisorPhase::Reuse);
                tracing::info!(socket = %self.endpoint.path().display(), "reusing running backend");
                self.enter(SupervisorPhase::BackendHealthy);
                Ok(())
            }
            _ => {
                tracing::warn!(socket = %self.endpoint.path().display(), "stale endpoint; starting a new backend");
                self.endpoint
                    .clear_if_stale()
                    .map_err(LaunchError::Endpoint)?;
                self.enter(SupervisorPhase::StartingBackend);
                self.start_backend()
            }
        }
    }

    fn start_backend(&self) -> Result<(), LaunchError> {
        self.endpoint
            .ensure_directory()
            .map_err(LaunchError::Endpoint)?;
        self.endpoint
            .clear_if_stale()
            .map_err(LaunchError::Endpoint)?;

        let child = spawn::spawn_backend(&self.config).map_err(|source| {
            LaunchError::SpawnFailure {
                role: ProcessRole::Backend,
                source,
            }
        })?;
        let backend_pid = child.id();
        tracing::info!(backend_pid, "backend spawned");
        *lock(&self.backend) = Some(OwnedBackend {
            child,
            healthy: false,
        });

        let policy = self.config.health_policy;
        match self.probe.wait_until_healthy(policy) {
            HealthStatus::Healthy => {
                match lock(&self.backend).as_mut() {
                    Some(owned) => owned.healthy = true,
                    None => return Err(LaunchError::Cancelled),
                }
                self.enter(SupervisorPhase::BackendHealthy);
                tracing::info!(backend_pid, "backend healthy");
                Ok(())
            }
            _ => {
                tracing::error!(
                    backend_pid,
                    attempts = policy.max_attempts(),
                    interval_ms = policy.interval().as_millis() as u64,
                    "backend never became healthy"
                );
                if let Some(owned) = lock(&self.backend).take() {
                    spawn::terminate_child(owned.child, ProcessRole::Backend);
                }
                Err(LaunchError::HealthProbeExhausted {
                    attempts: policy.max_attempts(),
                })
            }
        }
    }

    /// Deregisters this client and, when it was the last one, stops the owned backend and
    /// removes the endpoint. Runs at most once; later calls return `None` after waiting for
    /// the first one to finish.
    pub(crate) fn teardown(&self) -> Option<PidSet> {
        let mut done = lock(&self.torn_down);
        if *done {
            tracing::debug!("teardown already ran");
            return None;
        }
        *done = true;
        self.enter(SupervisorPhase::ShuttingDown);

        let remaining = match self.registry.remove(self.self_pid, is_process_alive) {
            Ok(remaining) => Some(remaining),
            Err(err) => {
                tracing::error!(error = %err, "failed to deregister client");
                None
            }
        };
        let last_out = remaining.as_ref().is_some_and(PidSet::is_empty);
        let backend = lock(&self.backend).take();

        match backend {
            Some(owned) if last_out || !owned.healthy => {
                tracing::info!(
                    backend_pid = owned.child.id(),
                    healthy = owned.healthy,
                    last_out,
                    "stopping owned backend"
                );
                spawn::terminate_child(owned.child, ProcessRole::Backend);
            }
            Some(owned) => {
                tracing::info!(
                    backend_pid = owned.child.id(),
                    clients = ?remaining.as_ref().map(PidSet::len),
                    "other clients remain; leaving backend running"
                );
                spawn::detach_child(owned.child);
            }
            None => {}
        }
        if last_out && let Err(err) = self.endpoint.remove_if_present() {
            tracing::warn!(error = %err, "failed to remove endpoint");
        }

        remaining
    }

    /// Signal path: teardown, then stop the worker.
    pub(crate) fn cancel(&self) {
        self.teardown();
        let worker_pid = self.worker_pid.swap(0, Ordering::SeqCst);
        if worker_pid != 0 {
            spawn::signal_terminate(worker_pid, ProcessRole::Worker);
        }
    }

    pub(crate) fn on_worker_exit(&self, status: ExitStatus) {
        self.worker_pid.store(0, Ordering::SeqCst);
        tracing::info!(%status, phase = self.phase().as_str(), "worker exited");
        self.teardown();
    }
}
